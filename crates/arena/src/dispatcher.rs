//! Worker pool that runs scheduled battles.
//!
//! The coordinator feeds [`Job`]s into a shared queue; every worker takes one
//! job at a time, claims the battle in the store, runs the simulator and
//! commits the outcome. Each job yields exactly one [`JobReport`] on the
//! result queue, whatever happened to it.

use std::sync::Arc;

use storage::{Database, ErrorKind, StorageError};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ArenaError, Result};
use crate::simulator::{BattleSpec, Simulator, SimulatorError};

#[derive(Debug)]
pub enum Job {
    Battle(BattleSpec),
    /// Stop after the jobs queued before this one
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Completed { winner: String },
    /// Simulator ran out of time; the battle stays `running`
    TimedOut,
    /// Simulator failed; the worker that ran it has stopped
    Failed(String),
    /// The store refused a transition or the outcome
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub battle_id: i64,
    pub status: JobStatus,
}

impl JobReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, JobStatus::Completed { .. })
    }
}

#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub submitted: usize,
    /// Reports collected by `finish`, after those already taken by
    /// `poll_results`
    pub reports: Vec<JobReport>,
    pub polled: usize,
    /// Completed battles among the polled reports
    pub polled_completed: usize,
    pub worker_errors: Vec<String>,
}

impl DispatchSummary {
    pub fn received(&self) -> usize {
        self.polled + self.reports.len()
    }

    /// Every submitted job reported back.
    pub fn is_complete(&self) -> bool {
        self.received() == self.submitted
    }

    /// Completed battles across polled and collected reports.
    pub fn completed(&self) -> usize {
        self.polled_completed + self.reports.iter().filter(|r| r.is_completed()).count()
    }
}

/// Workers to start by default: the available parallelism, keeping some
/// headroom on larger machines for the coordinator and the database.
pub fn recommended_workers() -> usize {
    workers_for(
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    )
}

fn workers_for(cpus: usize) -> usize {
    let reserved = if cpus > 12 {
        2
    } else if cpus > 6 {
        1
    } else {
        0
    };
    (cpus - reserved).max(1)
}

pub struct Dispatcher {
    jobs: UnboundedSender<Job>,
    reports: UnboundedReceiver<JobReport>,
    workers: Vec<JoinHandle<Result<()>>>,
    submitted: usize,
    pending: usize,
    polled: usize,
    polled_completed: usize,
}

impl Dispatcher {
    /// Start `workers` workers sharing `db` and `simulator`.
    pub fn start(db: Database, simulator: Arc<dyn Simulator>, workers: usize) -> Self {
        let workers = workers.max(1);
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let handles = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    db: db.clone(),
                    simulator: Arc::clone(&simulator),
                    jobs: Arc::clone(&job_rx),
                    reports: report_tx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!("Started {} worker(s) with the {} simulator", workers, simulator.name());

        Self {
            jobs: job_tx,
            reports: report_rx,
            workers: handles,
            submitted: 0,
            pending: 0,
            polled: 0,
            polled_completed: 0,
        }
    }

    /// Queue a battle. Fails only when every worker has stopped.
    pub fn submit(&mut self, spec: BattleSpec) -> Result<()> {
        let battle_id = spec.battle_id;
        self.jobs
            .send(Job::Battle(spec))
            .map_err(|_| ArenaError::PoolClosed(battle_id))?;
        self.submitted += 1;
        self.pending += 1;
        debug!(battle_id, "Battle queued ({} pending)", self.pending);
        Ok(())
    }

    /// Number of workers still alive.
    pub fn running(&self) -> usize {
        self.workers.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Reports that arrived since the last call, without waiting.
    pub fn poll_results(&mut self) -> Vec<JobReport> {
        let mut reports = Vec::new();
        while let Ok(report) = self.reports.try_recv() {
            reports.push(report);
        }
        self.pending = self.pending.saturating_sub(reports.len());
        self.polled += reports.len();
        self.polled_completed += reports.iter().filter(|r| r.is_completed()).count();
        reports
    }

    /// Stop the workers once the queue drains and wait for them.
    ///
    /// Returns when every submitted job has reported, or earlier if all
    /// workers died with jobs left in the queue.
    pub async fn finish(mut self) -> DispatchSummary {
        for _ in 0..self.workers.len() {
            // Only fails when no worker is left to stop.
            let _ = self.jobs.send(Job::Shutdown);
        }

        let mut reports = Vec::new();
        while self.pending > 0 {
            match self.reports.recv().await {
                Some(report) => {
                    self.pending -= 1;
                    reports.push(report);
                }
                None => {
                    error!("All workers stopped with {} job(s) unreported", self.pending);
                    break;
                }
            }
        }

        let mut worker_errors = Vec::new();
        for handle in self.workers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("{}", e);
                    worker_errors.push(e.to_string());
                }
                Err(e) => {
                    error!("Worker crashed: {}", e);
                    worker_errors.push(format!("worker crashed: {}", e));
                }
            }
        }

        DispatchSummary {
            submitted: self.submitted,
            reports,
            polled: self.polled,
            polled_completed: self.polled_completed,
            worker_errors,
        }
    }
}

struct Worker {
    id: usize,
    db: Database,
    simulator: Arc<dyn Simulator>,
    jobs: Arc<Mutex<UnboundedReceiver<Job>>>,
    reports: UnboundedSender<JobReport>,
}

/// Result of one job: the report and, for failures that end the worker, the
/// reason.
type JobResult = (JobStatus, Option<String>);

impl Worker {
    async fn run(self) -> Result<()> {
        debug!(worker = self.id, "Worker started");

        loop {
            let job = self.jobs.lock().await.recv().await;
            let spec = match job {
                Some(Job::Battle(spec)) => spec,
                Some(Job::Shutdown) | None => break,
            };

            let battle_id = spec.battle_id;
            let (status, fatal) = self.execute(&spec).await;

            // The coordinator may already be gone; the store has the outcome.
            let _ = self.reports.send(JobReport { battle_id, status });

            if let Some(message) = fatal {
                return Err(ArenaError::WorkerFatal {
                    worker: self.id,
                    battle_id,
                    message,
                });
            }
        }

        debug!(worker = self.id, "Worker stopped");
        Ok(())
    }

    async fn execute(&self, spec: &BattleSpec) -> JobResult {
        let battle_id = spec.battle_id;

        if let Err(e) = self.db.battles().mark_running(battle_id).await {
            warn!(battle_id, worker = self.id, "Cannot start battle: {}", e);
            return storage_failure(e);
        }

        let report = match self.simulator.run(spec).await {
            Ok(report) => report,
            Err(SimulatorError::Timeout { after, .. }) => {
                warn!(
                    battle_id,
                    worker = self.id,
                    "Battle timed out after {:?}, left running",
                    after
                );
                return (JobStatus::TimedOut, None);
            }
            Err(e) => {
                error!(battle_id, worker = self.id, "Simulator failed: {}", e);
                let message = e.to_string();
                return (JobStatus::Failed(message.clone()), Some(message));
            }
        };

        match self.db.battles().complete(battle_id, &report.into_outcome()).await {
            Ok(battle) => {
                let winner = battle.winner_name().unwrap_or_default().to_string();
                info!(battle_id, worker = self.id, "Battle won by {}", winner);
                (JobStatus::Completed { winner }, None)
            }
            Err(e) => {
                error!(battle_id, worker = self.id, "Cannot record outcome: {}", e);
                storage_failure(e)
            }
        }
    }
}

fn storage_failure(e: StorageError) -> JobResult {
    let message = e.to_string();
    match e.kind() {
        ErrorKind::Fatal => (JobStatus::Rejected(message.clone()), Some(message)),
        _ => (JobStatus::Rejected(message), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workers_for_reserves_headroom() {
        assert_eq!(workers_for(1), 1);
        assert_eq!(workers_for(6), 6);
        assert_eq!(workers_for(7), 6);
        assert_eq!(workers_for(12), 11);
        assert_eq!(workers_for(13), 11);
        assert_eq!(workers_for(32), 30);
    }

    #[test]
    fn test_recommended_workers_fits_host() {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        assert_eq!(recommended_workers(), workers_for(cpus));
    }

    #[test]
    fn test_summary_counts() {
        let summary = DispatchSummary {
            submitted: 3,
            reports: vec![
                JobReport {
                    battle_id: 1,
                    status: JobStatus::Completed {
                        winner: "a.A".to_string(),
                    },
                },
                JobReport {
                    battle_id: 2,
                    status: JobStatus::TimedOut,
                },
            ],
            polled: 1,
            polled_completed: 1,
            worker_errors: Vec::new(),
        };

        assert_eq!(summary.received(), 3);
        assert!(summary.is_complete());
        assert_eq!(summary.completed(), 2);
    }
}
