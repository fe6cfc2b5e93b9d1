use std::sync::Arc;

use storage::Database;
use storage::models::BattleProperties;
use tracing::{info, warn};

use crate::dispatcher::{DispatchSummary, Dispatcher, recommended_workers};
use crate::error::Result;
use crate::matchmaker::{Matchmaker, PriorityStrategy, RoundRobin};
use crate::simulator::{BattleSpec, Simulator};

/// Outcome of one scheduling and dispatch round.
#[derive(Debug, Default)]
pub struct RoundSummary {
    /// Finished battles invalidated at the start of the round
    pub obsoleted: u64,
    /// Battles created by this round
    pub scheduled: usize,
    pub dispatch: DispatchSummary,
}

impl RoundSummary {
    /// Whether the round had anything to run.
    pub fn is_idle(&self) -> bool {
        self.dispatch.submitted == 0
    }
}

/// Runs rounds of the tournament: invalidate, schedule, dispatch.
pub struct Tournament {
    db: Database,
    simulator: Arc<dyn Simulator>,
    strategy: Arc<dyn PriorityStrategy>,
    workers: usize,
    properties: Option<BattleProperties>,
    batch_size: Option<usize>,
}

impl Tournament {
    pub fn new(db: Database, simulator: Arc<dyn Simulator>) -> Self {
        Self {
            db,
            simulator,
            strategy: Arc::new(RoundRobin),
            workers: recommended_workers(),
            properties: None,
            batch_size: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn PriorityStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Properties for newly scheduled battles instead of the defaults.
    pub fn with_properties(mut self, properties: BattleProperties) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Cap on battles scheduled per round.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn matchmaker(&self) -> Matchmaker<'_> {
        Matchmaker::with_strategy(&self.db, Arc::clone(&self.strategy))
    }

    /// One round: mark stale results obsolete, schedule what is pending,
    /// run every scheduled battle and wait for all of them.
    pub async fn run_round(&self) -> Result<RoundSummary> {
        let obsoleted = self.db.battles().obsolesce_finished().await?;

        let scheduled = self
            .matchmaker()
            .schedule_pending(self.batch_size, self.properties.as_ref())
            .await?
            .len();

        let backlog = self.db.battles().scheduled().await?;
        if backlog.is_empty() {
            info!("Nothing to run");
            return Ok(RoundSummary {
                obsoleted,
                scheduled,
                dispatch: DispatchSummary::default(),
            });
        }

        info!(
            "Running {} battle(s) on {} worker(s)",
            backlog.len(),
            self.workers.min(backlog.len())
        );
        let mut dispatcher = Dispatcher::start(
            self.db.clone(),
            Arc::clone(&self.simulator),
            self.workers.min(backlog.len()),
        );
        for battle in &backlog {
            if let Err(e) = dispatcher.submit(BattleSpec::from_battle(battle)) {
                warn!("{}", e);
                break;
            }
        }

        let dispatch = dispatcher.finish().await;
        info!(
            "Round done: {} of {} battle(s) completed, {} worker error(s)",
            dispatch.completed(),
            dispatch.submitted,
            dispatch.worker_errors.len()
        );

        Ok(RoundSummary {
            obsoleted,
            scheduled,
            dispatch,
        })
    }

    /// Run up to `max_rounds` rounds, stopping early once a round has
    /// nothing to run or completes nothing.
    pub async fn run(&self, max_rounds: usize) -> Result<Vec<RoundSummary>> {
        let mut rounds = Vec::new();
        for round in 1..=max_rounds {
            info!("Round {}", round);
            let summary = self.run_round().await?;
            let stalled = summary.is_idle() || summary.dispatch.completed() == 0;
            rounds.push(summary);
            if stalled {
                break;
            }
        }
        Ok(rounds)
    }
}
