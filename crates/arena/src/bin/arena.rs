use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arena::matchmaker::{FewestBattles, Matchmaker, PriorityStrategy, RoundRobin};
use arena::robots::sync_robots;
use arena::{RobocodeConfig, RobocodeSimulator, Tournament};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand, ValueEnum};
use storage::Database;
use storage::models::timestamp;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "arena")]
#[command(about = "Round-robin Robocode tournament runner", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://arena.sqlite3", global = true)]
    database_url: String,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    simulator: SimulatorArgs,
}

#[derive(clap::Args)]
struct SimulatorArgs {
    /// Robocode installation directory
    #[arg(long, env = "ROBOCODE_DIR", default_value = "robocode", global = true)]
    robocode_dir: PathBuf,

    /// Directory holding robots, battles, results and recordings
    #[arg(long, env = "ARENA_DIR", default_value = ".", global = true)]
    arena_dir: PathBuf,

    #[arg(long, env = "JAVA", default_value = "java", global = true)]
    java: PathBuf,

    /// Wall-clock limit for a single battle
    #[arg(long, default_value_t = 60, global = true)]
    timeout_secs: u64,

    /// Worker count; defaults to the available parallelism minus headroom
    #[arg(long, global = true)]
    workers: Option<usize>,
}

impl SimulatorArgs {
    fn config(&self) -> RobocodeConfig {
        RobocodeConfig::new(&self.robocode_dir, &self.arena_dir)
            .with_java(&self.java)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register new robots and record changed ones
    SyncRobots,
    /// Mark a robot as changed
    Touch {
        name: String,

        /// When it changed, e.g. 2015-06-01T12:00:00; defaults to now
        #[arg(long, value_parser = parse_at)]
        at: Option<NaiveDateTime>,
    },
    /// Flag finished battles whose robots changed since
    Obsolesce,
    /// List matchups that still need a valid battle
    Pending {
        #[arg(long, value_enum, default_value_t = Strategy::RoundRobin)]
        strategy: Strategy,
    },
    /// Sync robots, then schedule and run battles
    Run {
        #[arg(long, default_value_t = 1)]
        rounds: usize,

        /// Most battles to schedule per round
        #[arg(long)]
        batch: Option<usize>,

        #[arg(long, value_enum, default_value_t = Strategy::RoundRobin)]
        strategy: Strategy,
    },
    /// Show robot and battle totals
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    RoundRobin,
    FewestBattles,
}

impl Strategy {
    fn build(self) -> Arc<dyn PriorityStrategy> {
        match self {
            Strategy::RoundRobin => Arc::new(RoundRobin),
            Strategy::FewestBattles => Arc::new(FewestBattles),
        }
    }
}

fn parse_at(raw: &str) -> Result<NaiveDateTime, String> {
    timestamp::parse_timestamp(Some(raw))
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "empty timestamp".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("arena={},storage={}", log_level, log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = Database::new(&cli.database_url)
        .await
        .with_context(|| format!("cannot open {}", cli.database_url))?;
    db.run_migrations().await.context("cannot migrate tournament database")?;

    let outcome = match cli.command {
        Commands::SyncRobots => handle_sync(&db, &cli.simulator).await,
        Commands::Touch { name, at } => handle_touch(&db, &name, at).await,
        Commands::Obsolesce => handle_obsolesce(&db).await,
        Commands::Pending { strategy } => handle_pending(&db, strategy).await,
        Commands::Run {
            rounds,
            batch,
            strategy,
        } => handle_run(&db, &cli.simulator, rounds, batch, strategy).await,
        Commands::Status => handle_status(&db).await,
    };

    db.close().await;
    outcome
}

async fn handle_sync(db: &Database, args: &SimulatorArgs) -> Result<()> {
    let config = args.config();
    tracing::info!("Scanning robots in {}", config.robots_dir.display());

    let report = sync_robots(db, &config.robots_dir).await?;
    tracing::info!(
        "{} new, {} updated, {} unchanged",
        report.created.len(),
        report.updated.len(),
        report.unchanged
    );
    Ok(())
}

async fn handle_touch(db: &Database, name: &str, at: Option<NaiveDateTime>) -> Result<()> {
    let robot = db.robots().find_by_name(name).await?;
    let robot = db.robots().touch(robot.robot_id, at).await?;

    tracing::info!(
        "{} last updated {}",
        robot.name,
        timestamp::format_optional(robot.last_updated.as_ref())
    );
    Ok(())
}

async fn handle_obsolesce(db: &Database) -> Result<()> {
    let marked = db.battles().obsolesce_finished().await?;
    tracing::info!("{} battle(s) marked obsolete", marked);
    Ok(())
}

async fn handle_pending(db: &Database, strategy: Strategy) -> Result<()> {
    let names: BTreeMap<i64, String> = db
        .robots()
        .list()
        .await?
        .into_iter()
        .map(|robot| (robot.robot_id, robot.name))
        .collect();

    let pending = Matchmaker::with_strategy(db, strategy.build())
        .pending_work()
        .await?;
    if pending.is_empty() {
        tracing::info!("Every matchup has a valid battle");
        return Ok(());
    }

    tracing::info!("{} matchup(s) pending:", pending.len());
    for matchup in pending {
        let [a, b] = matchup.robot_ids();
        tracing::info!(
            "  {} vs {}",
            names.get(&a).map_or("?", String::as_str),
            names.get(&b).map_or("?", String::as_str)
        );
    }
    Ok(())
}

async fn handle_run(
    db: &Database,
    args: &SimulatorArgs,
    rounds: usize,
    batch: Option<usize>,
    strategy: Strategy,
) -> Result<()> {
    let config = args.config();
    sync_robots(db, &config.robots_dir)
        .await
        .context("robot sync failed")?;

    let simulator = RobocodeSimulator::new(config);
    simulator
        .prepare()
        .await
        .context("cannot create arena directories")?;

    let mut tournament =
        Tournament::new(db.clone(), Arc::new(simulator)).with_strategy(strategy.build());
    if let Some(workers) = args.workers {
        tournament = tournament.with_workers(workers);
    }
    if let Some(batch) = batch {
        tournament = tournament.with_batch_size(batch);
    }

    let summaries = tournament.run(rounds).await?;

    let completed: usize = summaries.iter().map(|s| s.dispatch.completed()).sum();
    let submitted: usize = summaries.iter().map(|s| s.dispatch.submitted).sum();
    let worker_errors: usize = summaries.iter().map(|s| s.dispatch.worker_errors.len()).sum();
    tracing::info!(
        "{} round(s): {} of {} battle(s) completed",
        summaries.len(),
        completed,
        submitted
    );

    if worker_errors > 0 {
        anyhow::bail!("{} worker(s) stopped on simulator failures", worker_errors);
    }
    Ok(())
}

async fn handle_status(db: &Database) -> Result<()> {
    let robots = db.robots().list().await?;
    let counts = db.battles().counts().await?;

    tracing::info!("Robots: {}", robots.len());
    tracing::info!(
        "Battles: {} scheduled, {} running, {} finished ({} obsolete)",
        counts.scheduled,
        counts.running,
        counts.finished,
        counts.obsolete
    );
    Ok(())
}
