//! Durable tournament state: robots, battles and battle participation.
//!
//! All writes go through the repositories, which enforce the battle
//! lifecycle (`scheduled` -> `running` -> `finished`) and the obsolescence
//! rules. Callers only ever receive owned snapshots of the stored records.

pub mod dto;
pub mod error;
pub mod models;
pub mod repository;

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::debug;

pub use error::{ErrorKind, Result, StorageError, TransitionError};
pub use repository::{BattleRepository, RobotRepository, SyncAction};

/// Handle to one tournament database.
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the tournament at `url`, e.g.
    /// `sqlite://arena.sqlite3`.
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        debug!("Opened tournament database {}", url);
        Ok(Self { pool })
    }

    /// A private in-memory tournament, mostly for tests.
    ///
    /// The pool holds a single connection that is never recycled, since every
    /// new in-memory connection would see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn robots(&self) -> RobotRepository<'_> {
        RobotRepository::new(&self.pool)
    }

    pub fn battles(&self) -> BattleRepository<'_> {
        BattleRepository::new(&self.pool)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
