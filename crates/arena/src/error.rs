use thiserror::Error;

use crate::simulator::SimulatorError;

pub type Result<T> = std::result::Result<T, ArenaError>;

#[derive(Error, Debug)]
pub enum ArenaError {
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Simulator error: {0}")]
    Simulator(#[from] SimulatorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker {worker} stopped on battle {battle_id}: {message}")]
    WorkerFatal {
        worker: usize,
        battle_id: i64,
        message: String,
    },

    #[error("No workers left to accept battle {0}")]
    PoolClosed(i64),

    #[error("Robot discovery error: {0}")]
    Discovery(String),
}
