pub mod dispatcher;
pub mod error;
pub mod matchmaker;
pub mod robots;
pub mod simulator;
pub mod tournament;

pub use dispatcher::{DispatchSummary, Dispatcher, Job, JobReport, JobStatus};
pub use error::{ArenaError, Result};
pub use matchmaker::{FewestBattles, Matchmaker, PriorityStrategy, RoundRobin};
pub use simulator::{BattleReport, BattleSpec, RobocodeConfig, RobocodeSimulator, Simulator, SimulatorError};
pub use tournament::{RoundSummary, Tournament};
