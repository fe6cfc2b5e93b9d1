pub mod battle;
pub mod robot;

pub use battle::{BattleCounts, BattleFilter, BattleOutcome, CompetitorResult};
pub use robot::RegisterRobotRequest;
