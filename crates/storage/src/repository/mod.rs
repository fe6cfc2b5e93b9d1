pub mod battle;
pub mod robot;

pub use battle::BattleRepository;
pub use robot::{RobotRepository, SyncAction};
