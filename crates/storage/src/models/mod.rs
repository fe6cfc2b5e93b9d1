mod battle;
pub mod json;
mod matchup;
mod participant;
mod robot;
pub mod timestamp;

pub use battle::{
    Battle, BattleProperties, BattleRow, BattleState, DEFAULT_PRIORITY, default_properties,
};
pub use matchup::Matchup;
pub use participant::{Participant, ParticipantRow};
pub use robot::{Robot, RobotRow};
