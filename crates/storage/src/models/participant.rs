use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::robot::Robot;
use super::timestamp::parse_timestamp;
use crate::error::{Result, StorageError};

/// One robot's participation in a battle.
///
/// The snapshot is taken when the battle starts running; score and result
/// detail are filled in when it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub battle_id: i64,
    pub robot: Robot,
    /// The robot's `last_updated` at the moment the battle began running.
    pub robot_updated: Option<NaiveDateTime>,
    pub score: Option<i64>,
    /// Opaque per-robot simulator output.
    pub result_detail: Option<String>,
}

impl Participant {
    pub fn robot_id(&self) -> i64 {
        self.robot.robot_id
    }

    pub fn name(&self) -> &str {
        &self.robot.name
    }

    /// Whether the robot changed after this participation's snapshot.
    pub fn is_stale(&self) -> bool {
        match (self.robot_updated, self.robot.last_updated) {
            (Some(snapshot), Some(current)) => current > snapshot,
            _ => false,
        }
    }

    /// Result detail parsed as JSON, when present and well formed.
    pub fn result_detail_json(&self) -> Option<serde_json::Value> {
        self.result_detail
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// `BattleRobots` row joined with its `Robots` row.
#[derive(Debug, Clone, FromRow)]
pub struct ParticipantRow {
    #[sqlx(rename = "BattleID")]
    pub battle_id: i64,
    #[sqlx(rename = "RobotID")]
    pub robot_id: i64,
    #[sqlx(rename = "RobotUpdated")]
    pub robot_updated: Option<String>,
    #[sqlx(rename = "Score")]
    pub score: Option<i64>,
    #[sqlx(rename = "Results")]
    pub results: Option<String>,
    #[sqlx(rename = "Name")]
    pub name: Option<String>,
    #[sqlx(rename = "LastUpdated")]
    pub last_updated: Option<String>,
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = StorageError;

    fn try_from(row: ParticipantRow) -> Result<Self> {
        let robot = Robot::try_from(super::robot::RobotRow {
            robot_id: row.robot_id,
            name: row.name,
            last_updated: row.last_updated,
        })?;

        Ok(Self {
            battle_id: row.battle_id,
            robot,
            robot_updated: parse_timestamp(row.robot_updated.as_deref())?,
            score: row.score.filter(|s| *s >= 0),
            result_detail: row.results.filter(|r| !r.is_empty()),
        })
    }
}
