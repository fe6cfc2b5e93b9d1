use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::timestamp::parse_timestamp;
use crate::error::{Result, StorageError};

/// A competitor registered in the tournament.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Robot {
    pub robot_id: i64,
    pub name: String,
    /// Bumped whenever the robot's code changes. Absent only in files written
    /// by tooling that registered robots without a timestamp.
    pub last_updated: Option<NaiveDateTime>,
}

/// `Robots` row as persisted.
#[derive(Debug, Clone, FromRow)]
pub struct RobotRow {
    #[sqlx(rename = "RobotID")]
    pub robot_id: i64,
    #[sqlx(rename = "Name")]
    pub name: Option<String>,
    #[sqlx(rename = "LastUpdated")]
    pub last_updated: Option<String>,
}

impl TryFrom<RobotRow> for Robot {
    type Error = StorageError;

    fn try_from(row: RobotRow) -> Result<Self> {
        let name = row
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StorageError::InvalidRow(format!("robot {} has no name", row.robot_id)))?;

        Ok(Self {
            robot_id: row.robot_id,
            name,
            last_updated: parse_timestamp(row.last_updated.as_deref())?,
        })
    }
}
