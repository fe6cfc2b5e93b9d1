use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::participant::Participant;
use super::timestamp::parse_timestamp;
use crate::error::{Result, StorageError};

/// Simulator configuration for a battle (field size, round count, ...).
pub type BattleProperties = BTreeMap<String, serde_json::Value>;

/// Priority stored for battles scheduled without one.
pub const DEFAULT_PRIORITY: i64 = -1;

/// Properties used when a battle is scheduled without any.
pub fn default_properties() -> BattleProperties {
    let mut props = BattleProperties::new();
    props.insert("robocode.battleField.width".into(), 800.into());
    props.insert("robocode.battleField.height".into(), 600.into());
    props.insert("robocode.battle.numRounds".into(), 10.into());
    props.insert("robocode.battle.gunCoolingRate".into(), 0.1.into());
    props.insert("robocode.battle.rules.inactivityTime".into(), 450.into());
    props.insert("robocode.battle.hideEnemyNames".into(), true.into());
    props
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleState {
    Scheduled,
    Running,
    Finished,
}

impl BattleState {
    pub const ALL: [BattleState; 3] = [Self::Scheduled, Self::Running, Self::Finished];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for BattleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BattleState {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            other => Err(StorageError::InvalidRow(format!(
                "unknown battle state '{}'",
                other
            ))),
        }
    }
}

/// A battle together with a snapshot of its participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battle {
    pub battle_id: i64,
    pub priority: i64,
    pub state: BattleState,
    pub started: Option<NaiveDateTime>,
    pub finished: Option<NaiveDateTime>,
    pub properties: BattleProperties,
    /// Robot id of the winner, set once finished.
    pub winner: Option<i64>,
    pub obsolete: bool,
    pub participants: Vec<Participant>,
}

impl Battle {
    pub fn from_parts(row: BattleRow, mut participants: Vec<Participant>) -> Result<Self> {
        participants.sort_by_key(|p| p.robot_id());

        let properties = match row.properties.as_deref() {
            None | Some("") => BattleProperties::new(),
            Some(raw) => serde_json::from_str(raw)?,
        };

        Ok(Self {
            battle_id: row.battle_id,
            priority: row.priority.unwrap_or(DEFAULT_PRIORITY),
            state: row
                .state
                .as_deref()
                .ok_or_else(|| {
                    StorageError::InvalidRow(format!("battle {} has no state", row.battle_id))
                })?
                .parse()?,
            started: parse_timestamp(row.started.as_deref())?,
            finished: parse_timestamp(row.finished.as_deref())?,
            properties,
            winner: row.winner.filter(|w| *w >= 0),
            obsolete: row.obsolete.unwrap_or(0) != 0,
            participants,
        })
    }

    pub fn competitor_ids(&self) -> BTreeSet<i64> {
        self.participants.iter().map(Participant::robot_id).collect()
    }

    /// Competitor names in robot-id order.
    pub fn competitor_names(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn participant(&self, robot_id: i64) -> Option<&Participant> {
        self.participants.iter().find(|p| p.robot_id() == robot_id)
    }

    pub fn winner_name(&self) -> Option<&str> {
        self.winner
            .and_then(|id| self.participant(id))
            .map(Participant::name)
    }

    /// Whether a finished battle's result is outdated by a competitor change.
    pub fn has_stale_participant(&self) -> bool {
        self.participants.iter().any(Participant::is_stale)
    }
}

/// `Battles` row as persisted.
#[derive(Debug, Clone, FromRow)]
pub struct BattleRow {
    #[sqlx(rename = "BattleID")]
    pub battle_id: i64,
    #[sqlx(rename = "Priority")]
    pub priority: Option<i64>,
    #[sqlx(rename = "State")]
    pub state: Option<String>,
    #[sqlx(rename = "Started")]
    pub started: Option<String>,
    #[sqlx(rename = "Finished")]
    pub finished: Option<String>,
    #[sqlx(rename = "Properties")]
    pub properties: Option<String>,
    #[sqlx(rename = "Winner")]
    pub winner: Option<i64>,
    #[sqlx(rename = "Obsolete")]
    pub obsolete: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(state: &str) -> BattleRow {
        BattleRow {
            battle_id: 12,
            priority: Some(-1),
            state: Some(state.to_string()),
            started: Some(String::new()),
            finished: Some(String::new()),
            properties: Some(r#"{"robocode.battle.numRounds":3}"#.to_string()),
            winner: Some(-1),
            obsolete: Some(0),
        }
    }

    #[test]
    fn test_state_round_trips_through_text() {
        for state in BattleState::ALL {
            assert_eq!(state.as_str().parse::<BattleState>().unwrap(), state);
        }
        assert!("paused".parse::<BattleState>().is_err());
    }

    #[test]
    fn test_scheduled_row_mapping() {
        let battle = Battle::from_parts(row("scheduled"), Vec::new()).unwrap();
        assert_eq!(battle.state, BattleState::Scheduled);
        assert_eq!(battle.started, None);
        assert_eq!(battle.finished, None);
        assert_eq!(battle.winner, None);
        assert!(!battle.obsolete);
        assert_eq!(
            battle.properties.get("robocode.battle.numRounds"),
            Some(&serde_json::json!(3))
        );
    }

    #[test]
    fn test_unknown_state_is_invalid_row() {
        let result = Battle::from_parts(row("queued"), Vec::new());
        assert!(matches!(result, Err(StorageError::InvalidRow(_))));
    }

    #[test]
    fn test_default_properties() {
        let props = default_properties();
        assert_eq!(props.len(), 6);
        assert_eq!(
            props.get("robocode.battleField.width"),
            Some(&serde_json::json!(800))
        );
        assert_eq!(
            props.get("robocode.battle.hideEnemyNames"),
            Some(&serde_json::json!(true))
        );
    }
}
