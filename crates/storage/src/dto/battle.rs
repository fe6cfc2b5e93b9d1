use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::{BattleProperties, BattleState};

/// Filter for battle listings. `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleFilter {
    pub state: Option<BattleState>,
    pub obsolete: Option<bool>,
}

impl BattleFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn state(state: BattleState) -> Self {
        Self {
            state: Some(state),
            obsolete: None,
        }
    }

    pub fn finished(non_obsolete: bool) -> Self {
        Self {
            state: Some(BattleState::Finished),
            obsolete: non_obsolete.then_some(false),
        }
    }

    pub fn obsolete() -> Self {
        Self {
            state: None,
            obsolete: Some(true),
        }
    }
}

/// Score and opaque detail reported by the simulator for one robot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitorResult {
    pub score: i64,
    pub detail: String,
}

/// Final record of a battle, committed by `BattleRepository::complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleOutcome {
    pub started: NaiveDateTime,
    pub finished: NaiveDateTime,
    /// Authoritative properties the battle actually ran with.
    pub properties: BattleProperties,
    /// Name of the winning robot; must be one of the competitors.
    pub winner: String,
    /// Per-robot results keyed by robot name.
    pub results: BTreeMap<String, CompetitorResult>,
}

/// Battle totals per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleCounts {
    pub scheduled: i64,
    pub running: i64,
    pub finished: i64,
    pub obsolete: i64,
}

impl BattleCounts {
    pub fn total(&self) -> i64 {
        self.scheduled + self.running + self.finished
    }
}
