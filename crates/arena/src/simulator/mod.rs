mod result;
mod robocode;

pub use result::{ResultFile, RobotResult};
pub use robocode::{RobocodeConfig, RobocodeSimulator};

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDateTime;
use storage::dto::{BattleOutcome, CompetitorResult};
use storage::models::{Battle, BattleProperties};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error("battle {battle_id} timed out after {}s", .after.as_secs())]
    Timeout { battle_id: i64, after: Duration },

    #[error("simulator exited with {}:\n{output}", describe_exit(.status))]
    Failed { status: Option<i32>, output: String },

    #[error("robot '{name}' not found by the simulator")]
    MissingRobot { name: String, output: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unreadable result file: {0}")]
    Parse(String),
}

fn describe_exit(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

impl SimulatorError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Everything the simulator needs to run one battle.
#[derive(Debug, Clone, PartialEq)]
pub struct BattleSpec {
    pub battle_id: i64,
    /// Competitor names, in robot id order
    pub competitors: Vec<String>,
    pub properties: BattleProperties,
}

impl BattleSpec {
    pub fn from_battle(battle: &Battle) -> Self {
        Self {
            battle_id: battle.battle_id,
            competitors: battle.competitor_names(),
            properties: battle.properties.clone(),
        }
    }
}

/// A battle the simulator ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct BattleReport {
    pub battle_id: i64,
    pub started: NaiveDateTime,
    pub finished: NaiveDateTime,
    pub properties: BattleProperties,
    pub rounds: u32,
    pub winner: String,
    pub results: BTreeMap<String, CompetitorResult>,
}

impl BattleReport {
    pub fn into_outcome(self) -> BattleOutcome {
        BattleOutcome {
            started: self.started,
            finished: self.finished,
            properties: self.properties,
            winner: self.winner,
            results: self.results,
        }
    }
}

/// Runs single battles. Implementations own their timeout: a battle that
/// does not finish in time yields `SimulatorError::Timeout`.
#[async_trait::async_trait]
pub trait Simulator: Send + Sync {
    async fn run(&self, spec: &BattleSpec) -> Result<BattleReport, SimulatorError>;

    fn name(&self) -> &'static str;
}
