use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use storage::dto::CompetitorResult;
use storage::models::json;

use super::SimulatorError;

static ROUNDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Results for (\d+) rounds?").expect("invalid rounds pattern")
});

/// `1st: sample.Fire`, `2nd: pkg.Dev*`
static PLACED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)(?:st|nd|rd|th): (.*)$").expect("invalid placed name pattern")
});

/// `1650 (62%)`
static TOTAL_SCORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*\(\d+%\)\s*$").expect("invalid total score pattern")
});

static HEADER_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\t\s*").expect("invalid header separator pattern"));

const NAME_COLUMN: &str = "Robot Name";
const SCORE_COLUMN: &str = "Total Score";

/// One row of a results table.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotResult {
    /// Robot name without the development marker
    pub name: String,
    pub place: u32,
    pub score: i64,
    /// Raw table cells keyed by column header
    pub columns: BTreeMap<String, String>,
}

impl RobotResult {
    /// JSON object of every cell plus `_Name`, `_Place` and `_Score`, with
    /// sorted keys.
    pub fn detail(&self) -> Result<String, SimulatorError> {
        let mut detail: Map<String, Value> = self
            .columns
            .iter()
            .map(|(column, cell)| (column.clone(), Value::String(cell.clone())))
            .collect();
        detail.insert("_Name".to_string(), Value::String(self.name.clone()));
        detail.insert("_Place".to_string(), Value::from(self.place));
        detail.insert("_Score".to_string(), Value::String(self.score.to_string()));

        json::to_json(&Value::Object(detail))
            .map_err(|e| SimulatorError::Parse(format!("cannot encode detail: {}", e)))
    }
}

/// Parsed simulator results table.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultFile {
    pub rounds: u32,
    pub winner: String,
    pub robots: Vec<RobotResult>,
}

impl ResultFile {
    pub async fn read(path: &Path) -> Result<Self, SimulatorError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, SimulatorError> {
        let mut lines = text.lines();

        let title = lines
            .next()
            .ok_or_else(|| SimulatorError::Parse("empty result file".to_string()))?;
        let rounds = ROUNDS
            .captures(title)
            .and_then(|caps| caps[1].parse().ok())
            .ok_or_else(|| SimulatorError::Parse(format!("no round count in '{}'", title)))?;

        let header: Vec<&str> = lines
            .next()
            .map(|line| HEADER_SEPARATOR.split(line.trim()).collect())
            .ok_or_else(|| SimulatorError::Parse("missing header line".to_string()))?;
        if !header.contains(&NAME_COLUMN) || !header.contains(&SCORE_COLUMN) {
            return Err(SimulatorError::Parse(format!(
                "header lacks '{}' or '{}': {:?}",
                NAME_COLUMN, SCORE_COLUMN, header
            )));
        }

        let mut robots = Vec::new();
        for line in lines.filter(|line| !line.trim().is_empty()) {
            let columns: BTreeMap<String, String> = header
                .iter()
                .zip(line.split('\t'))
                .filter(|(column, _)| !column.is_empty())
                .map(|(column, cell)| (column.to_string(), cell.trim().to_string()))
                .collect();
            robots.push(parse_row(columns)?);
        }

        let winner = robots
            .iter()
            .find(|robot| robot.place == 1)
            .map(|robot| robot.name.clone())
            .ok_or_else(|| SimulatorError::Parse("no robot placed first".to_string()))?;

        Ok(Self {
            rounds,
            winner,
            robots,
        })
    }

    /// Per-robot score and detail keyed by robot name.
    pub fn competitor_results(
        &self,
    ) -> Result<BTreeMap<String, CompetitorResult>, SimulatorError> {
        self.robots
            .iter()
            .map(|robot| {
                let result = CompetitorResult {
                    score: robot.score,
                    detail: robot.detail()?,
                };
                Ok((robot.name.clone(), result))
            })
            .collect()
    }
}

fn parse_row(columns: BTreeMap<String, String>) -> Result<RobotResult, SimulatorError> {
    let placed_name = columns.get(NAME_COLUMN).map(String::as_str).unwrap_or_default();
    let caps = PLACED_NAME
        .captures(placed_name)
        .ok_or_else(|| SimulatorError::Parse(format!("bad robot name cell '{}'", placed_name)))?;
    let place = caps[1]
        .parse()
        .map_err(|_| SimulatorError::Parse(format!("bad place in '{}'", placed_name)))?;
    let name = caps[2].trim().trim_end_matches('*').to_string();

    let total = columns.get(SCORE_COLUMN).map(String::as_str).unwrap_or_default();
    let score = TOTAL_SCORE
        .captures(total)
        .and_then(|caps| caps[1].parse().ok())
        .ok_or_else(|| SimulatorError::Parse(format!("bad total score cell '{}'", total)))?;

    Ok(RobotResult {
        name,
        place,
        score,
        columns,
    })
}
