//! Robocode as the battle simulator.
//!
//! Each battle runs in its own headless JVM. The battle file, result table and
//! recording are kept per battle id under the arena directory.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use storage::models::timestamp;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{BattleReport, BattleSpec, ResultFile, Simulator, SimulatorError};
use crate::robots::RobotFiles;

const SELECTED_ROBOTS: &str = "robocode.battle.selectedRobots";

static MISSING_ROBOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Can't find '([^']+)'").expect("invalid missing robot pattern")
});

#[derive(Debug, Clone)]
pub struct RobocodeConfig {
    /// Robocode installation, containing `libs/robocode.jar`
    pub robocode_dir: PathBuf,
    pub robots_dir: PathBuf,
    pub battles_dir: PathBuf,
    pub results_dir: PathBuf,
    pub recordings_dir: PathBuf,
    pub java: PathBuf,
    pub max_heap: String,
    pub timeout: Duration,
}

impl RobocodeConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Robots and per-battle files live under `arena_dir`.
    pub fn new(robocode_dir: impl Into<PathBuf>, arena_dir: impl AsRef<Path>) -> Self {
        let arena_dir = arena_dir.as_ref();
        Self {
            robocode_dir: robocode_dir.into(),
            robots_dir: arena_dir.join("robots"),
            battles_dir: arena_dir.join("battles"),
            results_dir: arena_dir.join("results"),
            recordings_dir: arena_dir.join("recordings"),
            java: PathBuf::from("java"),
            max_heap: "512M".to_string(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_java(mut self, java: impl Into<PathBuf>) -> Self {
        self.java = java.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn library(&self) -> PathBuf {
        self.robocode_dir.join("libs").join("robocode.jar")
    }
}

pub struct RobocodeSimulator {
    config: RobocodeConfig,
}

impl RobocodeSimulator {
    pub fn new(config: RobocodeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RobocodeConfig {
        &self.config
    }

    /// Create the per-battle output directories.
    pub async fn prepare(&self) -> std::io::Result<()> {
        for dir in [
            &self.config.battles_dir,
            &self.config.results_dir,
            &self.config.recordings_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub fn battle_file(&self, battle_id: i64) -> PathBuf {
        self.config.battles_dir.join(format!("{}.battle", battle_id))
    }

    pub fn result_file(&self, battle_id: i64) -> PathBuf {
        self.config.results_dir.join(format!("{}.result", battle_id))
    }

    pub fn record_file(&self, battle_id: i64) -> PathBuf {
        self.config.recordings_dir.join(format!("{}.br", battle_id))
    }

    async fn write_battle_file(&self, spec: &BattleSpec) -> Result<PathBuf, SimulatorError> {
        let mut contents = String::new();
        for (key, value) in spec.properties.iter().filter(|(key, _)| *key != SELECTED_ROBOTS) {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = writeln!(contents, "{}={}", key, value);
        }

        let robots_dir = self.config.robots_dir.clone();
        let competitors = spec.competitors.clone();
        let selected = tokio::task::spawn_blocking(move || select_robots(&robots_dir, &competitors))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))??;
        let _ = writeln!(contents, "{}={}", SELECTED_ROBOTS, selected.join(","));

        let path = self.battle_file(spec.battle_id);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    fn command(&self, battle_file: &Path, result_file: &Path, record_file: &Path) -> Command {
        let mut cmd = Command::new(&self.config.java);
        cmd.arg(format!("-Xmx{}", self.config.max_heap))
            .arg(format!("-DROBOTPATH={}", self.config.robots_dir.display()))
            .arg("-cp")
            .arg(self.config.library())
            .arg("robocode.Robocode")
            .arg("-cwd")
            .arg(&self.config.robocode_dir)
            .arg("-battle")
            .arg(battle_file)
            .arg("-results")
            .arg(result_file)
            .arg("-record")
            .arg(record_file)
            .arg("-nodisplay")
            .arg("-nosound")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Battle names of `competitors`, as the simulator expects them in
/// `selectedRobots`. Reads the robot files, so call it off the runtime.
fn select_robots(robots_dir: &Path, competitors: &[String]) -> Result<Vec<String>, SimulatorError> {
    competitors
        .iter()
        .map(|name| {
            RobotFiles::locate(robots_dir, name)
                .map(|robot| robot.battle_name())
                .map_err(|e| SimulatorError::MissingRobot {
                    name: name.clone(),
                    output: e.to_string(),
                })
        })
        .collect()
}

#[async_trait::async_trait]
impl Simulator for RobocodeSimulator {
    async fn run(&self, spec: &BattleSpec) -> Result<BattleReport, SimulatorError> {
        let battle_id = spec.battle_id;
        let battle_file = self.write_battle_file(spec).await?;
        let result_file = self.result_file(battle_id);
        let record_file = self.record_file(battle_id);

        let mut cmd = self.command(&battle_file, &result_file, &record_file);
        debug!(battle_id, "Starting simulator: {:?}", cmd);

        let started = timestamp::now();
        let child = cmd.spawn()?;

        // Dropping the child on timeout kills the JVM.
        let output = match timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(battle_id, "Simulator timed out after {:?}", self.config.timeout);
                return Err(SimulatorError::Timeout {
                    battle_id,
                    after: self.config.timeout,
                });
            }
        };
        let finished = timestamp::now();

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if let Some(caps) = MISSING_ROBOT.captures(&combined) {
            let name = caps[1].trim_end_matches('*').to_string();
            warn!(battle_id, "Simulator cannot find robot {}", name);
            return Err(SimulatorError::MissingRobot {
                name,
                output: combined,
            });
        }

        if !output.status.success() {
            return Err(SimulatorError::Failed {
                status: output.status.code(),
                output: combined,
            });
        }

        let result = ResultFile::read(&result_file).await?;
        debug!(
            battle_id,
            "Simulator finished {} rounds, winner {}", result.rounds, result.winner
        );

        Ok(BattleReport {
            battle_id,
            started,
            finished,
            properties: spec.properties.clone(),
            rounds: result.rounds,
            results: result.competitor_results()?,
            winner: result.winner,
        })
    }

    fn name(&self) -> &'static str {
        "robocode"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use storage::models::default_properties;
    use tempfile::TempDir;

    const WRITE_RESULTS: &str = r#"
results=""
while [ $# -gt 0 ]; do
  case "$1" in
    -results) results="$2"; shift ;;
  esac
  shift
done
printf 'Results for 10 rounds\nRobot Name\tTotal Score\tSurvival\t\n1st: sample.Fire\t300 (75%%)\t450\t\n2nd: dev.Walls*\t100 (25%%)\t50\t\n' > "$results"
echo "Battle completed"
"#;

    struct Arena {
        dir: TempDir,
        simulator: RobocodeSimulator,
    }

    /// An arena whose "java" is a shell script with the given body.
    async fn arena(script: &str, timeout: Duration) -> Arena {
        let dir = TempDir::new().unwrap();
        let java = dir.path().join("java");
        std::fs::write(&java, format!("#!/bin/sh\n{}", script)).unwrap();
        std::fs::set_permissions(&java, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = RobocodeConfig::new(dir.path().join("robocode"), dir.path())
            .with_java(&java)
            .with_timeout(timeout);

        for (class, descriptor) in [
            ("sample/Fire.class", "sample/Fire.robot"),
            ("dev/Walls.class", "dev/Walls.robot"),
        ] {
            let class = config.robots_dir.join(class);
            std::fs::create_dir_all(class.parent().unwrap()).unwrap();
            std::fs::write(&class, "").unwrap();
            std::fs::write(
                config.robots_dir.join(descriptor),
                class.file_name().unwrap().to_string_lossy().as_ref(),
            )
            .unwrap();
        }

        let simulator = RobocodeSimulator::new(config);
        simulator.prepare().await.unwrap();
        Arena { dir, simulator }
    }

    fn spec() -> BattleSpec {
        BattleSpec {
            battle_id: 7,
            competitors: vec!["sample.Fire".to_string(), "dev.Walls".to_string()],
            properties: default_properties(),
        }
    }

    #[tokio::test]
    async fn test_run_parses_results() {
        let arena = arena(WRITE_RESULTS, Duration::from_secs(10)).await;

        let report = arena.simulator.run(&spec()).await.unwrap();

        assert_eq!(report.battle_id, 7);
        assert_eq!(report.rounds, 10);
        assert_eq!(report.winner, "sample.Fire");
        assert_eq!(report.results["sample.Fire"].score, 300);
        assert_eq!(report.results["dev.Walls"].score, 100);
        assert!(report.finished >= report.started);
        assert!(arena.dir.path().join("results/7.result").is_file());
    }

    #[tokio::test]
    async fn test_battle_file_lists_properties_and_robots() {
        let arena = arena(WRITE_RESULTS, Duration::from_secs(10)).await;
        arena.simulator.run(&spec()).await.unwrap();

        let battle = std::fs::read_to_string(arena.simulator.battle_file(7)).unwrap();
        let lines: Vec<&str> = battle.lines().collect();

        assert!(lines.contains(&"robocode.battleField.width=800"));
        assert!(lines.contains(&"robocode.battle.hideEnemyNames=true"));
        assert_eq!(
            lines.last(),
            Some(&"robocode.battle.selectedRobots=sample.Fire,dev.Walls*")
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let arena = arena("sleep 5\n", Duration::from_millis(200)).await;

        let err = arena.simulator.run(&spec()).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_missing_robot_in_output() {
        let arena = arena("echo \"Can't find 'dev.Walls*'\"\n", Duration::from_secs(10)).await;

        match arena.simulator.run(&spec()).await.unwrap_err() {
            SimulatorError::MissingRobot { name, .. } => assert_eq!(name, "dev.Walls"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_select_robots_keeps_competitor_order() {
        let arena = arena(WRITE_RESULTS, Duration::from_secs(10)).await;
        let robots_dir = &arena.simulator.config.robots_dir;

        let names = ["dev.Walls".to_string(), "sample.Fire".to_string()];
        assert_eq!(
            select_robots(robots_dir, &names).unwrap(),
            vec!["dev.Walls*", "sample.Fire"]
        );

        // Same lookup from the runtime, as `run` does it.
        arena.simulator.run(&spec()).await.unwrap();
        let battle = std::fs::read_to_string(arena.simulator.battle_file(7)).unwrap();
        assert!(battle.ends_with("selectedRobots=sample.Fire,dev.Walls*\n"));
    }

    #[tokio::test]
    async fn test_unknown_competitor() {
        let arena = arena(WRITE_RESULTS, Duration::from_secs(10)).await;
        let mut spec = spec();
        spec.competitors.push("nobody.Here".to_string());

        assert!(matches!(
            arena.simulator.run(&spec).await,
            Err(SimulatorError::MissingRobot { name, .. }) if name == "nobody.Here"
        ));
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let arena = arena("echo boom >&2\nexit 3\n", Duration::from_secs(10)).await;

        match arena.simulator.run(&spec()).await.unwrap_err() {
            SimulatorError::Failed { status, output } => {
                assert_eq!(status, Some(3));
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
