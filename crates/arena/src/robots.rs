//! Robot discovery in the simulator's robots directory.
//!
//! A robot is either `<robots>/<pkg>/<Name>.class` or `<robots>/<pkg.Name>.jar`
//! next to a `.robot` descriptor that lists the files it is built from, one
//! path per line relative to the descriptor. A robot's last change is the
//! newest modification time among those files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime};
use storage::models::timestamp;
use storage::{Database, SyncAction};
use tracing::{debug, info, warn};

use crate::error::{ArenaError, Result};

const DESCRIPTOR_EXTENSION: &str = "robot";

/// Packages the simulator treats as packaged robots even as loose classes.
const PACKAGED_ROOTS: &[&str] = &["sample", "tested"];

#[derive(Debug, Clone, PartialEq)]
pub struct RobotFiles {
    /// Fully qualified name, e.g. `sample.Fire`
    pub name: String,
    /// The `.jar` or `.class` file
    pub path: PathBuf,
    pub descriptor: PathBuf,
    pub dependencies: Vec<PathBuf>,
    /// Loose class outside the packaged roots
    pub development: bool,
    pub last_updated: NaiveDateTime,
}

impl RobotFiles {
    /// Find `name` in `robots_dir`, preferring a jar over a loose class.
    pub fn locate(robots_dir: &Path, name: &str) -> Result<Self> {
        let pieces: Vec<&str> = name.split('.').collect();

        let jar = robots_dir.join(format!("{}.jar", name));
        let class = pieces
            .iter()
            .fold(robots_dir.to_path_buf(), |path, piece| path.join(piece))
            .with_extension("class");

        let (path, development) = if jar.is_file() {
            (jar, false)
        } else if class.is_file() {
            (class, !PACKAGED_ROOTS.contains(&pieces[0]))
        } else {
            return Err(ArenaError::Discovery(format!(
                "robot '{}' not found in {}",
                name,
                robots_dir.display()
            )));
        };

        let descriptor = path.with_extension(DESCRIPTOR_EXTENSION);
        let dependencies = read_descriptor(&descriptor)?;
        let mut newest = None;
        for dep in &dependencies {
            newest = newest.max(Some(modified_at(dep)?));
        }
        let last_updated = match newest {
            Some(newest) => newest,
            None => modified_at(&descriptor)?,
        };

        Ok(Self {
            name: name.to_string(),
            path,
            descriptor,
            dependencies,
            development,
            last_updated,
        })
    }

    /// Name as written into a battle file; development robots carry a `*`.
    pub fn battle_name(&self) -> String {
        if self.development {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// Every robot with a descriptor under `robots_dir`, sorted by name.
///
/// Descriptors without a matching jar or class are skipped.
pub fn discover_robots(robots_dir: &Path) -> Result<Vec<RobotFiles>> {
    let mut descriptors = Vec::new();
    collect_descriptors(robots_dir, &mut descriptors)?;

    let mut robots = Vec::new();
    for descriptor in descriptors {
        let Some(name) = robot_name(robots_dir, &descriptor) else {
            continue;
        };
        match RobotFiles::locate(robots_dir, &name) {
            Ok(robot) => robots.push(robot),
            Err(ArenaError::Discovery(reason)) => {
                warn!("Skipping descriptor {}: {}", descriptor.display(), reason);
            }
            Err(e) => return Err(e),
        }
    }

    robots.sort_by(|a, b| a.name.cmp(&b.name));
    robots.dedup_by(|a, b| a.name == b.name);
    Ok(robots)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: usize,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        !self.created.is_empty() || !self.updated.is_empty()
    }
}

/// Register new robots and record changes to known ones.
pub async fn sync_robots(db: &Database, robots_dir: &Path) -> Result<SyncReport> {
    let dir = robots_dir.to_path_buf();
    let found = tokio::task::spawn_blocking(move || discover_robots(&dir))
        .await
        .map_err(|e| ArenaError::Discovery(format!("robot scan aborted: {}", e)))??;

    let mut report = SyncReport::default();
    for robot in found {
        let (stored, action) = db.robots().sync(&robot.name, robot.last_updated).await?;
        match action {
            SyncAction::Created => {
                info!(robot_id = stored.robot_id, "New robot {}", stored.name);
                report.created.push(stored.name);
            }
            SyncAction::Updated => {
                info!(robot_id = stored.robot_id, "Robot {} changed at {}", stored.name, robot.last_updated);
                report.updated.push(stored.name);
            }
            SyncAction::Unchanged => report.unchanged += 1,
        }
    }

    debug!(
        "Robot sync: {} new, {} updated, {} unchanged",
        report.created.len(),
        report.updated.len(),
        report.unchanged
    );
    Ok(report)
}

fn collect_descriptors(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_descriptors(&path, found)?;
        } else if path.extension().is_some_and(|ext| ext == DESCRIPTOR_EXTENSION) {
            found.push(path);
        }
    }
    Ok(())
}

fn robot_name(robots_dir: &Path, descriptor: &Path) -> Option<String> {
    let relative = descriptor.strip_prefix(robots_dir).ok()?.with_extension("");
    let pieces: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!pieces.is_empty()).then(|| pieces.join("."))
}

fn read_descriptor(descriptor: &Path) -> Result<Vec<PathBuf>> {
    let contents = fs::read_to_string(descriptor).map_err(|e| {
        ArenaError::Discovery(format!("cannot read descriptor {}: {}", descriptor.display(), e))
    })?;
    let base = descriptor.parent().unwrap_or(Path::new("."));

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|dep| base.join(dep))
        .collect())
}

fn modified_at(path: &Path) -> Result<NaiveDateTime> {
    let modified: SystemTime = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| ArenaError::Discovery(format!("cannot stat {}: {}", path.display(), e)))?;

    Ok(timestamp::truncate(
        DateTime::<Local>::from(modified).naive_local(),
    ))
}
