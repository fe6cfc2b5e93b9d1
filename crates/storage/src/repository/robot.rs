use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use tracing::{debug, info};
use validator::Validate;

use crate::dto::robot::RegisterRobotRequest;
use crate::error::{Result, StorageError};
use crate::models::timestamp::{self, format_timestamp};
use crate::models::{Robot, RobotRow};

/// What `RobotRepository::sync` did to bring a robot up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Created,
    Updated,
    Unchanged,
}

pub struct RobotRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RobotRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// List all robots
    pub async fn list(&self) -> Result<Vec<Robot>> {
        let rows = sqlx::query_as::<_, RobotRow>(
            r#"
            SELECT RobotID, Name, LastUpdated
            FROM Robots
            ORDER BY RobotID
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Robot::try_from).collect()
    }

    /// Find robot by ID
    pub async fn find_by_id(&self, id: i64) -> Result<Robot> {
        sqlx::query_as::<_, RobotRow>(
            r#"
            SELECT RobotID, Name, LastUpdated
            FROM Robots
            WHERE RobotID = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StorageError::not_found(format!("robot with id {}", id)))?
        .try_into()
    }

    /// Find robot by its unique name
    pub async fn find_by_name(&self, name: &str) -> Result<Robot> {
        self.find_by_name_optional(name)
            .await?
            .ok_or_else(|| StorageError::not_found(format!("robot named '{}'", name)))
    }

    async fn find_by_name_optional(&self, name: &str) -> Result<Option<Robot>> {
        sqlx::query_as::<_, RobotRow>(
            r#"
            SELECT RobotID, Name, LastUpdated
            FROM Robots
            WHERE Name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(self.pool)
        .await?
        .map(Robot::try_from)
        .transpose()
    }

    /// Register a new robot. Names are unique.
    pub async fn register(&self, req: &RegisterRobotRequest) -> Result<Robot> {
        req.validate()?;

        if let Some(existing) = self.find_by_name_optional(&req.name).await? {
            return Err(StorageError::validation(format!(
                "cannot create robot with duplicate name '{}' (robot {})",
                req.name, existing.robot_id
            )));
        }

        let last_updated = req.last_updated.map(timestamp::truncate).unwrap_or_else(timestamp::now);

        // The unique index catches a concurrent registration of the same name.
        let row = sqlx::query_as::<_, RobotRow>(
            r#"
            INSERT INTO Robots (Name, LastUpdated)
            VALUES (?, ?)
            RETURNING RobotID, Name, LastUpdated
            "#,
        )
        .bind(&req.name)
        .bind(format_timestamp(&last_updated))
        .fetch_one(self.pool)
        .await
        .map_err(StorageError::from)
        .map_err(|e| {
            if e.is_unique_violation() {
                StorageError::validation(format!(
                    "cannot create robot with duplicate name '{}'",
                    req.name
                ))
            } else {
                e
            }
        })?;

        let robot = Robot::try_from(row)?;
        info!(robot_id = robot.robot_id, "Registered robot {}", robot.name);
        Ok(robot)
    }

    /// Record a change to a robot. `None` means now.
    pub async fn touch(&self, id: i64, last_updated: Option<NaiveDateTime>) -> Result<Robot> {
        let last_updated = last_updated.map(timestamp::truncate).unwrap_or_else(timestamp::now);

        let row = sqlx::query_as::<_, RobotRow>(
            r#"
            UPDATE Robots
            SET LastUpdated = ?
            WHERE RobotID = ?
            RETURNING RobotID, Name, LastUpdated
            "#,
        )
        .bind(format_timestamp(&last_updated))
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StorageError::not_found(format!("robot with id {}", id)))?;

        let robot = Robot::try_from(row)?;
        debug!(robot_id = robot.robot_id, "Robot {} updated at {}", robot.name, last_updated);
        Ok(robot)
    }

    /// Register the robot if unknown, otherwise move its timestamp to
    /// `last_updated` when it differs.
    pub async fn sync(&self, name: &str, last_updated: NaiveDateTime) -> Result<(Robot, SyncAction)> {
        let last_updated = timestamp::truncate(last_updated);

        match self.find_by_name_optional(name).await? {
            None => {
                let robot = self
                    .register(&RegisterRobotRequest::new(name).updated_at(last_updated))
                    .await?;
                Ok((robot, SyncAction::Created))
            }
            Some(robot) if robot.last_updated == Some(last_updated) => {
                Ok((robot, SyncAction::Unchanged))
            }
            Some(robot) => {
                let robot = self.touch(robot.robot_id, Some(last_updated)).await?;
                Ok((robot, SyncAction::Updated))
            }
        }
    }
}
