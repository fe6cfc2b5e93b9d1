use std::collections::{BTreeMap, BTreeSet};

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::dto::battle::{BattleCounts, BattleFilter, BattleOutcome};
use crate::error::{Result, StorageError, TransitionError};
use crate::models::json;
use crate::models::timestamp::{self, format_timestamp};
use crate::models::{
    Battle, BattleProperties, BattleRow, BattleState, DEFAULT_PRIORITY, Participant,
    ParticipantRow, default_properties,
};

const BATTLE_COLUMNS: &str =
    "BattleID, Priority, State, Started, Finished, Properties, Winner, Obsolete";

const PARTICIPANT_COLUMNS: &str = r#"
    br.BattleID AS BattleID,
    br.RobotID AS RobotID,
    br.RobotUpdated AS RobotUpdated,
    br.Score AS Score,
    br.Results AS Results,
    r.Name AS Name,
    r.LastUpdated AS LastUpdated
"#;

/// Repository for the battle lifecycle.
///
/// Every state change is a single transaction whose first statement is the
/// conditional state update, so the write lock is held before any
/// precondition is read back.
pub struct BattleRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BattleRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a battle with its participants
    pub async fn find_by_id(&self, id: i64) -> Result<Battle> {
        let mut conn = self.pool.acquire().await?;
        fetch_battle(&mut conn, id).await
    }

    /// List battles matching `filter`, ordered by id
    pub async fn list(&self, filter: &BattleFilter) -> Result<Vec<Battle>> {
        self.list_where(filter, None).await
    }

    /// Battles in which `robot_id` is a competitor
    pub async fn robot_battles(&self, robot_id: i64, filter: &BattleFilter) -> Result<Vec<Battle>> {
        self.list_where(filter, Some(robot_id)).await
    }

    pub async fn scheduled(&self) -> Result<Vec<Battle>> {
        self.list(&BattleFilter::state(BattleState::Scheduled)).await
    }

    pub async fn running(&self) -> Result<Vec<Battle>> {
        self.list(&BattleFilter::state(BattleState::Running)).await
    }

    pub async fn finished(&self, non_obsolete: bool) -> Result<Vec<Battle>> {
        self.list(&BattleFilter::finished(non_obsolete)).await
    }

    pub async fn obsolete(&self) -> Result<Vec<Battle>> {
        self.list(&BattleFilter::obsolete()).await
    }

    pub async fn counts(&self) -> Result<BattleCounts> {
        let per_state = sqlx::query_as::<_, (Option<String>, i64)>(
            r#"
            SELECT State, COUNT(*)
            FROM Battles
            GROUP BY State
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        let mut counts = BattleCounts::default();
        for (state, count) in per_state {
            match state.as_deref().map(str::parse::<BattleState>).transpose()? {
                Some(BattleState::Scheduled) => counts.scheduled = count,
                Some(BattleState::Running) => counts.running = count,
                Some(BattleState::Finished) => counts.finished = count,
                None => {}
            }
        }

        counts.obsolete =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM Battles WHERE Obsolete = 1")
                .fetch_one(self.pool)
                .await?;

        Ok(counts)
    }

    /// Schedule a battle between `competitors` (robot ids).
    ///
    /// `None` properties means the default battle configuration.
    pub async fn schedule(
        &self,
        competitors: &[i64],
        properties: Option<&BattleProperties>,
    ) -> Result<Battle> {
        self.schedule_with_priority(competitors, properties, DEFAULT_PRIORITY)
            .await
    }

    pub async fn schedule_with_priority(
        &self,
        competitors: &[i64],
        properties: Option<&BattleProperties>,
        priority: i64,
    ) -> Result<Battle> {
        let distinct: BTreeSet<i64> = competitors.iter().copied().collect();
        if distinct.len() < 2 {
            return Err(StorageError::validation(format!(
                "a battle needs at least 2 distinct competitors, got {:?}",
                competitors
            )));
        }

        let properties = match properties {
            Some(props) => json::to_json(props)?,
            None => json::to_json(&default_properties())?,
        };

        let mut tx = self.pool.begin().await?;

        let battle_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO Battles (State, Priority, Started, Finished, Properties, Winner, Obsolete)
            VALUES (?, ?, '', '', ?, -1, 0)
            RETURNING BattleID
            "#,
        )
        .bind(BattleState::Scheduled.as_str())
        .bind(priority)
        .bind(&properties)
        .fetch_one(&mut *tx)
        .await?;

        for robot_id in &distinct {
            let known = sqlx::query_scalar::<_, i64>("SELECT RobotID FROM Robots WHERE RobotID = ?")
                .bind(robot_id)
                .fetch_optional(&mut *tx)
                .await?;
            if known.is_none() {
                return Err(StorageError::not_found(format!("robot with id {}", robot_id)));
            }

            sqlx::query(
                r#"
                INSERT INTO BattleRobots (BattleID, RobotID, RobotUpdated, Score, Results)
                VALUES (?, ?, '', -1, '')
                "#,
            )
            .bind(battle_id)
            .bind(robot_id)
            .execute(&mut *tx)
            .await?;
        }

        let battle = fetch_battle(&mut tx, battle_id).await?;
        tx.commit().await?;

        info!(battle_id, "Scheduled battle between robots {:?}", distinct);
        Ok(battle)
    }

    /// `scheduled` -> `running`: stamps `started` and snapshots each
    /// competitor's current `last_updated`.
    ///
    /// Of two concurrent calls on the same battle exactly one succeeds; the
    /// other fails with `AlreadyStarted`.
    pub async fn mark_running(&self, id: i64) -> Result<Battle> {
        let mut tx = self.pool.begin().await?;
        let started = timestamp::now();

        let updated = sqlx::query(
            r#"
            UPDATE Battles
            SET State = 'running',
                Started = ?
            WHERE BattleID = ? AND State = 'scheduled'
            "#,
        )
        .bind(format_timestamp(&started))
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let refused = match current_state(&mut tx, id).await? {
                BattleState::Finished => TransitionError::AlreadyFinished(id),
                BattleState::Running | BattleState::Scheduled => {
                    TransitionError::AlreadyStarted(id)
                }
            };
            return Err(refused.into());
        }

        sqlx::query(
            r#"
            UPDATE BattleRobots
            SET RobotUpdated = (
                SELECT LastUpdated
                FROM Robots
                WHERE Robots.RobotID = BattleRobots.RobotID
            )
            WHERE BattleID = ?
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let battle = fetch_battle(&mut tx, id).await?;
        tx.commit().await?;

        debug!(battle_id = id, "Battle marked running");
        Ok(battle)
    }

    /// `running` -> `finished` with the simulator's outcome.
    ///
    /// The outcome's winner must name one of the competitors and every
    /// competitor needs a result; otherwise nothing is written.
    pub async fn complete(&self, id: i64, outcome: &BattleOutcome) -> Result<Battle> {
        if outcome.finished < outcome.started {
            return Err(StorageError::validation(format!(
                "battle {} finished ({}) before it started ({})",
                id, outcome.finished, outcome.started
            )));
        }

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE Battles
            SET State = 'finished',
                Started = ?,
                Finished = ?,
                Properties = ?,
                Winner = (
                    SELECT br.RobotID
                    FROM BattleRobots br
                    INNER JOIN Robots r ON r.RobotID = br.RobotID
                    WHERE br.BattleID = Battles.BattleID AND r.Name = ?
                )
            WHERE BattleID = ? AND State = 'running'
            "#,
        )
        .bind(format_timestamp(&timestamp::truncate(outcome.started)))
        .bind(format_timestamp(&timestamp::truncate(outcome.finished)))
        .bind(json::to_json(&outcome.properties)?)
        .bind(&outcome.winner)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let refused = match current_state(&mut tx, id).await? {
                BattleState::Finished => TransitionError::AlreadyFinished(id),
                BattleState::Scheduled | BattleState::Running => TransitionError::NotRunning(id),
            };
            return Err(refused.into());
        }

        let battle = fetch_battle(&mut tx, id).await?;
        if battle.winner.is_none() {
            return Err(StorageError::validation(format!(
                "no winner found ({}) among competitors {:?} of battle {}",
                outcome.winner,
                battle.competitor_names(),
                id
            )));
        }

        for participant in &battle.participants {
            let result = outcome.results.get(participant.name()).ok_or_else(|| {
                StorageError::validation(format!(
                    "no result for competitor {} in battle {}",
                    participant.name(),
                    id
                ))
            })?;

            sqlx::query(
                r#"
                UPDATE BattleRobots
                SET Score = ?,
                    Results = ?
                WHERE BattleID = ? AND RobotID = ?
                "#,
            )
            .bind(result.score)
            .bind(&result.detail)
            .bind(id)
            .bind(participant.robot_id())
            .execute(&mut *tx)
            .await?;
        }

        let battle = fetch_battle(&mut tx, id).await?;
        tx.commit().await?;

        info!(
            battle_id = id,
            "Battle finished, winner {}",
            battle.winner_name().unwrap_or("?")
        );
        Ok(battle)
    }

    /// Flag every finished battle whose competitors changed after it ran.
    ///
    /// Times are compared through `datetime()`, which reads both the `T` and
    /// the space separated layouts and drops fractional seconds, the same
    /// way `timestamp::parse_timestamp` does.
    ///
    /// Returns the number of battles newly marked obsolete. Running it again
    /// without robot changes marks nothing.
    pub async fn obsolesce_finished(&self) -> Result<u64> {
        let marked = sqlx::query(
            r#"
            UPDATE Battles
            SET Obsolete = 1
            WHERE BattleID IN (
                    SELECT BattleRobots.BattleID
                    FROM BattleRobots
                    INNER JOIN Robots
                    ON BattleRobots.RobotID = Robots.RobotID
                    WHERE datetime(Robots.LastUpdated) > datetime(BattleRobots.RobotUpdated)
                      AND BattleRobots.RobotUpdated <> ''
                )
              AND Obsolete = 0
              AND State = 'finished'
            "#,
        )
        .execute(self.pool)
        .await?
        .rows_affected();

        if marked > 0 {
            info!("Marked {} finished battle(s) obsolete", marked);
        }
        Ok(marked)
    }

    async fn list_where(&self, filter: &BattleFilter, robot_id: Option<i64>) -> Result<Vec<Battle>> {
        // One read transaction so battles and participants come from the
        // same snapshot.
        let mut tx = self.pool.begin().await?;

        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM Battles", BATTLE_COLUMNS));
        push_conditions(&mut query, filter, robot_id);
        query.push(" ORDER BY BattleID");
        let rows: Vec<BattleRow> = query.build_query_as().fetch_all(&mut *tx).await?;

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM BattleRobots br INNER JOIN Robots r ON r.RobotID = br.RobotID \
             WHERE br.BattleID IN (SELECT BattleID FROM Battles",
            PARTICIPANT_COLUMNS
        ));
        push_conditions(&mut query, filter, robot_id);
        query.push(")");
        let participant_rows: Vec<ParticipantRow> =
            query.build_query_as().fetch_all(&mut *tx).await?;

        tx.commit().await?;

        let mut by_battle: BTreeMap<i64, Vec<Participant>> = BTreeMap::new();
        for row in participant_rows {
            let participant = Participant::try_from(row)?;
            by_battle
                .entry(participant.battle_id)
                .or_default()
                .push(participant);
        }

        rows.into_iter()
            .map(|row| {
                let participants = by_battle.remove(&row.battle_id).unwrap_or_default();
                Battle::from_parts(row, participants)
            })
            .collect()
    }
}

fn push_conditions(query: &mut QueryBuilder<'_, Sqlite>, filter: &BattleFilter, robot_id: Option<i64>) {
    let mut separator = " WHERE ";

    if let Some(state) = filter.state {
        query.push(separator).push("State = ").push_bind(state.as_str());
        separator = " AND ";
    }
    if let Some(obsolete) = filter.obsolete {
        query
            .push(separator)
            .push("Obsolete = ")
            .push_bind(i64::from(obsolete));
        separator = " AND ";
    }
    if let Some(robot_id) = robot_id {
        query
            .push(separator)
            .push("BattleID IN (SELECT BattleID FROM BattleRobots WHERE RobotID = ")
            .push_bind(robot_id)
            .push(")");
    }
}

async fn current_state(conn: &mut SqliteConnection, id: i64) -> Result<BattleState> {
    let state = sqlx::query_scalar::<_, Option<String>>("SELECT State FROM Battles WHERE BattleID = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StorageError::not_found(format!("battle with id {}", id)))?;

    state
        .as_deref()
        .unwrap_or_default()
        .parse()
}

async fn fetch_battle(conn: &mut SqliteConnection, id: i64) -> Result<Battle> {
    let row = sqlx::query_as::<_, BattleRow>(&format!(
        "SELECT {} FROM Battles WHERE BattleID = ?",
        BATTLE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| StorageError::not_found(format!("battle with id {}", id)))?;

    let participants = sqlx::query_as::<_, ParticipantRow>(&format!(
        "SELECT {} FROM BattleRobots br INNER JOIN Robots r ON r.RobotID = br.RobotID \
         WHERE br.BattleID = ?",
        PARTICIPANT_COLUMNS
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(Participant::try_from)
    .collect::<Result<Vec<_>>>()?;

    Battle::from_parts(row, participants)
}
