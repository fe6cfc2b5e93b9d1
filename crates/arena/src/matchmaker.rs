//! Decides which robot pairs still need a battle.
//!
//! Every pair of robots has to meet once in a finished battle that is not
//! obsolete. Pairs lacking such a battle are pending; the order in which
//! pending pairs get scheduled is up to a [`PriorityStrategy`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use storage::Database;
use storage::models::{Battle, BattleProperties, Matchup, Robot};
use tracing::{debug, info};

use crate::error::Result;

/// All unordered pairs of `robots`, each once.
pub fn required_matchups(robots: &[Robot]) -> BTreeSet<Matchup> {
    let mut matchups = BTreeSet::new();
    for (i, a) in robots.iter().enumerate() {
        for b in &robots[i + 1..] {
            if let Some(matchup) = Matchup::new(a.robot_id, b.robot_id) {
                matchups.insert(matchup);
            }
        }
    }
    matchups
}

/// Pairs whose competitor set matches some battle in `battles`.
fn covered_by(battles: &[Battle]) -> BTreeSet<Matchup> {
    battles
        .iter()
        .filter_map(|battle| Matchup::from_competitors(battle.competitor_ids()))
        .collect()
}

/// What a strategy may weigh when ordering pending pairs.
#[derive(Debug, Clone, Default)]
pub struct RankingContext {
    /// Finished, non-obsolete battles per robot id
    pub battles_played: BTreeMap<i64, usize>,
    /// Robots currently in a running battle
    pub busy: BTreeSet<i64>,
}

impl RankingContext {
    pub async fn load(db: &Database) -> Result<Self> {
        let mut context = Self::default();

        for battle in db.battles().finished(true).await? {
            for robot_id in battle.competitor_ids() {
                *context.battles_played.entry(robot_id).or_default() += 1;
            }
        }
        for battle in db.battles().running().await? {
            context.busy.extend(battle.competitor_ids());
        }

        Ok(context)
    }

    pub fn played(&self, robot_id: i64) -> usize {
        self.battles_played.get(&robot_id).copied().unwrap_or(0)
    }
}

/// Orders pending matchups, most important first.
pub trait PriorityStrategy: Send + Sync {
    fn rank(&self, pending: Vec<Matchup>, context: &RankingContext) -> Vec<Matchup>;

    fn name(&self) -> &'static str;
}

/// Pairs in robot id order.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobin;

impl PriorityStrategy for RoundRobin {
    fn rank(&self, mut pending: Vec<Matchup>, _context: &RankingContext) -> Vec<Matchup> {
        pending.sort();
        pending
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}

/// Robots with the fewest valid battles first; pairs with a robot that is
/// currently fighting go last.
#[derive(Debug, Default, Clone, Copy)]
pub struct FewestBattles;

impl PriorityStrategy for FewestBattles {
    fn rank(&self, mut pending: Vec<Matchup>, context: &RankingContext) -> Vec<Matchup> {
        pending.sort_by_key(|matchup| {
            let [a, b] = matchup.robot_ids();
            let busy = context.busy.contains(&a) || context.busy.contains(&b);
            let played = context.played(a) + context.played(b);
            (busy, played, *matchup)
        });
        pending
    }

    fn name(&self) -> &'static str {
        "fewest-battles"
    }
}

pub struct Matchmaker<'a> {
    db: &'a Database,
    strategy: Arc<dyn PriorityStrategy>,
}

impl<'a> Matchmaker<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_strategy(db, Arc::new(RoundRobin))
    }

    pub fn with_strategy(db: &'a Database, strategy: Arc<dyn PriorityStrategy>) -> Self {
        Self { db, strategy }
    }

    /// Required matchups not yet settled by a finished, non-obsolete battle,
    /// in priority order.
    pub async fn pending_work(&self) -> Result<Vec<Matchup>> {
        let robots = self.db.robots().list().await?;
        let covered = covered_by(&self.db.battles().finished(true).await?);

        let pending: Vec<Matchup> = required_matchups(&robots)
            .into_iter()
            .filter(|matchup| !covered.contains(matchup))
            .collect();

        let context = RankingContext::load(self.db).await?;
        Ok(self.strategy.rank(pending, &context))
    }

    pub async fn schedule(
        &self,
        matchup: Matchup,
        properties: Option<&BattleProperties>,
    ) -> Result<Battle> {
        Ok(self
            .db
            .battles()
            .schedule(&matchup.robot_ids(), properties)
            .await?)
    }

    /// Schedule up to `limit` pending matchups, skipping those that already
    /// wait in a scheduled battle.
    pub async fn schedule_pending(
        &self,
        limit: Option<usize>,
        properties: Option<&BattleProperties>,
    ) -> Result<Vec<Battle>> {
        let waiting = covered_by(&self.db.battles().scheduled().await?);

        let mut scheduled = Vec::new();
        for matchup in self.pending_work().await? {
            if limit.is_some_and(|limit| scheduled.len() >= limit) {
                break;
            }
            if waiting.contains(&matchup) {
                debug!("Matchup {} already scheduled", matchup);
                continue;
            }
            scheduled.push(self.schedule(matchup, properties).await?);
        }

        if !scheduled.is_empty() {
            info!(
                "Scheduled {} battle(s) using {} priority",
                scheduled.len(),
                self.strategy.name()
            );
        }
        Ok(scheduled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use storage::dto::{BattleOutcome, CompetitorResult, RegisterRobotRequest};
    use storage::models::default_properties;

    fn robot(id: i64) -> Robot {
        Robot {
            robot_id: id,
            name: format!("r.R{}", id),
            last_updated: None,
        }
    }

    fn pair(a: i64, b: i64) -> Matchup {
        Matchup::new(a, b).unwrap()
    }

    async fn tournament(names: &[&str]) -> (Database, Vec<Robot>) {
        let db = Database::in_memory().await.unwrap();
        let mut robots = Vec::new();
        for name in names {
            robots.push(
                db.robots()
                    .register(&RegisterRobotRequest::new(*name))
                    .await
                    .unwrap(),
            );
        }
        (db, robots)
    }

    async fn play(db: &Database, battle: &Battle, winner: &str) {
        let started = NaiveDate::from_ymd_opt(2015, 8, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        db.battles().mark_running(battle.battle_id).await.unwrap();
        db.battles()
            .complete(
                battle.battle_id,
                &BattleOutcome {
                    started,
                    finished: started,
                    properties: default_properties(),
                    winner: winner.to_string(),
                    results: battle
                        .competitor_names()
                        .into_iter()
                        .map(|name| {
                            let score = if name == winner { 10 } else { 0 };
                            (name, CompetitorResult { score, detail: "{}".to_string() })
                        })
                        .collect(),
                },
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_required_matchups_count() {
        for n in 0..8i64 {
            let robots: Vec<Robot> = (1..=n).map(robot).collect();
            let matchups = required_matchups(&robots);
            assert_eq!(matchups.len() as i64, n * (n - 1).max(0) / 2);
        }
    }

    #[test]
    fn test_required_matchups_unordered() {
        let robots = vec![robot(3), robot(1), robot(2)];
        let matchups: Vec<Matchup> = required_matchups(&robots).into_iter().collect();
        assert_eq!(matchups, vec![pair(1, 2), pair(1, 3), pair(2, 3)]);
    }

    #[test]
    fn test_fewest_battles_prefers_idle_newcomers() {
        let context = RankingContext {
            battles_played: BTreeMap::from([(1, 4), (2, 4), (3, 0), (4, 1)]),
            busy: BTreeSet::from([4]),
        };
        let pending = vec![pair(1, 2), pair(1, 3), pair(3, 4), pair(2, 3)];

        let ranked = FewestBattles.rank(pending, &context);

        assert_eq!(ranked, vec![pair(1, 3), pair(2, 3), pair(1, 2), pair(3, 4)]);
    }

    #[tokio::test]
    async fn test_pending_work_excludes_covered_pairs() {
        let (db, robots) = tournament(&["R1", "R2", "R3"]).await;
        let matchmaker = Matchmaker::new(&db);
        let [r1, r2, r3] = [robots[0].robot_id, robots[1].robot_id, robots[2].robot_id];

        assert_eq!(matchmaker.pending_work().await.unwrap().len(), 3);

        let battle = matchmaker.schedule(pair(r1, r2), None).await.unwrap();
        // Scheduled is not covered.
        assert_eq!(matchmaker.pending_work().await.unwrap().len(), 3);

        play(&db, &battle, "R1").await;
        assert_eq!(
            matchmaker.pending_work().await.unwrap(),
            vec![pair(r1, r3), pair(r2, r3)]
        );

        let later = chrono::Local::now().naive_local() + chrono::Duration::hours(1);
        db.robots().touch(r2, Some(later)).await.unwrap();
        db.battles().obsolesce_finished().await.unwrap();
        assert_eq!(matchmaker.pending_work().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_schedule_pending_skips_waiting_pairs() {
        let (db, _) = tournament(&["A", "B", "C", "D"]).await;
        let matchmaker = Matchmaker::with_strategy(&db, Arc::new(FewestBattles));

        let first = matchmaker.schedule_pending(Some(2), None).await.unwrap();
        assert_eq!(first.len(), 2);

        let rest = matchmaker.schedule_pending(None, None).await.unwrap();
        assert_eq!(rest.len(), 4);

        assert!(matchmaker.schedule_pending(None, None).await.unwrap().is_empty());
        assert_eq!(db.battles().scheduled().await.unwrap().len(), 6);
    }
}
