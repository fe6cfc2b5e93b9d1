use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use storage::dto::{BattleOutcome, CompetitorResult, RegisterRobotRequest};
use storage::models::{BattleState, default_properties};
use storage::{Database, ErrorKind, TransitionError};
use tempfile::TempDir;

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2015, 7, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn win(winner: &str, scores: &[(&str, i64)]) -> BattleOutcome {
    BattleOutcome {
        started: at(2, 10),
        finished: at(2, 11),
        properties: default_properties(),
        winner: winner.to_string(),
        results: scores
            .iter()
            .map(|(name, score)| {
                (
                    name.to_string(),
                    CompetitorResult {
                        score: *score,
                        detail: String::from("{}"),
                    },
                )
            })
            .collect::<BTreeMap<_, _>>(),
    }
}

async fn register(db: &Database, name: &str) -> i64 {
    db.robots()
        .register(&RegisterRobotRequest::new(name).updated_at(at(1, 9)))
        .await
        .unwrap()
        .robot_id
}

#[tokio::test]
async fn finished_battle_moves_to_obsolete_after_touch() {
    let db = Database::in_memory().await.unwrap();
    let r1 = register(&db, "R1").await;
    let r2 = register(&db, "R2").await;
    let _r3 = register(&db, "R3").await;

    let battle = db.battles().schedule(&[r1, r2], None).await.unwrap();
    db.battles().mark_running(battle.battle_id).await.unwrap();
    let finished = db
        .battles()
        .complete(battle.battle_id, &win("R1", &[("R1", 10), ("R2", 0)]))
        .await
        .unwrap();
    assert_eq!(finished.winner, Some(r1));

    let valid = db.battles().finished(true).await.unwrap();
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0].battle_id, battle.battle_id);
    assert!(db.battles().obsolete().await.unwrap().is_empty());

    db.robots().touch(r2, Some(at(3, 9))).await.unwrap();
    db.battles().obsolesce_finished().await.unwrap();

    assert!(db.battles().finished(true).await.unwrap().is_empty());
    let obsolete = db.battles().obsolete().await.unwrap();
    assert_eq!(obsolete.len(), 1);
    assert_eq!(obsolete[0].battle_id, battle.battle_id);
    assert!(obsolete[0].obsolete);
    assert_eq!(obsolete[0].state, BattleState::Finished);

    // Still listed among all finished battles.
    assert_eq!(db.battles().finished(false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn touch_before_run_does_not_obsolesce() {
    let db = Database::in_memory().await.unwrap();
    let r1 = register(&db, "R1").await;
    let r2 = register(&db, "R2").await;

    let battle = db.battles().schedule(&[r1, r2], None).await.unwrap();
    // Changed while still scheduled: the snapshot taken at run time already
    // includes this change.
    db.robots().touch(r1, Some(at(1, 12))).await.unwrap();
    db.battles().mark_running(battle.battle_id).await.unwrap();
    db.battles()
        .complete(battle.battle_id, &win("R2", &[("R1", 1), ("R2", 5)]))
        .await
        .unwrap();

    assert_eq!(db.battles().obsolesce_finished().await.unwrap(), 0);
    assert_eq!(db.battles().finished(true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn legacy_snapshot_layout_compares_by_time() {
    let db = Database::in_memory().await.unwrap();
    let r1 = register(&db, "R1").await;
    let r2 = register(&db, "R2").await;

    let battle = db.battles().schedule(&[r1, r2], None).await.unwrap();
    db.battles().mark_running(battle.battle_id).await.unwrap();
    db.battles()
        .complete(battle.battle_id, &win("R1", &[("R1", 10), ("R2", 0)]))
        .await
        .unwrap();

    // Written by older tooling: space separated, fractional seconds.
    sqlx::query("UPDATE BattleRobots SET RobotUpdated = ? WHERE BattleID = ? AND RobotID = ?")
        .bind("2015-07-01 09:00:00.750")
        .bind(battle.battle_id)
        .bind(r2)
        .execute(db.pool())
        .await
        .unwrap();

    // Same second, then earlier: neither is a change after the snapshot.
    for earlier in [at(1, 9), at(1, 8)] {
        db.robots().touch(r2, Some(earlier)).await.unwrap();
        let stored = db.battles().find_by_id(battle.battle_id).await.unwrap();
        assert!(!stored.has_stale_participant());
        assert_eq!(db.battles().obsolesce_finished().await.unwrap(), 0);
    }

    db.robots().touch(r2, Some(at(1, 10))).await.unwrap();
    let stored = db.battles().find_by_id(battle.battle_id).await.unwrap();
    assert!(stored.has_stale_participant());
    assert_eq!(db.battles().obsolesce_finished().await.unwrap(), 1);
    assert_eq!(db.battles().obsolete().await.unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_registration_keeps_first_robot() {
    let db = Database::in_memory().await.unwrap();
    let first = db
        .robots()
        .register(&RegisterRobotRequest::new("Alpha").updated_at(at(1, 9)))
        .await
        .unwrap();

    let err = db
        .robots()
        .register(&RegisterRobotRequest::new("Alpha"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.is_recoverable());

    assert_eq!(db.robots().find_by_name("Alpha").await.unwrap(), first);
    assert_eq!(db.robots().list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_mark_running_succeeds_once() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("arena.sqlite3").display());
    let db = Database::new(&url).await.unwrap();
    db.run_migrations().await.unwrap();

    let a = register(&db, "A").await;
    let b = register(&db, "B").await;

    for _ in 0..5 {
        let id = db.battles().schedule(&[a, b], None).await.unwrap().battle_id;

        let claims: Vec<_> = (0..4)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move { db.battles().mark_running(id).await })
            })
            .collect();

        let mut won = 0;
        for claim in claims {
            match claim.await.unwrap() {
                Ok(battle) => {
                    assert_eq!(battle.state, BattleState::Running);
                    won += 1;
                }
                Err(err) => {
                    assert_eq!(err.transition(), Some(TransitionError::AlreadyStarted(id)));
                }
            }
        }
        assert_eq!(won, 1, "battle {} claimed {} times", id, won);
    }

    db.close().await;
}

#[tokio::test]
async fn reopened_database_keeps_tournament() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("arena.sqlite3").display());

    let battle_id = {
        let db = Database::new(&url).await.unwrap();
        db.run_migrations().await.unwrap();
        let a = register(&db, "A").await;
        let b = register(&db, "B").await;
        let id = db.battles().schedule(&[a, b], None).await.unwrap().battle_id;
        db.close().await;
        id
    };

    let db = Database::new(&url).await.unwrap();
    db.run_migrations().await.unwrap();
    let battle = db.battles().find_by_id(battle_id).await.unwrap();
    assert_eq!(battle.state, BattleState::Scheduled);
    assert_eq!(battle.competitor_names(), vec!["A".to_string(), "B".to_string()]);
}
