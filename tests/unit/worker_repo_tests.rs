//! Unit tests for the worker repository.

use std::sync::Arc;

use chrono::{Duration, Utc};
use relay_control::models::worker::{Worker, WorkerStatus};
use relay_control::persistence::db;
use relay_control::persistence::worker_repo::WorkerRepo;
use relay_control::AppError;

async fn repo() -> WorkerRepo {
    let pool = db::connect_memory().await.expect("memory db");
    WorkerRepo::new(Arc::new(pool))
}

fn worker(label: &str) -> Worker {
    Worker::new(
        label.into(),
        format!("http://{label}:9400"),
        4096,
        10,
        "token".into(),
    )
}

#[tokio::test]
async fn duplicate_label_is_a_conflict() {
    let repo = repo().await;
    repo.create(&worker("w1")).await.unwrap();
    let err = repo.create(&worker("w1")).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn heartbeat_updates_metrics_and_stamp() {
    let repo = repo().await;
    let w = worker("w1");
    repo.create(&w).await.unwrap();

    repo.apply_heartbeat(&w.id, 2048, 35.5, 4, 12, 41).await.unwrap();

    let fetched = repo.get_by_id(&w.id).await.unwrap().unwrap();
    assert_eq!(fetched.used_ram, 2048);
    assert!((fetched.cpu_percent - 35.5).abs() < f64::EPSILON);
    assert_eq!(fetched.active_sessions, 4);
    assert_eq!(fetched.load_score, 41);
    assert!(fetched.last_heartbeat.is_some());
    assert_eq!(fetched.status, WorkerStatus::Online);
}

#[tokio::test]
async fn heartbeat_does_not_undrain() {
    let repo = repo().await;
    let w = worker("w1");
    repo.create(&w).await.unwrap();
    repo.set_status(&w.id, WorkerStatus::Draining).await.unwrap();

    repo.apply_heartbeat(&w.id, 100, 1.0, 0, 5, 2).await.unwrap();
    let fetched = repo.get_by_id(&w.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, WorkerStatus::Draining);
}

#[tokio::test]
async fn stale_online_finds_lapsed_heartbeats() {
    let repo = repo().await;
    let fresh = worker("fresh");
    let lapsed = worker("lapsed");
    repo.create(&fresh).await.unwrap();
    repo.create(&lapsed).await.unwrap();
    repo.apply_heartbeat(&fresh.id, 1, 1.0, 0, 1, 1).await.unwrap();

    // A worker that never heartbeated counts as stale too.
    let stale = repo.stale_online(Utc::now() - Duration::seconds(30)).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].worker_id, "lapsed");
}

#[tokio::test]
async fn fleet_ram_sums_online_workers_only() {
    let repo = repo().await;
    let a = worker("a");
    let b = worker("b");
    repo.create(&a).await.unwrap();
    repo.create(&b).await.unwrap();
    repo.apply_heartbeat(&a.id, 1000, 0.0, 0, 0, 0).await.unwrap();
    repo.apply_heartbeat(&b.id, 2000, 0.0, 0, 0, 0).await.unwrap();
    repo.set_status(&b.id, WorkerStatus::Offline).await.unwrap();

    let (used, total) = repo.fleet_ram().await.unwrap();
    assert_eq!(used, 1000);
    assert_eq!(total, 4096);
}

#[tokio::test]
async fn active_session_adjustments_clamp_at_zero() {
    let pool = Arc::new(db::connect_memory().await.expect("memory db"));
    let repo = WorkerRepo::new(Arc::clone(&pool));
    let w = worker("w1");
    repo.create(&w).await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    repo.adjust_active_sessions_tx(&mut tx, &w.id, -3).await.unwrap();
    repo.adjust_active_sessions_tx(&mut tx, &w.id, 2).await.unwrap();
    tx.commit().await.unwrap();

    let fetched = repo.get_by_id(&w.id).await.unwrap().unwrap();
    assert_eq!(fetched.active_sessions, 2);
}
