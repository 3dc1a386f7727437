//! Unit tests for the session repository.

use std::sync::Arc;

use relay_control::models::session::{Session, SessionStatus};
use relay_control::persistence::db;
use relay_control::persistence::session_repo::SessionRepo;
use relay_control::AppError;

async fn repo() -> SessionRepo {
    let pool = db::connect_memory().await.expect("memory db");
    SessionRepo::new(Arc::new(pool))
}

fn session(user: &str) -> Session {
    Session::new(user.into(), "main".into(), "+15550100".into(), vec![9, 9])
}

#[tokio::test]
async fn create_and_fetch_round_trips() {
    let repo = repo().await;
    let session = session("u1");
    repo.create(&session).await.unwrap();

    let fetched = repo.get_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(fetched, session);
    assert!(repo.get_by_id("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn status_updates_validate_transitions() {
    let repo = repo().await;
    let session = session("u1");
    repo.create(&session).await.unwrap();

    let updated = repo
        .update_status(&session.id, SessionStatus::Active)
        .await
        .unwrap();
    assert_eq!(updated.status, SessionStatus::Active);

    // Idle is not reachable from active.
    let err = repo
        .update_status(&session.id, SessionStatus::Idle)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = repo
        .update_status("missing", SessionStatus::Active)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn counts_quota_consuming_sessions_only() {
    let repo = repo().await;

    let mut active = session("u1");
    active.status = SessionStatus::Active;
    repo.create(&active).await.unwrap();

    let mut crashed = session("u1");
    crashed.status = SessionStatus::Crashed;
    repo.create(&crashed).await.unwrap();

    let idle = session("u1");
    repo.create(&idle).await.unwrap();

    let other = session("u2");
    repo.create(&other).await.unwrap();

    assert_eq!(repo.count_consuming_by_user("u1").await.unwrap(), 2);
    assert_eq!(repo.count_consuming_by_user("u2").await.unwrap(), 0);
}

#[tokio::test]
async fn record_activity_bumps_counter_and_stamp() {
    let repo = repo().await;
    let session = session("u1");
    repo.create(&session).await.unwrap();

    repo.record_activity(&session.id).await.unwrap();
    repo.record_activity(&session.id).await.unwrap();

    let fetched = repo.get_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(fetched.msg_count, 2);
    assert!(fetched.last_activity.is_some());
}

#[tokio::test]
async fn lists_scope_by_user() {
    let repo = repo().await;
    repo.create(&session("u1")).await.unwrap();
    repo.create(&session("u1")).await.unwrap();
    repo.create(&session("u2")).await.unwrap();

    assert_eq!(repo.list_by_user("u1").await.unwrap().len(), 2);
    assert_eq!(repo.list_all().await.unwrap().len(), 3);
}
