//! Unit tests for held-message decisions and the poller queries.

use std::sync::Arc;

use chrono::{Duration, Utc};
use relay_control::models::pending::{PendingMessage, PendingStatus};
use relay_control::persistence::db;
use relay_control::persistence::pending_repo::PendingRepo;
use relay_control::AppError;

async fn repo() -> PendingRepo {
    let pool = Arc::new(db::connect_memory().await.expect("memory db"));
    PendingRepo::new(pool)
}

fn pending(expires_in: Option<i64>) -> PendingMessage {
    let now = Utc::now();
    PendingMessage::new(
        "m1".into(),
        "u1".into(),
        -100,
        42,
        "original".into(),
        "processed".into(),
        now,
        expires_in.map(|secs| now + Duration::seconds(secs)),
    )
}

#[tokio::test]
async fn approve_then_second_decision_conflicts() {
    let repo = repo().await;
    let row = pending(None);
    repo.create(&row).await.unwrap();

    repo.decide(&row.id, true, "op1").await.unwrap();

    let fetched = repo.get_by_id(&row.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, PendingStatus::Approved);
    assert_eq!(fetched.approved_by.as_deref(), Some("op1"));
    assert!(fetched.approved_at.is_some());

    let err = repo.decide(&row.id, false, "op2").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn reject_blocks_dispatch() {
    let repo = repo().await;
    let row = pending(None);
    repo.create(&row).await.unwrap();
    repo.decide(&row.id, false, "op1").await.unwrap();

    assert_eq!(
        repo.get_by_id(&row.id).await.unwrap().unwrap().status,
        PendingStatus::Rejected
    );
    assert!(repo.claim_due(Utc::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn auto_approval_fires_only_past_deadline() {
    let repo = repo().await;
    let due = pending(Some(-5));
    let not_due = pending(Some(3600));
    let never = pending(None);
    repo.create(&due).await.unwrap();
    repo.create(&not_due).await.unwrap();
    repo.create(&never).await.unwrap();

    assert_eq!(repo.auto_approve_due(Utc::now()).await.unwrap(), 1);
    assert_eq!(
        repo.get_by_id(&due.id).await.unwrap().unwrap().status,
        PendingStatus::Approved
    );
    assert_eq!(
        repo.get_by_id(&not_due.id).await.unwrap().unwrap().status,
        PendingStatus::Pending
    );
}

#[tokio::test]
async fn claim_due_is_single_shot() {
    let repo = repo().await;
    let row = pending(None);
    repo.create(&row).await.unwrap();
    repo.decide(&row.id, true, "op").await.unwrap();

    let claimed = repo.claim_due(Utc::now()).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].status, PendingStatus::Scheduled);

    // A second poll must not double-claim.
    assert!(repo.claim_due(Utc::now()).await.unwrap().is_empty());
}
