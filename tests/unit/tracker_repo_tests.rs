//! Unit tests for the message tracker: the at-most-once ground truth.

use std::sync::Arc;

use relay_control::models::tracker::TrackerRow;
use relay_control::persistence::db;
use relay_control::persistence::tracker_repo::TrackerRepo;
use relay_control::AppError;

async fn repo() -> TrackerRepo {
    let pool = Arc::new(db::connect_memory().await.expect("memory db"));
    TrackerRepo::new(pool)
}

#[tokio::test]
async fn duplicate_key_is_a_conflict() {
    let repo = repo().await;
    let row = TrackerRow::new("m1".into(), -100, 42, -200);
    repo.insert(&row).await.unwrap();

    let dup = TrackerRow::new("m1".into(), -100, 42, -200);
    let err = repo.insert(&dup).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // A different mapping may track the same source message.
    let sibling = TrackerRow::new("m2".into(), -100, 42, -300);
    repo.insert(&sibling).await.unwrap();
    assert_eq!(repo.list_by_source(-100, 42).await.unwrap().len(), 2);
}

#[tokio::test]
async fn set_forwarded_completes_the_row() {
    let repo = repo().await;
    let row = TrackerRow::new("m1".into(), -100, 42, -200);
    repo.insert(&row).await.unwrap();

    repo.set_forwarded(&row.id, 500, Some("abc123")).await.unwrap();

    let fetched = repo.get_by_key("m1", -100, 42).await.unwrap().unwrap();
    assert_eq!(fetched.forwarded_msg_id, Some(500));
    assert_eq!(fetched.hash.as_deref(), Some("abc123"));
    assert!(fetched.last_synced.is_some());
}

#[tokio::test]
async fn mark_synced_keeps_hash_when_none_supplied() {
    let repo = repo().await;
    let row = TrackerRow::new("m1".into(), -100, 42, -200);
    repo.insert(&row).await.unwrap();
    repo.set_forwarded(&row.id, 500, Some("h1")).await.unwrap();

    repo.mark_synced(&row.id, None).await.unwrap();
    let fetched = repo.get_by_id(&row.id).await.unwrap().unwrap();
    assert_eq!(fetched.hash.as_deref(), Some("h1"));

    repo.mark_synced(&row.id, Some("h2")).await.unwrap();
    let fetched = repo.get_by_id(&row.id).await.unwrap().unwrap();
    assert_eq!(fetched.hash.as_deref(), Some("h2"));
}

#[tokio::test]
async fn delete_reopens_the_key() {
    let repo = repo().await;
    let row = TrackerRow::new("m1".into(), -100, 42, -200);
    repo.insert(&row).await.unwrap();
    repo.delete(&row.id).await.unwrap();

    // The permanent-failure path frees the key for a later attempt.
    let retry = TrackerRow::new("m1".into(), -100, 42, -200);
    repo.insert(&retry).await.unwrap();
}

#[tokio::test]
async fn orphan_flag_round_trips() {
    let repo = repo().await;
    let row = TrackerRow::new("m1".into(), -100, 42, -200);
    repo.insert(&row).await.unwrap();
    repo.mark_orphaned(&row.id).await.unwrap();

    let fetched = repo.get_by_id(&row.id).await.unwrap().unwrap();
    assert!(fetched.orphaned);
}
