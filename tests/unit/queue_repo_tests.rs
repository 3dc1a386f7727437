//! Unit tests for queue ordering and dense renumbering.

use std::sync::Arc;

use chrono::{Duration, Utc};
use relay_control::models::queue::{QueueItem, QueueStatus};
use relay_control::persistence::db::{self, Database};
use relay_control::persistence::queue_repo::QueueRepo;

async fn setup() -> (Arc<Database>, QueueRepo) {
    let pool = Arc::new(db::connect_memory().await.expect("memory db"));
    let repo = QueueRepo::new(Arc::clone(&pool));
    (pool, repo)
}

async fn enqueue(pool: &Arc<Database>, repo: &QueueRepo, session: &str, priority: u8) -> QueueItem {
    let mut tx = pool.begin().await.unwrap();
    let position = repo.next_position_for_tx(&mut tx, priority).await.unwrap();
    let item = QueueItem::new("u1".into(), session.into(), priority, position);
    repo.create_tx(&mut tx, &item).await.unwrap();
    repo.renumber_tx(&mut tx).await.unwrap();
    tx.commit().await.unwrap();
    item
}

#[tokio::test]
async fn ordering_is_priority_then_fifo() {
    let (pool, repo) = setup().await;
    enqueue(&pool, &repo, "free1", 1).await;
    enqueue(&pool, &repo, "free2", 1).await;
    enqueue(&pool, &repo, "elite", 3).await;

    let queued = repo.list_queued().await.unwrap();
    let sessions: Vec<&str> = queued.iter().map(|i| i.session_id.as_str()).collect();
    assert_eq!(sessions, vec!["elite", "free1", "free2"]);

    // Dense 1-based positions after the elite insert renumbered.
    let positions: Vec<i64> = queued.iter().map(|i| i.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);
    let waits: Vec<i64> = queued.iter().map(|i| i.est_wait_s).collect();
    assert_eq!(waits, vec![300, 600, 900]);
}

#[tokio::test]
async fn next_position_counts_same_or_higher_priority() {
    let (pool, repo) = setup().await;
    enqueue(&pool, &repo, "a", 3).await;
    enqueue(&pool, &repo, "b", 1).await;

    let mut tx = pool.begin().await.unwrap();
    // A new priority-2 item ranks behind the 3 but ahead of the 1.
    assert_eq!(repo.next_position_for_tx(&mut tx, 2).await.unwrap(), 2);
    assert_eq!(repo.next_position_for_tx(&mut tx, 5).await.unwrap(), 1);
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn promotion_renumbers_densely() {
    let (pool, repo) = setup().await;
    let first = enqueue(&pool, &repo, "s1", 2).await;
    enqueue(&pool, &repo, "s2", 2).await;
    enqueue(&pool, &repo, "s3", 2).await;

    let mut tx = pool.begin().await.unwrap();
    repo.mark_promoted_tx(&mut tx, &first.id).await.unwrap();
    repo.renumber_tx(&mut tx).await.unwrap();
    tx.commit().await.unwrap();

    let queued = repo.list_queued().await.unwrap();
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].session_id, "s2");
    assert_eq!(queued[0].position, 1);
    assert_eq!(queued[1].position, 2);
    assert_eq!(repo.count_queued().await.unwrap(), 2);
}

#[tokio::test]
async fn expiry_candidates_respect_cutoff() {
    let (pool, repo) = setup().await;

    let mut old = QueueItem::new("u1".into(), "old".into(), 1, 1);
    old.queued_at = Utc::now() - Duration::hours(2);
    let mut tx = pool.begin().await.unwrap();
    repo.create_tx(&mut tx, &old).await.unwrap();
    tx.commit().await.unwrap();

    enqueue(&pool, &repo, "fresh", 1).await;

    let cutoff = Utc::now() - Duration::hours(1);
    let stale = repo.queued_older_than(cutoff).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].session_id, "old");

    let mut tx = pool.begin().await.unwrap();
    repo.mark_expired_tx(&mut tx, &stale[0].id).await.unwrap();
    repo.renumber_tx(&mut tx).await.unwrap();
    tx.commit().await.unwrap();

    let remaining = repo.list_queued().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].status, QueueStatus::Queued);
    assert_eq!(remaining[0].position, 1);
}
