//! Overflow queueing, priority-ordered promotion, and queue expiry.

use std::sync::Arc;

use chrono::{Duration, Utc};
use relay_control::models::plan::PlanTier;
use relay_control::models::queue::QueueStatus;
use relay_control::models::session::SessionStatus;
use relay_control::persistence::queue_repo::QueueRepo;
use relay_control::scheduler::AssignOutcome;

use super::test_helpers::{create_session, create_user, create_worker, setup};

#[tokio::test]
async fn overflow_queues_in_priority_order() {
    let env = setup().await;
    // One worker, already saturated.
    create_worker(&env, "full", 4096, 0, 0.0, 1, 1).await;

    let free1 = create_user(&env, "free1", PlanTier::Free).await;
    let free2 = create_user(&env, "free2", PlanTier::Free).await;
    let elite = create_user(&env, "elite", PlanTier::Elite).await;
    let s_free1 = create_session(&env, &free1).await;
    let s_free2 = create_session(&env, &free2).await;
    let s_elite = create_session(&env, &elite).await;

    // Arrival order: free1, free2, elite.
    let AssignOutcome::Queued { position, .. } =
        env.scheduler.assign(&s_free1.id, &free1.id).await.unwrap()
    else {
        panic!("expected queueing");
    };
    assert_eq!(position, 1);
    env.scheduler.assign(&s_free2.id, &free2.id).await.unwrap();
    let AssignOutcome::Queued { position, est_wait_s } =
        env.scheduler.assign(&s_elite.id, &elite.id).await.unwrap()
    else {
        panic!("expected queueing");
    };
    // Elite jumps both free users.
    assert_eq!(position, 1);
    assert_eq!(est_wait_s, 300);

    let queue = QueueRepo::new(Arc::clone(&env.db));
    let queued = queue.list_queued().await.unwrap();
    let order: Vec<&str> = queued.iter().map(|i| i.session_id.as_str()).collect();
    assert_eq!(order, vec![s_elite.id.as_str(), s_free1.id.as_str(), s_free2.id.as_str()]);
    let positions: Vec<i64> = queued.iter().map(|i| i.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);
}

#[tokio::test]
async fn freed_capacity_promotes_the_elite_first() {
    let env = setup().await;
    create_worker(&env, "full", 4096, 0, 0.0, 1, 1).await;

    let free1 = create_user(&env, "free1", PlanTier::Free).await;
    let elite = create_user(&env, "elite", PlanTier::Elite).await;
    let s_free = create_session(&env, &free1).await;
    let s_elite = create_session(&env, &elite).await;
    env.scheduler.assign(&s_free.id, &free1.id).await.unwrap();
    env.scheduler.assign(&s_elite.id, &elite.id).await.unwrap();

    // A second worker comes up with one free slot.
    create_worker(&env, "fresh", 4096, 0, 0.0, 1, 0).await;
    env.scheduler.drain_queue().await.unwrap();

    let placed = env.ctx.sessions.get_by_id(&s_elite.id).await.unwrap().unwrap();
    assert_eq!(placed.status, SessionStatus::Active);
    assert!(placed.worker_id.is_some());

    // The free user is still waiting, renumbered to position 1.
    let queue = QueueRepo::new(Arc::clone(&env.db));
    let queued = queue.list_queued().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].session_id, s_free.id);
    assert_eq!(queued[0].position, 1);
}

#[tokio::test]
async fn stale_queue_items_expire_and_release_quota() {
    let env = setup().await;
    let user = create_user(&env, "waiter", PlanTier::Free).await;
    let session = create_session(&env, &user).await;

    // Queue the session (no workers at all), then age the item.
    env.scheduler.assign(&session.id, &user.id).await.unwrap();
    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.current_sessions, 1);

    let queue = QueueRepo::new(Arc::clone(&env.db));
    let item = queue.get_queued_by_session(&session.id).await.unwrap().unwrap();
    // Age the row two hours into the past.
    let aged_at = Utc::now() - Duration::hours(2);
    sqlx::query("UPDATE session_queue SET queued_at = ?1 WHERE id = ?2")
        .bind(aged_at.to_rfc3339())
        .bind(&item.id)
        .execute(env.db.as_ref())
        .await
        .unwrap();

    env.scheduler.force_scan().await.unwrap();

    let refreshed = queue.get_queued_by_session(&session.id).await.unwrap();
    assert!(refreshed.is_none());
    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.current_sessions, 0);

    // The session itself stays idle, never crashed.
    let idle = env.ctx.sessions.get_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(idle.status, SessionStatus::Idle);
    assert_eq!(
        queue_status_of(&env, &item.id).await,
        QueueStatus::Expired
    );
}

async fn queue_status_of(env: &super::test_helpers::TestEnv, item_id: &str) -> QueueStatus {
    let status: String = sqlx::query_scalar("SELECT status FROM session_queue WHERE id = ?1")
        .bind(item_id)
        .fetch_one(env.db.as_ref())
        .await
        .unwrap();
    QueueStatus::parse(&status).unwrap()
}
