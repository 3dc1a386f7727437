//! Overflow detection and notification cooldown.

use std::sync::Arc;

use relay_control::models::plan::PlanTier;
use relay_control::persistence::ops_repo::OpsRepo;

use super::test_helpers::{create_session, create_user, create_worker, setup};

#[tokio::test]
async fn deep_queue_writes_one_scaling_event_per_cooldown() {
    let env = setup().await;
    // No capacity anywhere: every assign queues.
    create_worker(&env, "full", 4096, 0, 0.0, 1, 1).await;

    for i in 0..7 {
        let user = create_user(&env, &format!("u{i}"), PlanTier::Free).await;
        let session = create_session(&env, &user).await;
        env.scheduler.assign(&session.id, &user.id).await.unwrap();
    }

    let ops = OpsRepo::new(Arc::clone(&env.db));
    let event = ops.latest_scaling_event().await.unwrap().unwrap();
    assert_eq!(event.event_type, "overflow_detected");
    assert_eq!(event.trigger.as_str(), "high_queue");
    assert!(event.queued > 5);

    // The seventh assign crossed the threshold again, but the default
    // five-minute cooldown suppresses a second record.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scaling_event")
        .fetch_one(env.db.as_ref())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn high_ram_utilisation_trips_the_load_trigger() {
    let env = setup().await;
    // 90% of fleet RAM in use, plenty of session slots.
    create_worker(&env, "hot", 4096, 3700, 10.0, 50, 1).await;

    let user = create_user(&env, "hotu", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    let ops = OpsRepo::new(Arc::clone(&env.db));
    let event = ops.latest_scaling_event().await.unwrap().unwrap();
    assert_eq!(event.trigger.as_str(), "high_load");
    assert!(event.utilisation_pct > 85.0);
}

#[tokio::test]
async fn healthy_fleet_writes_no_events() {
    let env = setup().await;
    create_worker(&env, "calm", 4096, 100, 5.0, 10, 0).await;

    let user = create_user(&env, "calmu", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    let ops = OpsRepo::new(Arc::clone(&env.db));
    assert!(ops.latest_scaling_event().await.unwrap().is_none());
}
