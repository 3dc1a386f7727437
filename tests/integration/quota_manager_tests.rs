//! Quota manager: reservation, release, plan changes, rate limiting,
//! and startup reconciliation.

use relay_control::models::plan::PlanTier;
use relay_control::models::session::SessionStatus;
use relay_control::quota::ResourceKind;
use relay_control::AppError;

use super::test_helpers::{create_session, create_user, setup};

#[tokio::test]
async fn reserve_enforces_the_tier_ceiling() {
    let env = setup().await;
    let user = create_user(&env, "res", PlanTier::Free).await;

    let mut tx = env.db.begin().await.unwrap();
    env.quota
        .reserve_tx(&mut tx, &user.id, ResourceKind::Session)
        .await
        .unwrap();
    let err = env
        .quota
        .reserve_tx(&mut tx, &user.id, ResourceKind::Session)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::QuotaExceeded { .. }));
    tx.commit().await.unwrap();

    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.current_sessions, 1);
}

#[tokio::test]
async fn release_clamps_at_zero() {
    let env = setup().await;
    let user = create_user(&env, "rel", PlanTier::Free).await;

    let mut tx = env.db.begin().await.unwrap();
    env.quota
        .release_tx(&mut tx, &user.id, ResourceKind::Session)
        .await
        .unwrap();
    env.quota
        .release_tx(&mut tx, &user.id, ResourceKind::Pair)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.current_sessions, 0);
    assert_eq!(plan.current_pairs, 0);
}

#[tokio::test]
async fn unlimited_resources_never_exhaust() {
    let env = setup().await;
    let user = create_user(&env, "adm", PlanTier::Admin).await;

    let mut tx = env.db.begin().await.unwrap();
    for _ in 0..50 {
        env.quota
            .reserve_tx(&mut tx, &user.id, ResourceKind::Session)
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn downgrade_reports_overage_without_terminating() {
    let env = setup().await;
    let user = create_user(&env, "down", PlanTier::Elite).await;

    let mut tx = env.db.begin().await.unwrap();
    for _ in 0..3 {
        env.quota
            .reserve_tx(&mut tx, &user.id, ResourceKind::Session)
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();

    let overages = env.quota.change_plan(&user.id, PlanTier::Free).await.unwrap();
    assert_eq!(overages.len(), 1);
    assert_eq!(overages[0].resource, "session");
    assert_eq!(overages[0].current, 3);
    assert_eq!(overages[0].max, 1);

    // The counter is untouched; nothing was cancelled.
    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.tier, PlanTier::Free);
    assert_eq!(plan.current_sessions, 3);
    assert_eq!(plan.max_sessions, 1);
}

#[tokio::test]
async fn upgrade_reports_no_overage() {
    let env = setup().await;
    let user = create_user(&env, "up", PlanTier::Free).await;
    let overages = env.quota.change_plan(&user.id, PlanTier::Elite).await.unwrap();
    assert!(overages.is_empty());

    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.max_sessions, 5);
    assert_eq!(plan.priority, 3);
}

#[tokio::test]
async fn rate_limit_throttles_past_the_hourly_budget() {
    let env = setup().await;
    let user = create_user(&env, "rate", PlanTier::Free).await;

    // Free tier: 100 per hour. The user creation itself spent none.
    let mut granted = 0;
    let denied = loop {
        match env.quota.allow(&user.id, "probe").await {
            Ok(()) => granted += 1,
            Err(err) => break err,
        }
        assert!(granted <= 200, "limiter never engaged");
    };
    assert_eq!(granted, 100);
    let AppError::Throttled { retry_after_s } = denied else {
        panic!("expected throttle");
    };
    assert!(retry_after_s >= 1);
}

#[tokio::test]
async fn activities_have_independent_buckets() {
    let env = setup().await;
    let user = create_user(&env, "multi", PlanTier::Free).await;

    while env.quota.allow(&user.id, "a").await.is_ok() {}
    // Exhausting one activity leaves the other untouched.
    env.quota.allow(&user.id, "b").await.unwrap();
}

#[tokio::test]
async fn startup_reconciliation_corrects_drifted_counters() {
    let env = setup().await;
    let user = create_user(&env, "drift", PlanTier::Elite).await;

    // Two live sessions on disk, but the counter says zero.
    let s1 = create_session(&env, &user).await;
    let s2 = create_session(&env, &user).await;
    env.ctx
        .sessions
        .update_status(&s1.id, SessionStatus::Active)
        .await
        .unwrap();
    env.ctx
        .sessions
        .update_status(&s2.id, SessionStatus::Active)
        .await
        .unwrap();

    env.quota.reconcile_counters().await.unwrap();

    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.current_sessions, 2);
    assert_eq!(plan.current_pairs, 0);
}
