//! Assignment flow: placement rule, quota gating, and the
//! assign/terminate round trip.

use relay_control::models::assignment::AssignmentStatus;
use relay_control::models::plan::PlanTier;
use relay_control::models::session::SessionStatus;
use relay_control::persistence::assignment_repo::AssignmentRepo;
use relay_control::scheduler::AssignOutcome;
use relay_control::AppError;

use super::test_helpers::{create_session, create_user, create_worker, setup};

#[tokio::test]
async fn free_user_with_headroom_takes_least_loaded_worker() {
    let env = setup().await;
    // Load scores (sessions-only): w1 ≈ 6, w2 ≈ 9, w3 ≈ 12; every
    // worker keeps more than five open slots.
    let w1 = create_worker(&env, "w1", 4096, 0, 0.0, 10, 2).await;
    create_worker(&env, "w2", 4096, 0, 0.0, 10, 3).await;
    create_worker(&env, "w3", 4096, 0, 0.0, 10, 4).await;

    let user = create_user(&env, "freddie", PlanTier::Free).await;
    let session = create_session(&env, &user).await;

    let outcome = env.scheduler.assign(&session.id, &user.id).await.unwrap();
    assert_eq!(outcome, AssignOutcome::Assigned { worker_id: w1.id.clone() });

    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.current_sessions, 1);

    let placed = env.ctx.sessions.get_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(placed.worker_id.as_deref(), Some(w1.id.as_str()));
    assert_eq!(placed.status, SessionStatus::Active);
}

#[tokio::test]
async fn premium_bias_is_observable() {
    let env = setup().await;
    // w1 is least loaded but has only 3 open slots; w2 has plenty.
    let w1 = create_worker(&env, "w1", 4096, 0, 0.0, 10, 7).await;
    let w2 = create_worker(&env, "w2", 4096, 0, 40.0, 20, 10).await;

    let pro = create_user(&env, "petra", PlanTier::Pro).await;
    let pro_session = create_session(&env, &pro).await;
    let outcome = env.scheduler.assign(&pro_session.id, &pro.id).await.unwrap();
    assert_eq!(outcome, AssignOutcome::Assigned { worker_id: w1.id.clone() });

    let free = create_user(&env, "frank", PlanTier::Free).await;
    let free_session = create_session(&env, &free).await;
    let outcome = env.scheduler.assign(&free_session.id, &free.id).await.unwrap();
    assert_eq!(outcome, AssignOutcome::Assigned { worker_id: w2.id.clone() });
}

#[tokio::test]
async fn quota_exhaustion_rejects_assignment() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;

    // Free plan allows exactly one session.
    let user = create_user(&env, "capped", PlanTier::Free).await;
    let first = create_session(&env, &user).await;
    let second = create_session(&env, &user).await;

    env.scheduler.assign(&first.id, &user.id).await.unwrap();
    let err = env.scheduler.assign(&second.id, &user.id).await.unwrap_err();
    let AppError::QuotaExceeded { resource, current, max } = err else {
        panic!("expected quota error");
    };
    assert_eq!(resource, "session");
    assert_eq!(current, 1);
    assert_eq!(max, 1);

    // The failed attempt must not leak a reservation.
    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.current_sessions, 1);
}

#[tokio::test]
async fn double_assignment_is_a_conflict() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "dupe", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;

    env.scheduler.assign(&session.id, &user.id).await.unwrap();
    let err = env.scheduler.assign(&session.id, &user.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn foreign_session_is_rejected() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let owner = create_user(&env, "owner", PlanTier::Pro).await;
    let other = create_user(&env, "other", PlanTier::Pro).await;
    let session = create_session(&env, &owner).await;

    let err = env.scheduler.assign(&session.id, &other.id).await.unwrap_err();
    assert!(matches!(err, AppError::InputInvalid(_)));
}

#[tokio::test]
async fn terminate_restores_quota_and_frees_the_slot() {
    let env = setup().await;
    let worker = create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "toni", PlanTier::Free).await;
    let session = create_session(&env, &user).await;

    env.scheduler.assign(&session.id, &user.id).await.unwrap();
    env.scheduler.terminate(&session.id).await.unwrap();

    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.current_sessions, 0);

    let freed = env.ctx.workers.get_by_id(&worker.id).await.unwrap().unwrap();
    assert_eq!(freed.active_sessions, 0);

    let assignments = AssignmentRepo::new(std::sync::Arc::clone(&env.db));
    assert!(assignments.get_live_by_session(&session.id).await.unwrap().is_none());
    let stopped = env.ctx.sessions.get_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert!(stopped.worker_id.is_none());

    // The same session can be placed again after a restart.
    let restarted = env.ctx.sessions.update_status(&session.id, SessionStatus::Idle).await.unwrap();
    assert_eq!(restarted.status, SessionStatus::Idle);
    let outcome = env.scheduler.assign(&session.id, &user.id).await.unwrap();
    assert!(matches!(outcome, AssignOutcome::Assigned { .. }));
}

#[tokio::test]
async fn pause_and_resume_travel_to_the_assignment() {
    use relay_control::models::log::ControlAction;
    use relay_control::models::worker::Heartbeat;

    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "pauser", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    // Worker acks via its first heartbeat; the assignment goes active.
    let hb = Heartbeat {
        worker_id: "w1".into(),
        used_ram: 512,
        cpu_percent: 10.0,
        active_sessions: 1,
        ping_ms: 5,
        version: "1.4.2".into(),
    };
    env.api.worker_heartbeat("w1-token", &hb).await.unwrap();

    let paused = env
        .api
        .update_session_status(&session.id, SessionStatus::Paused)
        .await
        .unwrap();
    assert_eq!(paused.status, SessionStatus::Paused);

    let assignments = AssignmentRepo::new(std::sync::Arc::clone(&env.db));
    let live = assignments.get_live_by_session(&session.id).await.unwrap().unwrap();
    assert_eq!(live.status, AssignmentStatus::Paused);

    let resumed = env
        .api
        .update_session_status(&session.id, SessionStatus::Active)
        .await
        .unwrap();
    assert_eq!(resumed.status, SessionStatus::Active);
    let live = assignments.get_live_by_session(&session.id).await.unwrap().unwrap();
    assert_eq!(live.status, AssignmentStatus::Active);

    // The worker sees both the pause and the resume command.
    let controls = env.api.worker_poll_controls("w1-token", "w1").await.unwrap();
    let actions: Vec<ControlAction> = controls.iter().map(|c| c.action).collect();
    assert_eq!(actions.len(), 2);
    assert!(actions.contains(&ControlAction::PauseSession));
    assert!(actions.contains(&ControlAction::ResumeSession));

    // Stopping through the same surface releases slot and quota.
    let stopped = env
        .api
        .update_session_status(&session.id, SessionStatus::Stopped)
        .await
        .unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert!(assignments.get_live_by_session(&session.id).await.unwrap().is_none());
    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.current_sessions, 0);
}

#[tokio::test]
async fn manual_reassign_moves_the_session() {
    let env = setup().await;
    let w1 = create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let w2 = create_worker(&env, "w2", 4096, 0, 50.0, 10, 0).await;
    let user = create_user(&env, "manny", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;

    env.scheduler.assign(&session.id, &user.id).await.unwrap();
    env.api.reassign_session(&session.id, "w2").await.unwrap();

    let placed = env.ctx.sessions.get_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(placed.worker_id.as_deref(), Some(w2.id.as_str()));

    let assignments = AssignmentRepo::new(std::sync::Arc::clone(&env.db));
    let live = assignments.get_live_by_session(&session.id).await.unwrap().unwrap();
    assert_eq!(live.worker_id, w2.id);
    assert_eq!(live.status, AssignmentStatus::Assigned);

    let old = env.ctx.workers.get_by_id(&w1.id).await.unwrap().unwrap();
    assert_eq!(old.active_sessions, 0);
    let new = env.ctx.workers.get_by_id(&w2.id).await.unwrap().unwrap();
    assert_eq!(new.active_sessions, 1);

    // Quota unchanged: the reservation moved with the session.
    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.current_sessions, 1);
}
