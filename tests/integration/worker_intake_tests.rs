//! Worker-facing intake: heartbeats, auth, failure reports, and
//! control polling.

use relay_control::models::event::SessionFailureKind;
use relay_control::models::log::ControlAction;
use relay_control::models::plan::PlanTier;
use relay_control::models::session::SessionStatus;
use relay_control::models::worker::Heartbeat;
use relay_control::AppError;

use super::test_helpers::{create_session, create_user, setup};

fn heartbeat(label: &str) -> Heartbeat {
    Heartbeat {
        worker_id: label.to_owned(),
        used_ram: 1024,
        cpu_percent: 25.0,
        active_sessions: 2,
        ping_ms: 8,
        version: "1.4.2".to_owned(),
    }
}

#[tokio::test]
async fn heartbeat_requires_the_worker_token() {
    let env = setup().await;
    let worker = env
        .api
        .register_worker("w1", "http://w1:9400", 4096, 10)
        .await
        .unwrap();

    let err = env
        .api
        .worker_heartbeat("wrong-token", &heartbeat("w1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InputInvalid(_)));

    let updated = env
        .api
        .worker_heartbeat(&worker.auth_token, &heartbeat("w1"))
        .await
        .unwrap();
    assert_eq!(updated.used_ram, 1024);
    assert!(updated.last_heartbeat.is_some());
    // Score per the formula: 0.4·25 + 0.3·25 + 0.3·20 = 23.5 → 24.
    assert_eq!(updated.load_score, 24);
}

#[tokio::test]
async fn first_heartbeat_activates_the_assignment() {
    use relay_control::models::assignment::AssignmentStatus;

    let env = setup().await;
    let worker = env
        .api
        .register_worker("w1", "http://w1:9400", 4096, 10)
        .await
        .unwrap();
    let user = create_user(&env, "hb", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    let before = env
        .ctx
        .assignments
        .get_live_by_session(&session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before.status, AssignmentStatus::Assigned);

    env.api
        .worker_heartbeat(&worker.auth_token, &heartbeat("w1"))
        .await
        .unwrap();

    let after = env
        .ctx
        .assignments
        .get_live_by_session(&session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, AssignmentStatus::Active);
    assert!(after.activated_at.is_some());
    assert!(after.last_heartbeat.is_some());
}

#[tokio::test]
async fn unknown_worker_heartbeat_is_not_found() {
    let env = setup().await;
    let err = env
        .api
        .worker_heartbeat("token", &heartbeat("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn auth_failure_crashes_the_session_and_releases_quota() {
    let env = setup().await;
    let worker = env
        .api
        .register_worker("w1", "http://w1:9400", 4096, 10)
        .await
        .unwrap();
    let user = create_user(&env, "authfail", PlanTier::Free).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    env.api
        .worker_session_failure(
            &worker.auth_token,
            "w1",
            &session.id,
            SessionFailureKind::Auth,
            "login code rejected",
        )
        .await
        .unwrap();

    let crashed = env.ctx.sessions.get_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(crashed.status, SessionStatus::Crashed);
    assert!(crashed.worker_id.is_none());

    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.current_sessions, 0);
}

#[tokio::test]
async fn connection_failure_requeues_with_a_bump() {
    let env = setup().await;
    let worker = env
        .api
        .register_worker("w1", "http://w1:9400", 4096, 1)
        .await
        .unwrap();
    let user = create_user(&env, "connfail", PlanTier::Free).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    env.api
        .worker_session_failure(
            &worker.auth_token,
            "w1",
            &session.id,
            SessionFailureKind::Connection,
            "socket reset",
        )
        .await
        .unwrap();

    // Re-placed immediately: the drain found the freed slot, and the
    // reservation never lapsed.
    let placed = env.ctx.sessions.get_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(placed.status, SessionStatus::Active);
    let plan = env.quota.ensure_plan(&user.id).await.unwrap();
    assert_eq!(plan.current_sessions, 1);
}

#[tokio::test]
async fn terminate_queues_a_stop_control_for_the_worker() {
    let env = setup().await;
    let worker = env
        .api
        .register_worker("w1", "http://w1:9400", 4096, 10)
        .await
        .unwrap();
    let user = create_user(&env, "ctl", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();
    env.scheduler.terminate(&session.id).await.unwrap();

    let controls = env
        .api
        .worker_poll_controls(&worker.auth_token, "w1")
        .await
        .unwrap();
    assert_eq!(controls.len(), 1);
    assert_eq!(controls[0].action, ControlAction::StopSession);
    assert_eq!(controls[0].session_id, session.id);

    // Delivered exactly once.
    assert!(env
        .api
        .worker_poll_controls(&worker.auth_token, "w1")
        .await
        .unwrap()
        .is_empty());

    env.api
        .worker_ack_control(&worker.auth_token, "w1", &controls[0].id)
        .await
        .unwrap();
}
