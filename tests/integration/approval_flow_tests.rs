//! Approval hold, operator decisions, auto-approval, and release.

use relay_control::models::event::{InboundMessage, MessageKind, PlatformEvent};
use relay_control::models::pending::PendingStatus;
use relay_control::models::plan::PlanTier;
use relay_control::AppError;

use super::test_helpers::{
    create_pair, create_session, create_user, create_worker, eventually, setup,
};

fn new_message(chat: i64, id: i64, text: &str) -> PlatformEvent {
    PlatformEvent::NewMessage(InboundMessage {
        source_chat_id: chat,
        message_id: id,
        text: text.to_owned(),
        kind: MessageKind::Text,
        is_forward: false,
        sender: None,
    })
}

#[tokio::test]
async fn approval_gate_holds_then_dispatches_on_approve() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "appr", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    let (_, _, mut mapping) = create_pair(&env, &user, -100, -200).await;
    mapping.delay.enabled = true;
    mapping.delay.seconds = 0;
    mapping.delay.require_approval = true;
    env.api.update_mapping(&mapping).await.unwrap();

    env.router
        .ingest(&session.id, new_message(-100, 1, "needs a nod"))
        .await
        .unwrap();

    // Held, not sent.
    assert!(
        eventually(|| async { env.api.list_pending(&user.id).await.unwrap().len() == 1 }).await
    );
    assert!(env.client.sends().is_empty());
    let held = env.api.list_pending(&user.id).await.unwrap().pop().unwrap();
    assert_eq!(held.status, PendingStatus::Pending);
    assert_eq!(held.processed_content.as_deref(), Some("needs a nod"));

    // Operator approves; the poller dispatches it.
    env.api.approve_pending(&held.id, "operator-1").await.unwrap();
    assert!(
        eventually(|| async { env.client.sends().len() == 1 }).await,
        "approved message should dispatch"
    );
    assert!(
        eventually(|| async {
            env.api.list_pending(&user.id).await.unwrap()[0].status == PendingStatus::Sent
        })
        .await
    );

    // The dispatch created the tracker row like a normal forward.
    assert_eq!(env.ctx.trackers.list_by_source(-100, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn rejected_messages_never_dispatch() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "rej", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    let (_, _, mut mapping) = create_pair(&env, &user, -100, -200).await;
    mapping.delay.require_approval = true;
    env.api.update_mapping(&mapping).await.unwrap();

    env.router
        .ingest(&session.id, new_message(-100, 2, "blocked"))
        .await
        .unwrap();
    assert!(
        eventually(|| async { env.api.list_pending(&user.id).await.unwrap().len() == 1 }).await
    );
    let held = env.api.list_pending(&user.id).await.unwrap().pop().unwrap();

    env.api.reject_pending(&held.id, "operator-1").await.unwrap();

    // A second decision conflicts either way.
    let err = env.api.approve_pending(&held.id, "operator-2").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    assert!(env.client.sends().is_empty());
}

#[tokio::test]
async fn auto_approval_fires_after_the_deadline() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "auto", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    let (_, _, mut mapping) = create_pair(&env, &user, -100, -200).await;
    mapping.delay.enabled = true;
    mapping.delay.seconds = 0;
    mapping.delay.require_approval = true;
    mapping.delay.auto_approve_after_s = Some(1);
    env.api.update_mapping(&mapping).await.unwrap();

    env.router
        .ingest(&session.id, new_message(-100, 3, "patience"))
        .await
        .unwrap();

    // Nobody decides; the deadline promotes and the poller dispatches.
    assert!(
        eventually(|| async { env.client.sends().len() == 1 }).await,
        "auto-approved message should dispatch"
    );
    let held = env.api.list_pending(&user.id).await.unwrap().pop().unwrap();
    assert_eq!(held.status, PendingStatus::Sent);
    assert!(held.approved_by.is_none());
}

#[tokio::test]
async fn delay_without_approval_is_a_timed_release() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "timed", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    let (_, _, mut mapping) = create_pair(&env, &user, -100, -200).await;
    mapping.delay.enabled = true;
    mapping.delay.seconds = 1;
    env.api.update_mapping(&mapping).await.unwrap();

    env.router
        .ingest(&session.id, new_message(-100, 4, "later"))
        .await
        .unwrap();

    // Held pre-approved, then released once the delay elapses.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(env.client.sends().is_empty());
    assert!(
        eventually(|| async { env.client.sends().len() == 1 }).await,
        "delayed message should release"
    );
}
