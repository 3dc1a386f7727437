//! End-to-end forwarding through the per-session pipeline.

use std::sync::atomic::Ordering;

use relay_control::models::event::{InboundMessage, MessageKind, PlatformEvent};
use relay_control::models::log::LogStatus;
use relay_control::models::plan::PlanTier;

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
async fn message_flows_from_event_to_worker_send() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "flo", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();
    create_pair(&env, &user, -100, -200).await;

    env.router
        .ingest(&session.id, new_message(-100, 1, "hello relay"))
        .await
        .unwrap();

    assert!(
        eventually(|| async { env.client.sends().len() == 1 }).await,
        "send should reach the worker"
    );
    let sends = env.client.sends();
    assert_eq!(sends[0], (-200, "hello relay".to_owned()));

    // The tracker row is completed with the platform's message id.
    let row = env
        .ctx
        .trackers
        .list_by_source(-100, 1)
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(row.forwarded_msg_id, Some(500));
    assert!(row.hash.is_some());

    // And a success log row exists.
    let logs = env.ctx.logs.list(Some(LogStatus::Success), 10, 0).await.unwrap();
    assert_eq!(logs.len(), 1);

    // Session and assignment counters advanced.
    assert!(
        eventually(|| async {
            env.ctx
                .sessions
                .get_by_id(&session.id)
                .await
                .unwrap()
                .unwrap()
                .msg_count
                == 1
        })
        .await
    );
}

#[tokio::test]
async fn duplicate_delivery_is_suppressed() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "dup", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();
    create_pair(&env, &user, -100, -200).await;

    // A retry storm delivers the same source event twice.
    env.router
        .ingest(&session.id, new_message(-100, 7, "once only"))
        .await
        .unwrap();
    env.router
        .ingest(&session.id, new_message(-100, 7, "once only"))
        .await
        .unwrap();

    assert!(
        eventually(|| async {
            env.ctx
                .logs
                .list(Some(LogStatus::Success), 10, 0)
                .await
                .unwrap()
                .len()
                == 2
        })
        .await,
        "both passes should log success"
    );

    // Exactly one outbound copy, and the second pass is tagged duplicate.
    assert_eq!(env.client.sends().len(), 1);
    let logs = env.ctx.logs.list(Some(LogStatus::Success), 10, 0).await.unwrap();
    let duplicates: Vec<_> = logs
        .iter()
        .filter(|log| log.filter_reason.as_deref() == Some("duplicate"))
        .collect();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(env.ctx.trackers.list_by_source(-100, 7).await.unwrap().len(), 1);
}

#[tokio::test]
async fn filtered_messages_are_logged_not_sent() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "filt", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();
    let (_, _, mut mapping) = create_pair(&env, &user, -100, -200).await;
    mapping.filters.exclude_kw = vec!["spam".into()];
    env.api.update_mapping(&mapping).await.unwrap();

    env.router
        .ingest(&session.id, new_message(-100, 2, "pure spam here"))
        .await
        .unwrap();

    assert!(
        eventually(|| async {
            env.ctx
                .logs
                .list(Some(LogStatus::Filtered), 10, 0)
                .await
                .unwrap()
                .len()
                == 1
        })
        .await
    );
    let log = env
        .ctx
        .logs
        .list(Some(LogStatus::Filtered), 10, 0)
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(log.filter_reason.as_deref(), Some("exclude_kw"));
    assert!(env.client.sends().is_empty());
    assert!(env.ctx.trackers.list_by_source(-100, 2).await.unwrap().is_empty());
}

#[tokio::test]
async fn transient_send_failures_retry_then_succeed() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "retry", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();
    create_pair(&env, &user, -100, -200).await;

    env.client.transient_failures.store(2, Ordering::SeqCst);
    env.router
        .ingest(&session.id, new_message(-100, 3, "flaky"))
        .await
        .unwrap();

    assert!(
        eventually(|| async { env.client.sends().len() == 1 }).await,
        "send should succeed after retries"
    );
    let row = env
        .ctx
        .trackers
        .list_by_source(-100, 3)
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert!(row.forwarded_msg_id.is_some());
}

#[tokio::test]
async fn permanent_send_failure_frees_the_key() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "perm", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();
    create_pair(&env, &user, -100, -200).await;

    env.client.permanent_failure.store(true, Ordering::SeqCst);
    env.router
        .ingest(&session.id, new_message(-100, 4, "doomed"))
        .await
        .unwrap();

    assert!(
        eventually(|| async {
            env.ctx
                .logs
                .list(Some(LogStatus::Error), 10, 0)
                .await
                .unwrap()
                .len()
                == 1
        })
        .await
    );
    // The tracker row was deleted so a later attempt may retry.
    assert!(env.ctx.trackers.list_by_source(-100, 4).await.unwrap().is_empty());
    assert!(env.client.sends().is_empty());
}

#[tokio::test]
async fn sibling_mappings_each_get_a_copy() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "fan", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();
    // Two mappings reading the same source chat into different chats.
    create_pair(&env, &user, -100, -200).await;
    create_pair(&env, &user, -100, -300).await;

    env.router
        .ingest(&session.id, new_message(-100, 5, "fan out"))
        .await
        .unwrap();

    assert!(eventually(|| async { env.client.sends().len() == 2 }).await);
    let mut destinations: Vec<i64> = env.client.sends().iter().map(|(chat, _)| *chat).collect();
    destinations.sort_unstable();
    assert_eq!(destinations, vec![-300, -200]);
}
