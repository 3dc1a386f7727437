//! Edit and delete propagation through the sync dispatcher.

use relay_control::models::event::{InboundMessage, MessageKind, PlatformEvent};
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
async fn source_edit_propagates_to_the_forwarded_copy() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "edith", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    let (_, _, mut mapping) = create_pair(&env, &user, -100, -200).await;
    mapping.sync.update_enabled = true;
    mapping.sync.update_delay_s = 0;
    env.api.update_mapping(&mapping).await.unwrap();

    // Original dispatch: source message 100 becomes forwarded 500.
    env.router
        .ingest(&session.id, new_message(-100, 100, "v1 text"))
        .await
        .unwrap();
    assert!(eventually(|| async { env.client.sends().len() == 1 }).await);
    let original = env
        .ctx
        .trackers
        .get_by_key(&mapping.id, -100, 100)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(original.forwarded_msg_id, Some(500));
    let first_hash = original.hash.clone();

    // The source editor changes the text.
    env.router
        .ingest(
            &session.id,
            PlatformEvent::MessageEdited {
                source_chat_id: -100,
                message_id: 100,
                new_text: "v2 text".into(),
            },
        )
        .await
        .unwrap();

    assert!(
        eventually(|| async { env.client.edits().len() == 1 }).await,
        "edit should reach the worker"
    );
    assert_eq!(env.client.edits()[0], (-200, 500, "v2 text".to_owned()));

    // Same tracker row, advanced sync stamp, new content hash.
    let rows = env.ctx.trackers.list_by_source(-100, 100).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, original.id);
    assert_ne!(rows[0].hash, first_hash);
}

#[tokio::test]
async fn edits_are_ignored_when_sync_is_off() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "nosync", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();
    create_pair(&env, &user, -100, -200).await;

    env.router
        .ingest(&session.id, new_message(-100, 1, "original"))
        .await
        .unwrap();
    assert!(eventually(|| async { env.client.sends().len() == 1 }).await);

    env.router
        .ingest(
            &session.id,
            PlatformEvent::MessageEdited {
                source_chat_id: -100,
                message_id: 1,
                new_text: "changed".into(),
            },
        )
        .await
        .unwrap();

    // Give the dispatcher a couple of ticks; nothing must arrive.
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    assert!(env.client.edits().is_empty());
}

#[tokio::test]
async fn rapid_edits_coalesce_to_the_latest() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "burst", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    let (_, _, mut mapping) = create_pair(&env, &user, -100, -200).await;
    mapping.sync.update_enabled = true;
    mapping.sync.update_delay_s = 2;
    env.api.update_mapping(&mapping).await.unwrap();

    env.router
        .ingest(&session.id, new_message(-100, 1, "v1"))
        .await
        .unwrap();
    assert!(eventually(|| async { env.client.sends().len() == 1 }).await);

    for text in ["v2", "v3", "v4"] {
        env.router
            .ingest(
                &session.id,
                PlatformEvent::MessageEdited {
                    source_chat_id: -100,
                    message_id: 1,
                    new_text: text.into(),
                },
            )
            .await
            .unwrap();
    }

    assert!(
        eventually(|| async { !env.client.edits().is_empty() }).await,
        "coalesced edit should flush"
    );
    // One round trip carrying only the last revision.
    let edits = env.client.edits();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].2, "v4");
}

#[tokio::test]
async fn source_delete_removes_the_forwarded_copy() {
    let env = setup().await;
    create_worker(&env, "w1", 4096, 0, 0.0, 10, 0).await;
    let user = create_user(&env, "del", PlanTier::Pro).await;
    let session = create_session(&env, &user).await;
    env.scheduler.assign(&session.id, &user.id).await.unwrap();

    let (_, _, mut mapping) = create_pair(&env, &user, -100, -200).await;
    mapping.sync.delete_enabled = true;
    env.api.update_mapping(&mapping).await.unwrap();

    env.router
        .ingest(&session.id, new_message(-100, 9, "to be deleted"))
        .await
        .unwrap();
    assert!(eventually(|| async { env.client.sends().len() == 1 }).await);

    env.router
        .ingest(
            &session.id,
            PlatformEvent::MessageDeleted {
                source_chat_id: -100,
                message_ids: vec![9],
            },
        )
        .await
        .unwrap();

    assert!(
        eventually(|| async { env.client.deletes().len() == 1 }).await,
        "delete should reach the worker"
    );
    assert_eq!(env.client.deletes()[0], (-200, 500));
    // The tracker row is gone once the platform confirmed.
    assert!(
        eventually(|| async {
            env.ctx
                .trackers
                .list_by_source(-100, 9)
                .await
                .unwrap()
                .is_empty()
        })
        .await
    );
}
