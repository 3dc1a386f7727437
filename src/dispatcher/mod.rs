//! Sync dispatcher: edit/delete propagation and approval release.
//!
//! A thin queueing layer in front of the worker clients' `edit` and
//! `delete` calls. Edits for the same forwarded message coalesce within
//! the mapping's update delay (latest wins) and are strictly ordered
//! after the original dispatch by waiting on the tracker row's
//! forwarded id. A companion poller releases approved held messages
//! back into the dispatch path with evaluation already done.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backoff::Backoff;
use crate::models::event::{InboundMessage, MessageKind};
use crate::models::pending::PendingStatus;
use crate::models::session::SessionStatus;
use crate::pipeline::dispatch::{self, DispatchOutcome};
use crate::pipeline::PipelineContext;
use crate::platform::PlatformClient;
use crate::{AppError, Result};

/// How often the coalescing buffer and held messages are polled.
const TICK_INTERVAL: Duration = Duration::from_millis(500);
/// How long an edit waits for its original's dispatch before dropping.
const ORIGINAL_WAIT_LIMIT: Duration = Duration::from_secs(60);

/// One propagation job from the pipeline.
#[derive(Debug, Clone)]
pub enum SyncJob {
    /// Propagate an edit to a forwarded copy.
    Edit {
        /// Tracker row linking source and copy.
        tracker_id: String,
        /// Fully rendered replacement text.
        payload: String,
        /// Coalescing window in seconds.
        delay_s: u32,
    },
    /// Delete a forwarded copy.
    Delete {
        /// Tracker row linking source and copy.
        tracker_id: String,
    },
}

/// An edit waiting out its coalescing window.
struct BufferedEdit {
    payload: String,
    due: Instant,
    first_seen: Instant,
}

/// Spawn the sync dispatcher loop.
#[must_use]
pub fn spawn_sync_dispatcher(
    ctx: Arc<PipelineContext>,
    mut jobs: mpsc::Receiver<SyncJob>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut edits: HashMap<String, BufferedEdit> = HashMap::new();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("sync dispatcher cancelled");
                    return;
                }
                job = jobs.recv() => {
                    let Some(job) = job else { return };
                    match job {
                        SyncJob::Edit { tracker_id, payload, delay_s } => {
                            let now = Instant::now();
                            let due = now + Duration::from_secs(u64::from(delay_s));
                            // Coalesce: keep only the latest payload, but
                            // honor the first edit's due time so a stream
                            // of edits cannot starve propagation.
                            edits
                                .entry(tracker_id)
                                .and_modify(|buffered| buffered.payload.clone_from(&payload))
                                .or_insert(BufferedEdit { payload, due, first_seen: now });
                        }
                        SyncJob::Delete { tracker_id } => {
                            // A pending edit for a deleted message is moot.
                            edits.remove(&tracker_id);
                            if let Err(err) = propagate_delete(&ctx, &tracker_id).await {
                                error!(%err, tracker_id, "delete propagation failed");
                            }
                        }
                    }
                }
                () = tokio::time::sleep(TICK_INTERVAL) => {
                    flush_due_edits(&ctx, &mut edits).await;
                }
            }
        }
    })
}

/// Flush every buffered edit whose window elapsed, concurrently.
async fn flush_due_edits(ctx: &PipelineContext, edits: &mut HashMap<String, BufferedEdit>) {
    let now = Instant::now();
    let due_ids: Vec<String> = edits
        .iter()
        .filter(|(_, buffered)| buffered.due <= now)
        .map(|(id, _)| id.clone())
        .collect();

    let mut due = Vec::with_capacity(due_ids.len());
    for tracker_id in due_ids {
        if let Some(buffered) = edits.remove(&tracker_id) {
            due.push((tracker_id, buffered));
        }
    }

    let results = join_all(
        due.iter()
            .map(|(tracker_id, buffered)| propagate_edit(ctx, tracker_id, &buffered.payload)),
    )
    .await;

    for ((tracker_id, buffered), result) in due.into_iter().zip(results) {
        match result {
            Ok(EditResult::Done) => {}
            Ok(EditResult::OriginalNotDispatched) => {
                if buffered.first_seen.elapsed() > ORIGINAL_WAIT_LIMIT {
                    warn!(tracker_id, "original never dispatched, dropping edit");
                } else {
                    // Strict ordering: wait for the original's send to
                    // fill in the forwarded id, then try again.
                    edits.insert(
                        tracker_id,
                        BufferedEdit {
                            due: now + Duration::from_secs(1),
                            ..buffered
                        },
                    );
                }
            }
            Err(err) => error!(%err, tracker_id, "edit propagation failed"),
        }
    }
}

enum EditResult {
    Done,
    OriginalNotDispatched,
}

/// Push one coalesced edit through the owner's worker client.
async fn propagate_edit(
    ctx: &PipelineContext,
    tracker_id: &str,
    payload: &str,
) -> Result<EditResult> {
    let Some(row) = ctx.trackers.get_by_id(tracker_id).await? else {
        return Ok(EditResult::Done); // Row deleted meanwhile.
    };
    let Some(forwarded_msg_id) = row.forwarded_msg_id else {
        return Ok(EditResult::OriginalNotDispatched);
    };

    let Some(client) = client_for_mapping(ctx, &row.mapping_id).await? else {
        warn!(tracker_id, "no reachable session for edit sync");
        return Ok(EditResult::Done);
    };

    let outcome = with_platform_retries(ctx, || {
        client.edit(row.destination_chat_id, forwarded_msg_id, payload)
    })
    .await;

    match outcome {
        Ok(()) => {
            let hash = dispatch::content_hash(payload);
            ctx.trackers.mark_synced(&row.id, Some(&hash)).await?;
            info!(tracker_id, forwarded_msg_id, "edit propagated");
        }
        Err(err) => {
            error!(%err, tracker_id, "edit rejected by platform");
        }
    }
    Ok(EditResult::Done)
}

/// Push one delete through the owner's worker client.
async fn propagate_delete(ctx: &PipelineContext, tracker_id: &str) -> Result<()> {
    let Some(row) = ctx.trackers.get_by_id(tracker_id).await? else {
        return Ok(());
    };
    let Some(forwarded_msg_id) = row.forwarded_msg_id else {
        // Never dispatched; removing the row is the whole delete.
        ctx.trackers.delete(&row.id).await?;
        return Ok(());
    };

    let Some(client) = client_for_mapping(ctx, &row.mapping_id).await? else {
        warn!(tracker_id, "no reachable session for delete sync");
        ctx.trackers.mark_orphaned(&row.id).await?;
        return Ok(());
    };

    let outcome = with_platform_retries(ctx, || {
        client.delete(row.destination_chat_id, forwarded_msg_id)
    })
    .await;

    match outcome {
        Ok(()) => {
            ctx.trackers.delete(&row.id).await?;
            info!(tracker_id, forwarded_msg_id, "delete propagated");
        }
        Err(err) => {
            ctx.trackers.mark_orphaned(&row.id).await?;
            warn!(%err, tracker_id, "delete failed, tracker orphaned");
        }
    }
    Ok(())
}

/// Retry a platform call under the configured deadline and retry budget.
async fn with_platform_retries<'a, F>(ctx: &PipelineContext, mut call: F) -> Result<()>
where
    F: FnMut() -> crate::platform::BoxFuture<'a, Result<()>>,
{
    let retry_max = ctx.config.pipeline.default_retry_max;
    let deadline = ctx.config.platform_timeout();
    let mut backoff = Backoff::for_dispatch();
    let mut attempt = 0u32;

    loop {
        let result = match tokio::time::timeout(deadline, call()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::PlatformTransient("deadline exceeded".into())),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() => {
                attempt += 1;
                if attempt > retry_max {
                    return Err(err);
                }
                tokio::time::sleep(backoff.next_delay()).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// The worker client of the mapping owner's placed session, if any.
async fn client_for_mapping(
    ctx: &PipelineContext,
    mapping_id: &str,
) -> Result<Option<Arc<dyn PlatformClient>>> {
    let Some(mapping) = ctx.mappings.get_by_id(mapping_id).await? else {
        return Ok(None);
    };
    let sessions = ctx.sessions.list_by_user(&mapping.user_id).await?;
    for session in sessions {
        if session.status == SessionStatus::Active {
            if let Some(worker_id) = session.worker_id {
                if let Some(worker) = ctx.workers.get_by_id(&worker_id).await? {
                    return Ok(Some(ctx.provider.client_for(&worker)));
                }
            }
        }
    }
    Ok(None)
}

/// Spawn the approval poller.
///
/// Each tick auto-approves held messages past their deadline, expires
/// rows whose mapping disappeared, and releases due approved messages
/// into the dispatch path — gates bypassed, evaluation already ran.
#[must_use]
pub fn spawn_approval_poller(
    ctx: Arc<PipelineContext>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("approval poller cancelled");
                    return;
                }
                () = tokio::time::sleep(TICK_INTERVAL) => {}
            }

            let now = Utc::now();
            if let Err(err) = ctx.pending.expire_orphaned().await {
                error!(%err, "orphaned pending expiry failed");
            }
            match ctx.pending.auto_approve_due(now).await {
                Ok(promoted) if promoted > 0 => info!(promoted, "auto-approved held messages"),
                Ok(_) => {}
                Err(err) => error!(%err, "auto-approval failed"),
            }

            let due = match ctx.pending.claim_due(now).await {
                Ok(due) => due,
                Err(err) => {
                    error!(%err, "due pending claim failed");
                    continue;
                }
            };
            for pending in due {
                if let Err(err) = release_pending(&ctx, &pending).await {
                    error!(%err, pending_id = %pending.id, "pending release failed");
                    let _ = ctx
                        .pending
                        .set_status(&pending.id, PendingStatus::Approved)
                        .await;
                }
            }
        }
    })
}

/// Dispatch one released held message through the normal send path.
async fn release_pending(
    ctx: &PipelineContext,
    pending: &crate::models::pending::PendingMessage,
) -> Result<()> {
    let Some(mapping) = ctx.mappings.get_by_id(&pending.mapping_id).await? else {
        ctx.pending.set_status(&pending.id, PendingStatus::Expired).await?;
        return Ok(());
    };
    if !mapping.active {
        ctx.pending.set_status(&pending.id, PendingStatus::Expired).await?;
        return Ok(());
    }

    // Find the owning session to dispatch through.
    let sessions = ctx.sessions.list_by_user(&mapping.user_id).await?;
    let Some(session) = sessions
        .into_iter()
        .find(|s| s.status == SessionStatus::Active && s.worker_id.is_some())
    else {
        // Owner has no placed session right now; retry next tick.
        ctx.pending.set_status(&pending.id, PendingStatus::Approved).await?;
        return Ok(());
    };

    let rendered = pending
        .processed_content
        .clone()
        .unwrap_or_else(|| pending.original_content.clone());
    let synthetic = InboundMessage {
        source_chat_id: pending.source_chat_id,
        message_id: pending.source_msg_id,
        text: pending.original_content.clone(),
        kind: MessageKind::Text,
        is_forward: false,
        sender: None,
    };

    let outcome = dispatch::forward_message(
        ctx,
        &session.id,
        &mapping,
        &synthetic,
        &rendered,
        std::time::Instant::now(),
    )
    .await?;

    let final_status = match outcome {
        DispatchOutcome::Sent { .. } | DispatchOutcome::Duplicate => PendingStatus::Sent,
        DispatchOutcome::TransientExhausted => PendingStatus::Approved,
        DispatchOutcome::PermanentFailed | DispatchOutcome::Skipped => PendingStatus::Expired,
    };
    ctx.pending.set_status(&pending.id, final_status).await?;
    if final_status == PendingStatus::Sent {
        info!(pending_id = %pending.id, "held message dispatched");
    }
    Ok(())
}
