//! Per-session forwarding pipeline.
//!
//! Each session gets a single-consumer task fed by a bounded channel;
//! a full channel pauses the worker's update polling (flow control on
//! [`PlatformClient`](crate::platform::PlatformClient)). Events for the
//! same source chat serialise on a shared ordering lock so an edit can
//! never race the original message's dispatch, even across sibling
//! mappings.

pub mod dispatch;
pub mod starter;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::dispatcher::SyncJob;
use crate::models::event::{InboundMessage, MessageKind, PlatformEvent};
use crate::models::log::{ForwardingLog, LogStatus};
use crate::models::pending::{PendingMessage, PendingStatus};
use crate::persistence::assignment_repo::AssignmentRepo;
use crate::persistence::chat_repo::{DestinationRepo, SourceRepo};
use crate::persistence::db::Database;
use crate::persistence::log_repo::LogRepo;
use crate::persistence::mapping_repo::MappingRepo;
use crate::persistence::pending_repo::PendingRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::tracker_repo::TrackerRepo;
use crate::persistence::worker_repo::WorkerRepo;
use crate::platform::ClientProvider;
use crate::rules::{evaluate, Decision, PolicyCache};
use crate::{AppError, Result};

/// Shared dependencies of the pipeline and the sync dispatcher.
pub struct PipelineContext {
    /// Runtime configuration.
    pub config: Arc<GlobalConfig>,
    /// Compiled-policy cache.
    pub policies: PolicyCache,
    /// Mapping repository.
    pub mappings: MappingRepo,
    /// Source repository.
    pub sources: SourceRepo,
    /// Destination repository.
    pub destinations: DestinationRepo,
    /// Tracker repository.
    pub trackers: TrackerRepo,
    /// Forwarding-log repository.
    pub logs: LogRepo,
    /// Session repository.
    pub sessions: SessionRepo,
    /// Assignment repository.
    pub assignments: AssignmentRepo,
    /// Worker repository.
    pub workers: WorkerRepo,
    /// Held-message repository.
    pub pending: PendingRepo,
    /// Worker client resolution.
    pub provider: Arc<dyn ClientProvider>,
    /// Channel into the sync dispatcher.
    pub sync_tx: mpsc::Sender<SyncJob>,
}

impl PipelineContext {
    /// Build the shared context over the store.
    #[must_use]
    pub fn new(
        db: &Arc<Database>,
        config: Arc<GlobalConfig>,
        provider: Arc<dyn ClientProvider>,
        sync_tx: mpsc::Sender<SyncJob>,
    ) -> Self {
        Self {
            policies: PolicyCache::new(db),
            mappings: MappingRepo::new(Arc::clone(db)),
            sources: SourceRepo::new(Arc::clone(db)),
            destinations: DestinationRepo::new(Arc::clone(db)),
            trackers: TrackerRepo::new(Arc::clone(db)),
            logs: LogRepo::new(Arc::clone(db)),
            sessions: SessionRepo::new(Arc::clone(db)),
            assignments: AssignmentRepo::new(Arc::clone(db)),
            workers: WorkerRepo::new(Arc::clone(db)),
            pending: PendingRepo::new(Arc::clone(db)),
            config,
            provider,
            sync_tx,
        }
    }

    /// Append a forwarding log, swallowing store failures: logging must
    /// never take the pipeline down.
    pub(crate) async fn append_log(&self, log: ForwardingLog) {
        if let Err(err) = self.logs.insert(&log).await {
            error!(%err, "forwarding log insert failed");
        }
    }
}

/// Ordering locks keyed by source chat id.
#[derive(Default)]
struct SourceLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SourceLocks {
    async fn lock_for(&self, chat_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(chat_id).or_default())
    }
}

/// Handle over one session's pipeline task.
struct SessionPipeline {
    tx: mpsc::Sender<PlatformEvent>,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Routes inbound worker events into per-session pipeline tasks.
pub struct PipelineRouter {
    ctx: Arc<PipelineContext>,
    pipelines: Mutex<HashMap<String, SessionPipeline>>,
    source_locks: Arc<SourceLocks>,
    cancel: CancellationToken,
}

impl PipelineRouter {
    /// Build a router; `cancel` parents every session task.
    #[must_use]
    pub fn new(ctx: Arc<PipelineContext>, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            pipelines: Mutex::new(HashMap::new()),
            source_locks: Arc::new(SourceLocks::default()),
            cancel,
        }
    }

    /// Ingest one worker-delivered event for a session.
    ///
    /// A full channel engages backpressure: the worker is told to pause
    /// update polling, the enqueue awaits capacity, and the pipeline
    /// task resumes polling once the backlog halves.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session,
    /// `AppError::Internal` if the session task is gone.
    pub async fn ingest(&self, session_id: &str, event: PlatformEvent) -> Result<()> {
        let (tx, paused) = {
            let mut pipelines = self.pipelines.lock().await;
            if !pipelines.contains_key(session_id) {
                let pipeline = self.spawn_session_pipeline(session_id).await?;
                pipelines.insert(session_id.to_owned(), pipeline);
            }
            let pipeline = pipelines
                .get(session_id)
                .ok_or_else(|| AppError::Internal("pipeline vanished during insert".into()))?;
            (pipeline.tx.clone(), Arc::clone(&pipeline.paused))
        };

        match tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                // Backpressure: pause the worker's polling, then wait
                // for the consumer to make room.
                if !paused.swap(true, Ordering::SeqCst) {
                    self.pause_worker_updates(session_id).await;
                }
                tx.send(event)
                    .await
                    .map_err(|_| AppError::Internal("session pipeline stopped".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(AppError::Internal("session pipeline stopped".into()))
            }
        }
    }

    /// Stop and remove a session's pipeline (session stopped/deleted).
    pub async fn shutdown_session(&self, session_id: &str) {
        let pipeline = {
            let mut pipelines = self.pipelines.lock().await;
            pipelines.remove(session_id)
        };
        if let Some(pipeline) = pipeline {
            pipeline.cancel.cancel();
            let _ = pipeline.join.await;
            info!(session_id, "session pipeline stopped");
        }
    }

    async fn spawn_session_pipeline(&self, session_id: &str) -> Result<SessionPipeline> {
        // The session must exist before a task is spun up for it.
        self.ctx
            .sessions
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

        let capacity = self.ctx.config.pipeline.channel_capacity;
        let (tx, rx) = mpsc::channel(capacity);
        let paused = Arc::new(AtomicBool::new(false));
        let cancel = self.cancel.child_token();

        let join = tokio::spawn(
            run_session_pipeline(
                Arc::clone(&self.ctx),
                Arc::clone(&self.source_locks),
                session_id.to_owned(),
                rx,
                tx.clone(),
                Arc::clone(&paused),
                cancel.clone(),
            )
            .instrument(info_span!("session_pipeline", session_id)),
        );

        Ok(SessionPipeline {
            tx,
            paused,
            cancel,
            join,
        })
    }

    async fn pause_worker_updates(&self, session_id: &str) {
        match resolve_client(&self.ctx, session_id).await {
            Ok((client, _)) => {
                if let Err(err) = client.pause_updates(session_id).await {
                    warn!(%err, session_id, "pause_updates failed");
                }
            }
            Err(err) => warn!(%err, session_id, "cannot resolve worker for flow control"),
        }
    }
}

/// Resolve the platform client for a session through its worker.
pub(crate) async fn resolve_client(
    ctx: &PipelineContext,
    session_id: &str,
) -> Result<(Arc<dyn crate::platform::PlatformClient>, String)> {
    let session = ctx
        .sessions
        .get_by_id(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
    let worker_id = session
        .worker_id
        .ok_or_else(|| AppError::WorkerUnavailable(format!("session {session_id} not placed")))?;
    let worker = ctx
        .workers
        .get_by_id(&worker_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("worker {worker_id} not found")))?;
    Ok((ctx.provider.client_for(&worker), worker_id))
}

/// The single-consumer loop over one session's events.
async fn run_session_pipeline(
    ctx: Arc<PipelineContext>,
    source_locks: Arc<SourceLocks>,
    session_id: String,
    mut rx: mpsc::Receiver<PlatformEvent>,
    tx: mpsc::Sender<PlatformEvent>,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let capacity = ctx.config.pipeline.channel_capacity;

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => {
                info!("session pipeline cancelled");
                return;
            }
            event = rx.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };

        // Per-source ordering: edits and deletes for a chat wait for
        // earlier dispatches to that chat, across sibling mappings.
        let lock = source_locks.lock_for(event.source_chat_id()).await;
        let _guard = lock.lock().await;

        let result = match event {
            PlatformEvent::NewMessage(msg) => process_new_message(&ctx, &session_id, &msg).await,
            PlatformEvent::MessageEdited {
                source_chat_id,
                message_id,
                new_text,
            } => process_edit(&ctx, source_chat_id, message_id, &new_text).await,
            PlatformEvent::MessageDeleted {
                source_chat_id,
                message_ids,
            } => process_delete(&ctx, source_chat_id, &message_ids).await,
        };
        // A per-event failure is recorded and the stream continues; the
        // session is never torn down from inside the pipeline.
        if let Err(err) = result {
            error!(%err, session_id, "event processing failed");
        }

        // Flow control: resume worker polling once the backlog halves.
        if paused.load(Ordering::SeqCst) && tx.capacity() > capacity / 2 {
            paused.store(false, Ordering::SeqCst);
            match resolve_client(&ctx, &session_id).await {
                Ok((client, _)) => {
                    if let Err(err) = client.resume_updates(&session_id).await {
                        warn!(%err, session_id, "resume_updates failed");
                    }
                }
                Err(err) => warn!(%err, session_id, "cannot resolve worker to resume updates"),
            }
        }
    }
}

/// Fan one inbound message across the chat's active mappings.
async fn process_new_message(
    ctx: &PipelineContext,
    session_id: &str,
    msg: &InboundMessage,
) -> Result<()> {
    let started = std::time::Instant::now();
    let mappings = ctx.mappings.list_active_by_source_chat(msg.source_chat_id).await?;
    if mappings.is_empty() {
        return Ok(());
    }

    ctx.sessions.record_activity(session_id).await?;
    if let Err(err) = ctx.assignments.record_message(session_id).await {
        warn!(%err, session_id, "assignment counter update failed");
    }

    let mut counted_sources: Vec<&str> = Vec::new();
    for mapping in &mappings {
        if !counted_sources.contains(&mapping.source_id.as_str()) {
            counted_sources.push(&mapping.source_id);
            if let Err(err) = ctx.sources.record_received(&mapping.source_id).await {
                warn!(%err, source_id = %mapping.source_id, "source counter update failed");
            }
        }
    }

    for mapping in &mappings {
        let policy = ctx.policies.policy_for(mapping).await?;
        let decision = evaluate(msg, &policy);

        match decision {
            Decision::Filter { reason } => {
                let mut log = ForwardingLog::for_mapping(&mapping.id, msg.kind, LogStatus::Filtered);
                log.source_id = Some(mapping.source_id.clone());
                log.destination_id = Some(mapping.destination_id.clone());
                log.original_text = Some(truncate(&msg.text));
                log.filter_reason = Some(reason.as_str().to_owned());
                log.processing_ms = elapsed_ms(started);
                ctx.append_log(log).await;
            }
            Decision::Block { reason } => {
                let mut log = ForwardingLog::for_mapping(&mapping.id, msg.kind, LogStatus::Error);
                log.source_id = Some(mapping.source_id.clone());
                log.destination_id = Some(mapping.destination_id.clone());
                log.original_text = Some(truncate(&msg.text));
                log.error = Some(reason);
                log.processing_ms = elapsed_ms(started);
                ctx.append_log(log).await;
            }
            Decision::Approve { text } => {
                hold_message(ctx, mapping, msg, &text, PendingStatus::Pending).await?;
            }
            Decision::Forward { text } => {
                if policy.delay.enabled && policy.delay.seconds > 0 {
                    // Delayed dispatch without approval: held pre-approved,
                    // released by the poller at its scheduled instant.
                    hold_message(ctx, mapping, msg, &text, PendingStatus::Approved).await?;
                } else {
                    let outcome =
                        dispatch::forward_message(ctx, session_id, mapping, msg, &text, started)
                            .await?;
                    if let dispatch::DispatchOutcome::Sent { .. } = outcome {
                        if let Err(err) =
                            ctx.destinations.record_forwarded(&mapping.destination_id).await
                        {
                            warn!(%err, "destination counter update failed");
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Create the held-message row for an approval or delay branch.
async fn hold_message(
    ctx: &PipelineContext,
    mapping: &crate::models::mapping::Mapping,
    msg: &InboundMessage,
    rendered: &str,
    status: PendingStatus,
) -> Result<()> {
    let now = Utc::now();
    let mut pending = PendingMessage::new(
        mapping.id.clone(),
        mapping.user_id.clone(),
        msg.source_chat_id,
        msg.message_id,
        msg.text.clone(),
        rendered.to_owned(),
        now + ChronoDuration::seconds(i64::from(mapping.delay.seconds)),
        mapping
            .delay
            .auto_approve_after_s
            .map(|secs| now + ChronoDuration::seconds(i64::from(secs))),
    );
    pending.status = status;
    ctx.pending.create(&pending).await?;
    info!(
        mapping_id = %mapping.id,
        pending_id = %pending.id,
        status = status.as_str(),
        "message held"
    );
    Ok(())
}

/// Propagate a source-side edit to every synced forwarded copy.
async fn process_edit(
    ctx: &PipelineContext,
    source_chat_id: i64,
    message_id: i64,
    new_text: &str,
) -> Result<()> {
    let rows = ctx.trackers.list_by_source(source_chat_id, message_id).await?;
    for row in rows {
        let Some(mapping) = ctx.mappings.get_by_id(&row.mapping_id).await? else {
            continue;
        };
        if !mapping.sync.update_enabled {
            continue;
        }

        let policy = ctx.policies.policy_for(&mapping).await?;
        let synthetic = InboundMessage {
            source_chat_id,
            message_id,
            text: new_text.to_owned(),
            kind: MessageKind::Text,
            is_forward: false,
            sender: None,
        };
        // Approval already happened for the original; an edit follows it
        // through, so Approve collapses into Forward here.
        let rendered = match evaluate(&synthetic, &policy) {
            Decision::Forward { text } | Decision::Approve { text } => text,
            Decision::Filter { reason } => {
                info!(tracker_id = %row.id, reason = reason.as_str(), "edit now filtered, skipping sync");
                continue;
            }
            Decision::Block { reason } => {
                let mut log =
                    ForwardingLog::for_mapping(&mapping.id, MessageKind::Text, LogStatus::Error);
                log.error = Some(reason);
                ctx.append_log(log).await;
                continue;
            }
        };

        // Unchanged content needs no round trip.
        if row.hash.as_deref() == Some(dispatch::content_hash(&rendered).as_str()) {
            continue;
        }

        let job = SyncJob::Edit {
            tracker_id: row.id.clone(),
            payload: rendered,
            delay_s: mapping.sync.update_delay_s,
        };
        if ctx.sync_tx.send(job).await.is_err() {
            return Err(AppError::Internal("sync dispatcher stopped".into()));
        }
    }
    Ok(())
}

/// Propagate source-side deletes to every synced forwarded copy.
async fn process_delete(
    ctx: &PipelineContext,
    source_chat_id: i64,
    message_ids: &[i64],
) -> Result<()> {
    for message_id in message_ids {
        let rows = ctx.trackers.list_by_source(source_chat_id, *message_id).await?;
        for row in rows {
            let Some(mapping) = ctx.mappings.get_by_id(&row.mapping_id).await? else {
                continue;
            };
            if !mapping.sync.delete_enabled {
                continue;
            }
            let job = SyncJob::Delete {
                tracker_id: row.id.clone(),
            };
            if ctx.sync_tx.send(job).await.is_err() {
                return Err(AppError::Internal("sync dispatcher stopped".into()));
            }
        }
    }
    Ok(())
}

/// Truncate stored text to keep log rows bounded.
pub(crate) fn truncate(text: &str) -> String {
    const MAX: usize = 1024;
    if text.chars().count() <= MAX {
        text.to_owned()
    } else {
        text.chars().take(MAX).collect()
    }
}

/// Milliseconds since `started`, for log rows.
pub(crate) fn elapsed_ms(started: std::time::Instant) -> Option<i64> {
    i64::try_from(started.elapsed().as_millis()).ok()
}
