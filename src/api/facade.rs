//! Transport-agnostic admin facade.
//!
//! Every admin action and worker report enters the controller through
//! one of these methods: validation first, then quota checks, then
//! store mutation, then whatever scheduler or pipeline wake-up the
//! mutation implies. The HTTP/auth layer in front of this is not the
//! controller's concern.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::models::assignment::AssignmentStatus;
use crate::models::event::{PlatformEvent, SessionFailureKind};
use crate::models::log::{ControlAction, ForwardingLog, LogStatus, ScalingEvent, WorkerControl};
use crate::models::mapping::{Destination, Mapping, Source};
use crate::models::pending::PendingMessage;
use crate::models::plan::PlanTier;
use crate::models::rule::{RegexRule, RuleKind};
use crate::models::session::{Session, SessionStatus};
use crate::models::user::User;
use crate::models::worker::{Heartbeat, Worker, WorkerStatus};
use crate::persistence::chat_repo::{DestinationRepo, SourceRepo};
use crate::persistence::db::Database;
use crate::persistence::log_repo::LogRepo;
use crate::persistence::mapping_repo::MappingRepo;
use crate::persistence::ops_repo::OpsRepo;
use crate::persistence::pending_repo::PendingRepo;
use crate::persistence::plan_repo::PlanRepo;
use crate::persistence::queue_repo::QueueRepo;
use crate::persistence::rule_repo::RuleRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::user_repo::UserRepo;
use crate::persistence::worker_repo::WorkerRepo;
use crate::pipeline::{PipelineContext, PipelineRouter};
use crate::quota::{QuotaManager, ResourceKind};
use crate::registry::WorkerRegistry;
use crate::rules::{compile, evaluator};
use crate::scheduler::{AssignOutcome, Scheduler};
use crate::{AppError, Result};

/// Result of testing a regex rule against sample text.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RuleTestResult {
    /// The text as submitted.
    pub original: String,
    /// The text after the rule applied.
    pub transformed: String,
    /// Every match the pattern produced.
    pub matches: Vec<String>,
}

/// Log counts for one aggregation window.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Statistics {
    /// Messages dispatched.
    pub success: i64,
    /// Messages dropped by filters.
    pub filtered: i64,
    /// Failures.
    pub error: i64,
}

/// Statistics aggregation windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Last hour.
    Hourly,
    /// Last day.
    Daily,
    /// All retained history.
    Total,
}

/// Fleet-wide status snapshot for operators.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemStatus {
    /// Registered users.
    pub users: i64,
    /// Sessions currently active.
    pub active_sessions: i64,
    /// Workers currently online.
    pub online_workers: i64,
    /// Workers draining.
    pub draining_workers: i64,
    /// Workers offline.
    pub offline_workers: i64,
    /// Depth of the assignment queue.
    pub queue_depth: i64,
    /// Fleet RAM utilisation percentage over online workers.
    pub utilisation_pct: f64,
    /// Most recent overflow event, if any.
    pub last_scaling_event: Option<ScalingEvent>,
}

/// The controller's single admin/worker entry point.
pub struct AdminApi {
    db: Arc<Database>,
    config: Arc<GlobalConfig>,
    users: UserRepo,
    plans: PlanRepo,
    sessions: SessionRepo,
    workers: WorkerRepo,
    sources: SourceRepo,
    destinations: DestinationRepo,
    mappings: MappingRepo,
    rules: RuleRepo,
    pending: PendingRepo,
    logs: LogRepo,
    queue: QueueRepo,
    ops: OpsRepo,
    quota: Arc<QuotaManager>,
    scheduler: Arc<Scheduler>,
    registry: Arc<WorkerRegistry>,
    router: Arc<PipelineRouter>,
    pipeline_ctx: Arc<PipelineContext>,
}

impl AdminApi {
    /// Wire the facade over the store and the running components.
    #[must_use]
    #[allow(clippy::too_many_arguments)] // Startup wiring, called once.
    pub fn new(
        db: Arc<Database>,
        config: Arc<GlobalConfig>,
        quota: Arc<QuotaManager>,
        scheduler: Arc<Scheduler>,
        registry: Arc<WorkerRegistry>,
        router: Arc<PipelineRouter>,
        pipeline_ctx: Arc<PipelineContext>,
    ) -> Self {
        Self {
            users: UserRepo::new(Arc::clone(&db)),
            plans: PlanRepo::new(Arc::clone(&db)),
            sessions: SessionRepo::new(Arc::clone(&db)),
            workers: WorkerRepo::new(Arc::clone(&db)),
            sources: SourceRepo::new(Arc::clone(&db)),
            destinations: DestinationRepo::new(Arc::clone(&db)),
            mappings: MappingRepo::new(Arc::clone(&db)),
            rules: RuleRepo::new(Arc::clone(&db)),
            pending: PendingRepo::new(Arc::clone(&db)),
            logs: LogRepo::new(Arc::clone(&db)),
            queue: QueueRepo::new(Arc::clone(&db)),
            ops: OpsRepo::new(Arc::clone(&db)),
            db,
            config,
            quota,
            scheduler,
            registry,
            router,
            pipeline_ctx,
        }
    }

    // ─── Users ───────────────────────────────────────────

    /// List all users.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.users.list().await
    }

    /// Register a user and seed their plan from the default tier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InputInvalid` for malformed fields,
    /// `AppError::Conflict` for duplicate username or email.
    pub async fn create_user(&self, username: &str, email: &str, role: Option<PlanTier>) -> Result<User> {
        if username.trim().is_empty() {
            return Err(AppError::InputInvalid("username must not be empty".into()));
        }
        if !email.contains('@') {
            return Err(AppError::InputInvalid("email must contain '@'".into()));
        }
        if self.users.get_by_username(username.trim()).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "username {} is taken",
                username.trim()
            )));
        }
        let role = role.unwrap_or(self.config.default_plan);
        let user = User::new(username.trim().to_owned(), email.trim().to_owned(), role);
        self.users.create(&user).await?;
        self.quota.ensure_plan(&user.id).await?;
        info!(user_id = %user.id, username, "user created");
        Ok(user)
    }

    /// Update a user's mutable fields; a role change moves their plan.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown user.
    pub async fn update_user(&self, user: &User) -> Result<()> {
        let existing = self
            .users
            .get_by_id(&user.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {} not found", user.id)))?;
        self.users.update(user).await?;
        if existing.role != user.role {
            self.quota.change_plan(&user.id, user.role).await?;
        }
        Ok(())
    }

    /// Delete a user and cascade over everything they own.
    ///
    /// Placed sessions are terminated (freeing worker slots) before the
    /// owned rows are removed in one transaction. Workers and
    /// forwarding logs survive.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown user.
    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        self.users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {user_id} not found")))?;

        // Free worker slots first; the scheduler takes its own lock.
        for session in self.sessions.list_by_user(user_id).await? {
            if let Err(err) = self.scheduler.terminate(&session.id).await {
                if !matches!(err, AppError::NotFound(_)) {
                    warn!(%err, session_id = %session.id, "session teardown during user delete");
                }
            }
            self.router.shutdown_session(&session.id).await;
        }

        let mut tx = self.db.begin().await?;
        for mapping_id in self.mappings.list_ids_by_user_tx(&mut tx, user_id).await? {
            self.pipeline_ctx
                .trackers
                .delete_by_mapping_tx(&mut tx, &mapping_id)
                .await?;
            self.mappings.delete_tx(&mut tx, &mapping_id).await?;
        }
        self.rules.delete_by_user_tx(&mut tx, user_id).await?;
        self.sources.delete_by_user_tx(&mut tx, user_id).await?;
        self.destinations.delete_by_user_tx(&mut tx, user_id).await?;
        self.pending.delete_by_user_tx(&mut tx, user_id).await?;
        self.sessions.delete_by_user_tx(&mut tx, user_id).await?;
        self.plans.delete_by_user_tx(&mut tx, user_id).await?;
        self.users.delete_tx(&mut tx, user_id).await?;
        tx.commit().await?;

        info!(user_id, "user deleted with cascade");
        Ok(())
    }

    // ─── Sessions ────────────────────────────────────────

    /// List sessions, optionally scoped to one user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<Session>> {
        match user_id {
            Some(user_id) => self.sessions.list_by_user(user_id).await,
            None => self.sessions.list_all().await,
        }
    }

    /// Create an idle session for a user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InputInvalid` for malformed fields,
    /// `AppError::Throttled` when the user's API allowance is spent.
    pub async fn create_session(
        &self,
        user_id: &str,
        session_name: &str,
        phone: &str,
        auth_blob: Vec<u8>,
    ) -> Result<Session> {
        self.quota.allow(user_id, "api").await?;
        if session_name.trim().is_empty() {
            return Err(AppError::InputInvalid("session_name must not be empty".into()));
        }
        if auth_blob.is_empty() {
            return Err(AppError::InputInvalid("auth_blob must not be empty".into()));
        }
        self.users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {user_id} not found")))?;

        let session = Session::new(
            user_id.to_owned(),
            session_name.trim().to_owned(),
            phone.trim().to_owned(),
            auth_blob,
        );
        self.sessions.create(&session).await?;
        self.quota.ensure_plan(user_id).await?;
        info!(session_id = %session.id, user_id, "session created");
        Ok(session)
    }

    /// Update a session's lifecycle status (pause, resume, stop).
    ///
    /// Pause and resume travel down to the session's live assignment in
    /// the same transaction, so the two rows never disagree, and a
    /// matching control command is queued for the worker. Stopping a
    /// placed session is a scheduler operation: its worker slot and
    /// quota reservation are released with it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` for an invalid transition,
    /// `AppError::NotFound` for an unknown session.
    pub async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<Session> {
        if status == SessionStatus::Stopped {
            match self.scheduler.terminate(session_id).await {
                Ok(()) => {
                    self.router.shutdown_session(session_id).await;
                    return self
                        .sessions
                        .get_by_id(session_id)
                        .await?
                        .ok_or_else(|| {
                            AppError::NotFound(format!("session {session_id} not found"))
                        });
                }
                Err(AppError::NotFound(_)) => {} // Never placed; plain status write.
                Err(err) => return Err(err),
            }
        }

        let mut tx = self.db.begin().await?;
        let session = self
            .sessions
            .update_status_tx(&mut tx, session_id, status)
            .await?;

        let next = match status {
            SessionStatus::Paused => Some(AssignmentStatus::Paused),
            SessionStatus::Active => Some(AssignmentStatus::Active),
            _ => None,
        };
        let mut control = None;
        if let Some(next) = next {
            if let Some(assignment) = self
                .pipeline_ctx
                .assignments
                .get_live_by_session_tx(&mut tx, session_id)
                .await?
            {
                if assignment.can_transition_to(next) {
                    self.pipeline_ctx
                        .assignments
                        .set_status_tx(&mut tx, &assignment.id, next)
                        .await?;
                    let action = if next == AssignmentStatus::Paused {
                        ControlAction::PauseSession
                    } else {
                        ControlAction::ResumeSession
                    };
                    control = Some(WorkerControl::new(
                        assignment.worker_id.clone(),
                        session_id.to_owned(),
                        action,
                    ));
                }
            }
        }
        tx.commit().await?;

        if let Some(control) = control {
            let action = control.action;
            if let Err(err) = self.ops.insert_control(&control).await {
                warn!(%err, session_id, action = action.as_str(), "failed to queue session control");
            }
        }
        Ok(session)
    }

    /// Delete a session, tearing down its placement and pipeline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

        match self.scheduler.terminate(session_id).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) => {} // Never placed.
            Err(err) => return Err(err),
        }
        self.router.shutdown_session(session_id).await;

        let mut tx = self.db.begin().await?;
        self.sessions.delete_tx(&mut tx, session_id).await?;
        tx.commit().await?;
        info!(session_id, "session deleted");
        Ok(())
    }

    /// Scheduler op: place a session.
    ///
    /// # Errors
    ///
    /// Propagates the scheduler's outcome errors (`QuotaExceeded`,
    /// `Conflict`, …). Queueing is a success value.
    pub async fn assign_session(&self, session_id: &str, user_id: &str) -> Result<AssignOutcome> {
        self.quota.allow(user_id, "api").await?;
        self.scheduler.assign(session_id, user_id).await
    }

    /// Scheduler op: pin a session to a specific worker by label.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown worker label, plus
    /// the scheduler's placement errors.
    pub async fn reassign_session(&self, session_id: &str, worker_label: &str) -> Result<()> {
        let worker = self
            .workers
            .get_by_label(worker_label)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("worker {worker_label} not found")))?;
        self.scheduler.reassign(session_id, &worker.id).await
    }

    // ─── Workers ─────────────────────────────────────────

    /// List all workers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn list_workers(&self) -> Result<Vec<Worker>> {
        self.workers.list().await
    }

    /// Online workers with capacity, least loaded first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn available_workers(&self) -> Result<Vec<Worker>> {
        let online = self.workers.list_by_status(WorkerStatus::Online).await?;
        Ok(online.into_iter().filter(Worker::has_capacity).collect())
    }

    /// Register a worker node.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InputInvalid` for malformed fields,
    /// `AppError::Conflict` for a duplicate label.
    pub async fn register_worker(
        &self,
        label: &str,
        address: &str,
        total_ram: i64,
        max_sessions: i64,
    ) -> Result<Worker> {
        if label.trim().is_empty() || address.trim().is_empty() {
            return Err(AppError::InputInvalid("worker label and address required".into()));
        }
        if total_ram <= 0 || max_sessions <= 0 {
            return Err(AppError::InputInvalid(
                "total_ram and max_sessions must be positive".into(),
            ));
        }
        self.registry
            .register(
                label.trim().to_owned(),
                address.trim().to_owned(),
                total_ram,
                max_sessions,
            )
            .await
    }

    /// Drain or undrain a worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown worker.
    pub async fn set_worker_draining(&self, worker_row_id: &str, draining: bool) -> Result<()> {
        self.registry.set_draining(worker_row_id, draining).await
    }

    /// System-wide status for the ops surface.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn system_status(&self) -> Result<SystemStatus> {
        let users = self.users.count().await?;
        let active_sessions = self.sessions.count_by_status(SessionStatus::Active).await?;
        let online = self.workers.list_by_status(WorkerStatus::Online).await?;
        let draining = self.workers.list_by_status(WorkerStatus::Draining).await?;
        let offline = self.workers.list_by_status(WorkerStatus::Offline).await?;
        let queue_depth = self.queue.count_queued().await?;
        let (used, total) = self.workers.fleet_ram().await?;
        #[allow(clippy::cast_precision_loss)] // RAM totals fit in f64's mantissa.
        let utilisation_pct = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let last_scaling_event = self.ops.latest_scaling_event().await?;

        Ok(SystemStatus {
            users,
            active_sessions,
            online_workers: i64::try_from(online.len()).unwrap_or(i64::MAX),
            draining_workers: i64::try_from(draining.len()).unwrap_or(i64::MAX),
            offline_workers: i64::try_from(offline.len()).unwrap_or(i64::MAX),
            queue_depth,
            utilisation_pct,
            last_scaling_event,
        })
    }

    // ─── Worker intake (§ worker interface) ──────────────

    /// Heartbeat report from a worker, authenticated by its token.
    ///
    /// Also activates the worker's freshly assigned sessions: the first
    /// heartbeat after placement is the worker's acknowledgement that
    /// the session runs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InputInvalid` for a bad token,
    /// `AppError::NotFound` for an unknown worker.
    pub async fn worker_heartbeat(&self, auth_token: &str, hb: &Heartbeat) -> Result<Worker> {
        self.authenticate_worker(&hb.worker_id, auth_token).await?;
        let worker = self.registry.heartbeat(hb).await?;

        let live = self
            .pipeline_ctx
            .assignments
            .list_live_by_worker(&worker.id)
            .await?;
        let ram_share = hb.used_ram / i64::try_from(live.len().max(1)).unwrap_or(1);
        for assignment in live {
            if let Err(err) = self
                .pipeline_ctx
                .assignments
                .record_heartbeat(&assignment.id, ram_share, assignment.avg_proc_ms)
                .await
            {
                warn!(%err, assignment_id = %assignment.id, "assignment heartbeat update failed");
            }
        }
        Ok(worker)
    }

    /// Inbound platform event from the worker running `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session; channel
    /// backpressure surfaces as an awaited enqueue, not an error.
    pub async fn worker_event(
        &self,
        auth_token: &str,
        worker_label: &str,
        session_id: &str,
        event: PlatformEvent,
    ) -> Result<()> {
        self.authenticate_worker(worker_label, auth_token).await?;
        self.router.ingest(session_id, event).await
    }

    /// Session failure report from a worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the session has no live
    /// assignment.
    pub async fn worker_session_failure(
        &self,
        auth_token: &str,
        worker_label: &str,
        session_id: &str,
        kind: SessionFailureKind,
        details: &str,
    ) -> Result<()> {
        self.authenticate_worker(worker_label, auth_token).await?;
        self.router.shutdown_session(session_id).await;
        self.scheduler.session_failure(session_id, kind, details).await
    }

    /// Control commands waiting for a worker, marked delivered.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InputInvalid` for a bad token.
    pub async fn worker_poll_controls(
        &self,
        auth_token: &str,
        worker_label: &str,
    ) -> Result<Vec<WorkerControl>> {
        let worker = self.authenticate_worker(worker_label, auth_token).await?;
        self.ops.claim_pending_controls(&worker.id).await
    }

    /// Worker acknowledgement of an executed control command.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown command.
    pub async fn worker_ack_control(
        &self,
        auth_token: &str,
        worker_label: &str,
        control_id: &str,
    ) -> Result<()> {
        self.authenticate_worker(worker_label, auth_token).await?;
        self.ops.acknowledge_control(control_id).await
    }

    async fn authenticate_worker(&self, worker_label: &str, auth_token: &str) -> Result<Worker> {
        let worker = self
            .workers
            .get_by_label(worker_label)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("worker {worker_label} not found")))?;
        if worker.auth_token != auth_token {
            return Err(AppError::InputInvalid("worker auth token mismatch".into()));
        }
        Ok(worker)
    }

    // ─── Sources and destinations ────────────────────────

    /// List a user's sources.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn list_sources(&self, user_id: &str) -> Result<Vec<Source>> {
        self.sources.list_by_user(user_id).await
    }

    /// Add a source chat.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Throttled` when the user's API allowance is
    /// spent, `AppError::Db` on store failures.
    pub async fn create_source(&self, source: Source) -> Result<Source> {
        self.quota.allow(&source.user_id, "api").await?;
        self.sources.create(&source).await?;
        Ok(source)
    }

    /// Remove a source chat.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown source.
    pub async fn delete_source(&self, id: &str) -> Result<()> {
        self.sources.delete(id).await
    }

    /// List a user's destinations.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn list_destinations(&self, user_id: &str) -> Result<Vec<Destination>> {
        self.destinations.list_by_user(user_id).await
    }

    /// Add a destination chat.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Throttled` when the user's API allowance is
    /// spent, `AppError::Db` on store failures.
    pub async fn create_destination(&self, destination: Destination) -> Result<Destination> {
        self.quota.allow(&destination.user_id, "api").await?;
        self.destinations.create(&destination).await?;
        Ok(destination)
    }

    /// Remove a destination chat.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown destination.
    pub async fn delete_destination(&self, id: &str) -> Result<()> {
        self.destinations.delete(id).await
    }

    // ─── Mappings ────────────────────────────────────────

    /// List a user's mappings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn list_mappings(&self, user_id: &str) -> Result<Vec<Mapping>> {
        self.mappings.list_by_user(user_id).await
    }

    /// Retrieve one mapping with its embedded policy blocks.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown mapping.
    pub async fn get_mapping(&self, id: &str) -> Result<Mapping> {
        self.mappings
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("mapping {id} not found")))
    }

    /// Create a forwarding pair, reserving the owner's pair quota in
    /// the same transaction as the insert.
    ///
    /// # Errors
    ///
    /// Returns `AppError::QuotaExceeded` at the pair limit,
    /// `AppError::InputInvalid` for unknown source/destination refs.
    pub async fn create_mapping(&self, mapping: Mapping) -> Result<Mapping> {
        self.quota.allow(&mapping.user_id, "api").await?;
        let source = self
            .sources
            .get_by_id(&mapping.source_id)
            .await?
            .ok_or_else(|| AppError::InputInvalid("source does not exist".into()))?;
        let destination = self
            .destinations
            .get_by_id(&mapping.destination_id)
            .await?
            .ok_or_else(|| AppError::InputInvalid("destination does not exist".into()))?;
        if source.user_id != mapping.user_id || destination.user_id != mapping.user_id {
            return Err(AppError::InputInvalid(
                "source and destination must belong to the mapping owner".into(),
            ));
        }
        if !(1..=10).contains(&mapping.priority) {
            return Err(AppError::InputInvalid("priority must be in 1..10".into()));
        }
        self.quota.ensure_plan(&mapping.user_id).await?;

        let mut tx = self.db.begin().await?;
        self.quota
            .reserve_tx(&mut tx, &mapping.user_id, ResourceKind::Pair)
            .await?;
        self.mappings.create_tx(&mut tx, &mapping).await?;
        tx.commit().await?;

        info!(mapping_id = %mapping.id, user_id = %mapping.user_id, "mapping created");
        Ok(mapping)
    }

    /// Update a mapping's policy blocks and metadata.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown mapping.
    pub async fn update_mapping(&self, mapping: &Mapping) -> Result<()> {
        if !(1..=10).contains(&mapping.priority) {
            return Err(AppError::InputInvalid("priority must be in 1..10".into()));
        }
        self.mappings.update(mapping).await
    }

    /// Flip a mapping's active flag.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown mapping.
    pub async fn toggle_mapping(&self, id: &str, active: bool) -> Result<()> {
        self.mappings.set_active(id, active).await
    }

    /// Delete a mapping, its tracker rows, and its scoped rules,
    /// releasing the owner's pair quota.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown mapping.
    pub async fn delete_mapping(&self, id: &str) -> Result<()> {
        let mapping = self.get_mapping(id).await?;

        let mut tx = self.db.begin().await?;
        // Scoped rules die with their mapping; global rules stay.
        self.rules.delete_by_mapping_tx(&mut tx, id).await?;
        self.pipeline_ctx.trackers.delete_by_mapping_tx(&mut tx, id).await?;
        self.mappings.delete_tx(&mut tx, id).await?;
        self.quota
            .release_tx(&mut tx, &mapping.user_id, ResourceKind::Pair)
            .await?;
        tx.commit().await?;

        self.pipeline_ctx.policies.invalidate(id).await;
        if let Err(err) = self.pending.expire_orphaned().await {
            warn!(%err, "pending expiry after mapping delete failed");
        }
        info!(mapping_id = %id, "mapping deleted");
        Ok(())
    }

    // ─── Regex rules ─────────────────────────────────────

    /// List rules for a user, or only those scoped to one mapping.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn list_rules(&self, user_id: &str, mapping_id: Option<&str>) -> Result<Vec<RegexRule>> {
        match mapping_id {
            Some(mapping_id) => self.rules.list_by_mapping(mapping_id).await,
            None => self.rules.list_by_user(user_id).await,
        }
    }

    /// Create a regex rule, rejecting patterns that do not compile.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InputInvalid` for an invalid pattern.
    pub async fn create_rule(&self, rule: RegexRule) -> Result<RegexRule> {
        self.quota.allow(&rule.user_id, "api").await?;
        validate_rule(&rule)?;
        self.rules.create(&rule).await?;
        self.bump_rule_scope(&rule).await?;
        Ok(rule)
    }

    /// Update a regex rule.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InputInvalid` for an invalid pattern,
    /// `AppError::NotFound` for an unknown rule.
    pub async fn update_rule(&self, rule: &RegexRule) -> Result<()> {
        validate_rule(rule)?;
        self.rules.update(rule).await?;
        self.bump_rule_scope(rule).await
    }

    /// Delete a regex rule.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown rule.
    pub async fn delete_rule(&self, id: &str) -> Result<()> {
        let rule = self
            .rules
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("rule {id} not found")))?;
        self.rules.delete(id).await?;
        self.bump_rule_scope(&rule).await
    }

    /// Rule changes must invalidate the compiled policies they feed:
    /// bump the affected mappings' versions so the cache recompiles.
    async fn bump_rule_scope(&self, rule: &RegexRule) -> Result<()> {
        let affected = match &rule.mapping_id {
            Some(mapping_id) => match self.mappings.get_by_id(mapping_id).await? {
                Some(mapping) => vec![mapping],
                None => Vec::new(),
            },
            None => self.mappings.list_by_user(&rule.user_id).await?,
        };
        for mapping in affected {
            self.mappings.update(&mapping).await?;
        }
        Ok(())
    }

    /// Dry-run a rule against sample text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InputInvalid` for an invalid pattern.
    pub async fn test_rule(&self, rule: &RegexRule, text: &str) -> Result<RuleTestResult> {
        validate_rule(rule)?;
        let pattern = if rule.case_sensitive {
            rule.pattern.clone()
        } else {
            format!("(?i){}", rule.pattern)
        };
        let regex = regex::Regex::new(&pattern)
            .map_err(|err| AppError::InputInvalid(format!("invalid pattern: {err}")))?;

        let matches: Vec<String> = regex
            .find_iter(text)
            .map(|m| m.as_str().to_owned())
            .collect();

        // Reuse the evaluator's transform semantics via a one-rule policy.
        let mut probe = Mapping::new(
            rule.user_id.clone(),
            String::new(),
            String::new(),
            "rule-test".to_owned(),
        );
        probe.id = "rule-test".to_owned();
        let policy = compile(&probe, std::slice::from_ref(rule));
        let transformed = evaluator::apply_transforms(text, &policy)
            .unwrap_or_else(|reason| format!("(blocked: {reason})"));

        let mut log = ForwardingLog::for_mapping(
            "rule-test",
            crate::models::event::MessageKind::Text,
            LogStatus::Test,
        );
        log.mapping_id = rule.mapping_id.clone();
        log.original_text = Some(crate::pipeline::truncate(text));
        log.processed_text = Some(crate::pipeline::truncate(&transformed));
        if let Err(err) = self.logs.insert(&log).await {
            warn!(%err, "rule test log insert failed");
        }

        Ok(RuleTestResult {
            original: text.to_owned(),
            transformed,
            matches,
        })
    }

    // ─── Pending messages ────────────────────────────────

    /// List a user's held messages.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn list_pending(&self, user_id: &str) -> Result<Vec<PendingMessage>> {
        self.pending.list_by_user(user_id).await
    }

    /// Approve a held message; the poller dispatches it when due.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the message was already decided.
    pub async fn approve_pending(&self, pending_id: &str, operator: &str) -> Result<()> {
        self.pending.decide(pending_id, true, operator).await
    }

    /// Reject a held message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the message was already decided.
    pub async fn reject_pending(&self, pending_id: &str, operator: &str) -> Result<()> {
        self.pending.decide(pending_id, false, operator).await
    }

    // ─── Logs and statistics ─────────────────────────────

    /// Page through forwarding logs, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InputInvalid` for a non-positive page size.
    pub async fn list_logs(
        &self,
        status: Option<LogStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ForwardingLog>> {
        if limit <= 0 || offset < 0 {
            return Err(AppError::InputInvalid("limit must be positive, offset non-negative".into()));
        }
        self.logs.list(status, limit.min(500), offset).await
    }

    /// Aggregate log counts over the requested window.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn statistics(&self, aggregation: Aggregation) -> Result<Statistics> {
        let since = match aggregation {
            Aggregation::Hourly => Some(Utc::now() - ChronoDuration::hours(1)),
            Aggregation::Daily => Some(Utc::now() - ChronoDuration::days(1)),
            Aggregation::Total => None,
        };
        Ok(Statistics {
            success: self.logs.count_since(LogStatus::Success, since).await?,
            filtered: self.logs.count_since(LogStatus::Filtered, since).await?,
            error: self.logs.count_since(LogStatus::Error, since).await?,
        })
    }
}

/// Shared validation for rule create/update/test.
fn validate_rule(rule: &RegexRule) -> Result<()> {
    if rule.name.trim().is_empty() {
        return Err(AppError::InputInvalid("rule name must not be empty".into()));
    }
    if regex::Regex::new(&rule.pattern).is_err() {
        return Err(AppError::InputInvalid(format!(
            "pattern does not compile: {}",
            rule.pattern
        )));
    }
    if matches!(rule.kind, RuleKind::FindReplace | RuleKind::ConditionalReplace)
        && rule.replacement.is_none()
    {
        return Err(AppError::InputInvalid(
            "replacement required for replace rules".into(),
        ));
    }
    Ok(())
}
