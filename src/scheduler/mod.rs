//! Session scheduler: placement, queueing, migration, and scaling.
//!
//! All scheduler operations serialise on one coarse async mutex and do
//! their multi-entity writes inside a single store transaction, so a
//! crash can never leave a half-created assignment or a quota counter
//! out of step with the rows it counts.

pub mod migration;
pub mod placement;
pub mod queue;
pub mod scaling;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::config::GlobalConfig;
use crate::models::assignment::{AssignmentType, SessionAssignment};
use crate::models::event::SessionFailureKind;
use crate::models::log::{ControlAction, WorkerControl};
use crate::models::queue::QueueItem;
use crate::models::session::SessionStatus;
use crate::persistence::assignment_repo::AssignmentRepo;
use crate::persistence::db::Database;
use crate::persistence::ops_repo::OpsRepo;
use crate::persistence::plan_repo::PlanRepo;
use crate::persistence::queue_repo::QueueRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::worker_repo::WorkerRepo;
use crate::quota::{QuotaManager, ResourceKind};
use crate::registry::RegistryEvent;
use crate::{AppError, Result};

use scaling::ScalingMonitor;

/// Outcome of an assignment request. Queueing is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    /// Placed on a worker immediately.
    Assigned {
        /// Worker row id the session landed on.
        worker_id: String,
    },
    /// No capacity; parked in the queue.
    Queued {
        /// Dense 1-based queue rank.
        position: i64,
        /// Rough wait estimate in seconds.
        est_wait_s: i64,
    },
}

/// The session scheduler.
pub struct Scheduler {
    db: Arc<Database>,
    config: Arc<GlobalConfig>,
    quota: Arc<QuotaManager>,
    workers: WorkerRepo,
    sessions: SessionRepo,
    assignments: AssignmentRepo,
    queue: QueueRepo,
    plans: PlanRepo,
    ops: OpsRepo,
    lock: Mutex<()>,
    scaling: ScalingMonitor,
}

impl Scheduler {
    /// Build a scheduler over the store.
    #[must_use]
    pub fn new(db: Arc<Database>, config: Arc<GlobalConfig>, quota: Arc<QuotaManager>) -> Self {
        let scaling = ScalingMonitor::new(config.scaling_cooldown());
        Self {
            workers: WorkerRepo::new(Arc::clone(&db)),
            sessions: SessionRepo::new(Arc::clone(&db)),
            assignments: AssignmentRepo::new(Arc::clone(&db)),
            queue: QueueRepo::new(Arc::clone(&db)),
            plans: PlanRepo::new(Arc::clone(&db)),
            ops: OpsRepo::new(Arc::clone(&db)),
            db,
            config,
            quota,
            lock: Mutex::new(()),
            scaling,
        }
    }

    /// Place a session on a worker, or queue it when the fleet is full.
    ///
    /// Reserves the owner's session quota, picks a worker by the
    /// placement rule, and binds session, assignment, and worker slot
    /// in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the session is already assigned
    /// or queued, `AppError::QuotaExceeded` when the plan is full,
    /// `AppError::NotFound`/`AppError::InputInvalid` for bad references,
    /// `AppError::Db` on store failures.
    pub async fn assign(&self, session_id: &str, user_id: &str) -> Result<AssignOutcome> {
        let _guard = self.lock.lock().await;
        let outcome = self
            .assign_locked(session_id, user_id)
            .instrument(info_span!("assign", session_id, user_id))
            .await?;
        self.check_scaling().await;
        Ok(outcome)
    }

    async fn assign_locked(&self, session_id: &str, user_id: &str) -> Result<AssignOutcome> {
        let mut tx = self.db.begin().await?;

        let session = self
            .sessions
            .get_by_id_tx(&mut tx, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
        if session.user_id != user_id {
            return Err(AppError::InputInvalid(
                "session belongs to a different user".into(),
            ));
        }
        if self
            .assignments
            .get_live_by_session_tx(&mut tx, session_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "session {session_id} is already assigned"
            )));
        }
        if self
            .queue
            .get_queued_by_session_tx(&mut tx, session_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "session {session_id} is already queued"
            )));
        }

        let plan = self
            .quota
            .reserve_tx(&mut tx, user_id, ResourceKind::Session)
            .await?;

        let candidates = placement::refreshed_candidates(&mut tx, &self.workers).await?;
        if candidates.is_empty() {
            let position = self.queue.next_position_for_tx(&mut tx, plan.priority).await?;
            let item = QueueItem::new(user_id.to_owned(), session_id.to_owned(), plan.priority, position);
            self.queue.create_tx(&mut tx, &item).await?;
            self.queue.renumber_tx(&mut tx).await?;
            let queued = self
                .queue
                .get_queued_by_session_tx(&mut tx, session_id)
                .await?
                .unwrap_or(item);
            tx.commit().await?;
            info!(session_id, position = queued.position, "no capacity, session queued");
            return Ok(AssignOutcome::Queued {
                position: queued.position,
                est_wait_s: queued.est_wait_s,
            });
        }

        let worker = placement::select(&candidates, plan.tier.is_premium())
            .ok_or_else(|| AppError::WorkerUnavailable("no candidate workers".into()))?;
        let assignment = SessionAssignment::new(
            session_id.to_owned(),
            worker.id.clone(),
            user_id.to_owned(),
            AssignmentType::Automatic,
            plan.priority,
        );
        self.assignments.create_tx(&mut tx, &assignment).await?;
        self.workers
            .adjust_active_sessions_tx(&mut tx, &worker.id, 1)
            .await?;
        self.sessions
            .set_worker_tx(&mut tx, session_id, Some(&worker.id), SessionStatus::Active)
            .await?;
        tx.commit().await?;

        info!(session_id, worker = %worker.worker_id, "session assigned");
        Ok(AssignOutcome::Assigned {
            worker_id: worker.id.clone(),
        })
    }

    /// Terminate a session's placement, releasing its worker slot and
    /// quota reservation, then drain the queue into the freed capacity.
    ///
    /// A queued (not yet placed) session has its queue item expired and
    /// its reservation released instead.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is neither assigned
    /// nor queued, `AppError::Db` on store failures.
    pub async fn terminate(&self, session_id: &str) -> Result<()> {
        {
            let _guard = self.lock.lock().await;

            let mut tx = self.db.begin().await?;
            if let Some(assignment) = self
                .assignments
                .get_live_by_session_tx(&mut tx, session_id)
                .await?
            {
                self.assignments.terminate_tx(&mut tx, &assignment.id).await?;
                self.workers
                    .adjust_active_sessions_tx(&mut tx, &assignment.worker_id, -1)
                    .await?;
                self.quota
                    .release_tx(&mut tx, &assignment.user_id, ResourceKind::Session)
                    .await?;
                self.sessions
                    .set_worker_tx(&mut tx, session_id, None, SessionStatus::Stopped)
                    .await?;
                tx.commit().await?;

                let control = WorkerControl::new(
                    assignment.worker_id.clone(),
                    session_id.to_owned(),
                    ControlAction::StopSession,
                );
                if let Err(err) = self.ops.insert_control(&control).await {
                    error!(%err, session_id, "failed to queue stop_session control");
                }
                info!(session_id, "assignment terminated");
            } else if let Some(item) = self
                .queue
                .get_queued_by_session_tx(&mut tx, session_id)
                .await?
            {
                self.queue.mark_expired_tx(&mut tx, &item.id).await?;
                self.quota
                    .release_tx(&mut tx, &item.user_id, ResourceKind::Session)
                    .await?;
                self.queue.renumber_tx(&mut tx).await?;
                self.sessions
                    .set_worker_tx(&mut tx, session_id, None, SessionStatus::Stopped)
                    .await?;
                tx.commit().await?;
                info!(session_id, "queued session cancelled");
            } else {
                return Err(AppError::NotFound(format!(
                    "session {session_id} has no assignment or queue item"
                )));
            }

            self.drain_queue_inner().await?;
        }
        self.check_scaling().await;
        Ok(())
    }

    /// Manually pin a session to a specific worker.
    ///
    /// Terminates any existing placement first; the quota reservation
    /// carries over (or is taken fresh for an unplaced session).
    ///
    /// # Errors
    ///
    /// Returns `AppError::WorkerUnavailable` if the target lacks
    /// capacity, plus the usual lookup/store errors.
    pub async fn reassign(&self, session_id: &str, worker_row_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut tx = self.db.begin().await?;
        let session = self
            .sessions
            .get_by_id_tx(&mut tx, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

        let candidates = placement::refreshed_candidates(&mut tx, &self.workers).await?;
        let target = candidates
            .iter()
            .find(|w| w.id == worker_row_id)
            .ok_or_else(|| {
                AppError::WorkerUnavailable(format!(
                    "worker {worker_row_id} is not online with capacity"
                ))
            })?;

        let prior = self
            .assignments
            .get_live_by_session_tx(&mut tx, session_id)
            .await?;
        let priority = if let Some(ref assignment) = prior {
            self.assignments.terminate_tx(&mut tx, &assignment.id).await?;
            self.workers
                .adjust_active_sessions_tx(&mut tx, &assignment.worker_id, -1)
                .await?;
            assignment.priority
        } else {
            // Unplaced session: take a fresh reservation.
            self.quota
                .reserve_tx(&mut tx, &session.user_id, ResourceKind::Session)
                .await?
                .priority
        };

        let assignment = SessionAssignment::new(
            session_id.to_owned(),
            target.id.clone(),
            session.user_id.clone(),
            AssignmentType::Manual,
            priority,
        );
        self.assignments.create_tx(&mut tx, &assignment).await?;
        self.workers
            .adjust_active_sessions_tx(&mut tx, &target.id, 1)
            .await?;
        self.sessions
            .set_worker_tx(&mut tx, session_id, Some(&target.id), SessionStatus::Active)
            .await?;
        tx.commit().await?;

        info!(session_id, worker = %target.worker_id, "session manually reassigned");
        Ok(())
    }

    /// Worker-reported session failure.
    ///
    /// Auth failures crash the session and release its reservation:
    /// the credentials are dead and re-placement cannot help.
    /// Connection failures keep the reservation and re-enqueue at
    /// elevated priority, exactly like a failed migration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session has no live
    /// assignment, `AppError::Db` on store failures.
    pub async fn session_failure(
        &self,
        session_id: &str,
        kind: SessionFailureKind,
        details: &str,
    ) -> Result<()> {
        {
            let _guard = self.lock.lock().await;

            let mut tx = self.db.begin().await?;
            let assignment = self
                .assignments
                .get_live_by_session_tx(&mut tx, session_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("session {session_id} has no live assignment"))
                })?;

            self.assignments.terminate_tx(&mut tx, &assignment.id).await?;
            self.workers
                .adjust_active_sessions_tx(&mut tx, &assignment.worker_id, -1)
                .await?;

            match kind {
                SessionFailureKind::Auth => {
                    self.quota
                        .release_tx(&mut tx, &assignment.user_id, ResourceKind::Session)
                        .await?;
                    self.sessions
                        .set_worker_tx(&mut tx, session_id, None, SessionStatus::Crashed)
                        .await?;
                }
                SessionFailureKind::Connection => {
                    let bumped = assignment.priority.saturating_add(1).min(5);
                    let position = self.queue.next_position_for_tx(&mut tx, bumped).await?;
                    let item = QueueItem::new(
                        assignment.user_id.clone(),
                        session_id.to_owned(),
                        bumped,
                        position,
                    );
                    self.queue.create_tx(&mut tx, &item).await?;
                    self.queue.renumber_tx(&mut tx).await?;
                    self.sessions
                        .set_worker_tx(&mut tx, session_id, None, SessionStatus::Idle)
                        .await?;
                }
            }
            tx.commit().await?;
            info!(session_id, ?kind, details, "session failure handled");

            if kind == SessionFailureKind::Connection {
                self.drain_queue_inner().await?;
            }
        }
        self.check_scaling().await;
        Ok(())
    }

    /// Admin hook: run an immediate queue drain and expiry scan.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn force_scan(&self) -> Result<()> {
        {
            let _guard = self.lock.lock().await;
            self.drain_queue_inner().await?;
        }
        self.check_scaling().await;
        Ok(())
    }

    /// Best-effort overflow check; store failures are logged, never
    /// propagated into the scheduling path.
    async fn check_scaling(&self) {
        let depth = match self.queue.count_queued().await {
            Ok(depth) => depth,
            Err(err) => {
                error!(%err, "queue depth read failed");
                return;
            }
        };
        let (used, total) = match self.workers.fleet_ram().await {
            Ok(ram) => ram,
            Err(err) => {
                error!(%err, "fleet ram read failed");
                return;
            }
        };
        if let Err(err) = self.scaling.check(&self.ops, depth, used, total).await {
            error!(%err, "scaling event write failed");
        }
    }
}

/// Spawn the loop that reacts to registry transitions: offline workers
/// get their assignments migrated, online workers trigger a drain.
#[must_use]
pub fn spawn_registry_event_loop(
    scheduler: Arc<Scheduler>,
    mut events: mpsc::Receiver<RegistryEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => {
                    info!("registry event loop cancelled");
                    return;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
            };

            let result = match event {
                RegistryEvent::WorkerOffline { ref worker_id } => {
                    scheduler.migrate_worker(worker_id).await
                }
                RegistryEvent::WorkerOnline { .. } => scheduler.force_scan().await,
            };
            if let Err(err) = result {
                error!(%err, "registry event handling failed");
            }
        }
    })
}
