//! Worker registry: heartbeat intake, load scoring, and liveness scans.
//!
//! Heartbeats update each worker row in isolation — no registry-wide
//! lock. Liveness is a periodic scan over the worker table; transitions
//! are reported to the scheduler through an event channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::GlobalConfig;
use crate::models::worker::{load_score, Heartbeat, Worker, WorkerStatus};
use crate::models::log::WorkerAnalytics;
use crate::persistence::db::Database;
use crate::persistence::ops_repo::OpsRepo;
use crate::persistence::worker_repo::WorkerRepo;
use crate::{AppError, Result};

/// Fleet transitions the scheduler must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A worker came (back) online; queued sessions may now place.
    WorkerOnline {
        /// Worker row id.
        worker_id: String,
    },
    /// A worker missed its liveness window; its assignments must migrate.
    WorkerOffline {
        /// Worker row id.
        worker_id: String,
    },
}

/// Registry over the worker table.
pub struct WorkerRegistry {
    workers: WorkerRepo,
    ops: OpsRepo,
    events: mpsc::Sender<RegistryEvent>,
}

impl WorkerRegistry {
    /// Build a registry; `events` feeds the scheduler's reaction loop.
    #[must_use]
    pub fn new(db: &Arc<Database>, events: mpsc::Sender<RegistryEvent>) -> Self {
        Self {
            workers: WorkerRepo::new(Arc::clone(db)),
            ops: OpsRepo::new(Arc::clone(db)),
            events,
        }
    }

    /// Register a new worker node.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` for a duplicate label,
    /// `AppError::Db` on other failures.
    pub async fn register(
        &self,
        label: String,
        address: String,
        total_ram: i64,
        max_sessions: i64,
    ) -> Result<Worker> {
        let worker = Worker::new(
            label,
            address,
            total_ram,
            max_sessions,
            Uuid::new_v4().to_string(),
        );
        self.workers.create(&worker).await?;
        info!(worker = %worker.worker_id, "worker registered");
        let _ = self
            .events
            .send(RegistryEvent::WorkerOnline {
                worker_id: worker.id.clone(),
            })
            .await;
        Ok(worker)
    }

    /// Apply a heartbeat: recompute the load score, stamp the receipt,
    /// record an analytics sample, and report an online transition if
    /// the worker was previously offline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown worker label,
    /// `AppError::Db` on store failures.
    pub async fn heartbeat(&self, hb: &Heartbeat) -> Result<Worker> {
        let worker = self
            .workers
            .get_by_label(&hb.worker_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("worker {} not registered", hb.worker_id)))?;

        let was_offline = worker.status == WorkerStatus::Offline;
        let score = load_score(
            hb.used_ram,
            worker.total_ram,
            hb.cpu_percent,
            hb.active_sessions,
            worker.max_sessions,
        );

        self.workers
            .apply_heartbeat(
                &worker.id,
                hb.used_ram,
                hb.cpu_percent,
                hb.active_sessions,
                hb.ping_ms,
                score,
            )
            .await?;

        let sample = WorkerAnalytics {
            id: Uuid::new_v4().to_string(),
            worker_id: worker.id.clone(),
            used_ram: hb.used_ram,
            cpu_percent: hb.cpu_percent,
            active_sessions: hb.active_sessions,
            load_score: score,
            ping_ms: hb.ping_ms,
            sampled_at: Utc::now(),
        };
        if let Err(err) = self.ops.insert_analytics(&sample).await {
            warn!(%err, worker = %hb.worker_id, "analytics sample insert failed");
        }

        if was_offline && worker.status != WorkerStatus::Draining {
            info!(worker = %hb.worker_id, "worker back online");
            let _ = self
                .events
                .send(RegistryEvent::WorkerOnline {
                    worker_id: worker.id.clone(),
                })
                .await;
        }

        self.workers
            .get_by_id(&worker.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("worker {} vanished", worker.id)))
    }

    /// Admin control: start or stop draining a worker.
    ///
    /// Draining blocks new placements but keeps existing assignments
    /// running; entering drain triggers migration of its assignments.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown worker,
    /// `AppError::Db` on store failures.
    pub async fn set_draining(&self, worker_row_id: &str, draining: bool) -> Result<()> {
        let status = if draining {
            WorkerStatus::Draining
        } else {
            WorkerStatus::Online
        };
        self.workers.set_status(worker_row_id, status).await?;
        info!(worker_row_id, draining, "worker drain state changed");

        let event = if draining {
            RegistryEvent::WorkerOffline {
                worker_id: worker_row_id.to_owned(),
            }
        } else {
            RegistryEvent::WorkerOnline {
                worker_id: worker_row_id.to_owned(),
            }
        };
        let _ = self.events.send(event).await;
        Ok(())
    }
}

/// Spawn the periodic liveness scan.
///
/// Every `scan_interval` the task marks online workers whose last
/// heartbeat predates the liveness window as offline and reports each
/// transition so the scheduler migrates their assignments.
#[must_use]
pub fn spawn_liveness_scan(
    db: Arc<Database>,
    config: Arc<GlobalConfig>,
    events: mpsc::Sender<RegistryEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let workers = WorkerRepo::new(db);
        let interval: Duration = config.scan_interval();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("liveness scan cancelled");
                    return;
                }
                () = tokio::time::sleep(interval) => {}
            }

            let cutoff = Utc::now()
                - chrono::Duration::milliseconds(
                    i64::try_from(config.scheduler.liveness_window_ms).unwrap_or(i64::MAX),
                );

            let stale = match workers.stale_online(cutoff).await {
                Ok(stale) => stale,
                Err(err) => {
                    error!(%err, "liveness scan query failed");
                    continue;
                }
            };

            for worker in stale {
                warn!(worker = %worker.worker_id, "worker missed liveness window");
                if let Err(err) = workers.set_status(&worker.id, WorkerStatus::Offline).await {
                    error!(%err, worker = %worker.worker_id, "failed to mark worker offline");
                    continue;
                }
                let _ = events
                    .send(RegistryEvent::WorkerOffline {
                        worker_id: worker.id.clone(),
                    })
                    .await;
            }
        }
    })
}
