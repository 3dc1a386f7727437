//! Retention service for time-based data purge.
//!
//! Runs as a background task deleting aged forwarding logs, worker
//! analytics samples, acknowledged worker controls, and old message
//! tracker rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::RetentionConfig;

use super::db::Database;
use super::log_repo::LogRepo;
use super::ops_repo::OpsRepo;
use super::tracker_repo::TrackerRepo;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the retention purge background task.
///
/// The task runs hourly. On each tick it removes operational records
/// older than `retention_days` and tracker rows older than
/// `tracker_retention_days`.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    config: RetentionConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let logs = LogRepo::new(Arc::clone(&db));
        let ops = OpsRepo::new(Arc::clone(&db));
        let trackers = TrackerRepo::new(db);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task cancelled");
                    return;
                }
                () = tokio::time::sleep(PURGE_INTERVAL) => {}
            }

            let ops_cutoff = Utc::now() - chrono::Duration::days(i64::from(config.retention_days));
            let tracker_cutoff =
                Utc::now() - chrono::Duration::days(i64::from(config.tracker_retention_days));

            match logs.purge_older_than(ops_cutoff).await {
                Ok(removed) if removed > 0 => info!(removed, "purged forwarding logs"),
                Ok(_) => {}
                Err(err) => error!(%err, "forwarding log purge failed"),
            }
            match ops.purge_older_than(ops_cutoff).await {
                Ok(removed) if removed > 0 => info!(removed, "purged operational records"),
                Ok(_) => {}
                Err(err) => error!(%err, "operational record purge failed"),
            }
            match trackers.purge_older_than(tracker_cutoff).await {
                Ok(removed) if removed > 0 => info!(removed, "purged tracker rows"),
                Ok(_) => {}
                Err(err) => error!(%err, "tracker purge failed"),
            }
        }
    })
}
