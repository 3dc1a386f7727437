//! Queue promotion and expiry.

use chrono::Utc;
use tracing::{info, warn};

use crate::quota::ResourceKind;
use crate::models::assignment::{AssignmentType, SessionAssignment};
use crate::models::session::SessionStatus;
use crate::Result;

use super::{placement, Scheduler};

impl Scheduler {
    /// Public entry: expire stale items, then promote queued sessions
    /// into free capacity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn drain_queue(&self) -> Result<()> {
        {
            let _guard = self.lock.lock().await;
            self.drain_queue_inner().await?;
        }
        self.check_scaling().await;
        Ok(())
    }

    /// Expiry and promotion body. Caller holds the scheduler lock.
    pub(super) async fn drain_queue_inner(&self) -> Result<()> {
        self.expire_stale_items().await?;

        // Promote one item per transaction so every placement sees
        // fresh capacity and load scores.
        loop {
            if !self.promote_next().await? {
                break;
            }
        }
        Ok(())
    }

    /// Expire queued items older than the configured maximum age,
    /// releasing their quota reservations. Their sessions stay idle.
    async fn expire_stale_items(&self) -> Result<()> {
        let max_age = chrono::Duration::from_std(self.config.queue_max_age())
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let cutoff = Utc::now() - max_age;

        let stale = self.queue.queued_older_than(cutoff).await?;
        for item in stale {
            let mut tx = self.db.begin().await?;
            self.queue.mark_expired_tx(&mut tx, &item.id).await?;
            self.quota
                .release_tx(&mut tx, &item.user_id, ResourceKind::Session)
                .await?;
            self.queue.renumber_tx(&mut tx).await?;
            tx.commit().await?;
            warn!(
                session_id = %item.session_id,
                queued_at = %item.queued_at,
                "queue item expired"
            );
        }
        Ok(())
    }

    /// Promote the highest-ranked queued item that a worker can take.
    ///
    /// Returns `true` when an item was promoted (callers loop until the
    /// queue or the capacity runs dry).
    async fn promote_next(&self) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        let items = self.queue.list_queued_tx(&mut tx).await?;
        if items.is_empty() {
            return Ok(false);
        }
        let candidates = placement::refreshed_candidates(&mut tx, &self.workers).await?;
        if candidates.is_empty() {
            return Ok(false);
        }

        for item in items {
            let premium = self
                .plans
                .get_by_user_tx(&mut tx, &item.user_id)
                .await?
                .is_some_and(|plan| plan.tier.is_premium());

            let Some(worker) = placement::select(&candidates, premium) else {
                // Capacity check failed for every candidate; later items
                // cannot do better under the same fleet.
                break;
            };

            let assignment = SessionAssignment::new(
                item.session_id.clone(),
                worker.id.clone(),
                item.user_id.clone(),
                AssignmentType::Automatic,
                item.priority,
            );
            self.assignments.create_tx(&mut tx, &assignment).await?;
            self.workers
                .adjust_active_sessions_tx(&mut tx, &worker.id, 1)
                .await?;
            self.sessions
                .set_worker_tx(&mut tx, &item.session_id, Some(&worker.id), SessionStatus::Active)
                .await?;
            self.queue.mark_promoted_tx(&mut tx, &item.id).await?;
            self.queue.renumber_tx(&mut tx).await?;
            tx.commit().await?;

            info!(
                session_id = %item.session_id,
                worker = %worker.worker_id,
                priority = item.priority,
                "queued session promoted"
            );
            return Ok(true);
        }

        Ok(false)
    }
}
