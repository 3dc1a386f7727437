//! Migration of assignments off lost or draining workers.

use tracing::{info, warn};

use crate::models::assignment::SessionAssignment;
use crate::models::queue::QueueItem;
use crate::models::session::SessionStatus;
use crate::Result;

use super::{placement, Scheduler};

impl Scheduler {
    /// Migrate every live assignment off a worker that went offline or
    /// entered drain.
    ///
    /// Each assignment either lands on a new worker or is re-enqueued
    /// one priority band higher; tracker rows are untouched either way,
    /// so the new worker resumes with the same dedup state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn migrate_worker(&self, worker_row_id: &str) -> Result<()> {
        {
            let _guard = self.lock.lock().await;

            let assignments = self.assignments.list_live_by_worker(worker_row_id).await?;
            if assignments.is_empty() {
                return Ok(());
            }
            info!(count = assignments.len(), "migrating assignments off worker");

            for assignment in assignments {
                self.migrate_assignment(&assignment).await?;
            }

            self.drain_queue_inner().await?;
        }
        self.check_scaling().await;
        Ok(())
    }

    /// Move one assignment to a new worker, or re-enqueue its session
    /// with a one-band priority bump when the remaining fleet is full.
    async fn migrate_assignment(&self, assignment: &SessionAssignment) -> Result<()> {
        let mut tx = self.db.begin().await?;

        self.assignments.mark_migrating_tx(&mut tx, &assignment.id).await?;
        self.workers
            .adjust_active_sessions_tx(&mut tx, &assignment.worker_id, -1)
            .await?;

        let candidates = placement::refreshed_candidates(&mut tx, &self.workers).await?;
        let remaining: Vec<_> = candidates
            .into_iter()
            .filter(|w| w.id != assignment.worker_id)
            .collect();

        let premium = self
            .plans
            .get_by_user_tx(&mut tx, &assignment.user_id)
            .await?
            .is_some_and(|plan| plan.tier.is_premium());

        if let Some(worker) = placement::select(&remaining, premium) {
            self.assignments
                .rebind_worker_tx(&mut tx, &assignment.id, &worker.id)
                .await?;
            self.workers
                .adjust_active_sessions_tx(&mut tx, &worker.id, 1)
                .await?;
            self.sessions
                .set_worker_tx(
                    &mut tx,
                    &assignment.session_id,
                    Some(&worker.id),
                    SessionStatus::Active,
                )
                .await?;
            tx.commit().await?;
            info!(
                session_id = %assignment.session_id,
                from = %assignment.worker_id,
                to = %worker.worker_id,
                "session migrated"
            );
        } else {
            // No capacity anywhere: park the session in the queue one
            // priority band up. The quota reservation stays held.
            self.assignments.terminate_tx(&mut tx, &assignment.id).await?;
            let bumped = assignment.priority.saturating_add(1).min(5);
            let position = self.queue.next_position_for_tx(&mut tx, bumped).await?;
            let item = QueueItem::new(
                assignment.user_id.clone(),
                assignment.session_id.clone(),
                bumped,
                position,
            );
            self.queue.create_tx(&mut tx, &item).await?;
            self.queue.renumber_tx(&mut tx).await?;
            self.sessions
                .set_worker_tx(&mut tx, &assignment.session_id, None, SessionStatus::Idle)
                .await?;
            tx.commit().await?;
            warn!(
                session_id = %assignment.session_id,
                priority = bumped,
                "no capacity for migration, session re-enqueued"
            );
        }
        Ok(())
    }
}
