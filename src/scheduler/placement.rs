//! Worker placement rule and load-score refresh.

use sqlx::SqliteConnection;

use crate::models::worker::{load_score, Worker};
use crate::persistence::worker_repo::WorkerRepo;
use crate::Result;

/// Free users avoid workers with this many or fewer open slots, keeping
/// headroom for premium arrivals.
pub const FREE_TIER_SLOT_FLOOR: i64 = 5;

/// Pick a worker from `candidates` (sorted ascending by load score).
///
/// Premium users take the least-loaded worker outright. Free users take
/// the least-loaded worker that still has more than
/// [`FREE_TIER_SLOT_FLOOR`] open slots, falling back to the head when
/// every candidate is near saturation.
#[must_use]
pub fn select(candidates: &[Worker], premium: bool) -> Option<&Worker> {
    if premium {
        return candidates.first();
    }
    candidates
        .iter()
        .find(|w| w.available_slots() > FREE_TIER_SLOT_FLOOR)
        .or_else(|| candidates.first())
}

/// Online workers with capacity, load scores recomputed from their
/// stored metrics, sorted ascending by score.
///
/// Refreshing before every placement keeps a stale score from steering
/// a burst of sessions onto a worker that just filled.
///
/// # Errors
///
/// Returns `AppError::Db` on store failures.
pub async fn refreshed_candidates(
    conn: &mut SqliteConnection,
    workers: &WorkerRepo,
) -> Result<Vec<Worker>> {
    let mut online = workers.list_online_tx(conn).await?;

    for worker in &mut online {
        let fresh = load_score(
            worker.used_ram,
            worker.total_ram,
            worker.cpu_percent,
            worker.active_sessions,
            worker.max_sessions,
        );
        if fresh != worker.load_score {
            workers.set_load_score_tx(conn, &worker.id, fresh).await?;
            worker.load_score = fresh;
        }
    }

    let mut candidates: Vec<Worker> = online.into_iter().filter(Worker::has_capacity).collect();
    candidates.sort_by_key(|w| w.load_score);
    Ok(candidates)
}
