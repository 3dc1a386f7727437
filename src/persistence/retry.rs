//! Bounded retry for transient store contention.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::backoff::Backoff;
use crate::{AppError, Result};

/// Default retry budget for store contention.
pub const DEFAULT_STORE_RETRIES: u32 = 5;

/// Run `op` until it succeeds, fails non-transiently, or the retry
/// budget is spent.
///
/// Only `AppError::StoreBusy` is retried; every other error propagates
/// immediately. A spent budget escalates to `AppError::Internal` so
/// callers never see raw contention errors after the budget.
///
/// # Errors
///
/// Returns the underlying error for non-transient failures, or
/// `AppError::Internal` once the budget is exhausted.
pub async fn with_busy_retry<T, F, Fut>(budget: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_secs(2));
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(AppError::StoreBusy(msg)) => {
                attempt += 1;
                if attempt > budget {
                    return Err(AppError::Internal(format!(
                        "store contention persisted past {budget} retries: {msg}"
                    )));
                }
                let delay = backoff.next_delay();
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!(attempt, delay_ms, "store busy, backing off");
                tokio::time::sleep(delay).await;
            }
            Err(other) => return Err(other),
        }
    }
}
