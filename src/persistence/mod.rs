//! `SQLite`-backed store: connection management, schema bootstrap, and
//! one repository per entity family.
//!
//! All writes funnel through these repositories. Multi-entity atomic
//! flows (assignment creation, quota reserve, tracker insertion) use the
//! `*_tx` method variants inside a `pool.begin()` transaction scope.

use chrono::{DateTime, Utc};

use crate::{AppError, Result};

pub mod assignment_repo;
pub mod chat_repo;
pub mod db;
pub mod log_repo;
pub mod mapping_repo;
pub mod ops_repo;
pub mod pending_repo;
pub mod plan_repo;
pub mod queue_repo;
pub mod retention;
pub mod retry;
pub mod rule_repo;
pub mod schema;
pub mod session_repo;
pub mod tracker_repo;
pub mod user_repo;
pub mod worker_repo;

/// Parse an RFC-3339 timestamp column.
///
/// # Errors
///
/// Returns `AppError::Db` naming `field` if the text is not valid RFC-3339.
pub(crate) fn parse_ts(s: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

/// Parse an optional RFC-3339 timestamp column.
///
/// # Errors
///
/// Returns `AppError::Db` naming `field` if present but invalid.
pub(crate) fn parse_opt_ts(s: Option<&str>, field: &str) -> Result<Option<DateTime<Utc>>> {
    s.map(|v| parse_ts(v, field)).transpose()
}
