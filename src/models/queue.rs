//! Assignment queue item model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue item lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for worker capacity.
    Queued,
    /// Promoted into an assignment.
    Promoted,
    /// Aged out before capacity appeared.
    Expired,
}

impl QueueStatus {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Promoted => "promoted",
            Self::Expired => "expired",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "promoted" => Some(Self::Promoted),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// A session waiting for a worker slot.
///
/// Invariant: `position` values form a dense 1-based ranking over the
/// `Queued` items, ordered by `(priority desc, queued_at asc)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QueueItem {
    /// Unique record identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Session awaiting placement.
    pub session_id: String,
    /// Plan priority band, possibly bumped for migrations.
    pub priority: u8,
    /// Dense 1-based rank among queued items.
    pub position: i64,
    /// Rough wait estimate surfaced to the user.
    pub est_wait_s: i64,
    /// Lifecycle status.
    pub status: QueueStatus,
    /// Enqueue timestamp; ties break FIFO within a priority band.
    pub queued_at: DateTime<Utc>,
}

impl QueueItem {
    /// Construct a queued item at the given rank.
    #[must_use]
    pub fn new(user_id: String, session_id: String, priority: u8, position: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            session_id,
            priority,
            position,
            est_wait_s: position * 300,
            status: QueueStatus::Queued,
            queued_at: Utc::now(),
        }
    }
}
