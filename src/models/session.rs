//! Platform session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for a platform session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but not yet placed on a worker.
    Idle,
    /// Running on a worker.
    Active,
    /// Paused by the user; stays on its worker.
    Paused,
    /// Lost its worker or its platform authentication.
    Crashed,
    /// Stopped explicitly; terminal unless restarted.
    Stopped,
}

impl SessionStatus {
    /// Wire representation of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Crashed => "crashed",
            Self::Stopped => "stopped",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "crashed" => Some(Self::Crashed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Whether the status counts against the owner's session quota.
    #[must_use]
    pub fn consumes_quota(self) -> bool {
        matches!(self, Self::Active | Self::Paused | Self::Crashed)
    }
}

/// A user-owned platform session executed by exactly one worker at a time.
///
/// Invariant: `worker_id` is only set while the status is `Active`,
/// `Paused` or `Crashed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Human-readable label.
    pub session_name: String,
    /// Phone number the platform identity is registered under.
    pub phone: String,
    /// Opaque platform authentication blob, handed to the worker verbatim.
    pub auth_blob: Vec<u8>,
    /// Worker currently executing the session, if placed.
    pub worker_id: Option<String>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Messages processed over the session's lifetime.
    pub msg_count: i64,
    /// Last observed activity.
    pub last_activity: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Construct a new idle session with a generated identifier.
    #[must_use]
    pub fn new(user_id: String, session_name: String, phone: String, auth_blob: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            session_name,
            phone,
            auth_blob,
            worker_id: None,
            status: SessionStatus::Idle,
            msg_count: 0,
            last_activity: None,
            created_at: Utc::now(),
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self.status, next),
            (
                SessionStatus::Idle | SessionStatus::Paused | SessionStatus::Crashed,
                SessionStatus::Active
            ) | (
                SessionStatus::Active,
                SessionStatus::Paused | SessionStatus::Crashed | SessionStatus::Stopped
            ) | (
                SessionStatus::Paused | SessionStatus::Crashed,
                SessionStatus::Stopped
            ) | (SessionStatus::Stopped, SessionStatus::Idle)
        )
    }
}
