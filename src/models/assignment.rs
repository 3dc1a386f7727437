//! Session-to-worker assignment model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an assignment came to exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentType {
    /// Placed by the scheduler's normal path.
    Automatic,
    /// Pinned to a worker by an operator.
    Manual,
    /// Re-placed after worker loss or drain.
    Migration,
}

impl AssignmentType {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
            Self::Migration => "migration",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "automatic" => Some(Self::Automatic),
            "manual" => Some(Self::Manual),
            "migration" => Some(Self::Migration),
            _ => None,
        }
    }
}

/// Lifecycle status of an assignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Created; the worker has not yet acknowledged the session.
    Assigned,
    /// Worker acknowledged and heartbeated with the session running.
    Active,
    /// Paused at the user's request.
    Paused,
    /// Being moved off a lost or draining worker.
    Migrating,
    /// Terminal.
    Terminated,
}

impl AssignmentStatus {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Migrating => "migrating",
            Self::Terminated => "terminated",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assigned" => Some(Self::Assigned),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "migrating" => Some(Self::Migrating),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Whether the assignment still occupies a worker slot.
    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Terminated)
    }
}

/// The binding of one session to exactly one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionAssignment {
    /// Unique record identifier.
    pub id: String,
    /// Bound session; unique among live assignments.
    pub session_id: String,
    /// Executing worker.
    pub worker_id: String,
    /// Session owner, denormalised for priority lookups.
    pub user_id: String,
    /// Origin of the assignment.
    pub kind: AssignmentType,
    /// Lifecycle status.
    pub status: AssignmentStatus,
    /// Plan priority at assignment time.
    pub priority: u8,
    /// Messages processed under this assignment.
    pub messages_processed: i64,
    /// Worker-reported memory footprint, megabytes.
    pub ram_mb: i64,
    /// Rolling average processing latency, milliseconds.
    pub avg_proc_ms: i64,
    /// Creation timestamp.
    pub assigned_at: DateTime<Utc>,
    /// First worker acknowledgement.
    pub activated_at: Option<DateTime<Utc>>,
    /// Last worker heartbeat covering this assignment.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Last migration start, if the assignment has ever migrated.
    pub last_migration: Option<DateTime<Utc>>,
}

impl SessionAssignment {
    /// Construct a fresh assignment in `Assigned` state.
    #[must_use]
    pub fn new(
        session_id: String,
        worker_id: String,
        user_id: String,
        kind: AssignmentType,
        priority: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            worker_id,
            user_id,
            kind,
            status: AssignmentStatus::Assigned,
            priority,
            messages_processed: 0,
            ram_mb: 0,
            avg_proc_ms: 0,
            assigned_at: Utc::now(),
            activated_at: None,
            last_heartbeat: None,
            last_migration: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: AssignmentStatus) -> bool {
        matches!(
            (self.status, next),
            (AssignmentStatus::Assigned, AssignmentStatus::Active)
                | (
                    AssignmentStatus::Assigned | AssignmentStatus::Active | AssignmentStatus::Paused,
                    AssignmentStatus::Migrating
                )
                | (AssignmentStatus::Active, AssignmentStatus::Paused)
                | (AssignmentStatus::Paused, AssignmentStatus::Active)
                | (AssignmentStatus::Migrating, AssignmentStatus::Assigned)
                | (
                    AssignmentStatus::Assigned
                        | AssignmentStatus::Active
                        | AssignmentStatus::Paused
                        | AssignmentStatus::Migrating,
                    AssignmentStatus::Terminated
                )
        )
    }
}
