//! Append-only operational records: forwarding logs, scaling events,
//! worker analytics samples, and worker control commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::MessageKind;

/// Outcome class of one pipeline pass over one mapping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    /// Message dispatched (or recognised as an already-dispatched duplicate).
    Success,
    /// Message dropped by a filter gate.
    Filtered,
    /// Dispatch or transform failed.
    Error,
    /// Produced by the rule test endpoint; never dispatched.
    Test,
}

impl LogStatus {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Filtered => "filtered",
            Self::Error => "error",
            Self::Test => "test",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "filtered" => Some(Self::Filtered),
            "error" => Some(Self::Error),
            "test" => Some(Self::Test),
            _ => None,
        }
    }
}

/// One append-only record of a pipeline decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ForwardingLog {
    /// Unique record identifier.
    pub id: String,
    /// Mapping involved, if resolution got that far.
    pub mapping_id: Option<String>,
    /// Source row involved.
    pub source_id: Option<String>,
    /// Destination row involved.
    pub destination_id: Option<String>,
    /// Message content kind.
    pub msg_type: MessageKind,
    /// Inbound text, truncated for storage.
    pub original_text: Option<String>,
    /// Post-transform text.
    pub processed_text: Option<String>,
    /// Outcome class.
    pub status: LogStatus,
    /// Which gate dropped the message, for `Filtered` (and duplicate) rows.
    pub filter_reason: Option<String>,
    /// Error description for `Error` rows.
    pub error: Option<String>,
    /// Pipeline wall time, milliseconds.
    pub processing_ms: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ForwardingLog {
    /// Start a log record for a mapping pass.
    #[must_use]
    pub fn for_mapping(mapping_id: &str, msg_type: MessageKind, status: LogStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mapping_id: Some(mapping_id.to_owned()),
            source_id: None,
            destination_id: None,
            msg_type,
            original_text: None,
            processed_text: None,
            status,
            filter_reason: None,
            error: None,
            processing_ms: None,
            created_at: Utc::now(),
        }
    }
}

/// What tripped an overflow scaling event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScalingTrigger {
    /// Queue depth exceeded its threshold.
    HighQueue,
    /// Fleet RAM utilisation exceeded its threshold.
    HighLoad,
}

impl ScalingTrigger {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighQueue => "high_queue",
            Self::HighLoad => "high_load",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high_queue" => Some(Self::HighQueue),
            "high_load" => Some(Self::HighLoad),
            _ => None,
        }
    }
}

/// Record that the fleet crossed an overload threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ScalingEvent {
    /// Unique record identifier.
    pub id: String,
    /// Event class; currently always `overflow_detected`.
    pub event_type: String,
    /// Which threshold tripped.
    pub trigger: ScalingTrigger,
    /// Queue depth at the time.
    pub queued: i64,
    /// Fleet RAM utilisation percentage at the time.
    pub utilisation_pct: f64,
    /// Free-form context for operators.
    pub details: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ScalingEvent {
    /// Construct an overflow event.
    #[must_use]
    pub fn overflow(trigger: ScalingTrigger, queued: i64, utilisation_pct: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: "overflow_detected".to_owned(),
            trigger,
            queued,
            utilisation_pct,
            details: None,
            created_at: Utc::now(),
        }
    }
}

/// Per-heartbeat worker utilisation sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerAnalytics {
    /// Unique record identifier.
    pub id: String,
    /// Sampled worker (row id).
    pub worker_id: String,
    /// RAM in use, megabytes.
    pub used_ram: i64,
    /// CPU utilisation percentage.
    pub cpu_percent: f64,
    /// Sessions running at sample time.
    pub active_sessions: i64,
    /// Load score at sample time.
    pub load_score: u8,
    /// Round-trip latency, milliseconds.
    pub ping_ms: i64,
    /// Sample timestamp.
    pub sampled_at: DateTime<Utc>,
}

/// Command a worker must execute for the controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// Gracefully stop a session.
    StopSession,
    /// Pause a session's update polling.
    PauseSession,
    /// Resume a paused session.
    ResumeSession,
}

impl ControlAction {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StopSession => "stop_session",
            Self::PauseSession => "pause_session",
            Self::ResumeSession => "resume_session",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stop_session" => Some(Self::StopSession),
            "pause_session" => Some(Self::PauseSession),
            "resume_session" => Some(Self::ResumeSession),
            _ => None,
        }
    }
}

/// Delivery state of a control command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    /// Written, not yet fetched by the worker.
    Pending,
    /// Fetched by the worker.
    Delivered,
    /// Worker confirmed execution.
    Acknowledged,
}

impl ControlStatus {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Acknowledged => "acknowledged",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            "acknowledged" => Some(Self::Acknowledged),
            _ => None,
        }
    }
}

/// A queued control command for a worker, polled and acknowledged by it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerControl {
    /// Unique record identifier.
    pub id: String,
    /// Target worker (row id).
    pub worker_id: String,
    /// Session the command applies to.
    pub session_id: String,
    /// What the worker must do.
    pub action: ControlAction,
    /// Delivery state.
    pub status: ControlStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl WorkerControl {
    /// Construct a pending control command.
    #[must_use]
    pub fn new(worker_id: String, session_id: String, action: ControlAction) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            worker_id,
            session_id,
            action,
            status: ControlStatus::Pending,
            created_at: Utc::now(),
        }
    }
}
