//! Messages held for delayed dispatch or operator approval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a held message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    /// Awaiting an approval decision.
    Pending,
    /// Approved; dispatches once `scheduled_for` passes.
    Approved,
    /// Rejected by an operator; never dispatches.
    Rejected,
    /// Aged out or its mapping disappeared.
    Expired,
    /// Picked up by the poller, dispatch in flight.
    Scheduled,
    /// Dispatched successfully.
    Sent,
}

impl PendingStatus {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Scheduled => "scheduled",
            Self::Sent => "sent",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            "scheduled" => Some(Self::Scheduled),
            "sent" => Some(Self::Sent),
            _ => None,
        }
    }
}

/// A message held back by a mapping's delay/approval policy.
///
/// Lifecycle: `Pending → (Approved | Rejected | Expired)`;
/// `Approved → Scheduled → Sent`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PendingMessage {
    /// Unique record identifier.
    pub id: String,
    /// Mapping the message arrived through.
    pub mapping_id: String,
    /// Owning user, denormalised for list queries.
    pub user_id: String,
    /// Source chat id, kept for tracker insertion at dispatch time.
    pub source_chat_id: i64,
    /// Source message id, kept for tracker insertion at dispatch time.
    pub source_msg_id: i64,
    /// Text as it arrived.
    pub original_content: String,
    /// Text after policy transforms, ready to dispatch.
    pub processed_content: Option<String>,
    /// Lifecycle status.
    pub status: PendingStatus,
    /// Earliest dispatch instant.
    pub scheduled_for: DateTime<Utc>,
    /// Auto-approval deadline, if the mapping sets one.
    pub expires_at: Option<DateTime<Utc>>,
    /// Operator who decided, `None` for auto-approval.
    pub approved_by: Option<String>,
    /// Decision timestamp.
    pub approved_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl PendingMessage {
    /// Construct a freshly held message.
    #[must_use]
    pub fn new(
        mapping_id: String,
        user_id: String,
        source_chat_id: i64,
        source_msg_id: i64,
        original_content: String,
        processed_content: String,
        scheduled_for: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mapping_id,
            user_id,
            source_chat_id,
            source_msg_id,
            original_content,
            processed_content: Some(processed_content),
            status: PendingStatus::Pending,
            scheduled_for,
            expires_at,
            approved_by: None,
            approved_at: None,
            created_at: Utc::now(),
        }
    }
}
