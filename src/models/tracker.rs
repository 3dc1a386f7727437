//! Message tracker rows — the ground truth linking a source message to
//! its forwarded copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One forwarded copy of one source message under one mapping.
///
/// Unique on `(mapping_id, source_chat_id, source_msg_id)`; inserting a
/// duplicate is the at-most-once guard. `forwarded_msg_id` stays `None`
/// until the outbound dispatch succeeds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TrackerRow {
    /// Unique record identifier.
    pub id: String,
    /// Owning mapping.
    pub mapping_id: String,
    /// Platform message id in the source chat.
    pub source_msg_id: i64,
    /// Platform chat id of the source.
    pub source_chat_id: i64,
    /// Platform message id of the forwarded copy, once dispatched.
    pub forwarded_msg_id: Option<i64>,
    /// Platform chat id of the destination.
    pub destination_chat_id: i64,
    /// SHA-256 of the processed content, for edit change detection.
    pub hash: Option<String>,
    /// Set when delete propagation exhausted its retries.
    pub orphaned: bool,
    /// Last successful dispatch or sync.
    pub last_synced: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl TrackerRow {
    /// Construct a pre-dispatch tracker row.
    #[must_use]
    pub fn new(
        mapping_id: String,
        source_chat_id: i64,
        source_msg_id: i64,
        destination_chat_id: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mapping_id,
            source_msg_id,
            source_chat_id,
            forwarded_msg_id: None,
            destination_chat_id,
            hash: None,
            orphaned: false,
            last_synced: None,
            created_at: Utc::now(),
        }
    }
}
