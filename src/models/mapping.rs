//! Source/destination chats and the forwarding pair (mapping) model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::MessageKind;

/// Kind of platform chat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    /// Broadcast channel.
    Channel,
    /// Member group.
    Group,
}

impl ChatType {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Group => "group",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "channel" => Some(Self::Channel),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

/// A chat messages are read from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Source {
    /// Unique record identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Platform-native chat identifier.
    pub chat_id: i64,
    /// Display title.
    pub chat_title: String,
    /// Chat kind.
    pub chat_type: ChatType,
    /// Public username, if the chat has one.
    pub chat_username: Option<String>,
    /// Whether mappings reading from this source are considered.
    pub active: bool,
    /// Messages seen from this chat.
    pub messages_received: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Source {
    /// Construct a new active source.
    #[must_use]
    pub fn new(user_id: String, chat_id: i64, chat_title: String, chat_type: ChatType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            chat_id,
            chat_title,
            chat_type,
            chat_username: None,
            active: true,
            messages_received: 0,
            created_at: Utc::now(),
        }
    }
}

/// A chat messages are forwarded into.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Destination {
    /// Unique record identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Platform-native chat identifier.
    pub chat_id: i64,
    /// Display title.
    pub chat_title: String,
    /// Chat kind.
    pub chat_type: ChatType,
    /// Public username, if the chat has one.
    pub chat_username: Option<String>,
    /// Whether mappings writing to this destination dispatch.
    pub active: bool,
    /// Messages delivered into this chat.
    pub messages_forwarded: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Destination {
    /// Construct a new active destination.
    #[must_use]
    pub fn new(user_id: String, chat_id: i64, chat_title: String, chat_type: ChatType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            chat_id,
            chat_title,
            chat_type,
            chat_username: None,
            active: true,
            messages_forwarded: 0,
            created_at: Utc::now(),
        }
    }
}

/// Keyword match mode for include filters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeywordMode {
    /// At least one include keyword must match.
    #[default]
    Any,
    /// Every include keyword must match.
    All,
}

/// Per-pair filter gates, applied before any transform.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct FilterConfig {
    /// Keywords at least one (or all) of which must be present.
    pub include_kw: Vec<String>,
    /// Keywords none of which may be present.
    pub exclude_kw: Vec<String>,
    /// Include keyword combination mode.
    pub kw_mode: KeywordMode,
    /// Whether keyword matching is case sensitive.
    pub case_sensitive: bool,
    /// Message kinds admitted; empty admits everything.
    pub allowed_types: Vec<MessageKind>,
    /// Drop messages containing URLs.
    pub block_urls: bool,
    /// Drop messages that are themselves forwards.
    pub block_forwards: bool,
    /// Minimum text length, inclusive.
    pub min_len: Option<u32>,
    /// Maximum text length, inclusive.
    pub max_len: Option<u32>,
}

/// Per-pair text editing toggles applied after the user's regex rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct EditingConfig {
    /// Text prepended to every forwarded message.
    pub header: Option<String>,
    /// Text appended to every forwarded message.
    pub footer: Option<String>,
    /// Strip "forwarded from" sender lines.
    pub remove_sender: bool,
    /// Strip URLs from the body.
    pub remove_urls: bool,
    /// Strip `#hashtags`.
    pub remove_hashtags: bool,
    /// Strip `@mentions`.
    pub remove_mentions: bool,
    /// Keep platform formatting entities when forwarding.
    pub preserve_formatting: bool,
}

/// Edit/delete propagation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SyncConfig {
    /// Propagate source edits to forwarded copies.
    pub update_enabled: bool,
    /// Propagate source deletes to forwarded copies.
    pub delete_enabled: bool,
    /// Coalescing window for rapid successive edits, seconds.
    pub update_delay_s: u32,
}

/// Delayed-dispatch and manual-approval settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct DelayConfig {
    /// Whether dispatch is delayed at all.
    pub enabled: bool,
    /// Delay before dispatch, seconds.
    pub seconds: u32,
    /// Hold messages for operator approval.
    pub require_approval: bool,
    /// Auto-approve held messages after this many seconds.
    pub auto_approve_after_s: Option<u32>,
}

/// A user-owned source→destination forwarding pair with its policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Mapping {
    /// Unique record identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Source chat row.
    pub source_id: String,
    /// Destination chat row.
    pub destination_id: String,
    /// Human label for the pair.
    pub pair_name: String,
    /// Free-form pair classification label.
    pub pair_type: String,
    /// Evaluation priority among sibling pairs (1..10, higher first).
    pub priority: u8,
    /// Whether the pair forwards at all.
    pub active: bool,
    /// Filter gates.
    pub filters: FilterConfig,
    /// Editing toggles.
    pub editing: EditingConfig,
    /// Edit/delete sync settings.
    pub sync: SyncConfig,
    /// Delay/approval settings.
    pub delay: DelayConfig,
    /// Monotonic version, bumped on every mutation; keys the policy cache.
    pub version: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Mapping {
    /// Construct a new active mapping with default policy blocks.
    #[must_use]
    pub fn new(
        user_id: String,
        source_id: String,
        destination_id: String,
        pair_name: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            source_id,
            destination_id,
            pair_name,
            pair_type: "standard".to_owned(),
            priority: 5,
            active: true,
            filters: FilterConfig::default(),
            editing: EditingConfig::default(),
            sync: SyncConfig::default(),
            delay: DelayConfig::default(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}
