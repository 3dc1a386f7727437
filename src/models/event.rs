//! Inbound platform events as delivered by workers.

use serde::{Deserialize, Serialize};

/// Content kind of a platform message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Photo with optional caption.
    Photo,
    /// Video with optional caption.
    Video,
    /// File attachment.
    Document,
    /// Music/audio file.
    Audio,
    /// Voice note.
    Voice,
    /// Sticker.
    Sticker,
    /// Anything the controller does not classify further.
    Other,
}

impl MessageKind {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Sticker => "sticker",
            Self::Other => "other",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "photo" => Some(Self::Photo),
            "video" => Some(Self::Video),
            "document" => Some(Self::Document),
            "audio" => Some(Self::Audio),
            "voice" => Some(Self::Voice),
            "sticker" => Some(Self::Sticker),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// A new message as it arrived at a source chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InboundMessage {
    /// Platform chat the message arrived in.
    pub source_chat_id: i64,
    /// Platform message id, unique within the chat.
    pub message_id: i64,
    /// Text or caption; empty for media without caption.
    pub text: String,
    /// Content kind.
    pub kind: MessageKind,
    /// Whether the message is itself a forward.
    pub is_forward: bool,
    /// Display name of the sender, when the platform exposes it.
    pub sender: Option<String>,
}

/// One update delivered by the worker running a session.
///
/// Events for the same `source_chat_id` are processed strictly in the
/// order the worker delivered them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PlatformEvent {
    /// A message arrived at a source chat.
    NewMessage(InboundMessage),
    /// An existing source message was edited.
    MessageEdited {
        /// Chat the edited message lives in.
        source_chat_id: i64,
        /// Edited message id.
        message_id: i64,
        /// Full replacement text.
        new_text: String,
    },
    /// Source messages were deleted.
    MessageDeleted {
        /// Chat the messages were deleted from.
        source_chat_id: i64,
        /// Deleted message ids.
        message_ids: Vec<i64>,
    },
}

impl PlatformEvent {
    /// The source chat this event belongs to, for ordering locks.
    #[must_use]
    pub fn source_chat_id(&self) -> i64 {
        match self {
            Self::NewMessage(msg) => msg.source_chat_id,
            Self::MessageEdited { source_chat_id, .. }
            | Self::MessageDeleted { source_chat_id, .. } => *source_chat_id,
        }
    }
}

/// Failure classes a worker reports for a session it runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionFailureKind {
    /// The platform rejected the session's credentials.
    Auth,
    /// The worker lost its platform connection.
    Connection,
}
