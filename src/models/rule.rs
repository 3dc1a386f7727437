//! User-authored regex transformation rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a regex rule does to the text it matches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Substitute every match with the replacement.
    FindReplace,
    /// Substitute every match with the empty string.
    Remove,
    /// Replace the whole text with the concatenated captures.
    Extract,
    /// Substitute only when the pattern matches at all.
    ConditionalReplace,
}

impl RuleKind {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FindReplace => "find_replace",
            Self::Remove => "remove",
            Self::Extract => "extract",
            Self::ConditionalReplace => "conditional_replace",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "find_replace" => Some(Self::FindReplace),
            "remove" => Some(Self::Remove),
            "extract" => Some(Self::Extract),
            "conditional_replace" => Some(Self::ConditionalReplace),
            _ => None,
        }
    }
}

/// A single regex transformation.
///
/// Rules with `mapping_id = None` are user-global: they apply to all of
/// the user's mappings, before any mapping-scoped rule, ordered by
/// `order_index` ascending within each scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RegexRule {
    /// Unique record identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Scoping mapping, or `None` for user-global.
    pub mapping_id: Option<String>,
    /// Human label.
    pub name: String,
    /// Regex pattern source.
    pub pattern: String,
    /// Replacement template for substitution kinds.
    pub replacement: Option<String>,
    /// What the rule does.
    pub kind: RuleKind,
    /// Ordering within its scope, ascending.
    pub order_index: i64,
    /// Case-sensitive matching; `false` compiles with `(?i)`.
    pub case_sensitive: bool,
    /// Inactive rules are skipped at compile time.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl RegexRule {
    /// Construct a new active rule.
    #[must_use]
    pub fn new(
        user_id: String,
        mapping_id: Option<String>,
        name: String,
        pattern: String,
        kind: RuleKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            mapping_id,
            name,
            pattern,
            replacement: None,
            kind,
            order_index: 0,
            case_sensitive: false,
            active: true,
            created_at: Utc::now(),
        }
    }
}
