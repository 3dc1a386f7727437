//! Subscription plan model and the built-in tier limit table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subscription tier, ordered by privilege.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    /// Entry tier with tight limits.
    Free,
    /// Paid tier.
    Pro,
    /// Top paid tier.
    Elite,
    /// Operator accounts, effectively unlimited.
    Admin,
}

impl PlanTier {
    /// Wire representation of the tier.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Elite => "elite",
            Self::Admin => "admin",
        }
    }

    /// Parse a wire string into a tier. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Self::Free),
            "pro" => Some(Self::Pro),
            "elite" => Some(Self::Elite),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Whether the tier skips the free-user placement handicap.
    #[must_use]
    pub fn is_premium(self) -> bool {
        !matches!(self, Self::Free)
    }

    /// Built-in limits for the tier.
    #[must_use]
    pub fn default_limits(self) -> TierLimits {
        match self {
            Self::Free => TierLimits {
                max_sessions: 1,
                max_pairs: 5,
                priority: 1,
                hourly_api: 100,
                daily_api: 1000,
            },
            Self::Pro => TierLimits {
                max_sessions: 3,
                max_pairs: u32::MAX,
                priority: 2,
                hourly_api: 300,
                daily_api: 5000,
            },
            Self::Elite => TierLimits {
                max_sessions: 5,
                max_pairs: u32::MAX,
                priority: 3,
                hourly_api: 500,
                daily_api: 10_000,
            },
            Self::Admin => TierLimits {
                max_sessions: u32::MAX,
                max_pairs: u32::MAX,
                priority: 5,
                hourly_api: u32::MAX,
                daily_api: u32::MAX,
            },
        }
    }
}

/// Numeric limits derived from a tier. `u32::MAX` encodes "unlimited".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    /// Maximum concurrent sessions.
    pub max_sessions: u32,
    /// Maximum forwarding pairs.
    pub max_pairs: u32,
    /// Scheduling priority band (1..5).
    pub priority: u8,
    /// Hourly API token bucket capacity.
    pub hourly_api: u32,
    /// Daily API token bucket capacity.
    pub daily_api: u32,
}

/// Plan lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Plan is current and enforced.
    Active,
    /// Plan passed its expiry and awaits renewal.
    Expired,
    /// Plan was cancelled by an operator.
    Cancelled,
}

impl PlanStatus {
    /// Wire representation of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Per-user subscription plan with live resource counters.
///
/// Invariant at every quiescent point:
/// `0 ≤ current_sessions ≤ max_sessions` and `0 ≤ current_pairs ≤ max_pairs`.
/// A plan downgrade may temporarily leave a counter above its maximum;
/// the quota manager reports the overage and never force-terminates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Plan {
    /// Unique record identifier.
    pub id: String,
    /// Owning user; one plan per user.
    pub user_id: String,
    /// Subscription tier.
    pub tier: PlanTier,
    /// Lifecycle status.
    pub status: PlanStatus,
    /// Session ceiling.
    pub max_sessions: u32,
    /// Pair ceiling.
    pub max_pairs: u32,
    /// Scheduling priority band (1..5).
    pub priority: u8,
    /// Sessions currently reserved.
    pub current_sessions: u32,
    /// Pairs currently reserved.
    pub current_pairs: u32,
    /// Plan start timestamp.
    pub started_at: DateTime<Utc>,
    /// Optional expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Plan {
    /// Construct a fresh plan for `user_id` with the tier's limits.
    #[must_use]
    pub fn new(user_id: String, tier: PlanTier, limits: TierLimits) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            tier,
            status: PlanStatus::Active,
            max_sessions: limits.max_sessions,
            max_pairs: limits.max_pairs,
            priority: limits.priority,
            current_sessions: 0,
            current_pairs: 0,
            started_at: Utc::now(),
            expires_at: None,
        }
    }
}
