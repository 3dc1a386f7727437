//! End-user account model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::PlanTier;

/// A registered end user who owns sessions and forwarding pairs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct User {
    /// Unique record identifier.
    pub id: String,
    /// Unique login name.
    pub username: String,
    /// Unique contact address.
    pub email: String,
    /// Role, doubling as the default plan tier.
    pub role: PlanTier,
    /// Whether the account may hold active sessions.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Construct a new active user with a generated identifier.
    #[must_use]
    pub fn new(username: String, email: String, role: PlanTier) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username,
            email,
            role,
            active: true,
            created_at: Utc::now(),
        }
    }
}
