//! Worker node model, heartbeat payload, and capacity predicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Availability status of a worker node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Heartbeating within the liveness window; eligible for placement.
    Online,
    /// Admin-requested drain: keeps running sessions, refuses new ones.
    Draining,
    /// Missed its liveness window; sessions are being migrated away.
    Offline,
}

impl WorkerStatus {
    /// Wire representation of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Draining => "draining",
            Self::Offline => "offline",
        }
    }

    /// Parse a wire string. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "draining" => Some(Self::Draining),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// A registered worker node that executes platform sessions.
///
/// Invariant: `active_sessions ≤ max_sessions`; `Online` requires a
/// heartbeat within the configured liveness window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Worker {
    /// Unique record identifier.
    pub id: String,
    /// Human label, unique across the fleet.
    pub worker_id: String,
    /// Network address the controller reaches the worker at.
    pub address: String,
    /// Availability status.
    pub status: WorkerStatus,
    /// Total RAM in megabytes.
    pub total_ram: i64,
    /// RAM in use, megabytes.
    pub used_ram: i64,
    /// CPU utilisation percentage (0..100).
    pub cpu_percent: f64,
    /// Session capacity ceiling.
    pub max_sessions: i64,
    /// Sessions currently placed on the worker.
    pub active_sessions: i64,
    /// Composite pressure score, 0 (idle) to 100 (saturated).
    pub load_score: u8,
    /// Last measured round-trip latency to the worker.
    pub ping_ms: i64,
    /// RAM ceiling in megabytes above which placement stops.
    pub ram_threshold: i64,
    /// Operator-assigned placement preference.
    pub priority: i64,
    /// Bearer token the worker authenticates with.
    pub auth_token: String,
    /// Last heartbeat receipt.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
}

impl Worker {
    /// Register a new worker with a generated identifier.
    #[must_use]
    pub fn new(
        worker_id: String,
        address: String,
        total_ram: i64,
        max_sessions: i64,
        auth_token: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            worker_id,
            address,
            status: WorkerStatus::Online,
            total_ram,
            used_ram: 0,
            cpu_percent: 0.0,
            max_sessions,
            active_sessions: 0,
            load_score: 0,
            ping_ms: 0,
            ram_threshold: total_ram * 85 / 100,
            priority: 0,
            auth_token,
            last_heartbeat: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the worker can accept one more session.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.status == WorkerStatus::Online
            && self.active_sessions < self.max_sessions
            && self.used_ram < self.ram_threshold
    }

    /// Remaining session slots.
    #[must_use]
    pub fn available_slots(&self) -> i64 {
        (self.max_sessions - self.active_sessions).max(0)
    }
}

/// Metrics payload a worker reports every heartbeat interval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Heartbeat {
    /// Reporting worker's human label.
    pub worker_id: String,
    /// RAM in use, megabytes.
    pub used_ram: i64,
    /// CPU utilisation percentage.
    pub cpu_percent: f64,
    /// Sessions the worker believes it is running.
    pub active_sessions: i64,
    /// Round-trip latency measured worker-side.
    pub ping_ms: i64,
    /// Worker software version string.
    pub version: String,
}

/// Compute the composite load score from raw utilisation figures.
///
/// `round(0.4·ram_pct + 0.3·cpu_pct + 0.3·sessions_pct)` with every
/// percentage clamped to 0..100 first, so the result is always 0..100.
#[must_use]
pub fn load_score(used_ram: i64, total_ram: i64, cpu_percent: f64, active: i64, max: i64) -> u8 {
    #[allow(clippy::cast_precision_loss)] // RAM/session counts are far below 2^52.
    let ram_pct = if total_ram > 0 {
        (used_ram as f64 / total_ram as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };
    let cpu_pct = cpu_percent.clamp(0.0, 100.0);
    #[allow(clippy::cast_precision_loss)]
    let sessions_pct = if max > 0 {
        (active as f64 / max as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        100.0
    };
    let score = (0.4 * ram_pct + 0.3 * cpu_pct + 0.3 * sessions_pct).round();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Clamped to 0..100.
    let score = score as u8;
    score
}
