//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::plan::PlanTier;
use crate::{AppError, Result};

/// Per-tier quota override block (`[per_tier.free]` etc. in TOML).
///
/// Absent fields fall back to the built-in tier table.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TierOverride {
    /// Maximum concurrent sessions for the tier.
    pub max_sessions: Option<u32>,
    /// Maximum forwarding pairs for the tier.
    pub max_pairs: Option<u32>,
    /// Scheduling priority band (1..5).
    pub priority: Option<u8>,
    /// Hourly API call allowance.
    pub hourly: Option<u32>,
    /// Daily API call allowance.
    pub daily: Option<u32>,
}

/// Scheduler timing knobs, all in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SchedulerConfig {
    /// Worker offline threshold since last heartbeat.
    pub liveness_window_ms: u64,
    /// Expected worker heartbeat cadence.
    pub heartbeat_interval_ms: u64,
    /// Age after which a queued assignment expires.
    pub queue_max_age_ms: u64,
    /// Minimum interval between overflow notifications.
    pub scaling_cooldown_ms: u64,
    /// Interval between liveness scans.
    pub scan_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            liveness_window_ms: 30_000,
            heartbeat_interval_ms: 10_000,
            queue_max_age_ms: 3_600_000,
            scaling_cooldown_ms: 300_000,
            scan_interval_ms: 5_000,
        }
    }
}

/// Forwarding pipeline knobs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct PipelineConfig {
    /// Outbound dispatch retry ceiling.
    pub default_retry_max: u32,
    /// Per-session event channel capacity before backpressure engages.
    pub channel_capacity: usize,
    /// Hard deadline for any platform call, in milliseconds.
    pub platform_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_retry_max: 3,
            channel_capacity: 256,
            platform_timeout_ms: 30_000,
        }
    }
}

/// Retention windows for append-only operational records.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct RetentionConfig {
    /// Days to keep forwarding logs, analytics and acknowledged controls.
    pub retention_days: u32,
    /// Days to keep message tracker rows.
    pub tracker_retention_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            tracker_retention_days: 14,
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Path of the `SQLite` database file.
    pub db_path: PathBuf,
    /// Port for the local ops HTTP endpoint.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Tier assigned to newly registered users.
    #[serde(default = "default_plan_tier")]
    pub default_plan: PlanTier,
    /// Scheduler timings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Pipeline tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Retention windows.
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Quota overrides per plan tier, keyed by tier name.
    #[serde(default)]
    pub per_tier: HashMap<String, TierOverride>,
}

fn default_http_port() -> u16 {
    8900
}

fn default_plan_tier() -> PlanTier {
    PlanTier::Free
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Worker liveness window as a [`Duration`].
    #[must_use]
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.scheduler.liveness_window_ms)
    }

    /// Queue expiry age as a [`Duration`].
    #[must_use]
    pub fn queue_max_age(&self) -> Duration {
        Duration::from_millis(self.scheduler.queue_max_age_ms)
    }

    /// Scaling notification cooldown as a [`Duration`].
    #[must_use]
    pub fn scaling_cooldown(&self) -> Duration {
        Duration::from_millis(self.scheduler.scaling_cooldown_ms)
    }

    /// Liveness scan cadence as a [`Duration`].
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.scan_interval_ms)
    }

    /// Hard deadline for platform calls as a [`Duration`].
    #[must_use]
    pub fn platform_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.platform_timeout_ms)
    }

    /// Override block for a tier, if configured.
    #[must_use]
    pub fn tier_override(&self, tier: PlanTier) -> Option<&TierOverride> {
        self.per_tier.get(tier.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(AppError::Config("db_path must not be empty".into()));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(AppError::Config(
                "pipeline.channel_capacity must be greater than zero".into(),
            ));
        }
        if self.scheduler.liveness_window_ms < self.scheduler.heartbeat_interval_ms {
            return Err(AppError::Config(
                "liveness_window_ms must not be shorter than heartbeat_interval_ms".into(),
            ));
        }
        for key in self.per_tier.keys() {
            if PlanTier::parse(key).is_none() {
                return Err(AppError::Config(format!("unknown tier in per_tier: {key}")));
            }
        }
        Ok(())
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("relay-control.db"),
            http_port: default_http_port(),
            default_plan: default_plan_tier(),
            scheduler: SchedulerConfig::default(),
            pipeline: PipelineConfig::default(),
            retention: RetentionConfig::default(),
            per_tier: HashMap::new(),
        }
    }
}
