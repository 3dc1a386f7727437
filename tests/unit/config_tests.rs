//! Unit tests for configuration parsing and validation.

use relay_control::config::GlobalConfig;
use relay_control::models::plan::PlanTier;
use relay_control::AppError;

#[test]
fn minimal_config_gets_defaults() {
    let config = GlobalConfig::from_toml_str(r#"db_path = "relay.db""#).unwrap();

    assert_eq!(config.scheduler.liveness_window_ms, 30_000);
    assert_eq!(config.scheduler.heartbeat_interval_ms, 10_000);
    assert_eq!(config.scheduler.queue_max_age_ms, 3_600_000);
    assert_eq!(config.scheduler.scaling_cooldown_ms, 300_000);
    assert_eq!(config.pipeline.default_retry_max, 3);
    assert_eq!(config.pipeline.channel_capacity, 256);
    assert_eq!(config.default_plan, PlanTier::Free);
    assert_eq!(config.retention.retention_days, 30);
}

#[test]
fn per_tier_overrides_parse() {
    let raw = r#"
db_path = "relay.db"

[per_tier.free]
max_sessions = 2
hourly = 250

[per_tier.pro]
priority = 4
"#;
    let config = GlobalConfig::from_toml_str(raw).unwrap();

    let free = config.tier_override(PlanTier::Free).unwrap();
    assert_eq!(free.max_sessions, Some(2));
    assert_eq!(free.hourly, Some(250));
    assert_eq!(free.max_pairs, None);

    let pro = config.tier_override(PlanTier::Pro).unwrap();
    assert_eq!(pro.priority, Some(4));
    assert!(config.tier_override(PlanTier::Elite).is_none());
}

#[test]
fn unknown_tier_key_is_rejected() {
    let raw = r#"
db_path = "relay.db"

[per_tier.platinum]
max_sessions = 9
"#;
    let err = GlobalConfig::from_toml_str(raw).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn empty_db_path_is_rejected() {
    let err = GlobalConfig::from_toml_str(r#"db_path = """#).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn liveness_shorter_than_heartbeat_is_rejected() {
    let raw = r#"
db_path = "relay.db"

[scheduler]
liveness_window_ms = 5000
heartbeat_interval_ms = 10000
"#;
    let err = GlobalConfig::from_toml_str(raw).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn loads_from_a_file_on_disk() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "db_path = \"relay.db\"").unwrap();
    writeln!(file, "http_port = 9123").unwrap();

    let config = GlobalConfig::load_from_path(file.path()).unwrap();
    assert_eq!(config.http_port, 9123);

    let err = GlobalConfig::load_from_path("/nonexistent/config.toml").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn scheduler_durations_convert() {
    let config = GlobalConfig::from_toml_str(r#"db_path = "relay.db""#).unwrap();
    assert_eq!(config.liveness_window().as_secs(), 30);
    assert_eq!(config.queue_max_age().as_secs(), 3600);
    assert_eq!(config.scaling_cooldown().as_secs(), 300);
    assert_eq!(config.platform_timeout().as_secs(), 30);
}
