//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every controller startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Add a column to a table if it does not already exist.
///
/// Uses `PRAGMA table_info` to check column presence before issuing
/// `ALTER TABLE`, making the operation idempotent on repeated startups.
///
/// # Errors
///
/// Returns `AppError::Db` if the PRAGMA query or `ALTER TABLE` fails.
async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    alter_sql: &str,
) -> Result<()> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM pragma_table_info('{table}') WHERE name = '{column}'"
    ))
    .fetch_one(pool)
    .await?;

    if count == 0 {
        sqlx::raw_sql(alter_sql).execute(pool).await?;
    }
    Ok(())
}

/// Column migrations for deployments created before the orphan flag
/// and the mapping version counter existed.
async fn migrate_columns(pool: &SqlitePool) -> Result<()> {
    add_column_if_missing(
        pool,
        "message_tracker",
        "orphaned",
        "ALTER TABLE message_tracker ADD COLUMN orphaned INTEGER NOT NULL DEFAULT 0",
    )
    .await?;

    add_column_if_missing(
        pool,
        "mapping",
        "version",
        "ALTER TABLE mapping ADD COLUMN version INTEGER NOT NULL DEFAULT 1",
    )
    .await?;

    Ok(())
}

/// Apply all table definitions to the connected `SQLite` database.
///
/// Creates every table and secondary index idempotently. Safe to call
/// on every startup.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS user (
    id              TEXT PRIMARY KEY NOT NULL,
    username        TEXT NOT NULL UNIQUE,
    email           TEXT NOT NULL UNIQUE,
    role            TEXT NOT NULL CHECK(role IN ('free','pro','elite','admin')),
    active          INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS plan (
    id               TEXT PRIMARY KEY NOT NULL,
    user_id          TEXT NOT NULL UNIQUE,
    tier             TEXT NOT NULL CHECK(tier IN ('free','pro','elite','admin')),
    status           TEXT NOT NULL CHECK(status IN ('active','expired','cancelled')),
    max_sessions     INTEGER NOT NULL,
    max_pairs        INTEGER NOT NULL,
    priority         INTEGER NOT NULL,
    current_sessions INTEGER NOT NULL DEFAULT 0,
    current_pairs    INTEGER NOT NULL DEFAULT 0,
    started_at       TEXT NOT NULL,
    expires_at       TEXT
);

CREATE TABLE IF NOT EXISTS session (
    id              TEXT PRIMARY KEY NOT NULL,
    user_id         TEXT NOT NULL,
    session_name    TEXT NOT NULL,
    phone           TEXT NOT NULL,
    auth_blob       BLOB NOT NULL,
    worker_id       TEXT,
    status          TEXT NOT NULL CHECK(status IN ('idle','active','paused','crashed','stopped')),
    msg_count       INTEGER NOT NULL DEFAULT 0,
    last_activity   TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS worker (
    id              TEXT PRIMARY KEY NOT NULL,
    worker_id       TEXT NOT NULL UNIQUE,
    address         TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('online','draining','offline')),
    total_ram       INTEGER NOT NULL,
    used_ram        INTEGER NOT NULL DEFAULT 0,
    cpu_percent     REAL NOT NULL DEFAULT 0,
    max_sessions    INTEGER NOT NULL,
    active_sessions INTEGER NOT NULL DEFAULT 0,
    load_score      INTEGER NOT NULL DEFAULT 0,
    ping_ms         INTEGER NOT NULL DEFAULT 0,
    ram_threshold   INTEGER NOT NULL,
    priority        INTEGER NOT NULL DEFAULT 0,
    auth_token      TEXT NOT NULL,
    last_heartbeat  TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session_assignment (
    id                 TEXT PRIMARY KEY NOT NULL,
    session_id         TEXT NOT NULL,
    worker_id          TEXT NOT NULL,
    user_id            TEXT NOT NULL,
    kind               TEXT NOT NULL CHECK(kind IN ('automatic','manual','migration')),
    status             TEXT NOT NULL CHECK(status IN ('assigned','active','paused','migrating','terminated')),
    priority           INTEGER NOT NULL,
    messages_processed INTEGER NOT NULL DEFAULT 0,
    ram_mb             INTEGER NOT NULL DEFAULT 0,
    avg_proc_ms        INTEGER NOT NULL DEFAULT 0,
    assigned_at        TEXT NOT NULL,
    activated_at       TEXT,
    last_heartbeat     TEXT,
    last_migration     TEXT
);

CREATE TABLE IF NOT EXISTS session_queue (
    id              TEXT PRIMARY KEY NOT NULL,
    user_id         TEXT NOT NULL,
    session_id      TEXT NOT NULL,
    priority        INTEGER NOT NULL,
    position        INTEGER NOT NULL,
    est_wait_s      INTEGER NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('queued','promoted','expired')),
    queued_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS source (
    id                TEXT PRIMARY KEY NOT NULL,
    user_id           TEXT NOT NULL,
    chat_id           INTEGER NOT NULL,
    chat_title        TEXT NOT NULL,
    chat_type         TEXT NOT NULL CHECK(chat_type IN ('channel','group')),
    chat_username     TEXT,
    active            INTEGER NOT NULL DEFAULT 1,
    messages_received INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS destination (
    id                 TEXT PRIMARY KEY NOT NULL,
    user_id            TEXT NOT NULL,
    chat_id            INTEGER NOT NULL,
    chat_title         TEXT NOT NULL,
    chat_type          TEXT NOT NULL CHECK(chat_type IN ('channel','group')),
    chat_username      TEXT,
    active             INTEGER NOT NULL DEFAULT 1,
    messages_forwarded INTEGER NOT NULL DEFAULT 0,
    created_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS mapping (
    id              TEXT PRIMARY KEY NOT NULL,
    user_id         TEXT NOT NULL,
    source_id       TEXT NOT NULL,
    destination_id  TEXT NOT NULL,
    pair_name       TEXT NOT NULL,
    pair_type       TEXT NOT NULL,
    priority        INTEGER NOT NULL DEFAULT 5,
    active          INTEGER NOT NULL DEFAULT 1,
    filters         TEXT NOT NULL,
    editing         TEXT NOT NULL,
    sync            TEXT NOT NULL,
    delay           TEXT NOT NULL,
    version         INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS regex_rule (
    id              TEXT PRIMARY KEY NOT NULL,
    user_id         TEXT NOT NULL,
    mapping_id      TEXT,
    name            TEXT NOT NULL,
    pattern         TEXT NOT NULL,
    replacement     TEXT,
    kind            TEXT NOT NULL CHECK(kind IN ('find_replace','remove','extract','conditional_replace')),
    order_index     INTEGER NOT NULL DEFAULT 0,
    case_sensitive  INTEGER NOT NULL DEFAULT 0,
    active          INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS message_tracker (
    id                  TEXT PRIMARY KEY NOT NULL,
    mapping_id          TEXT NOT NULL,
    source_msg_id       INTEGER NOT NULL,
    source_chat_id      INTEGER NOT NULL,
    forwarded_msg_id    INTEGER,
    destination_chat_id INTEGER NOT NULL,
    hash                TEXT,
    orphaned            INTEGER NOT NULL DEFAULT 0,
    last_synced         TEXT,
    created_at          TEXT NOT NULL,
    UNIQUE(mapping_id, source_chat_id, source_msg_id)
);

CREATE TABLE IF NOT EXISTS pending_message (
    id                TEXT PRIMARY KEY NOT NULL,
    mapping_id        TEXT NOT NULL,
    user_id           TEXT NOT NULL,
    source_chat_id    INTEGER NOT NULL,
    source_msg_id     INTEGER NOT NULL,
    original_content  TEXT NOT NULL,
    processed_content TEXT,
    status            TEXT NOT NULL CHECK(status IN ('pending','approved','rejected','expired','scheduled','sent')),
    scheduled_for     TEXT NOT NULL,
    expires_at        TEXT,
    approved_by       TEXT,
    approved_at       TEXT,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS forwarding_log (
    id              TEXT PRIMARY KEY NOT NULL,
    mapping_id      TEXT,
    source_id       TEXT,
    destination_id  TEXT,
    msg_type        TEXT NOT NULL,
    original_text   TEXT,
    processed_text  TEXT,
    status          TEXT NOT NULL CHECK(status IN ('success','filtered','error','test')),
    filter_reason   TEXT,
    error           TEXT,
    processing_ms   INTEGER,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scaling_event (
    id              TEXT PRIMARY KEY NOT NULL,
    event_type      TEXT NOT NULL,
    trigger_kind    TEXT NOT NULL CHECK(trigger_kind IN ('high_queue','high_load')),
    queued          INTEGER NOT NULL,
    utilisation_pct REAL NOT NULL,
    details         TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS worker_analytics (
    id              TEXT PRIMARY KEY NOT NULL,
    worker_id       TEXT NOT NULL,
    used_ram        INTEGER NOT NULL,
    cpu_percent     REAL NOT NULL,
    active_sessions INTEGER NOT NULL,
    load_score      INTEGER NOT NULL,
    ping_ms         INTEGER NOT NULL,
    sampled_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS worker_control (
    id              TEXT PRIMARY KEY NOT NULL,
    worker_id       TEXT NOT NULL,
    session_id      TEXT NOT NULL,
    action          TEXT NOT NULL CHECK(action IN ('stop_session','pause_session','resume_session')),
    status          TEXT NOT NULL CHECK(status IN ('pending','delivered','acknowledged')),
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_user ON session(user_id, status);
CREATE INDEX IF NOT EXISTS idx_worker_status ON worker(status);
CREATE INDEX IF NOT EXISTS idx_assignment_worker ON session_assignment(worker_id, status);
CREATE INDEX IF NOT EXISTS idx_assignment_session ON session_assignment(session_id, status);
CREATE INDEX IF NOT EXISTS idx_queue_status ON session_queue(status, priority, queued_at);
CREATE INDEX IF NOT EXISTS idx_source_chat ON source(chat_id, active);
CREATE INDEX IF NOT EXISTS idx_mapping_source ON mapping(source_id, active);
CREATE INDEX IF NOT EXISTS idx_mapping_user ON mapping(user_id);
CREATE INDEX IF NOT EXISTS idx_rule_mapping ON regex_rule(mapping_id, order_index);
CREATE INDEX IF NOT EXISTS idx_rule_user ON regex_rule(user_id, order_index);
CREATE INDEX IF NOT EXISTS idx_tracker_source ON message_tracker(source_chat_id, source_msg_id);
CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_message(status, scheduled_for);
CREATE INDEX IF NOT EXISTS idx_log_created ON forwarding_log(created_at);
CREATE INDEX IF NOT EXISTS idx_control_worker ON worker_control(worker_id, status);
CREATE INDEX IF NOT EXISTS idx_analytics_worker ON worker_analytics(worker_id, sampled_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    migrate_columns(pool).await?;
    Ok(())
}
