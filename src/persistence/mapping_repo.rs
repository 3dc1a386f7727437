//! Mapping repository for `SQLite` persistence.
//!
//! The embedded policy blocks (filters, editing, sync, delay) are
//! stored as JSON text columns; every mutation bumps the mapping's
//! version so the compiled-policy cache invalidates itself.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqliteConnection;

use crate::models::mapping::{DelayConfig, EditingConfig, FilterConfig, Mapping, SyncConfig};
use crate::{AppError, Result};

use super::db::Database;
use super::parse_ts;

/// Repository wrapper around `SQLite` for mapping records.
#[derive(Clone)]
pub struct MappingRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct MappingRow {
    id: String,
    user_id: String,
    source_id: String,
    destination_id: String,
    pair_name: String,
    pair_type: String,
    priority: i64,
    active: i64,
    filters: String,
    editing: String,
    sync: String,
    delay: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl MappingRow {
    fn into_mapping(self) -> Result<Mapping> {
        let filters: FilterConfig = parse_json(&self.filters, "filters")?;
        let editing: EditingConfig = parse_json(&self.editing, "editing")?;
        let sync: SyncConfig = parse_json(&self.sync, "sync")?;
        let delay: DelayConfig = parse_json(&self.delay, "delay")?;
        Ok(Mapping {
            created_at: parse_ts(&self.created_at, "created_at")?,
            updated_at: parse_ts(&self.updated_at, "updated_at")?,
            id: self.id,
            user_id: self.user_id,
            source_id: self.source_id,
            destination_id: self.destination_id,
            pair_name: self.pair_name,
            pair_type: self.pair_type,
            priority: u8::try_from(self.priority.clamp(1, 10)).unwrap_or(5),
            active: self.active != 0,
            filters,
            editing,
            sync,
            delay,
            version: self.version,
        })
    }
}

/// Parse a JSON policy column.
fn parse_json<T: serde::de::DeserializeOwned>(raw: &str, field: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| AppError::Db(format!("invalid {field} json: {e}")))
}

/// Serialize a policy block for storage.
fn to_json<T: serde::Serialize>(value: &T, field: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| AppError::Db(format!("failed to serialize {field}: {e}")))
}

impl MappingRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new mapping record inside an open transaction, so the
    /// pair-quota reservation and the row it guards commit together.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if serialization or the insert fails.
    pub async fn create_tx(&self, conn: &mut SqliteConnection, mapping: &Mapping) -> Result<()> {
        sqlx::query(
            "INSERT INTO mapping (id, user_id, source_id, destination_id, pair_name, pair_type,
             priority, active, filters, editing, sync, delay, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(&mapping.id)
        .bind(&mapping.user_id)
        .bind(&mapping.source_id)
        .bind(&mapping.destination_id)
        .bind(&mapping.pair_name)
        .bind(&mapping.pair_type)
        .bind(i64::from(mapping.priority))
        .bind(i64::from(mapping.active))
        .bind(to_json(&mapping.filters, "filters")?)
        .bind(to_json(&mapping.editing, "editing")?)
        .bind(to_json(&mapping.sync, "sync")?)
        .bind(to_json(&mapping.delay, "delay")?)
        .bind(mapping.version)
        .bind(mapping.created_at.to_rfc3339())
        .bind(mapping.updated_at.to_rfc3339())
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Retrieve a mapping by identifier. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Mapping>> {
        let row: Option<MappingRow> = sqlx::query_as("SELECT * FROM mapping WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(MappingRow::into_mapping).transpose()
    }

    /// List mappings owned by a user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<Mapping>> {
        let rows: Vec<MappingRow> =
            sqlx::query_as("SELECT * FROM mapping WHERE user_id = ?1 ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(MappingRow::into_mapping).collect()
    }

    /// Active mappings reading from the platform chat `chat_id`, in
    /// evaluation order `(priority desc, created_at asc)`.
    ///
    /// Joins through the source table so callers can route straight
    /// from an inbound event's chat id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_active_by_source_chat(&self, chat_id: i64) -> Result<Vec<Mapping>> {
        let rows: Vec<MappingRow> = sqlx::query_as(
            "SELECT m.* FROM mapping m
             JOIN source s ON s.id = m.source_id
             WHERE s.chat_id = ?1 AND s.active = 1 AND m.active = 1
             ORDER BY m.priority DESC, m.created_at ASC",
        )
        .bind(chat_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(MappingRow::into_mapping).collect()
    }

    /// Rewrite a mapping's mutable fields, bumping version and
    /// `updated_at`.
    ///
    /// Optimistic: the write only lands if the row still carries the
    /// version the caller read. A concurrent mutation surfaces as
    /// `Conflict` so the caller re-reads and retries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the mapping does not exist,
    /// `AppError::Conflict` if it changed since the caller's read,
    /// `AppError::Db` on other failures.
    pub async fn update(&self, mapping: &Mapping) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE mapping SET pair_name = ?1, pair_type = ?2, priority = ?3, active = ?4,
             filters = ?5, editing = ?6, sync = ?7, delay = ?8,
             version = version + 1, updated_at = ?9
             WHERE id = ?10 AND version = ?11",
        )
        .bind(&mapping.pair_name)
        .bind(&mapping.pair_type)
        .bind(i64::from(mapping.priority))
        .bind(i64::from(mapping.active))
        .bind(to_json(&mapping.filters, "filters")?)
        .bind(to_json(&mapping.editing, "editing")?)
        .bind(to_json(&mapping.sync, "sync")?)
        .bind(to_json(&mapping.delay, "delay")?)
        .bind(&now)
        .bind(&mapping.id)
        .bind(mapping.version)
        .execute(self.db.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            if self.get_by_id(&mapping.id).await?.is_none() {
                return Err(AppError::NotFound(format!("mapping {} not found", mapping.id)));
            }
            return Err(AppError::Conflict(format!(
                "mapping {} changed since read",
                mapping.id
            )));
        }
        Ok(())
    }

    /// Flip the active flag, bumping version.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the mapping does not exist,
    /// `AppError::Db` on other failures.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE mapping SET active = ?1, version = version + 1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(i64::from(active))
        .bind(&now)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("mapping {id} not found")));
        }
        Ok(())
    }

    /// Delete a mapping row inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_tx(&self, conn: &mut SqliteConnection, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM mapping WHERE id = ?1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Count a user's mappings; drives pair-quota reconciliation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_by_user(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mapping WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(count)
    }

    /// List mapping ids owned by a user inside an open transaction;
    /// used by cascade deletion.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_ids_by_user_tx(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM mapping WHERE user_id = ?1")
            .bind(user_id)
            .fetch_all(conn)
            .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}
