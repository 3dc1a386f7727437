//! Source- and destination-chat repositories for `SQLite` persistence.
//!
//! Sources and destinations are structural twins; each gets its own
//! thin repository over its own table.

use std::sync::Arc;

use sqlx::SqliteConnection;

use crate::models::mapping::{ChatType, Destination, Source};
use crate::{AppError, Result};

use super::db::Database;
use super::parse_ts;

/// Internal row struct shared by both tables.
#[derive(sqlx::FromRow)]
struct ChatRow {
    id: String,
    user_id: String,
    chat_id: i64,
    chat_title: String,
    chat_type: String,
    chat_username: Option<String>,
    active: i64,
    counter: i64,
    created_at: String,
}

impl ChatRow {
    fn chat_type(&self) -> Result<ChatType> {
        ChatType::parse(&self.chat_type)
            .ok_or_else(|| AppError::Db(format!("invalid chat type: {}", self.chat_type)))
    }

    fn into_source(self) -> Result<Source> {
        Ok(Source {
            chat_type: self.chat_type()?,
            created_at: parse_ts(&self.created_at, "created_at")?,
            id: self.id,
            user_id: self.user_id,
            chat_id: self.chat_id,
            chat_title: self.chat_title,
            chat_username: self.chat_username,
            active: self.active != 0,
            messages_received: self.counter,
        })
    }

    fn into_destination(self) -> Result<Destination> {
        Ok(Destination {
            chat_type: self.chat_type()?,
            created_at: parse_ts(&self.created_at, "created_at")?,
            id: self.id,
            user_id: self.user_id,
            chat_id: self.chat_id,
            chat_title: self.chat_title,
            chat_username: self.chat_username,
            active: self.active != 0,
            messages_forwarded: self.counter,
        })
    }
}

/// Repository wrapper around `SQLite` for source chats.
#[derive(Clone)]
pub struct SourceRepo {
    db: Arc<Database>,
}

impl SourceRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new source record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, source: &Source) -> Result<()> {
        sqlx::query(
            "INSERT INTO source (id, user_id, chat_id, chat_title, chat_type, chat_username,
             active, messages_received, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&source.id)
        .bind(&source.user_id)
        .bind(source.chat_id)
        .bind(&source.chat_title)
        .bind(source.chat_type.as_str())
        .bind(&source.chat_username)
        .bind(i64::from(source.active))
        .bind(source.messages_received)
        .bind(source.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve a source by identifier. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Source>> {
        let row: Option<ChatRow> = sqlx::query_as(
            "SELECT id, user_id, chat_id, chat_title, chat_type, chat_username, active,
             messages_received AS counter, created_at FROM source WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(ChatRow::into_source).transpose()
    }

    /// List sources owned by a user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<Source>> {
        let rows: Vec<ChatRow> = sqlx::query_as(
            "SELECT id, user_id, chat_id, chat_title, chat_type, chat_username, active,
             messages_received AS counter, created_at FROM source
             WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(ChatRow::into_source).collect()
    }

    /// Bump the received-message counter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_received(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE source SET messages_received = messages_received + 1 WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Delete a source row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the source does not exist,
    /// `AppError::Db` on other failures.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM source WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("source {id} not found")));
        }
        Ok(())
    }

    /// Delete all sources owned by a user inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_by_user_tx(&self, conn: &mut SqliteConnection, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM source WHERE user_id = ?1")
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// Repository wrapper around `SQLite` for destination chats.
#[derive(Clone)]
pub struct DestinationRepo {
    db: Arc<Database>,
}

impl DestinationRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new destination record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, destination: &Destination) -> Result<()> {
        sqlx::query(
            "INSERT INTO destination (id, user_id, chat_id, chat_title, chat_type, chat_username,
             active, messages_forwarded, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&destination.id)
        .bind(&destination.user_id)
        .bind(destination.chat_id)
        .bind(&destination.chat_title)
        .bind(destination.chat_type.as_str())
        .bind(&destination.chat_username)
        .bind(i64::from(destination.active))
        .bind(destination.messages_forwarded)
        .bind(destination.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve a destination by identifier. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Destination>> {
        let row: Option<ChatRow> = sqlx::query_as(
            "SELECT id, user_id, chat_id, chat_title, chat_type, chat_username, active,
             messages_forwarded AS counter, created_at FROM destination WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(ChatRow::into_destination).transpose()
    }

    /// List destinations owned by a user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<Destination>> {
        let rows: Vec<ChatRow> = sqlx::query_as(
            "SELECT id, user_id, chat_id, chat_title, chat_type, chat_username, active,
             messages_forwarded AS counter, created_at FROM destination
             WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(ChatRow::into_destination).collect()
    }

    /// Bump the forwarded-message counter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_forwarded(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE destination SET messages_forwarded = messages_forwarded + 1 WHERE id = ?1",
        )
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Delete a destination row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the destination does not exist,
    /// `AppError::Db` on other failures.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM destination WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("destination {id} not found")));
        }
        Ok(())
    }

    /// Delete all destinations owned by a user inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_by_user_tx(&self, conn: &mut SqliteConnection, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM destination WHERE user_id = ?1")
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}
