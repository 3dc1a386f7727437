//! User repository for `SQLite` persistence.

use std::sync::Arc;

use sqlx::SqliteConnection;

use crate::models::plan::PlanTier;
use crate::models::user::User;
use crate::{AppError, Result};

use super::db::Database;
use super::parse_ts;

/// Repository wrapper around `SQLite` for user records.
#[derive(Clone)]
pub struct UserRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    role: String,
    active: i64,
    created_at: String,
}

impl UserRow {
    fn into_user(self) -> Result<User> {
        let role = PlanTier::parse(&self.role)
            .ok_or_else(|| AppError::Db(format!("invalid user role: {}", self.role)))?;
        Ok(User {
            id: self.id,
            username: self.username,
            email: self.email,
            role,
            active: self.active != 0,
            created_at: parse_ts(&self.created_at, "created_at")?,
        })
    }
}

impl UserRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new user record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` on a duplicate username or email,
    /// `AppError::Db` on other failures.
    pub async fn create(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO user (id, username, email, role, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(i64::from(user.active))
        .bind(user.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve a user by identifier. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM user WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(UserRow::into_user).transpose()
    }

    /// Retrieve a user by unique username. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM user WHERE username = ?1")
            .bind(username)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(UserRow::into_user).transpose()
    }

    /// List all users, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as("SELECT * FROM user ORDER BY created_at DESC")
            .fetch_all(self.db.as_ref())
            .await?;
        rows.into_iter().map(UserRow::into_user).collect()
    }

    /// Update mutable user fields (email, role, active flag).
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the user does not exist,
    /// `AppError::Db` on other failures.
    pub async fn update(&self, user: &User) -> Result<()> {
        let result = sqlx::query("UPDATE user SET email = ?1, role = ?2, active = ?3 WHERE id = ?4")
            .bind(&user.email)
            .bind(user.role.as_str())
            .bind(i64::from(user.active))
            .bind(&user.id)
            .execute(self.db.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("user {} not found", user.id)));
        }
        Ok(())
    }

    /// Delete a user row inside an open transaction.
    ///
    /// Cascade of owned entities is the caller's responsibility; this
    /// removes only the user row itself.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_tx(&self, conn: &mut SqliteConnection, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM user WHERE id = ?1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Total user count.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user")
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(count)
    }
}
