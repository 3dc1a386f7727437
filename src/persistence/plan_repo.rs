//! Plan repository for `SQLite` persistence.
//!
//! Counter mutations run through `*_tx` variants so quota reservation
//! stays atomic with whatever assignment or mapping write it guards.

use std::sync::Arc;

use sqlx::SqliteConnection;

use crate::models::plan::{Plan, PlanStatus, PlanTier};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_opt_ts, parse_ts};

/// Repository wrapper around `SQLite` for plan records.
#[derive(Clone)]
pub struct PlanRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct PlanRow {
    id: String,
    user_id: String,
    tier: String,
    status: String,
    max_sessions: i64,
    max_pairs: i64,
    priority: i64,
    current_sessions: i64,
    current_pairs: i64,
    started_at: String,
    expires_at: Option<String>,
}

impl PlanRow {
    fn into_plan(self) -> Result<Plan> {
        let tier = PlanTier::parse(&self.tier)
            .ok_or_else(|| AppError::Db(format!("invalid plan tier: {}", self.tier)))?;
        let status = PlanStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid plan status: {}", self.status)))?;
        Ok(Plan {
            id: self.id,
            user_id: self.user_id,
            tier,
            status,
            max_sessions: clamp_u32(self.max_sessions),
            max_pairs: clamp_u32(self.max_pairs),
            priority: u8::try_from(self.priority.clamp(1, 5)).unwrap_or(1),
            current_sessions: clamp_u32(self.current_sessions),
            current_pairs: clamp_u32(self.current_pairs),
            started_at: parse_ts(&self.started_at, "started_at")?,
            expires_at: parse_opt_ts(self.expires_at.as_deref(), "expires_at")?,
        })
    }
}

/// Clamp a stored counter into `u32` range; negatives collapse to zero.
fn clamp_u32(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

/// Widen a `u32` limit for storage. `u32::MAX` (unlimited) survives.
fn widen(v: u32) -> i64 {
    i64::from(v)
}

impl PlanRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new plan record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the user already has a plan,
    /// `AppError::Db` on other failures.
    pub async fn create(&self, plan: &Plan) -> Result<()> {
        sqlx::query(
            "INSERT INTO plan (id, user_id, tier, status, max_sessions, max_pairs, priority,
             current_sessions, current_pairs, started_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&plan.id)
        .bind(&plan.user_id)
        .bind(plan.tier.as_str())
        .bind(plan.status.as_str())
        .bind(widen(plan.max_sessions))
        .bind(widen(plan.max_pairs))
        .bind(i64::from(plan.priority))
        .bind(i64::from(plan.current_sessions))
        .bind(i64::from(plan.current_pairs))
        .bind(plan.started_at.to_rfc3339())
        .bind(plan.expires_at.map(|dt| dt.to_rfc3339()))
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve the plan for a user. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_user(&self, user_id: &str) -> Result<Option<Plan>> {
        let row: Option<PlanRow> = sqlx::query_as("SELECT * FROM plan WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(PlanRow::into_plan).transpose()
    }

    /// Retrieve the plan for a user inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_user_tx(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<Option<Plan>> {
        let row: Option<PlanRow> = sqlx::query_as("SELECT * FROM plan WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(conn)
            .await?;
        row.map(PlanRow::into_plan).transpose()
    }

    /// List every plan; used by startup reconciliation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Plan>> {
        let rows: Vec<PlanRow> = sqlx::query_as("SELECT * FROM plan")
            .fetch_all(self.db.as_ref())
            .await?;
        rows.into_iter().map(PlanRow::into_plan).collect()
    }

    /// Rewrite a plan's tier, limits and priority, keeping counters.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the user has no plan,
    /// `AppError::Db` on other failures.
    pub async fn update_limits(
        &self,
        user_id: &str,
        tier: PlanTier,
        max_sessions: u32,
        max_pairs: u32,
        priority: u8,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE plan SET tier = ?1, max_sessions = ?2, max_pairs = ?3, priority = ?4
             WHERE user_id = ?5",
        )
        .bind(tier.as_str())
        .bind(widen(max_sessions))
        .bind(widen(max_pairs))
        .bind(i64::from(priority))
        .bind(user_id)
        .execute(self.db.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("plan for user {user_id} not found")));
        }
        Ok(())
    }

    /// Increment a resource counter inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn increment_counter_tx(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        column: CounterColumn,
    ) -> Result<()> {
        let sql = match column {
            CounterColumn::Sessions => {
                "UPDATE plan SET current_sessions = current_sessions + 1 WHERE user_id = ?1"
            }
            CounterColumn::Pairs => {
                "UPDATE plan SET current_pairs = current_pairs + 1 WHERE user_id = ?1"
            }
        };
        sqlx::query(sql).bind(user_id).execute(conn).await?;
        Ok(())
    }

    /// Decrement a resource counter, clamped at zero, inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn decrement_counter_tx(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        column: CounterColumn,
    ) -> Result<()> {
        let sql = match column {
            CounterColumn::Sessions => {
                "UPDATE plan SET current_sessions = MAX(current_sessions - 1, 0) WHERE user_id = ?1"
            }
            CounterColumn::Pairs => {
                "UPDATE plan SET current_pairs = MAX(current_pairs - 1, 0) WHERE user_id = ?1"
            }
        };
        sqlx::query(sql).bind(user_id).execute(conn).await?;
        Ok(())
    }

    /// Overwrite both counters; used by startup reconciliation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_counters(&self, user_id: &str, sessions: u32, pairs: u32) -> Result<()> {
        sqlx::query("UPDATE plan SET current_sessions = ?1, current_pairs = ?2 WHERE user_id = ?3")
            .bind(i64::from(sessions))
            .bind(i64::from(pairs))
            .bind(user_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Delete the plan for a user inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_by_user_tx(&self, conn: &mut SqliteConnection, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM plan WHERE user_id = ?1")
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// Which plan counter a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterColumn {
    /// `current_sessions`.
    Sessions,
    /// `current_pairs`.
    Pairs,
}
