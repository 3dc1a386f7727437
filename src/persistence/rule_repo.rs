//! Regex-rule repository for `SQLite` persistence.

use std::sync::Arc;

use sqlx::SqliteConnection;

use crate::models::rule::{RegexRule, RuleKind};
use crate::{AppError, Result};

use super::db::Database;
use super::parse_ts;

/// Repository wrapper around `SQLite` for regex rules.
#[derive(Clone)]
pub struct RuleRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct RuleRow {
    id: String,
    user_id: String,
    mapping_id: Option<String>,
    name: String,
    pattern: String,
    replacement: Option<String>,
    kind: String,
    order_index: i64,
    case_sensitive: i64,
    active: i64,
    created_at: String,
}

impl RuleRow {
    fn into_rule(self) -> Result<RegexRule> {
        let kind = RuleKind::parse(&self.kind)
            .ok_or_else(|| AppError::Db(format!("invalid rule kind: {}", self.kind)))?;
        Ok(RegexRule {
            created_at: parse_ts(&self.created_at, "created_at")?,
            id: self.id,
            user_id: self.user_id,
            mapping_id: self.mapping_id,
            name: self.name,
            pattern: self.pattern,
            replacement: self.replacement,
            kind,
            order_index: self.order_index,
            case_sensitive: self.case_sensitive != 0,
            active: self.active != 0,
        })
    }
}

impl RuleRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new rule record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, rule: &RegexRule) -> Result<()> {
        sqlx::query(
            "INSERT INTO regex_rule (id, user_id, mapping_id, name, pattern, replacement, kind,
             order_index, case_sensitive, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&rule.id)
        .bind(&rule.user_id)
        .bind(&rule.mapping_id)
        .bind(&rule.name)
        .bind(&rule.pattern)
        .bind(&rule.replacement)
        .bind(rule.kind.as_str())
        .bind(rule.order_index)
        .bind(i64::from(rule.case_sensitive))
        .bind(i64::from(rule.active))
        .bind(rule.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve a rule by identifier. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<RegexRule>> {
        let row: Option<RuleRow> = sqlx::query_as("SELECT * FROM regex_rule WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(RuleRow::into_rule).transpose()
    }

    /// Active rules applicable to a mapping, in evaluation order:
    /// the owner's user-global rules first, then the mapping-scoped
    /// rules, each scope ordered by `order_index` ascending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_evaluation(
        &self,
        user_id: &str,
        mapping_id: &str,
    ) -> Result<Vec<RegexRule>> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            "SELECT * FROM regex_rule
             WHERE active = 1 AND user_id = ?1 AND (mapping_id IS NULL OR mapping_id = ?2)
             ORDER BY (mapping_id IS NOT NULL) ASC, order_index ASC, created_at ASC",
        )
        .bind(user_id)
        .bind(mapping_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(RuleRow::into_rule).collect()
    }

    /// List all of a user's rules (global and mapping-scoped).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<RegexRule>> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            "SELECT * FROM regex_rule WHERE user_id = ?1 ORDER BY order_index ASC, created_at ASC",
        )
        .bind(user_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(RuleRow::into_rule).collect()
    }

    /// List rules scoped to a specific mapping.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_mapping(&self, mapping_id: &str) -> Result<Vec<RegexRule>> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            "SELECT * FROM regex_rule WHERE mapping_id = ?1 ORDER BY order_index ASC",
        )
        .bind(mapping_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(RuleRow::into_rule).collect()
    }

    /// Rewrite a rule's mutable fields.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the rule does not exist,
    /// `AppError::Db` on other failures.
    pub async fn update(&self, rule: &RegexRule) -> Result<()> {
        let result = sqlx::query(
            "UPDATE regex_rule SET name = ?1, pattern = ?2, replacement = ?3, kind = ?4,
             order_index = ?5, case_sensitive = ?6, active = ?7 WHERE id = ?8",
        )
        .bind(&rule.name)
        .bind(&rule.pattern)
        .bind(&rule.replacement)
        .bind(rule.kind.as_str())
        .bind(rule.order_index)
        .bind(i64::from(rule.case_sensitive))
        .bind(i64::from(rule.active))
        .bind(&rule.id)
        .execute(self.db.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("rule {} not found", rule.id)));
        }
        Ok(())
    }

    /// Delete a rule row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the rule does not exist,
    /// `AppError::Db` on other failures.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM regex_rule WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("rule {id} not found")));
        }
        Ok(())
    }

    /// Delete all rules scoped to a mapping inside an open transaction.
    /// User-global rules are untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_by_mapping_tx(
        &self,
        conn: &mut SqliteConnection,
        mapping_id: &str,
    ) -> Result<()> {
        sqlx::query("DELETE FROM regex_rule WHERE mapping_id = ?1")
            .bind(mapping_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Delete all rules owned by a user inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_by_user_tx(&self, conn: &mut SqliteConnection, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM regex_rule WHERE user_id = ?1")
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}
