//! Plan-quota enforcement and API rate limiting.
//!
//! Owns plan rows and their derived limits. Resource reservation runs
//! inside whatever transaction guards the write it protects, so a
//! counter can never drift from the assignment or mapping it counts.

pub mod bucket;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::models::plan::{Plan, PlanTier, TierLimits};
use crate::persistence::db::Database;
use crate::persistence::mapping_repo::MappingRepo;
use crate::persistence::plan_repo::{CounterColumn, PlanRepo};
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::user_repo::UserRepo;
use crate::{AppError, Result};

use bucket::{BucketPair, TakeOutcome};

/// Resource kinds a plan bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A platform session.
    Session,
    /// A forwarding pair.
    Pair,
}

impl ResourceKind {
    /// Human name used in errors and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Pair => "pair",
        }
    }

    fn column(self) -> CounterColumn {
        match self {
            Self::Session => CounterColumn::Sessions,
            Self::Pair => CounterColumn::Pairs,
        }
    }
}

/// Emitted when a plan change leaves a counter above its new maximum.
///
/// The quota manager reports the overage and leaves the sessions alone;
/// enforcement of a downgrade is an operator decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanDowngradeOverage {
    /// Affected user.
    pub user_id: String,
    /// Resource over its new limit.
    pub resource: String,
    /// Current counter value.
    pub current: u32,
    /// New, lower maximum.
    pub max: u32,
}

/// Plan quota and rate-limit authority.
pub struct QuotaManager {
    plans: PlanRepo,
    sessions: SessionRepo,
    mappings: MappingRepo,
    users: UserRepo,
    limits: HashMap<PlanTier, TierLimits>,
    buckets: Mutex<HashMap<(String, String), Arc<BucketPair>>>,
}

impl QuotaManager {
    /// Build a manager over the store, applying per-tier config overrides
    /// to the built-in limit table.
    #[must_use]
    pub fn new(db: &Arc<Database>, config: &GlobalConfig) -> Self {
        let mut limits = HashMap::new();
        for tier in [PlanTier::Free, PlanTier::Pro, PlanTier::Elite, PlanTier::Admin] {
            let mut tier_limits = tier.default_limits();
            if let Some(over) = config.tier_override(tier) {
                if let Some(v) = over.max_sessions {
                    tier_limits.max_sessions = v;
                }
                if let Some(v) = over.max_pairs {
                    tier_limits.max_pairs = v;
                }
                if let Some(v) = over.priority {
                    tier_limits.priority = v.clamp(1, 5);
                }
                if let Some(v) = over.hourly {
                    tier_limits.hourly_api = v;
                }
                if let Some(v) = over.daily {
                    tier_limits.daily_api = v;
                }
            }
            limits.insert(tier, tier_limits);
        }

        Self {
            plans: PlanRepo::new(Arc::clone(db)),
            sessions: SessionRepo::new(Arc::clone(db)),
            mappings: MappingRepo::new(Arc::clone(db)),
            users: UserRepo::new(Arc::clone(db)),
            limits,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Effective limits for a tier (built-in table plus overrides).
    #[must_use]
    pub fn limits_for(&self, tier: PlanTier) -> TierLimits {
        self.limits
            .get(&tier)
            .copied()
            .unwrap_or_else(|| tier.default_limits())
    }

    /// The user's plan, created from their role if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the user does not exist,
    /// `AppError::Db` on store failures.
    pub async fn ensure_plan(&self, user_id: &str) -> Result<Plan> {
        if let Some(plan) = self.plans.get_by_user(user_id).await? {
            return Ok(plan);
        }
        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {user_id} not found")))?;
        let plan = Plan::new(user_id.to_owned(), user.role, self.limits_for(user.role));
        self.plans.create(&plan).await?;
        info!(user_id, tier = user.role.as_str(), "plan created");
        Ok(plan)
    }

    /// Reserve one unit of `kind` inside an open transaction.
    ///
    /// Reads the plan row and increments its counter only when under
    /// the limit. The caller's transaction makes the check-and-increment
    /// atomic with the write it guards. Returns the plan as read, so
    /// callers get tier and priority without a second query.
    ///
    /// # Errors
    ///
    /// Returns `AppError::QuotaExceeded` when the limit is reached,
    /// `AppError::NotFound` if the user has no plan, `AppError::Db` on
    /// store failures.
    pub async fn reserve_tx(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        kind: ResourceKind,
    ) -> Result<Plan> {
        let plan = self
            .plans
            .get_by_user_tx(conn, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("plan for user {user_id} not found")))?;

        let (current, max) = match kind {
            ResourceKind::Session => (plan.current_sessions, plan.max_sessions),
            ResourceKind::Pair => (plan.current_pairs, plan.max_pairs),
        };
        if max != u32::MAX && current >= max {
            return Err(AppError::QuotaExceeded {
                resource: kind.as_str().to_owned(),
                current,
                max,
            });
        }
        self.plans
            .increment_counter_tx(conn, user_id, kind.column())
            .await?;
        Ok(plan)
    }

    /// Release one unit of `kind` inside an open transaction, clamped
    /// at zero.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn release_tx(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        kind: ResourceKind,
    ) -> Result<()> {
        self.plans
            .decrement_counter_tx(conn, user_id, kind.column())
            .await
    }

    /// Rate-limit check for one API activity by one user.
    ///
    /// Admission consults the hourly and daily token buckets for the
    /// user's tier; both refill linearly.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Throttled` with a retry hint when either
    /// bucket is empty, `AppError::NotFound`/`AppError::Db` on lookup
    /// failures.
    pub async fn allow(&self, user_id: &str, activity: &str) -> Result<()> {
        let plan = self.ensure_plan(user_id).await?;
        let limits = self.limits_for(plan.tier);
        let now_s = u32::try_from(Utc::now().timestamp().max(0)).unwrap_or(u32::MAX);

        let pair = {
            let mut buckets = match self.buckets.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(
                buckets
                    .entry((user_id.to_owned(), activity.to_owned()))
                    .or_insert_with(|| {
                        Arc::new(BucketPair::new(limits.hourly_api, limits.daily_api, now_s))
                    }),
            )
        };

        match pair.take(now_s) {
            TakeOutcome::Granted => Ok(()),
            TakeOutcome::Denied { retry_after_s } => Err(AppError::Throttled { retry_after_s }),
        }
    }

    /// Move a user to a new tier, rewriting limits and priority.
    ///
    /// Counters are untouched; when a counter exceeds its new maximum a
    /// [`PlanDowngradeOverage`] is returned per overflowing resource.
    /// Sessions are never terminated here.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the user has no plan,
    /// `AppError::Db` on store failures.
    pub async fn change_plan(
        &self,
        user_id: &str,
        new_tier: PlanTier,
    ) -> Result<Vec<PlanDowngradeOverage>> {
        let plan = self
            .plans
            .get_by_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("plan for user {user_id} not found")))?;
        let limits = self.limits_for(new_tier);

        self.plans
            .update_limits(
                user_id,
                new_tier,
                limits.max_sessions,
                limits.max_pairs,
                limits.priority,
            )
            .await?;

        // Fresh buckets for the new tier take effect lazily: dropping
        // the cached pairs lets `allow` rebuild them at next call.
        {
            let mut buckets = match self.buckets.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            buckets.retain(|(uid, _), _| uid != user_id);
        }

        let mut overages = Vec::new();
        if limits.max_sessions != u32::MAX && plan.current_sessions > limits.max_sessions {
            overages.push(PlanDowngradeOverage {
                user_id: user_id.to_owned(),
                resource: ResourceKind::Session.as_str().to_owned(),
                current: plan.current_sessions,
                max: limits.max_sessions,
            });
        }
        if limits.max_pairs != u32::MAX && plan.current_pairs > limits.max_pairs {
            overages.push(PlanDowngradeOverage {
                user_id: user_id.to_owned(),
                resource: ResourceKind::Pair.as_str().to_owned(),
                current: plan.current_pairs,
                max: limits.max_pairs,
            });
        }
        for overage in &overages {
            warn!(
                user_id,
                resource = %overage.resource,
                current = overage.current,
                max = overage.max,
                "plan downgrade overage"
            );
        }

        info!(user_id, tier = new_tier.as_str(), "plan changed");
        Ok(overages)
    }

    /// Recompute every plan's counters from live session and mapping
    /// rows. Run once at startup, before the scheduler starts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failures.
    pub async fn reconcile_counters(&self) -> Result<()> {
        let plans = self.plans.list().await?;
        for plan in plans {
            let sessions =
                u32::try_from(self.sessions.count_consuming_by_user(&plan.user_id).await?)
                    .unwrap_or(u32::MAX);
            let pairs = u32::try_from(self.mappings.count_by_user(&plan.user_id).await?)
                .unwrap_or(u32::MAX);
            if sessions != plan.current_sessions || pairs != plan.current_pairs {
                warn!(
                    user_id = %plan.user_id,
                    stored_sessions = plan.current_sessions,
                    actual_sessions = sessions,
                    stored_pairs = plan.current_pairs,
                    actual_pairs = pairs,
                    "reconciling plan counters"
                );
                self.plans.set_counters(&plan.user_id, sessions, pairs).await?;
            }
        }
        Ok(())
    }
}
