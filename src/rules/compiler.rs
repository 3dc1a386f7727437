//! Compilation of a mapping's policy into its immutable evaluated form.
//!
//! A mapping's filters, editing toggles, and applicable regex rules are
//! compiled once per mapping version and cached; evaluation then runs
//! against the compiled form with no store access.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::Mutex;
use tracing::warn;

use crate::models::mapping::{DelayConfig, EditingConfig, FilterConfig, Mapping, SyncConfig};
use crate::models::rule::{RegexRule, RuleKind};
use crate::persistence::db::Database;
use crate::persistence::rule_repo::RuleRepo;
use crate::Result;

/// One user rule, compiled and ready to apply.
#[derive(Debug)]
pub struct CompiledRule {
    /// Rule name, carried for logs and the test endpoint.
    pub name: String,
    /// What the rule does to matches.
    pub kind: RuleKind,
    /// Compiled pattern (case folding baked in).
    pub regex: Regex,
    /// Replacement template for substitution kinds.
    pub replacement: String,
}

/// The immutable compiled form of one mapping's policy.
///
/// Pure data: evaluating the same event against the same policy always
/// yields the same decision.
#[derive(Debug)]
pub struct CompiledPolicy {
    /// Mapping the policy was compiled from.
    pub mapping_id: String,
    /// Mapping version the compilation captured.
    pub version: i64,
    /// Filter gates.
    pub filters: FilterConfig,
    /// Editing toggles.
    pub editing: EditingConfig,
    /// Edit/delete sync settings.
    pub sync: SyncConfig,
    /// Delay/approval settings.
    pub delay: DelayConfig,
    /// User rules in application order: user-global first, then
    /// mapping-scoped, each by ascending order index.
    pub rules: Vec<CompiledRule>,
}

/// Compile a mapping's policy from its config blocks and rule list.
///
/// Rules whose pattern fails to compile are skipped and logged, per the
/// contract that a bad user pattern never takes the pipeline down.
#[must_use]
pub fn compile(mapping: &Mapping, rules: &[RegexRule]) -> CompiledPolicy {
    let compiled_rules = rules
        .iter()
        .filter(|rule| rule.active)
        .filter_map(|rule| {
            let pattern = if rule.case_sensitive {
                rule.pattern.clone()
            } else {
                format!("(?i){}", rule.pattern)
            };
            match Regex::new(&pattern) {
                Ok(regex) => Some(CompiledRule {
                    name: rule.name.clone(),
                    kind: rule.kind,
                    regex,
                    replacement: rule.replacement.clone().unwrap_or_default(),
                }),
                Err(err) => {
                    warn!(
                        rule = %rule.name,
                        pattern = %rule.pattern,
                        %err,
                        "rule pattern failed to compile, skipping"
                    );
                    None
                }
            }
        })
        .collect();

    CompiledPolicy {
        mapping_id: mapping.id.clone(),
        version: mapping.version,
        filters: mapping.filters.clone(),
        editing: mapping.editing.clone(),
        sync: mapping.sync.clone(),
        delay: mapping.delay.clone(),
        rules: compiled_rules,
    }
}

/// Cache of compiled policies keyed by mapping id, invalidated by the
/// mapping's version counter.
pub struct PolicyCache {
    rules: RuleRepo,
    cache: Mutex<HashMap<String, Arc<CompiledPolicy>>>,
}

impl PolicyCache {
    /// Build a cache over the store.
    #[must_use]
    pub fn new(db: &Arc<Database>) -> Self {
        Self {
            rules: RuleRepo::new(Arc::clone(db)),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The compiled policy for a mapping, recompiled when its version
    /// moved past the cached copy.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the rule load fails.
    pub async fn policy_for(&self, mapping: &Mapping) -> Result<Arc<CompiledPolicy>> {
        {
            let cache = self.cache.lock().await;
            if let Some(policy) = cache.get(&mapping.id) {
                if policy.version == mapping.version {
                    return Ok(Arc::clone(policy));
                }
            }
        }

        let rules = self
            .rules
            .list_for_evaluation(&mapping.user_id, &mapping.id)
            .await?;
        let policy = Arc::new(compile(mapping, &rules));

        let mut cache = self.cache.lock().await;
        cache.insert(mapping.id.clone(), Arc::clone(&policy));
        Ok(policy)
    }

    /// Drop a mapping's cached policy (mapping deleted).
    pub async fn invalidate(&self, mapping_id: &str) {
        let mut cache = self.cache.lock().await;
        cache.remove(mapping_id);
    }
}
