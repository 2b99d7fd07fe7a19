pub mod source;

pub use source::{
    FileRulesetSource, MemoryRulesetSource, RulesetRef, RulesetSource, SourceError,
};

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::ruleset::GLOBAL_COUNTRY;
use crate::domain::Ruleset;

pub(crate) fn default_country() -> String {
    GLOBAL_COUNTRY.to_string()
}

/// Normalize a country scope: uppercase ISO codes, the literal `"global"`
/// for the global scope (also used when no country is given).
fn normalize_country(country: Option<&str>) -> String {
    match country.map(str::trim) {
        None | Some("") => GLOBAL_COUNTRY.to_string(),
        Some(c) if c.eq_ignore_ascii_case(GLOBAL_COUNTRY) => GLOBAL_COUNTRY.to_string(),
        Some(c) => c.to_uppercase(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CellKey {
    country: String,
    ruleset_key: String,
}

/// Outcome status of a hot swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HotSwapStatus {
    Replaced,
    NotFound,
    Stale,
    LoadFailed,
}

impl fmt::Display for HotSwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotSwapStatus::Replaced => write!(f, "REPLACED"),
            HotSwapStatus::NotFound => write!(f, "NOT_FOUND"),
            HotSwapStatus::Stale => write!(f, "STALE"),
            HotSwapStatus::LoadFailed => write!(f, "LOAD_FAILED"),
        }
    }
}

/// Result of a hot-swap attempt.
#[derive(Debug, Clone, Serialize)]
pub struct HotSwapResult {
    pub success: bool,
    pub status: HotSwapStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_version: Option<u64>,
    pub message: String,
}

impl HotSwapResult {
    fn failure(status: HotSwapStatus, old_version: Option<u64>, message: String) -> Self {
        HotSwapResult {
            success: false,
            status,
            old_version,
            message,
        }
    }
}

/// Versioned in-memory ruleset store keyed by (country, ruleset key).
///
/// Readers snapshot the `Arc` held in a cell; writers publish a whole new
/// `Ruleset` value into the cell. A reader racing a hot swap sees either
/// the old or the new ruleset, never a mix. The registry is process-local;
/// replicas each load their own.
pub struct RulesetRegistry {
    cells: DashMap<CellKey, Arc<Ruleset>>,
    source: Arc<dyn RulesetSource>,
}

impl RulesetRegistry {
    pub fn new(source: Arc<dyn RulesetSource>) -> Self {
        RulesetRegistry {
            cells: DashMap::new(),
            source,
        }
    }

    /// Exact-match lookup.
    pub fn get(&self, country: &str, ruleset_key: &str) -> Option<Arc<Ruleset>> {
        let key = CellKey {
            country: normalize_country(Some(country)),
            ruleset_key: ruleset_key.to_string(),
        };
        self.cells.get(&key).map(|cell| cell.value().clone())
    }

    /// Country lookup with global fallback; an absent country consults
    /// only the global scope.
    pub fn get_with_fallback(
        &self,
        country: Option<&str>,
        ruleset_key: &str,
    ) -> Option<Arc<Ruleset>> {
        let normalized = normalize_country(country);
        if normalized != GLOBAL_COUNTRY {
            if let Some(ruleset) = self.get(&normalized, ruleset_key) {
                return Some(ruleset);
            }
        }
        self.get(GLOBAL_COUNTRY, ruleset_key)
    }

    /// Atomically replace a registered ruleset with a newer version.
    ///
    /// Version numbers must increase strictly; a swap to the current or an
    /// older version is rejected with STALE and leaves the registry
    /// untouched.
    pub async fn hot_swap(
        &self,
        country: Option<&str>,
        ruleset_key: &str,
        new_version: u64,
    ) -> HotSwapResult {
        let country = normalize_country(country);
        let cell_key = CellKey {
            country: country.clone(),
            ruleset_key: ruleset_key.to_string(),
        };

        let Some(current_version) = self.cells.get(&cell_key).map(|c| c.value().version) else {
            return HotSwapResult::failure(
                HotSwapStatus::NotFound,
                None,
                format!("no ruleset registered for {}/{}", country, ruleset_key),
            );
        };

        if new_version <= current_version {
            return HotSwapResult::failure(
                HotSwapStatus::Stale,
                Some(current_version),
                format!(
                    "version {} is not newer than current {}",
                    new_version, current_version
                ),
            );
        }

        let mut ruleset = match self.source.load(&country, ruleset_key, new_version).await {
            Ok(ruleset) => ruleset,
            Err(e) => {
                warn!(
                    country = %country,
                    ruleset_key = %ruleset_key,
                    version = new_version,
                    error = %e,
                    "hot swap load failed"
                );
                return HotSwapResult::failure(
                    HotSwapStatus::LoadFailed,
                    Some(current_version),
                    e.to_string(),
                );
            }
        };
        ruleset.prepare();

        // The entry guard serializes writers on this cell; re-check the
        // version in case another swap landed while we were loading.
        match self.cells.entry(cell_key) {
            Entry::Occupied(mut cell) => {
                let old_version = cell.get().version;
                if new_version <= old_version {
                    return HotSwapResult::failure(
                        HotSwapStatus::Stale,
                        Some(old_version),
                        format!(
                            "version {} is not newer than current {}",
                            new_version, old_version
                        ),
                    );
                }
                cell.insert(Arc::new(ruleset));
                info!(
                    country = %country,
                    ruleset_key = %ruleset_key,
                    old_version,
                    new_version,
                    "ruleset hot-swapped"
                );
                HotSwapResult {
                    success: true,
                    status: HotSwapStatus::Replaced,
                    old_version: Some(old_version),
                    message: format!("replaced v{} with v{}", old_version, new_version),
                }
            }
            // The registry never deletes cells, so this cannot happen in
            // practice; answer NOT_FOUND rather than silently installing.
            Entry::Vacant(_) => HotSwapResult::failure(
                HotSwapStatus::NotFound,
                None,
                format!("no ruleset registered for {}/{}", country, ruleset_key),
            ),
        }
    }

    /// Load a ruleset and install it without a monotonicity check
    /// (first registration / startup path).
    pub async fn load_and_register(
        &self,
        country: Option<&str>,
        ruleset_key: &str,
        version: u64,
    ) -> Result<(), SourceError> {
        let country = normalize_country(country);
        let mut ruleset = self.source.load(&country, ruleset_key, version).await?;
        ruleset.prepare();

        let cell_key = CellKey {
            country: country.clone(),
            ruleset_key: ruleset_key.to_string(),
        };
        self.cells.insert(cell_key, Arc::new(ruleset));
        info!(
            country = %country,
            ruleset_key = %ruleset_key,
            version,
            "ruleset registered"
        );
        Ok(())
    }

    /// Load every referenced ruleset; returns how many installed.
    /// Idempotent: re-running with the same refs re-installs the same
    /// versions.
    pub async fn bulk_load(&self, refs: &[RulesetRef]) -> usize {
        let mut loaded = 0;
        for r in refs {
            match self
                .load_and_register(Some(&r.country), &r.key, r.version)
                .await
            {
                Ok(()) => loaded += 1,
                Err(e) => warn!(
                    country = %r.country,
                    ruleset_key = %r.key,
                    version = r.version,
                    error = %e,
                    "bulk load entry failed"
                ),
            }
        }
        loaded
    }

    pub fn size(&self) -> usize {
        self.cells.len()
    }

    pub fn countries(&self) -> HashSet<String> {
        self.cells
            .iter()
            .map(|cell| cell.key().country.clone())
            .collect()
    }

    pub fn ruleset_keys(&self, country: &str) -> HashSet<String> {
        let country = normalize_country(Some(country));
        self.cells
            .iter()
            .filter(|cell| cell.key().country == country)
            .map(|cell| cell.key().ruleset_key.clone())
            .collect()
    }

    /// Whether the backing ruleset storage is reachable.
    pub async fn source_available(&self) -> bool {
        self.source.available().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Condition, DecisionAction, EvaluationType, Operator, Rule};
    use serde_json::json;

    fn ruleset(country: &str, key: &str, version: u64, action: DecisionAction) -> Ruleset {
        Ruleset {
            key: key.to_string(),
            version,
            country: country.to_string(),
            evaluation_type: EvaluationType::Auth,
            rules: vec![Rule {
                id: format!("r-{}", version),
                name: String::new(),
                priority: 100,
                enabled: true,
                action,
                conditions: vec![Condition::new("amount", Operator::Gt, json!(100))],
                velocity: None,
                predicate: None,
            }],
        }
    }

    fn registry_with(rulesets: Vec<Ruleset>) -> RulesetRegistry {
        let source = MemoryRulesetSource::new();
        for r in rulesets {
            source.insert(r);
        }
        RulesetRegistry::new(Arc::new(source))
    }

    #[tokio::test]
    async fn test_bulk_load_then_get() {
        let registry = registry_with(vec![
            ruleset("global", "CARD_AUTH", 1, DecisionAction::Decline),
            ruleset("de", "CARD_AUTH", 1, DecisionAction::Decline),
        ]);

        let loaded = registry
            .bulk_load(&[
                RulesetRef {
                    country: "global".to_string(),
                    key: "CARD_AUTH".to_string(),
                    version: 1,
                },
                RulesetRef {
                    country: "de".to_string(),
                    key: "CARD_AUTH".to_string(),
                    version: 1,
                },
            ])
            .await;

        assert_eq!(loaded, 2);
        assert_eq!(registry.size(), 2);
        assert!(registry.get("DE", "CARD_AUTH").is_some());
        assert!(registry.get("global", "CARD_AUTH").is_some());
        assert!(registry.get("FR", "CARD_AUTH").is_none());
    }

    #[tokio::test]
    async fn test_country_normalization() {
        let registry = registry_with(vec![ruleset("de", "CARD_AUTH", 1, DecisionAction::Decline)]);
        registry
            .load_and_register(Some("de"), "CARD_AUTH", 1)
            .await
            .unwrap();

        assert!(registry.get("de", "CARD_AUTH").is_some());
        assert!(registry.get("De", "CARD_AUTH").is_some());
        assert_eq!(registry.ruleset_keys("DE").len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_to_global() {
        let registry = registry_with(vec![
            ruleset("global", "CARD_AUTH", 1, DecisionAction::Decline),
            ruleset("de", "CARD_AUTH", 2, DecisionAction::Decline),
        ]);
        registry
            .load_and_register(Some("global"), "CARD_AUTH", 1)
            .await
            .unwrap();
        registry
            .load_and_register(Some("de"), "CARD_AUTH", 2)
            .await
            .unwrap();

        // Exact country hit wins.
        assert_eq!(
            registry.get_with_fallback(Some("DE"), "CARD_AUTH").unwrap().version,
            2
        );
        // Unknown country falls back to global.
        assert_eq!(
            registry.get_with_fallback(Some("FR"), "CARD_AUTH").unwrap().version,
            1
        );
        // Absent country consults only global.
        assert_eq!(
            registry.get_with_fallback(None, "CARD_AUTH").unwrap().version,
            1
        );
        assert!(registry.get_with_fallback(Some("FR"), "OTHER").is_none());
    }

    #[tokio::test]
    async fn test_hot_swap_replaces() {
        let registry = registry_with(vec![
            ruleset("global", "CARD_AUTH", 1, DecisionAction::Decline),
            ruleset("global", "CARD_AUTH", 2, DecisionAction::Approve),
        ]);
        registry
            .load_and_register(None, "CARD_AUTH", 1)
            .await
            .unwrap();

        let result = registry.hot_swap(None, "CARD_AUTH", 2).await;

        assert!(result.success);
        assert_eq!(result.status, HotSwapStatus::Replaced);
        assert_eq!(result.old_version, Some(1));
        assert_eq!(registry.get("global", "CARD_AUTH").unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_hot_swap_stale_is_rejected_and_idempotent() {
        let registry = registry_with(vec![
            ruleset("global", "CARD_AUTH", 1, DecisionAction::Decline),
            ruleset("global", "CARD_AUTH", 2, DecisionAction::Approve),
        ]);
        registry
            .load_and_register(None, "CARD_AUTH", 1)
            .await
            .unwrap();

        assert!(registry.hot_swap(None, "CARD_AUTH", 2).await.success);

        // Same version again: STALE, state unchanged.
        let repeat = registry.hot_swap(None, "CARD_AUTH", 2).await;
        assert!(!repeat.success);
        assert_eq!(repeat.status, HotSwapStatus::Stale);
        assert_eq!(repeat.old_version, Some(2));

        // Downgrade: also STALE.
        let downgrade = registry.hot_swap(None, "CARD_AUTH", 1).await;
        assert_eq!(downgrade.status, HotSwapStatus::Stale);
        assert_eq!(registry.get("global", "CARD_AUTH").unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_hot_swap_not_found_and_load_failed() {
        let registry = registry_with(vec![ruleset(
            "global",
            "CARD_AUTH",
            1,
            DecisionAction::Decline,
        )]);

        let missing = registry.hot_swap(None, "CARD_AUTH", 2).await;
        assert_eq!(missing.status, HotSwapStatus::NotFound);

        registry
            .load_and_register(None, "CARD_AUTH", 1)
            .await
            .unwrap();

        // v3 exists nowhere in the source.
        let failed = registry.hot_swap(None, "CARD_AUTH", 3).await;
        assert_eq!(failed.status, HotSwapStatus::LoadFailed);
        assert_eq!(failed.old_version, Some(1));
        assert_eq!(registry.get("global", "CARD_AUTH").unwrap().version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_hot_swap_atomic_under_concurrent_readers() {
        let registry = Arc::new(registry_with(vec![
            ruleset("global", "CARD_AUTH", 1, DecisionAction::Decline),
            ruleset("global", "CARD_AUTH", 2, DecisionAction::Approve),
        ]));
        registry
            .load_and_register(None, "CARD_AUTH", 1)
            .await
            .unwrap();

        let mut readers = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..2_500 {
                    let ruleset = registry.get("global", "CARD_AUTH").unwrap();
                    // Every observed snapshot is internally consistent:
                    // the rule set matches its own version, never a mix.
                    match ruleset.version {
                        1 => {
                            assert_eq!(ruleset.rules[0].id, "r-1");
                            assert_eq!(ruleset.rules[0].action, DecisionAction::Decline);
                        }
                        2 => {
                            assert_eq!(ruleset.rules[0].id, "r-2");
                            assert_eq!(ruleset.rules[0].action, DecisionAction::Approve);
                        }
                        other => panic!("unexpected version {}", other),
                    }
                }
            }));
        }

        let swap = registry.hot_swap(None, "CARD_AUTH", 2).await;
        assert!(swap.success);

        for reader in readers {
            reader.await.unwrap();
        }
    }
}
