use serde::Deserialize;

use crate::registry::RulesetRef;

/// Request to load and register one ruleset version.
#[derive(Debug, Deserialize)]
pub struct LoadRulesetRequest {
    #[serde(default)]
    pub country: Option<String>,
    pub key: String,
    pub version: u64,
}

/// Request to load many rulesets (startup / warm-up path).
#[derive(Debug, Deserialize)]
pub struct BulkLoadRequest {
    #[serde(default)]
    pub rulesets: Vec<RulesetRef>,
}

/// Request to hot-swap a registered ruleset to a newer version.
#[derive(Debug, Deserialize)]
pub struct HotSwapRequest {
    #[serde(default)]
    pub country: Option<String>,
    pub key: String,
    pub version: u64,
}
