use serde::Serialize;

use crate::domain::{Decision, DecisionAction, EngineErrorCode, EngineMode};
use crate::registry::{HotSwapResult, HotSwapStatus};

/// Compact AUTH response: the few fields the authorization caller needs,
/// kept small for the hot path. Observers read decision quality from
/// `engine_mode` / `engine_error_code` in-band.
#[derive(Debug, Serialize)]
pub struct SlimAuthResponse {
    pub decision: DecisionAction,

    pub engine_mode: EngineMode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_error_code: Option<EngineErrorCode>,

    pub ruleset_key: String,

    pub ruleset_version: u64,

    pub decision_id: String,

    pub processing_time_ms: f64,
}

impl SlimAuthResponse {
    pub fn from_decision(decision: &Decision) -> Self {
        SlimAuthResponse {
            decision: decision.decision,
            engine_mode: decision.engine_mode,
            engine_error_code: decision.engine_error_code,
            ruleset_key: decision.ruleset_key.clone(),
            ruleset_version: decision.ruleset_version,
            decision_id: decision.decision_id.clone(),
            processing_time_ms: decision.processing_time_ms,
        }
    }
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.into(),
            code: code.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        ErrorResponse::new(message, "INVALID_REQUEST")
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub storage_accessible: bool,
    pub uptime_secs: u64,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub rulesets_loaded: usize,
}

/// Registry status for the management API.
#[derive(Debug, Serialize)]
pub struct RegistryStatusResponse {
    pub total_rulesets: usize,
    pub countries: usize,
    pub storage_accessible: bool,
}

/// Ruleset keys registered for one country.
#[derive(Debug, Serialize)]
pub struct CountryRulesetsResponse {
    pub country: String,
    pub keys: Vec<String>,
}

/// Hot-swap outcome.
#[derive(Debug, Serialize)]
pub struct HotSwapResponse {
    pub success: bool,
    pub status: HotSwapStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_version: Option<u64>,
    pub new_version: u64,
}

impl HotSwapResponse {
    pub fn from_result(result: &HotSwapResult, new_version: u64) -> Self {
        HotSwapResponse {
            success: result.success,
            status: result.status,
            message: result.message.clone(),
            old_version: result.old_version,
            new_version,
        }
    }
}

/// Load outcome.
#[derive(Debug, Serialize)]
pub struct LoadRulesetResponse {
    pub success: bool,
    pub key: String,
    pub version: u64,
    pub country: String,
}

/// Bulk-load outcome.
#[derive(Debug, Serialize)]
pub struct BulkLoadResponse {
    pub loaded: usize,
    pub requested: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slim_auth_response_shape() {
        let mut decision = Decision::new(Some("tx-1".to_string()), "AUTH");
        decision.decision = DecisionAction::Decline;
        decision.ruleset_key = "CARD_AUTH".to_string();
        decision.ruleset_version = 3;
        decision.processing_time_ms = 1.25;

        let slim = SlimAuthResponse::from_decision(&decision);
        let json = serde_json::to_string(&slim).unwrap();

        assert!(json.contains("\"decision\":\"DECLINE\""));
        assert!(json.contains("\"ruleset_version\":3"));
        // No error code on a clean decision
        assert!(!json.contains("engine_error_code"));
        // The slim shape never carries matched rules
        assert!(!json.contains("matched_rules"));
    }

    #[test]
    fn test_slim_auth_response_carries_error_code() {
        let mut decision = Decision::new(None, "AUTH");
        decision.record_fault(
            EngineMode::FailOpen,
            EngineErrorCode::RulesetNotLoaded,
            "missing",
        );

        let json = serde_json::to_string(&SlimAuthResponse::from_decision(&decision)).unwrap();
        assert!(json.contains("\"engine_mode\":\"FAIL_OPEN\""));
        assert!(json.contains("\"engine_error_code\":\"RULESET_NOT_LOADED\""));
    }
}
