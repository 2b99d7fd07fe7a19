use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authorization decision outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    /// Transaction approved
    Approve,
    /// Transaction declined
    Decline,
    /// Requires manual review
    Review,
}

impl DecisionAction {
    /// Parse from string representation (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "APPROVE" => Some(DecisionAction::Approve),
            "DECLINE" => Some(DecisionAction::Decline),
            "REVIEW" => Some(DecisionAction::Review),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Approve => "APPROVE",
            DecisionAction::Decline => "DECLINE",
            DecisionAction::Review => "REVIEW",
        }
    }
}

impl Default for DecisionAction {
    fn default() -> Self {
        DecisionAction::Approve
    }
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Quality tag on a decision.
///
/// NORMAL means the engine completed evaluation with full fidelity.
/// DEGRADED means evaluation completed but with reduced fidelity (e.g. the
/// velocity store was unreachable). FAIL_OPEN means the engine could not
/// evaluate and approved so payments are not blocked by engine faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineMode {
    Normal,
    Degraded,
    FailOpen,
}

impl Default for EngineMode {
    fn default() -> Self {
        EngineMode::Normal
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMode::Normal => write!(f, "NORMAL"),
            EngineMode::Degraded => write!(f, "DEGRADED"),
            EngineMode::FailOpen => write!(f, "FAIL_OPEN"),
        }
    }
}

/// Machine-readable engine fault code carried on a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineErrorCode {
    RulesetNotLoaded,
    EvaluationError,
    RedisUnavailable,
    MissingDecision,
    InvalidDecision,
    EventPublishFailed,
    OutboxUnavailable,
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineErrorCode::RulesetNotLoaded => "RULESET_NOT_LOADED",
            EngineErrorCode::EvaluationError => "EVALUATION_ERROR",
            EngineErrorCode::RedisUnavailable => "REDIS_UNAVAILABLE",
            EngineErrorCode::MissingDecision => "MISSING_DECISION",
            EngineErrorCode::InvalidDecision => "INVALID_DECISION",
            EngineErrorCode::EventPublishFailed => "EVENT_PUBLISH_FAILED",
            EngineErrorCode::OutboxUnavailable => "OUTBOX_UNAVAILABLE",
        };
        write!(f, "{}", s)
    }
}

/// A rule that matched during evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedRule {
    pub rule_id: String,

    pub rule_name: String,

    /// The action this match contributed (velocity override included)
    pub action: DecisionAction,

    pub priority: i32,

    /// True when the action came from a velocity threshold exceedance
    /// rather than the rule's own action
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub velocity_exceeded: bool,
}

/// Result of a velocity counter check for one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityResult {
    /// Dimension counted (e.g. `card_hash`)
    pub dimension: String,

    /// crc32 fingerprint of the dimension value; raw values never leave
    /// the engine
    pub key_fingerprint: String,

    pub current_count: u64,

    pub threshold: u64,

    pub window_seconds: u64,

    /// Fixed window bucket the count landed in (`floor(now / window)`),
    /// exposed for audit
    pub window_bucket: u64,
}

impl VelocityResult {
    /// True when the counter passed the configured threshold.
    #[inline]
    pub fn exceeded(&self) -> bool {
        self.current_count > self.threshold
    }
}

/// Component-level timing for latency analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingBreakdown {
    pub total_processing_time_ms: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ruleset_lookup_time_ms: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_evaluation_time_ms: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_check_time_ms: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_check_count: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbox_enqueue_time_ms: Option<f64>,
}

/// A single condition evaluation captured for debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionEvaluation {
    pub rule_id: String,
    pub field: String,
    pub operator: String,

    /// Extracted input value as text; "<absent>" when the field was missing
    pub input: String,

    pub result: bool,
}

/// Debug capture attached to a sampled decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugInfo {
    pub condition_evaluations: Vec<ConditionEvaluation>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_values: HashMap<String, String>,

    /// True when the per-request cap truncated the capture
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Decision envelope returned by the evaluator and published downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision: DecisionAction,

    pub evaluation_type: String,

    pub ruleset_key: String,

    pub ruleset_version: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    /// Fresh opaque id; downstream consumers dedupe on it
    pub decision_id: String,

    pub engine_mode: EngineMode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_error_code: Option<EngineErrorCode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_rules: Vec<MatchedRule>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub velocity_results: HashMap<String, VelocityResult>,

    #[serde(default)]
    pub timing_breakdown: TimingBreakdown,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<DebugInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_context: Option<super::transaction::Transaction>,

    pub processing_time_ms: f64,
}

impl Decision {
    /// Create an empty decision shell for the given transaction and mode.
    pub fn new(transaction_id: Option<String>, evaluation_type: impl Into<String>) -> Self {
        Decision {
            decision: DecisionAction::Approve,
            evaluation_type: evaluation_type.into(),
            ruleset_key: String::new(),
            ruleset_version: 0,
            transaction_id,
            decision_id: Uuid::new_v4().to_string(),
            engine_mode: EngineMode::Normal,
            engine_error_code: None,
            engine_error_message: None,
            matched_rules: Vec::new(),
            velocity_results: HashMap::new(),
            timing_breakdown: TimingBreakdown::default(),
            debug_info: None,
            transaction_context: None,
            processing_time_ms: 0.0,
        }
    }

    /// Record an engine fault on this decision.
    ///
    /// FAIL_OPEN always forces APPROVE; DEGRADED leaves the decision as-is.
    pub fn record_fault(
        &mut self,
        mode: EngineMode,
        code: EngineErrorCode,
        message: impl Into<String>,
    ) {
        self.engine_mode = mode;
        self.engine_error_code = Some(code);
        self.engine_error_message = Some(message.into());
        if mode == EngineMode::FailOpen {
            self.decision = DecisionAction::Approve;
        }
    }
}
