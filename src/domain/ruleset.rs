use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::decision::DecisionAction;
use super::transaction::Transaction;

/// Condition operator algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Between,
    Contains,
    StartsWith,
    EndsWith,
    Exists,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Between => "between",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::Exists => "exists",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single predicate over one transaction field.
///
/// Scalar operators carry `value`; `in`/`not_in`/`between` carry `values`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,

    pub operator: Operator,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Condition {
            field: field.into(),
            operator,
            value: Some(value),
            values: None,
        }
    }

    pub fn with_values(field: impl Into<String>, operator: Operator, values: Vec<Value>) -> Self {
        Condition {
            field: field.into(),
            operator,
            value: None,
            values: Some(values),
        }
    }
}

/// Rolling-window counter configuration attached to a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityConfig {
    /// Field whose occurrences are counted (e.g. `card_hash`)
    pub dimension: String,

    pub window_seconds: u64,

    pub threshold: u64,

    /// Decision taken when the counter exceeds the threshold
    pub action: DecisionAction,
}

/// Precompiled rule predicate, built when a ruleset is installed.
///
/// The hot path calls this instead of interpreting conditions; the
/// interpreted path remains for per-condition debug capture.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&Transaction) -> bool + Send + Sync>);

impl Predicate {
    pub fn new(f: impl Fn(&Transaction) -> bool + Send + Sync + 'static) -> Self {
        Predicate(Arc::new(f))
    }

    #[inline]
    pub fn matches(&self, transaction: &Transaction) -> bool {
        (self.0)(transaction)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// A single rule in a compiled ruleset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub action: DecisionAction,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<VelocityConfig>,

    #[serde(skip)]
    pub predicate: Option<Predicate>,
}

fn default_enabled() -> bool {
    true
}

/// Evaluation mode a ruleset is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationType {
    Auth,
    Monitoring,
}

impl EvaluationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationType::Auth => "AUTH",
            EvaluationType::Monitoring => "MONITORING",
        }
    }
}

impl fmt::Display for EvaluationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Country scope sentinel for rulesets not bound to a single country.
pub const GLOBAL_COUNTRY: &str = "global";

fn default_country() -> String {
    GLOBAL_COUNTRY.to_string()
}

/// A versioned, compiled ruleset.
///
/// Immutable once registered; new versions replace the whole value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub key: String,

    pub version: u64,

    #[serde(default = "default_country")]
    pub country: String,

    pub evaluation_type: EvaluationType,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Ruleset {
    /// Finalize a loaded ruleset for evaluation: order rules by descending
    /// priority (stable, so declared order breaks ties) and compile each
    /// rule's predicate.
    pub fn prepare(&mut self) {
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        for rule in &mut self.rules {
            rule.predicate = crate::engine::operators::compile(&rule.conditions);
        }
    }
}
