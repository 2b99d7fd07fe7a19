use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transaction envelope submitted for evaluation.
///
/// Known fields are typed; anything else lands in `extra` untouched.
/// Unknown fields never cause a failure — conditions looking them up get
/// an absent/mismatch result from the extractor instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,

    pub occurred_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_category_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<String>,

    /// Upstream decision, MONITORING input only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,

    /// Untyped passthrough for fields the engine does not model
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A typed value extracted from a transaction field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(Decimal),
    Bool(bool),
}

impl FieldValue {
    /// Widen to decimal for numeric comparison.
    ///
    /// Text that parses as a decimal is coerced; everything else is a
    /// type mismatch at the operator layer.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Number(d) => Some(*d),
            FieldValue::Text(s) => Decimal::from_str(s.trim()).ok(),
            FieldValue::Bool(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Number(d) => write!(f, "{}", d),
            FieldValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Three-valued extraction result.
///
/// "Absent" and "false" are distinct at this layer; operator dispatch
/// decides what absence means (false for everything except `exists`).
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Present(FieldValue),
    Absent,
    /// Field is present but holds a value conditions cannot compare
    /// (array, object)
    Mismatch,
}

impl Extracted {
    #[inline]
    pub fn is_present(&self) -> bool {
        !matches!(self, Extracted::Absent)
    }
}

fn from_json(value: &Value) -> Extracted {
    match value {
        Value::Null => Extracted::Absent,
        Value::String(s) => Extracted::Present(FieldValue::Text(s.clone())),
        Value::Bool(b) => Extracted::Present(FieldValue::Bool(*b)),
        Value::Number(n) => match Decimal::from_str(&n.to_string()) {
            Ok(d) => Extracted::Present(FieldValue::Number(d)),
            Err(_) => Extracted::Mismatch,
        },
        Value::Array(_) | Value::Object(_) => Extracted::Mismatch,
    }
}

fn opt_text(value: &Option<String>) -> Extracted {
    match value {
        Some(s) => Extracted::Present(FieldValue::Text(s.clone())),
        None => Extracted::Absent,
    }
}

impl Transaction {
    /// Create a minimal transaction for the given id, timestamped now.
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Transaction {
            transaction_id: transaction_id.into(),
            occurred_at: Utc::now(),
            amount: None,
            currency: None,
            country_code: None,
            merchant_id: None,
            merchant_name: None,
            merchant_category_code: None,
            card_hash: None,
            device_id: None,
            transaction_type: None,
            decision: None,
            extra: HashMap::new(),
        }
    }

    /// Extract a field by name for condition evaluation.
    pub fn extract(&self, field: &str) -> Extracted {
        match field {
            "transaction_id" => Extracted::Present(FieldValue::Text(self.transaction_id.clone())),
            "occurred_at" => Extracted::Present(FieldValue::Text(self.occurred_at.to_rfc3339())),
            "amount" => match self.amount {
                Some(d) => Extracted::Present(FieldValue::Number(d)),
                None => Extracted::Absent,
            },
            "currency" => opt_text(&self.currency),
            "country_code" => opt_text(&self.country_code),
            "merchant_id" => opt_text(&self.merchant_id),
            "merchant_name" => opt_text(&self.merchant_name),
            "merchant_category_code" => opt_text(&self.merchant_category_code),
            "card_hash" => opt_text(&self.card_hash),
            "device_id" => opt_text(&self.device_id),
            "transaction_type" => opt_text(&self.transaction_type),
            "decision" => opt_text(&self.decision),
            other => match self.extra.get(other) {
                Some(v) => from_json(v),
                None => Extracted::Absent,
            },
        }
    }

    /// Dimension value for velocity keying; only text-like fields count.
    pub fn dimension_value(&self, dimension: &str) -> Option<String> {
        match self.extract(dimension) {
            Extracted::Present(v) => Some(v.to_string()),
            _ => None,
        }
    }
}
