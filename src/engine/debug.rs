use crate::domain::decision::{ConditionEvaluation, DebugInfo};
use crate::domain::transaction::Extracted;
use crate::domain::Condition;

/// Debug capture settings.
///
/// Sampling is "1 in N" by a stable hash of the transaction id, so the
/// same transaction samples in (or out) on every replica.
#[derive(Debug, Clone)]
pub struct DebugConfig {
    pub enabled: bool,
    pub sample_rate: u32,
    pub max_condition_evaluations: usize,
    pub include_field_values: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        DebugConfig {
            enabled: false,
            sample_rate: 100,
            max_condition_evaluations: 200,
            include_field_values: false,
        }
    }
}

impl DebugConfig {
    /// Whether this transaction should carry debug capture.
    pub fn sampled_in(&self, transaction_id: &str) -> bool {
        self.enabled
            && self.sample_rate > 0
            && crc32fast::hash(transaction_id.as_bytes()) % self.sample_rate == 0
    }

    /// Build a capture for a sampled-in transaction; None when disabled
    /// or sampled out, which keeps the hot path free of any capture cost.
    pub fn builder_for(&self, transaction_id: &str) -> Option<DebugBuilder> {
        if self.sampled_in(transaction_id) {
            Some(DebugBuilder::new(
                self.max_condition_evaluations,
                self.include_field_values,
            ))
        } else {
            None
        }
    }
}

/// Accumulates per-condition evaluations for one request.
#[derive(Debug)]
pub struct DebugBuilder {
    info: DebugInfo,
    cap: usize,
    include_field_values: bool,
}

impl DebugBuilder {
    pub fn new(cap: usize, include_field_values: bool) -> Self {
        DebugBuilder {
            info: DebugInfo::default(),
            cap,
            include_field_values,
        }
    }

    /// Record one condition evaluation; truncates silently past the cap.
    pub fn record_condition(
        &mut self,
        rule_id: &str,
        condition: &Condition,
        input: &Extracted,
        result: bool,
    ) {
        if self.info.condition_evaluations.len() >= self.cap {
            self.info.truncated = true;
            return;
        }
        self.info.condition_evaluations.push(ConditionEvaluation {
            rule_id: rule_id.to_string(),
            field: condition.field.clone(),
            operator: condition.operator.to_string(),
            input: render(input),
            result,
        });
        if self.include_field_values {
            self.info
                .field_values
                .entry(condition.field.clone())
                .or_insert_with(|| render(input));
        }
    }

    pub fn build(self) -> DebugInfo {
        self.info
    }
}

fn render(input: &Extracted) -> String {
    match input {
        Extracted::Present(v) => v.to_string(),
        Extracted::Absent => "<absent>".to_string(),
        Extracted::Mismatch => "<uncomparable>".to_string(),
    }
}
