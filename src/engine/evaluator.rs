use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::warn;

use crate::domain::{
    Decision, DecisionAction, EngineErrorCode, EngineMode, EvaluationType, Rule, Ruleset,
    Transaction, VelocityConfig, VelocityResult,
};
use crate::observability::EngineMetrics;
use crate::velocity::{VelocityError, VelocityService};

use super::context::EvaluationContext;
use super::debug::DebugConfig;
use super::operators::{self, OperatorError};
use super::{auth, monitoring};

/// Fault raised while evaluating rules.
///
/// Velocity store unavailability is NOT a fault: it is handled inline as
/// a degradation and evaluation continues.
#[derive(Error, Debug)]
pub enum EngineFault {
    #[error("rule {rule_id}: {source}")]
    Condition {
        rule_id: String,
        #[source]
        source: OperatorError,
    },
}

/// Data-driven rule interpreter over a compiled ruleset.
///
/// Dispatches on the ruleset's evaluation type: AUTH is first-match and
/// fail-open; MONITORING is all-match over a decision already taken
/// upstream. Both variants share condition matching and velocity checks.
pub struct RuleEvaluator {
    velocity: Arc<VelocityService>,
    metrics: Arc<EngineMetrics>,
    debug: DebugConfig,
}

impl RuleEvaluator {
    pub fn new(
        velocity: Arc<VelocityService>,
        metrics: Arc<EngineMetrics>,
        debug: DebugConfig,
    ) -> Self {
        RuleEvaluator {
            velocity,
            metrics,
            debug,
        }
    }

    /// Evaluate a transaction against a ruleset.
    ///
    /// Never errors: engine faults are recorded on the decision per the
    /// fail-open (AUTH) / degraded (MONITORING) policy.
    pub async fn evaluate(
        &self,
        transaction: &Transaction,
        ruleset: &Ruleset,
        replay_mode: bool,
    ) -> Decision {
        let debug = self.debug.builder_for(&transaction.transaction_id);
        let mut ctx = EvaluationContext::new(transaction, ruleset, replay_mode, debug);

        let outcome = match ruleset.evaluation_type {
            EvaluationType::Auth => auth::evaluate(self, &mut ctx).await,
            EvaluationType::Monitoring => monitoring::evaluate(self, &mut ctx).await,
        };

        if let Err(fault) = outcome {
            warn!(
                transaction_id = %transaction.transaction_id,
                ruleset_key = %ruleset.key,
                error = %fault,
                "rule evaluation fault"
            );
            match ruleset.evaluation_type {
                EvaluationType::Auth => {
                    ctx.decision.record_fault(
                        EngineMode::FailOpen,
                        EngineErrorCode::EvaluationError,
                        fault.to_string(),
                    );
                }
                EvaluationType::Monitoring => {
                    // Input decision (if it parsed) is already on the
                    // accumulator; DEGRADED preserves it.
                    ctx.decision.record_fault(
                        EngineMode::Degraded,
                        EngineErrorCode::EvaluationError,
                        fault.to_string(),
                    );
                }
            }
        }

        let decision = ctx.finish();
        self.metrics.record_decision(&decision);
        decision
    }

    /// Evaluate one rule's match predicate.
    ///
    /// Uses the precompiled predicate on the hot path; falls back to
    /// interpreting conditions when debug capture wants per-condition
    /// tuples (or when compilation was refused).
    pub(super) fn rule_matches(
        rule: &Rule,
        ctx: &mut EvaluationContext<'_>,
    ) -> Result<bool, EngineFault> {
        if ctx.debug.is_none() {
            if let Some(predicate) = &rule.predicate {
                return Ok(predicate.matches(ctx.transaction));
            }
        }

        for condition in &rule.conditions {
            let input = ctx.transaction.extract(&condition.field);
            let result =
                operators::apply(condition, &input).map_err(|source| EngineFault::Condition {
                    rule_id: rule.id.clone(),
                    source,
                })?;

            if let Some(debug) = ctx.debug.as_mut() {
                debug.record_condition(&rule.id, condition, &input, result);
            }

            if !result {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run a matched rule's velocity check, honoring replay mode.
    ///
    /// On store unavailability the decision degrades in place and the
    /// check reports "not exceeded" so the rule's own action stands.
    pub(super) async fn check_velocity(
        &self,
        ctx: &mut EvaluationContext<'_>,
        rule: &Rule,
        config: &VelocityConfig,
    ) -> Option<VelocityResult> {
        let started = Instant::now();
        let outcome = if ctx.replay_mode {
            self.velocity
                .check_read_only(&ctx.ruleset.key, &rule.id, config, ctx.transaction)
                .await
        } else {
            self.velocity
                .check(&ctx.ruleset.key, &rule.id, config, ctx.transaction)
                .await
        };
        ctx.velocity_time += started.elapsed();
        ctx.velocity_count += 1;
        self.metrics.increment_velocity_checks();

        match outcome {
            Ok(result) => result,
            Err(VelocityError::Unavailable(message)) => {
                warn!(
                    transaction_id = %ctx.transaction.transaction_id,
                    rule_id = %rule.id,
                    error = %message,
                    "velocity store unavailable, continuing without velocity"
                );
                self.metrics.increment_velocity_unavailable();
                ctx.decision.record_fault(
                    EngineMode::Degraded,
                    EngineErrorCode::RedisUnavailable,
                    message,
                );
                None
            }
        }
    }
}

/// Synthesize the decision returned when no ruleset could be found for a
/// lookup (registry miss after fallback). AUTH fails open; MONITORING
/// degrades but preserves the caller's decision when it parses.
pub fn ruleset_not_loaded_decision(
    transaction: Option<&Transaction>,
    evaluation_type: EvaluationType,
    ruleset_key: &str,
) -> Decision {
    let mut decision = Decision::new(
        transaction.map(|t| t.transaction_id.clone()),
        evaluation_type.as_str(),
    );
    decision.ruleset_key = ruleset_key.to_string();

    match evaluation_type {
        EvaluationType::Auth => {
            decision.record_fault(
                EngineMode::FailOpen,
                EngineErrorCode::RulesetNotLoaded,
                format!("ruleset not loaded in registry: {}", ruleset_key),
            );
        }
        EvaluationType::Monitoring => {
            decision.decision = transaction
                .and_then(|t| t.decision.as_deref())
                .and_then(DecisionAction::parse)
                .unwrap_or(DecisionAction::Approve);
            decision.record_fault(
                EngineMode::Degraded,
                EngineErrorCode::RulesetNotLoaded,
                format!("ruleset not loaded in registry: {}", ruleset_key),
            );
        }
    }
    decision
}
