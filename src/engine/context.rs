use std::time::{Duration, Instant};

use crate::domain::{Decision, Ruleset, Transaction};

use super::debug::DebugBuilder;

/// Mutable state threaded through one evaluation.
pub struct EvaluationContext<'a> {
    pub transaction: &'a Transaction,

    pub ruleset: &'a Ruleset,

    /// Decision under construction
    pub decision: Decision,

    /// Replay runs read velocity counters without incrementing them
    pub replay_mode: bool,

    pub started: Instant,

    pub debug: Option<DebugBuilder>,

    pub(super) velocity_time: Duration,
    pub(super) velocity_count: usize,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        transaction: &'a Transaction,
        ruleset: &'a Ruleset,
        replay_mode: bool,
        debug: Option<DebugBuilder>,
    ) -> Self {
        let mut decision = Decision::new(
            Some(transaction.transaction_id.clone()),
            ruleset.evaluation_type.as_str(),
        );
        decision.ruleset_key = ruleset.key.clone();
        decision.ruleset_version = ruleset.version;

        EvaluationContext {
            transaction,
            ruleset,
            decision,
            replay_mode,
            started: Instant::now(),
            debug,
            velocity_time: Duration::ZERO,
            velocity_count: 0,
        }
    }

    /// Close out timing and debug capture, yielding the final decision.
    pub fn finish(mut self) -> Decision {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.decision.processing_time_ms = elapsed_ms;
        self.decision.timing_breakdown.total_processing_time_ms = elapsed_ms;

        if self.velocity_count > 0 {
            self.decision.timing_breakdown.velocity_check_count = Some(self.velocity_count);
            self.decision.timing_breakdown.velocity_check_time_ms =
                Some(self.velocity_time.as_secs_f64() * 1000.0);
            self.decision.timing_breakdown.rule_evaluation_time_ms =
                Some(elapsed_ms - self.velocity_time.as_secs_f64() * 1000.0);
        } else {
            self.decision.timing_breakdown.rule_evaluation_time_ms = Some(elapsed_ms);
        }

        if let Some(builder) = self.debug.take() {
            self.decision.debug_info = Some(builder.build());
        }

        self.decision
    }
}
