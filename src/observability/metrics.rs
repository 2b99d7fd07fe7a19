use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::domain::{Decision, DecisionAction, EngineMode};

/// Metrics registry for the engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Total decisions produced
    pub decisions_total: AtomicU64,

    /// Decisions by outcome
    pub decisions_approve: AtomicU64,
    pub decisions_decline: AtomicU64,
    pub decisions_review: AtomicU64,

    /// Decisions by engine mode
    pub mode_normal: AtomicU64,
    pub mode_degraded: AtomicU64,
    pub mode_fail_open: AtomicU64,

    /// Request latency buckets (microseconds)
    pub latency_under_1ms: AtomicU64,
    pub latency_1_5ms: AtomicU64,
    pub latency_5_10ms: AtomicU64,
    pub latency_10_50ms: AtomicU64,
    pub latency_50_100ms: AtomicU64,
    pub latency_over_100ms: AtomicU64,

    /// Velocity subsystem
    pub velocity_checks_total: AtomicU64,
    pub velocity_unavailable_total: AtomicU64,

    /// Outbox dispatcher
    pub outbox_enqueued_total: AtomicU64,
    pub outbox_dropped_total: AtomicU64,
    pub outbox_appends_total: AtomicU64,
    pub outbox_append_errors_total: AtomicU64,

    /// Publisher worker
    pub publish_success_total: AtomicU64,
    pub publish_failure_total: AtomicU64,
    pub pending_reclaimed_total: AtomicU64,

    /// Gauges sampled by the publisher
    pub outbox_lag_seconds: AtomicU64,
    pub outbox_pending_total: AtomicU64,
    pub outbox_pending_oldest_idle_ms: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        EngineMetrics::default()
    }

    /// Record a produced decision (outcome and engine mode).
    pub fn record_decision(&self, decision: &Decision) {
        self.decisions_total.fetch_add(1, Ordering::Relaxed);

        match decision.decision {
            DecisionAction::Approve => self.decisions_approve.fetch_add(1, Ordering::Relaxed),
            DecisionAction::Decline => self.decisions_decline.fetch_add(1, Ordering::Relaxed),
            DecisionAction::Review => self.decisions_review.fetch_add(1, Ordering::Relaxed),
        };

        match decision.engine_mode {
            EngineMode::Normal => self.mode_normal.fetch_add(1, Ordering::Relaxed),
            EngineMode::Degraded => self.mode_degraded.fetch_add(1, Ordering::Relaxed),
            EngineMode::FailOpen => self.mode_fail_open.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record request latency into fixed buckets.
    pub fn record_latency(&self, start: Instant) {
        let micros = start.elapsed().as_micros() as u64;

        if micros < 1_000 {
            self.latency_under_1ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 5_000 {
            self.latency_1_5ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 10_000 {
            self.latency_5_10ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 50_000 {
            self.latency_10_50ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 100_000 {
            self.latency_50_100ms.fetch_add(1, Ordering::Relaxed);
        } else {
            self.latency_over_100ms.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_velocity_checks(&self) {
        self.velocity_checks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_velocity_unavailable(&self) {
        self.velocity_unavailable_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_outbox_enqueued(&self) {
        self.outbox_enqueued_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_outbox_dropped(&self) {
        self.outbox_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_outbox_appends(&self) {
        self.outbox_appends_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_outbox_append_errors(&self) {
        self.outbox_append_errors_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_success(&self, _latency_ms: u64) {
        self.publish_success_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_publish_failure(&self) {
        self.publish_failure_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_pending_reclaimed(&self, count: u64) {
        self.pending_reclaimed_total
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_outbox_lag_seconds(&self, lag: u64) {
        self.outbox_lag_seconds.store(lag, Ordering::Relaxed);
    }

    pub fn set_pending_summary(&self, total_pending: u64, oldest_idle_ms: u64) {
        self.outbox_pending_total
            .store(total_pending, Ordering::Relaxed);
        self.outbox_pending_oldest_idle_ms
            .store(oldest_idle_ms, Ordering::Relaxed);
    }

    /// Point-in-time copy for assertions and the registry status endpoint.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            decisions_total: self.decisions_total.load(Ordering::Relaxed),
            mode_fail_open: self.mode_fail_open.load(Ordering::Relaxed),
            mode_degraded: self.mode_degraded.load(Ordering::Relaxed),
            velocity_unavailable_total: self.velocity_unavailable_total.load(Ordering::Relaxed),
            outbox_enqueued_total: self.outbox_enqueued_total.load(Ordering::Relaxed),
            outbox_dropped_total: self.outbox_dropped_total.load(Ordering::Relaxed),
            publish_success_total: self.publish_success_total.load(Ordering::Relaxed),
            publish_failure_total: self.publish_failure_total.load(Ordering::Relaxed),
            pending_reclaimed_total: self.pending_reclaimed_total.load(Ordering::Relaxed),
            outbox_lag_seconds: self.outbox_lag_seconds.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        format!(
            r#"# HELP fraudr_decisions_total Total number of decisions produced
# TYPE fraudr_decisions_total counter
fraudr_decisions_total {}

# HELP fraudr_decisions Decisions by outcome
# TYPE fraudr_decisions counter
fraudr_decisions{{outcome="approve"}} {}
fraudr_decisions{{outcome="decline"}} {}
fraudr_decisions{{outcome="review"}} {}

# HELP fraudr_engine_mode Decisions by engine mode
# TYPE fraudr_engine_mode counter
fraudr_engine_mode{{mode="normal"}} {}
fraudr_engine_mode{{mode="degraded"}} {}
fraudr_engine_mode{{mode="fail_open"}} {}

# HELP fraudr_decision_latency_bucket Decision latency histogram
# TYPE fraudr_decision_latency_bucket counter
fraudr_decision_latency_bucket{{le="0.001"}} {}
fraudr_decision_latency_bucket{{le="0.005"}} {}
fraudr_decision_latency_bucket{{le="0.01"}} {}
fraudr_decision_latency_bucket{{le="0.05"}} {}
fraudr_decision_latency_bucket{{le="0.1"}} {}
fraudr_decision_latency_bucket{{le="+Inf"}} {}

# HELP fraudr_velocity_checks_total Velocity counter checks
# TYPE fraudr_velocity_checks_total counter
fraudr_velocity_checks_total {}

# HELP fraudr_velocity_unavailable_total Velocity store failures
# TYPE fraudr_velocity_unavailable_total counter
fraudr_velocity_unavailable_total {}

# HELP fraudr_outbox_enqueued_total Records enqueued to the outbox
# TYPE fraudr_outbox_enqueued_total counter
fraudr_outbox_enqueued_total {}

# HELP fraudr_outbox_dropped_total Records dropped by queue backpressure
# TYPE fraudr_outbox_dropped_total counter
fraudr_outbox_dropped_total {}

# HELP fraudr_outbox_appends_total Durable stream appends
# TYPE fraudr_outbox_appends_total counter
fraudr_outbox_appends_total {}

# HELP fraudr_outbox_append_errors_total Failed stream appends
# TYPE fraudr_outbox_append_errors_total counter
fraudr_outbox_append_errors_total {}

# HELP fraudr_publish_success_total Decision events published
# TYPE fraudr_publish_success_total counter
fraudr_publish_success_total {}

# HELP fraudr_publish_failure_total Decision event publish failures
# TYPE fraudr_publish_failure_total counter
fraudr_publish_failure_total {}

# HELP fraudr_pending_reclaimed_total Pending entries reclaimed
# TYPE fraudr_pending_reclaimed_total counter
fraudr_pending_reclaimed_total {}

# HELP fraudr_outbox_lag_seconds Publisher lag behind stream entries
# TYPE fraudr_outbox_lag_seconds gauge
fraudr_outbox_lag_seconds {}

# HELP fraudr_outbox_pending_total Entries delivered but unacked
# TYPE fraudr_outbox_pending_total gauge
fraudr_outbox_pending_total {}

# HELP fraudr_outbox_pending_oldest_idle_ms Idle time of the oldest pending entry
# TYPE fraudr_outbox_pending_oldest_idle_ms gauge
fraudr_outbox_pending_oldest_idle_ms {}
"#,
            self.decisions_total.load(Ordering::Relaxed),
            self.decisions_approve.load(Ordering::Relaxed),
            self.decisions_decline.load(Ordering::Relaxed),
            self.decisions_review.load(Ordering::Relaxed),
            self.mode_normal.load(Ordering::Relaxed),
            self.mode_degraded.load(Ordering::Relaxed),
            self.mode_fail_open.load(Ordering::Relaxed),
            self.latency_under_1ms.load(Ordering::Relaxed),
            self.latency_1_5ms.load(Ordering::Relaxed),
            self.latency_5_10ms.load(Ordering::Relaxed),
            self.latency_10_50ms.load(Ordering::Relaxed),
            self.latency_50_100ms.load(Ordering::Relaxed),
            self.latency_over_100ms.load(Ordering::Relaxed),
            self.velocity_checks_total.load(Ordering::Relaxed),
            self.velocity_unavailable_total.load(Ordering::Relaxed),
            self.outbox_enqueued_total.load(Ordering::Relaxed),
            self.outbox_dropped_total.load(Ordering::Relaxed),
            self.outbox_appends_total.load(Ordering::Relaxed),
            self.outbox_append_errors_total.load(Ordering::Relaxed),
            self.publish_success_total.load(Ordering::Relaxed),
            self.publish_failure_total.load(Ordering::Relaxed),
            self.pending_reclaimed_total.load(Ordering::Relaxed),
            self.outbox_lag_seconds.load(Ordering::Relaxed),
            self.outbox_pending_total.load(Ordering::Relaxed),
            self.outbox_pending_oldest_idle_ms.load(Ordering::Relaxed),
        )
    }
}

/// Point-in-time metric values.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub decisions_total: u64,
    pub mode_fail_open: u64,
    pub mode_degraded: u64,
    pub velocity_unavailable_total: u64,
    pub outbox_enqueued_total: u64,
    pub outbox_dropped_total: u64,
    pub publish_success_total: u64,
    pub publish_failure_total: u64,
    pub pending_reclaimed_total: u64,
    pub outbox_lag_seconds: u64,
}
