use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::bus::EventBus;
use crate::observability::EngineMetrics;

use super::stream::{OutboxStream, StreamEntry};

/// Publisher loop tuning.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub poll_interval: Duration,
    /// Pending entries idle at least this long are reclaimed
    pub pending_min_idle_ms: u64,
    pub pending_claim_count: usize,
    pub read_batch_size: usize,
    pub pending_summary_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            poll_interval: Duration::from_millis(50),
            pending_min_idle_ms: 60_000,
            pending_claim_count: 50,
            read_batch_size: 100,
            pending_summary_interval: Duration::from_millis(5_000),
        }
    }
}

/// Consumes the outbox stream and publishes each decision to the event
/// bus, acking only after the broker acknowledgement. Unacked entries are
/// retried through the pending-reclaim path, which also recovers entries
/// orphaned by a crashed worker.
pub struct PublisherWorker {
    stream: Arc<dyn OutboxStream>,
    bus: Arc<dyn EventBus>,
    metrics: Arc<EngineMetrics>,
    config: PublisherConfig,
    next_summary_at: Mutex<Instant>,
}

impl PublisherWorker {
    pub fn new(
        stream: Arc<dyn OutboxStream>,
        bus: Arc<dyn EventBus>,
        metrics: Arc<EngineMetrics>,
        config: PublisherConfig,
    ) -> Self {
        PublisherWorker {
            stream,
            bus,
            metrics,
            config,
            next_summary_at: Mutex::new(Instant::now()),
        }
    }

    /// Run the worker on its own task at the configured poll interval.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.poll().await {
                    error!(error = %e, "outbox publisher poll failed");
                }
            }
        })
    }

    /// One tick: reclaim stale pending entries, then drain a fresh batch.
    pub async fn poll(&self) -> Result<(), super::stream::OutboxError> {
        self.refresh_pending_summary_if_due().await;

        let reclaimed = self
            .stream
            .claim_pending(self.config.pending_min_idle_ms, self.config.pending_claim_count)
            .await?;
        if !reclaimed.is_empty() {
            self.metrics.increment_pending_reclaimed(reclaimed.len() as u64);
            for entry in reclaimed {
                self.process_entry(entry).await;
            }
        }

        let entries = self.stream.read_batch(self.config.read_batch_size).await?;
        for entry in entries {
            self.process_entry(entry).await;
        }
        Ok(())
    }

    async fn process_entry(&self, entry: StreamEntry) {
        let record = match entry.record() {
            Ok(record) => record,
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "outbox entry with corrupt payload, acking");
                self.ack(&entry.id).await;
                return;
            }
        };

        let mut decision = record.decision;
        if decision.transaction_context.is_none() {
            decision.transaction_context = Some(record.transaction);
        }

        let key = decision
            .transaction_id
            .clone()
            .unwrap_or_else(|| decision.decision_id.clone());
        let payload = match serde_json::to_string(&decision) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "decision not serializable, acking");
                self.ack(&entry.id).await;
                return;
            }
        };

        let started = Instant::now();
        match self.bus.publish(&key, &payload).await {
            Ok(()) => {
                self.metrics
                    .record_publish_success(started.elapsed().as_millis() as u64);
                self.update_lag(&entry);
                self.ack(&entry.id).await;
            }
            Err(e) => {
                // Leave unacked; the reclaim path retries it.
                self.metrics.increment_publish_failure();
                warn!(entry_id = %entry.id, error = %e, "failed to publish decision event");
            }
        }
    }

    async fn ack(&self, entry_id: &str) {
        if let Err(e) = self.stream.ack(entry_id).await {
            warn!(entry_id = %entry_id, error = %e, "failed to ack outbox entry");
        }
    }

    fn update_lag(&self, entry: &StreamEntry) {
        if let Some(entry_ms) = entry.timestamp_ms() {
            let now_ms = Utc::now().timestamp_millis().max(0) as u64;
            let lag_seconds = now_ms.saturating_sub(entry_ms) / 1000;
            self.metrics.set_outbox_lag_seconds(lag_seconds);
        }
    }

    async fn refresh_pending_summary_if_due(&self) {
        {
            let mut next_at = self.next_summary_at.lock();
            if Instant::now() < *next_at {
                return;
            }
            *next_at = Instant::now() + self.config.pending_summary_interval;
        }
        match self.stream.pending_summary().await {
            Ok(summary) => self
                .metrics
                .set_pending_summary(summary.total_pending, summary.oldest_idle_ms),
            Err(e) => warn!(error = %e, "failed to sample outbox pending summary"),
        }
    }
}
