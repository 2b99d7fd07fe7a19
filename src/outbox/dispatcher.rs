use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain::{Decision, Transaction};
use crate::observability::EngineMetrics;

use super::stream::{OutboxRecord, OutboxStream};

/// Retry budget for durable appends.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(1u32 << attempt.min(16).saturating_sub(1));
        exp.min(self.max_backoff)
    }
}

/// Removes AUTH durability from the synchronous request path.
///
/// Handlers enqueue and return immediately; a single drainer task appends
/// each record to the durable stream. The queue is bounded: when full the
/// oldest pending record is dropped (and counted) rather than blocking a
/// request thread.
pub struct OutboxDispatcher {
    queue: Mutex<VecDeque<OutboxRecord>>,
    notify: Notify,
    capacity: usize,
    available: AtomicBool,
    metrics: Arc<EngineMetrics>,
}

impl OutboxDispatcher {
    pub fn new(capacity: usize, metrics: Arc<EngineMetrics>) -> Arc<Self> {
        Arc::new(OutboxDispatcher {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity: capacity.max(1),
            available: AtomicBool::new(true),
            metrics,
        })
    }

    /// Enqueue an AUTH decision for durable persistence.
    ///
    /// Non-blocking and infallible from the caller's perspective.
    pub fn enqueue_auth(&self, transaction: Transaction, decision: Decision) {
        let record = OutboxRecord {
            transaction,
            decision,
        };
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.metrics.increment_outbox_dropped();
                warn!("outbox queue full, dropped oldest pending record");
            }
            queue.push_back(record);
        }
        self.metrics.increment_outbox_enqueued();
        self.notify.notify_one();
    }

    /// False once an append has exhausted its retry budget; AUTH requests
    /// then surface OUTBOX_UNAVAILABLE until an append succeeds again.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Start the drainer task writing queued records to the stream.
    pub fn spawn_drainer(
        self: &Arc<Self>,
        stream: Arc<dyn OutboxStream>,
        retry: RetryPolicy,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            loop {
                let record = dispatcher.queue.lock().pop_front();
                match record {
                    Some(record) => dispatcher.persist(stream.as_ref(), record, &retry).await,
                    None => dispatcher.notify.notified().await,
                }
            }
        })
    }

    /// Append one record with bounded exponential backoff.
    ///
    /// Exhausting the budget flips the availability flag and requeues the
    /// record at the front (enqueue order per transaction is preserved);
    /// the next pass retries it after the backoff cap. The flag recovers
    /// on the first successful append.
    async fn persist(&self, stream: &dyn OutboxStream, record: OutboxRecord, retry: &RetryPolicy) {
        for attempt in 1..=retry.max_attempts {
            match stream.append(&record).await {
                Ok(_) => {
                    self.metrics.increment_outbox_appends();
                    if !self.available.swap(true, Ordering::AcqRel) {
                        info!("outbox stream recovered");
                    }
                    return;
                }
                Err(e) => {
                    self.metrics.increment_outbox_append_errors();
                    warn!(
                        attempt,
                        max_attempts = retry.max_attempts,
                        error = %e,
                        "outbox append failed"
                    );
                    if attempt < retry.max_attempts {
                        tokio::time::sleep(retry.backoff(attempt)).await;
                    }
                }
            }
        }

        if self.available.swap(false, Ordering::AcqRel) {
            error!(
                transaction_id = ?record.decision.transaction_id,
                "outbox append retry budget exhausted, marking outbox unavailable"
            );
        }
        self.queue.lock().push_front(record);
        tokio::time::sleep(retry.max_backoff).await;
    }
}
