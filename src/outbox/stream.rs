use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::{Decision, Transaction};

/// Errors from the durable outbox stream.
#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("outbox stream unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One AUTH decision awaiting publication, with its transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub transaction: Transaction,
    pub decision: Decision,
}

/// A delivered stream entry. The id embeds the append timestamp in
/// milliseconds (`{ms}-{seq}`), which drives the publisher's lag gauge.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub payload: String,
}

impl StreamEntry {
    pub fn record(&self) -> Result<OutboxRecord, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Millisecond timestamp embedded in the entry id.
    pub fn timestamp_ms(&self) -> Option<u64> {
        self.id.split('-').next()?.parse().ok()
    }
}

/// Stream backlog snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSummary {
    /// Entries delivered to a consumer but not yet acked
    pub total_pending: u64,
    /// Idle time of the oldest such entry
    pub oldest_idle_ms: u64,
}

/// Durable append-only log between the request path and the event bus.
///
/// Consumer-group semantics: a read delivers entries to this consumer;
/// unacked entries stay pending and can be reclaimed after an idle
/// threshold (crashed-worker recovery). Delivery is at-least-once.
#[async_trait]
pub trait OutboxStream: Send + Sync {
    /// Durably append one record; returns the entry id.
    async fn append(&self, record: &OutboxRecord) -> Result<String, OutboxError>;

    /// Read the next batch of fresh entries for this consumer.
    async fn read_batch(&self, count: usize) -> Result<Vec<StreamEntry>, OutboxError>;

    /// Take over pending entries idle for at least `min_idle_ms`.
    async fn claim_pending(
        &self,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>, OutboxError>;

    async fn ack(&self, entry_id: &str) -> Result<(), OutboxError>;

    async fn pending_summary(&self) -> Result<PendingSummary, OutboxError>;
}

/// Redis Streams outbox (XADD / XREADGROUP / XPENDING+XCLAIM / XACK).
pub struct RedisOutboxStream {
    conn: ConnectionManager,
    stream_key: String,
    group: String,
    consumer: String,
    group_ready: AtomicBool,
}

impl RedisOutboxStream {
    pub fn new(
        conn: ConnectionManager,
        stream_key: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        RedisOutboxStream {
            conn,
            stream_key: stream_key.into(),
            group: group.into(),
            consumer: consumer.into(),
            group_ready: AtomicBool::new(false),
        }
    }

    fn unavailable(e: redis::RedisError) -> OutboxError {
        OutboxError::Unavailable(e.to_string())
    }

    /// Create the consumer group once; BUSYGROUP from a previous run is
    /// expected and ignored.
    async fn ensure_group(&self) -> Result<(), OutboxError> {
        if self.group_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.stream_key, &self.group, "$")
            .await;
        match created {
            Ok(()) => {}
            Err(e) if e.to_string().contains("BUSYGROUP") => {}
            Err(e) => return Err(Self::unavailable(e)),
        }
        self.group_ready.store(true, Ordering::Release);
        Ok(())
    }

    fn entries_from_read(reply: StreamReadReply) -> Vec<StreamEntry> {
        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let payload: Option<String> = id
                    .map
                    .get("payload")
                    .and_then(|v| redis::from_redis_value(v).ok());
                if let Some(payload) = payload {
                    entries.push(StreamEntry { id: id.id, payload });
                } else {
                    debug!(entry_id = %id.id, "outbox entry without payload field");
                    entries.push(StreamEntry {
                        id: id.id,
                        payload: String::new(),
                    });
                }
            }
        }
        entries
    }
}

#[async_trait]
impl OutboxStream for RedisOutboxStream {
    async fn append(&self, record: &OutboxRecord) -> Result<String, OutboxError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(&self.stream_key, "*", &[("payload", payload.as_str())])
            .await
            .map_err(Self::unavailable)?;
        Ok(id)
    }

    async fn read_batch(&self, count: usize) -> Result<Vec<StreamEntry>, OutboxError> {
        self.ensure_group().await?;
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(count);
        let reply: StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[">"], &options)
            .await
            .map_err(Self::unavailable)?;
        Ok(Self::entries_from_read(reply))
    }

    async fn claim_pending(
        &self,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>, OutboxError> {
        self.ensure_group().await?;
        let mut conn = self.conn.clone();

        let pending: redis::streams::StreamPendingCountReply = conn
            .xpending_count(&self.stream_key, &self.group, "-", "+", count)
            .await
            .map_err(Self::unavailable)?;

        let stale_ids: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms >= min_idle_ms as usize)
            .map(|p| p.id)
            .collect();
        if stale_ids.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: redis::streams::StreamClaimReply = conn
            .xclaim(
                &self.stream_key,
                &self.group,
                &self.consumer,
                min_idle_ms as usize,
                &stale_ids,
            )
            .await
            .map_err(Self::unavailable)?;

        Ok(claimed
            .ids
            .into_iter()
            .filter_map(|id| {
                let payload: Option<String> = id
                    .map
                    .get("payload")
                    .and_then(|v| redis::from_redis_value(v).ok());
                payload.map(|payload| StreamEntry { id: id.id, payload })
            })
            .collect())
    }

    async fn ack(&self, entry_id: &str) -> Result<(), OutboxError> {
        let mut conn = self.conn.clone();
        let _: u64 = conn
            .xack(&self.stream_key, &self.group, &[entry_id])
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }

    async fn pending_summary(&self) -> Result<PendingSummary, OutboxError> {
        self.ensure_group().await?;
        let mut conn = self.conn.clone();

        let oldest: redis::streams::StreamPendingCountReply = conn
            .xpending_count(&self.stream_key, &self.group, "-", "+", 1)
            .await
            .map_err(Self::unavailable)?;
        let oldest_idle_ms = oldest
            .ids
            .first()
            .map(|p| p.last_delivered_ms as u64)
            .unwrap_or(0);

        let reply: redis::streams::StreamPendingReply = conn
            .xpending(&self.stream_key, &self.group)
            .await
            .map_err(Self::unavailable)?;
        let total_pending = match reply {
            redis::streams::StreamPendingReply::Empty => 0,
            redis::streams::StreamPendingReply::Data(data) => data.count as u64,
        };

        Ok(PendingSummary {
            total_pending,
            oldest_idle_ms,
        })
    }
}

/// In-process stream with the same consumer-group contract, for tests
/// and standalone runs.
#[derive(Default)]
pub struct MemoryOutboxStream {
    inner: Mutex<MemoryInner>,
    sequence: AtomicU64,
    failing: AtomicBool,
}

#[derive(Default)]
struct MemoryInner {
    undelivered: VecDeque<StreamEntry>,
    pending: Vec<(StreamEntry, Instant)>,
}

impl MemoryOutboxStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate stream unavailability.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn undelivered_len(&self) -> usize {
        self.inner.lock().undelivered.len()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Force pending entries to look idle (for reclaim tests).
    pub fn age_pending(&self, by: std::time::Duration) {
        let mut inner = self.inner.lock();
        for (_, delivered_at) in inner.pending.iter_mut() {
            *delivered_at -= by;
        }
    }

    fn check_available(&self) -> Result<(), OutboxError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(OutboxError::Unavailable("mock stream failing".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl OutboxStream for MemoryOutboxStream {
    async fn append(&self, record: &OutboxRecord) -> Result<String, OutboxError> {
        self.check_available()?;
        let payload = serde_json::to_string(record)?;
        let id = format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            self.sequence.fetch_add(1, Ordering::SeqCst)
        );
        self.inner.lock().undelivered.push_back(StreamEntry {
            id: id.clone(),
            payload,
        });
        Ok(id)
    }

    async fn read_batch(&self, count: usize) -> Result<Vec<StreamEntry>, OutboxError> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let mut delivered = Vec::new();
        for _ in 0..count {
            let Some(entry) = inner.undelivered.pop_front() else {
                break;
            };
            inner.pending.push((entry.clone(), Instant::now()));
            delivered.push(entry);
        }
        Ok(delivered)
    }

    async fn claim_pending(
        &self,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>, OutboxError> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let mut claimed = Vec::new();
        for (entry, delivered_at) in inner.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if delivered_at.elapsed().as_millis() as u64 >= min_idle_ms {
                *delivered_at = Instant::now();
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, entry_id: &str) -> Result<(), OutboxError> {
        self.check_available()?;
        self.inner
            .lock()
            .pending
            .retain(|(entry, _)| entry.id != entry_id);
        Ok(())
    }

    async fn pending_summary(&self) -> Result<PendingSummary, OutboxError> {
        self.check_available()?;
        let inner = self.inner.lock();
        let oldest_idle_ms = inner
            .pending
            .iter()
            .map(|(_, delivered_at)| delivered_at.elapsed().as_millis() as u64)
            .max()
            .unwrap_or(0);
        Ok(PendingSummary {
            total_pending: inner.pending.len() as u64,
            oldest_idle_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(transaction_id: &str) -> OutboxRecord {
        OutboxRecord {
            transaction: Transaction::new(transaction_id),
            decision: Decision::new(Some(transaction_id.to_string()), "AUTH"),
        }
    }

    #[tokio::test]
    async fn test_append_read_ack_lifecycle() {
        let stream = MemoryOutboxStream::new();

        stream.append(&record("tx-1")).await.unwrap();
        stream.append(&record("tx-2")).await.unwrap();

        let batch = stream.read_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(stream.pending_len(), 2);

        let first = batch[0].record().unwrap();
        assert_eq!(first.transaction.transaction_id, "tx-1");

        stream.ack(&batch[0].id).await.unwrap();
        assert_eq!(stream.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_entry_id_embeds_timestamp() {
        let stream = MemoryOutboxStream::new();
        let before = Utc::now().timestamp_millis() as u64;
        let id = stream.append(&record("tx-1")).await.unwrap();

        let entry = StreamEntry {
            id,
            payload: String::new(),
        };
        let ts = entry.timestamp_ms().unwrap();
        assert!(ts >= before);
    }

    #[tokio::test]
    async fn test_claim_pending_honors_idle_threshold() {
        let stream = MemoryOutboxStream::new();
        stream.append(&record("tx-1")).await.unwrap();
        stream.read_batch(10).await.unwrap();

        // Freshly delivered: nothing is idle enough.
        let claimed = stream.claim_pending(60_000, 50).await.unwrap();
        assert!(claimed.is_empty());

        stream.age_pending(Duration::from_secs(120));
        let claimed = stream.claim_pending(60_000, 50).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // A reclaim refreshes the delivery clock.
        let again = stream.claim_pending(60_000, 50).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_pending_summary() {
        let stream = MemoryOutboxStream::new();
        stream.append(&record("tx-1")).await.unwrap();
        stream.append(&record("tx-2")).await.unwrap();
        stream.read_batch(10).await.unwrap();
        stream.age_pending(Duration::from_millis(500));

        let summary = stream.pending_summary().await.unwrap();
        assert_eq!(summary.total_pending, 2);
        assert!(summary.oldest_idle_ms >= 500);
    }

    #[tokio::test]
    async fn test_failing_stream_errors() {
        let stream = MemoryOutboxStream::new();
        stream.set_failing(true);
        assert!(stream.append(&record("tx-1")).await.is_err());
        assert!(stream.read_batch(1).await.is_err());
    }
}
