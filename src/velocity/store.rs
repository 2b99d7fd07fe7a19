use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

/// Errors from the velocity counter store.
///
/// There is deliberately one variant: every store fault (connection loss,
/// timeout, protocol error) collapses into "unavailable" so the evaluator
/// has exactly one degradation path.
#[derive(Error, Debug, Clone)]
pub enum VelocityError {
    #[error("velocity store unavailable: {0}")]
    Unavailable(String),
}

/// Backing store for rolling-window counters.
///
/// The contract is the logical `INCR key; EXPIRE key ttl` atom plus a
/// read-only `GET`. Counters are 64-bit non-negative integers.
#[async_trait]
pub trait VelocityStore: Send + Sync {
    /// Atomically increment and return the new count, setting the key's
    /// expiry in the same round-trip.
    async fn increment(&self, key: &str, ttl_seconds: u64) -> Result<u64, VelocityError>;

    /// Current count without mutation; 0 when the key is absent.
    async fn current(&self, key: &str) -> Result<u64, VelocityError>;
}

/// Redis-backed counter store.
pub struct RedisVelocityStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisVelocityStore {
    pub fn new(conn: ConnectionManager, timeout: Duration) -> Self {
        RedisVelocityStore { conn, timeout }
    }

    async fn bounded<T>(
        &self,
        op: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, VelocityError> {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(VelocityError::Unavailable(e.to_string())),
            Err(_) => Err(VelocityError::Unavailable(format!(
                "timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl VelocityStore for RedisVelocityStore {
    async fn increment(&self, key: &str, ttl_seconds: u64) -> Result<u64, VelocityError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .incr(key, 1u64)
            .expire(key, ttl_seconds as i64)
            .ignore();

        let (count,): (u64,) = self.bounded(pipe.query_async(&mut conn)).await?;
        Ok(count)
    }

    async fn current(&self, key: &str) -> Result<u64, VelocityError> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = self.bounded(conn.get(key)).await?;
        Ok(count.unwrap_or(0))
    }
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MockVelocityStore {
    counters: Mutex<HashMap<String, u64>>,
    failing: AtomicBool,
}

impl MockVelocityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate store unavailability.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Seed a counter (for testing).
    pub fn set_count(&self, key: impl Into<String>, count: u64) {
        self.counters.lock().insert(key.into(), count);
    }

    pub fn counts(&self) -> HashMap<String, u64> {
        self.counters.lock().clone()
    }

    fn check_available(&self) -> Result<(), VelocityError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(VelocityError::Unavailable("mock store failing".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VelocityStore for MockVelocityStore {
    async fn increment(&self, key: &str, _ttl_seconds: u64) -> Result<u64, VelocityError> {
        self.check_available()?;
        let mut counters = self.counters.lock();
        let count = counters.entry(key.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn current(&self, key: &str) -> Result<u64, VelocityError> {
        self.check_available()?;
        Ok(self.counters.lock().get(key).copied().unwrap_or(0))
    }
}
