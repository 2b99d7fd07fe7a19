use std::sync::Arc;

use chrono::Utc;

use crate::domain::{Transaction, VelocityConfig, VelocityResult};

use super::store::{VelocityError, VelocityStore};

/// Rolling-window velocity counters over a shared key-value store.
///
/// Uses fixed window buckets keyed into the counter name with a `2 * W`
/// TTL, accepting at most a 2x transient over window edges instead of a
/// true sliding window. The bucket boundary is surfaced on every
/// [`VelocityResult`] so downstream audit can reconstruct the window.
pub struct VelocityService {
    store: Arc<dyn VelocityStore>,
}

impl VelocityService {
    pub fn new(store: Arc<dyn VelocityStore>) -> Self {
        VelocityService { store }
    }

    /// Deterministic counter key:
    /// `vel:{ruleset_key}:{rule_id}:{dimension}:{value_fingerprint}:{bucket}`.
    pub fn build_key(
        ruleset_key: &str,
        rule_id: &str,
        config: &VelocityConfig,
        dimension_value: &str,
        now_seconds: u64,
    ) -> (String, u64) {
        let bucket = now_seconds / config.window_seconds.max(1);
        let fingerprint = fingerprint(dimension_value);
        let key = format!(
            "vel:{}:{}:{}:{}:{}",
            ruleset_key, rule_id, config.dimension, fingerprint, bucket
        );
        (key, bucket)
    }

    /// Increment the counter for this rule/transaction and return the
    /// resulting count against the threshold.
    ///
    /// Returns `Ok(None)` when the transaction has no value for the
    /// configured dimension (the velocity predicate cannot fire).
    pub async fn check(
        &self,
        ruleset_key: &str,
        rule_id: &str,
        config: &VelocityConfig,
        transaction: &Transaction,
    ) -> Result<Option<VelocityResult>, VelocityError> {
        let Some(value) = transaction.dimension_value(&config.dimension) else {
            return Ok(None);
        };

        let now = Utc::now().timestamp().max(0) as u64;
        let (key, bucket) = Self::build_key(ruleset_key, rule_id, config, &value, now);

        let count = self.store.increment(&key, 2 * config.window_seconds).await?;

        Ok(Some(self.result(config, &value, count, bucket)))
    }

    /// Read the current count without mutation. Used by replay so a
    /// re-evaluated transaction is not double-counted; absent counters
    /// read as zero.
    pub async fn check_read_only(
        &self,
        ruleset_key: &str,
        rule_id: &str,
        config: &VelocityConfig,
        transaction: &Transaction,
    ) -> Result<Option<VelocityResult>, VelocityError> {
        let Some(value) = transaction.dimension_value(&config.dimension) else {
            return Ok(None);
        };

        let now = Utc::now().timestamp().max(0) as u64;
        let (key, bucket) = Self::build_key(ruleset_key, rule_id, config, &value, now);

        let count = self.store.current(&key).await?;

        Ok(Some(self.result(config, &value, count, bucket)))
    }

    fn result(
        &self,
        config: &VelocityConfig,
        dimension_value: &str,
        count: u64,
        bucket: u64,
    ) -> VelocityResult {
        VelocityResult {
            dimension: config.dimension.clone(),
            key_fingerprint: fingerprint(dimension_value),
            current_count: count,
            threshold: config.threshold,
            window_seconds: config.window_seconds,
            window_bucket: bucket,
        }
    }
}

/// Cheap stable fingerprint so raw dimension values (card hashes, device
/// ids) never appear in counter keys or decision payloads.
fn fingerprint(value: &str) -> String {
    format!("{:08x}", crc32fast::hash(value.as_bytes()))
}
