use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::engine::DebugConfig;
use crate::outbox::{PublisherConfig, RetryPolicy};

/// Decision engine configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "fraudr")]
#[command(about = "Low-latency card-payment authorization decision engine")]
pub struct Config {
    /// HTTP server listen address
    #[arg(long, default_value = "0.0.0.0:8080", env = "FRAUDR_LISTEN_ADDR")]
    pub listen_addr: String,

    /// Redis URL for velocity counters and the outbox stream
    #[arg(long, default_value = "redis://127.0.0.1:6379", env = "FRAUDR_REDIS_URL")]
    pub redis_url: String,

    /// Directory holding compiled ruleset documents
    #[arg(long, default_value = "rulesets", env = "FRAUDR_RULESET_DIR")]
    pub ruleset_dir: PathBuf,

    /// Ruleset key served by the AUTH endpoint
    #[arg(long, default_value = "CARD_AUTH", env = "FRAUDR_AUTH_RULESET_KEY")]
    pub auth_ruleset_key: String,

    /// Ruleset key served by the MONITORING endpoint
    #[arg(
        long,
        default_value = "CARD_MONITORING",
        env = "FRAUDR_MONITORING_RULESET_KEY"
    )]
    pub monitoring_ruleset_key: String,

    /// Velocity store client timeout in milliseconds
    #[arg(long, default_value = "50", env = "FRAUDR_VELOCITY_TIMEOUT_MS")]
    pub velocity_timeout_ms: u64,

    /// Outbox stream key
    #[arg(
        long,
        default_value = "outbox:auth-decisions",
        env = "FRAUDR_OUTBOX_STREAM"
    )]
    pub outbox_stream_key: String,

    /// Outbox consumer group
    #[arg(long, default_value = "auth-publisher", env = "FRAUDR_OUTBOX_GROUP")]
    pub outbox_group: String,

    /// In-process outbox queue capacity (oldest dropped when full)
    #[arg(long, default_value = "10000", env = "FRAUDR_OUTBOX_QUEUE_CAPACITY")]
    pub outbox_queue_capacity: usize,

    /// Durable append attempts before the outbox is marked unavailable
    #[arg(long, default_value = "5", env = "FRAUDR_OUTBOX_RETRY_MAX_ATTEMPTS")]
    pub outbox_retry_max_attempts: u32,

    /// Publisher loop period in milliseconds
    #[arg(long, default_value = "50", env = "FRAUDR_OUTBOX_POLL_INTERVAL_MS")]
    pub outbox_poll_interval_ms: u64,

    /// Idle threshold before a pending entry is reclaimed
    #[arg(long, default_value = "60000", env = "FRAUDR_OUTBOX_PENDING_MIN_IDLE_MS")]
    pub outbox_pending_min_idle_ms: u64,

    /// Pending entries reclaimed per tick
    #[arg(long, default_value = "50", env = "FRAUDR_OUTBOX_PENDING_CLAIM_COUNT")]
    pub outbox_pending_claim_count: usize,

    /// Backlog sampling period in milliseconds
    #[arg(
        long,
        default_value = "5000",
        env = "FRAUDR_OUTBOX_PENDING_SUMMARY_INTERVAL_MS"
    )]
    pub outbox_pending_summary_interval_ms: u64,

    /// Event bus backend: "log" or "kafka"
    #[arg(long, default_value = "log", env = "FRAUDR_BUS_BACKEND")]
    pub bus_backend: String,

    /// Kafka bootstrap servers (bus-kafka builds only)
    #[arg(long, default_value = "localhost:9092", env = "FRAUDR_KAFKA_BROKERS")]
    pub kafka_brokers: String,

    /// Enable per-condition debug capture
    #[arg(long, default_value = "false", env = "FRAUDR_DEBUG_ENABLED")]
    pub debug_enabled: bool,

    /// Debug sampling: capture 1 in N transactions
    #[arg(long, default_value = "100", env = "FRAUDR_DEBUG_SAMPLE_RATE")]
    pub debug_sample_rate: u32,

    /// Per-request cap on captured condition evaluations
    #[arg(long, default_value = "200", env = "FRAUDR_DEBUG_MAX_CONDITION_EVALUATIONS")]
    pub debug_max_condition_evaluations: usize,

    /// Include extracted field values in debug capture
    #[arg(long, default_value = "false", env = "FRAUDR_DEBUG_INCLUDE_FIELD_VALUES")]
    pub debug_include_field_values: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Enable graceful shutdown
    #[arg(long, default_value = "true", env = "FRAUDR_GRACEFUL_SHUTDOWN")]
    pub graceful_shutdown: bool,
}

impl Config {
    pub fn velocity_timeout(&self) -> Duration {
        Duration::from_millis(self.velocity_timeout_ms)
    }

    pub fn debug_config(&self) -> DebugConfig {
        DebugConfig {
            enabled: self.debug_enabled,
            sample_rate: self.debug_sample_rate,
            max_condition_evaluations: self.debug_max_condition_evaluations,
            include_field_values: self.debug_include_field_values,
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            poll_interval: Duration::from_millis(self.outbox_poll_interval_ms.max(1)),
            pending_min_idle_ms: self.outbox_pending_min_idle_ms,
            pending_claim_count: self.outbox_pending_claim_count,
            read_batch_size: 100,
            pending_summary_interval: Duration::from_millis(
                self.outbox_pending_summary_interval_ms.max(1000),
            ),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.outbox_retry_max_attempts.max(1),
            ..Default::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: "0.0.0.0:8080".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            ruleset_dir: PathBuf::from("rulesets"),
            auth_ruleset_key: "CARD_AUTH".to_string(),
            monitoring_ruleset_key: "CARD_MONITORING".to_string(),
            velocity_timeout_ms: 50,
            outbox_stream_key: "outbox:auth-decisions".to_string(),
            outbox_group: "auth-publisher".to_string(),
            outbox_queue_capacity: 10_000,
            outbox_retry_max_attempts: 5,
            outbox_poll_interval_ms: 50,
            outbox_pending_min_idle_ms: 60_000,
            outbox_pending_claim_count: 50,
            outbox_pending_summary_interval_ms: 5_000,
            bus_backend: "log".to_string(),
            kafka_brokers: "localhost:9092".to_string(),
            debug_enabled: false,
            debug_sample_rate: 100,
            debug_max_condition_evaluations: 200,
            debug_include_field_values: false,
            log_level: "info".to_string(),
            graceful_shutdown: true,
        }
    }
}
