use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use fraudr::api::{create_router, AppState};
use fraudr::bus::{EventBus, KafkaEventBus, LogEventBus};
use fraudr::config::Config;
use fraudr::engine::RuleEvaluator;
use fraudr::observability::{init_tracing, EngineMetrics};
use fraudr::outbox::{OutboxDispatcher, PublisherWorker, RedisOutboxStream};
use fraudr::registry::{FileRulesetSource, RulesetRegistry, RulesetSource};
use fraudr::velocity::{RedisVelocityStore, VelocityService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse();

    // Initialize tracing
    init_tracing(&config.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting fraudr decision engine"
    );

    // Shared Redis connection (velocity counters + outbox stream)
    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;

    let metrics = Arc::new(EngineMetrics::new());

    // Ruleset registry, warmed from the compiled-ruleset directory
    let source = Arc::new(FileRulesetSource::new(config.ruleset_dir.clone()));
    let registry = Arc::new(RulesetRegistry::new(source.clone()));
    match source.discover().await {
        Ok(refs) => {
            let loaded = registry.bulk_load(&refs).await;
            info!(loaded, discovered = refs.len(), "rulesets loaded at startup");
        }
        Err(e) => warn!(error = %e, "ruleset discovery failed, starting with empty registry"),
    }

    // Velocity service
    let velocity_store = Arc::new(RedisVelocityStore::new(
        redis_conn.clone(),
        config.velocity_timeout(),
    ));
    let velocity = Arc::new(VelocityService::new(velocity_store));

    // Rule evaluator
    let evaluator = Arc::new(RuleEvaluator::new(
        velocity,
        metrics.clone(),
        config.debug_config(),
    ));

    // Event bus
    let bus: Arc<dyn EventBus> = match config.bus_backend.as_str() {
        "kafka" => Arc::new(KafkaEventBus::new(&config.kafka_brokers)?),
        "log" => Arc::new(LogEventBus::new()),
        other => anyhow::bail!("unknown bus backend '{}' (expected log or kafka)", other),
    };

    // Outbox: dispatcher drains the in-process queue into the stream,
    // publisher consumes the stream into the bus.
    let stream = Arc::new(RedisOutboxStream::new(
        redis_conn,
        config.outbox_stream_key.clone(),
        config.outbox_group.clone(),
        format!("publisher-{}", uuid::Uuid::new_v4()),
    ));
    let dispatcher = OutboxDispatcher::new(config.outbox_queue_capacity, metrics.clone());
    let drainer_handle = dispatcher.spawn_drainer(stream.clone(), config.retry_policy());
    let publisher_handle = PublisherWorker::new(
        stream,
        bus.clone(),
        metrics.clone(),
        config.publisher_config(),
    )
    .spawn();

    // Application state and router
    let state = Arc::new(AppState {
        registry,
        evaluator,
        dispatcher,
        bus,
        metrics,
        auth_ruleset_key: config.auth_ruleset_key.clone(),
        monitoring_ruleset_key: config.monitoring_ruleset_key.clone(),
        start_time: Instant::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });
    let app = create_router(state);

    let addr: SocketAddr = config.listen_addr.parse()?;
    info!(addr = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    if config.graceful_shutdown {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        axum::serve(listener, app).await?;
    }

    info!("Shutting down...");
    drainer_handle.abort();
    publisher_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
