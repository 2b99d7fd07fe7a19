use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::domain::{Decision, DecisionAction, EngineErrorCode, EngineMode, EvaluationType, Transaction};
use crate::engine::{ruleset_not_loaded_decision, RuleEvaluator};
use crate::observability::EngineMetrics;
use crate::outbox::OutboxDispatcher;
use crate::registry::RulesetRegistry;

use super::request::{BulkLoadRequest, HotSwapRequest, LoadRulesetRequest};
use super::response::{
    BulkLoadResponse, CountryRulesetsResponse, ErrorResponse, HealthResponse, HotSwapResponse,
    LoadRulesetResponse, ReadyResponse, RegistryStatusResponse, SlimAuthResponse,
};

/// Shared application state.
pub struct AppState {
    pub registry: Arc<RulesetRegistry>,

    pub evaluator: Arc<RuleEvaluator>,

    pub dispatcher: Arc<OutboxDispatcher>,

    /// Bus used for the direct MONITORING publish path
    pub bus: Arc<dyn EventBus>,

    pub metrics: Arc<EngineMetrics>,

    pub auth_ruleset_key: String,

    pub monitoring_ruleset_key: String,

    pub start_time: Instant,

    pub version: String,
}

/// Create the application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/evaluate/auth", post(handle_auth))
        .route("/v1/evaluate/monitoring", post(handle_monitoring))
        .route("/rulesets/load", post(handle_load))
        .route("/rulesets/bulk-load", post(handle_bulk_load))
        .route("/rulesets/hotswap", post(handle_hot_swap))
        .route("/rulesets/registry/status", get(handle_registry_status))
        .route("/rulesets/registry/:country", get(handle_country_rulesets))
        .route("/health", get(handle_health))
        .route("/ready", get(handle_ready))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

/// AUTH evaluation: first-match, fail-open, durability via the outbox.
///
/// Always 200 with a slim decision envelope; 503 is reserved for the one
/// case where durability cannot be met (outbox unavailable).
async fn handle_auth(
    State(state): State<Arc<AppState>>,
    Json(transaction): Json<Transaction>,
) -> axum::response::Response {
    let start = Instant::now();
    let ruleset_key = state.auth_ruleset_key.clone();

    if !state.dispatcher.is_available() {
        let mut decision = Decision::new(
            Some(transaction.transaction_id.clone()),
            EvaluationType::Auth.as_str(),
        );
        decision.ruleset_key = ruleset_key;
        decision.record_fault(
            EngineMode::FailOpen,
            EngineErrorCode::OutboxUnavailable,
            "outbox append retry budget exhausted",
        );
        decision.processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        state.metrics.record_decision(&decision);

        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SlimAuthResponse::from_decision(&decision)),
        )
            .into_response();
    }

    let lookup_start = Instant::now();
    let ruleset = state
        .registry
        .get_with_fallback(transaction.country_code.as_deref(), &ruleset_key);
    let lookup_ms = lookup_start.elapsed().as_secs_f64() * 1000.0;

    let mut decision = match ruleset {
        Some(ruleset) => state.evaluator.evaluate(&transaction, &ruleset, false).await,
        None => {
            warn!(ruleset_key = %ruleset_key, "ruleset not found in registry");
            let decision =
                ruleset_not_loaded_decision(Some(&transaction), EvaluationType::Auth, &ruleset_key);
            state.metrics.record_decision(&decision);
            decision
        }
    };
    decision.timing_breakdown.ruleset_lookup_time_ms = Some(lookup_ms);

    // Durability happens off the request path: enqueue and answer.
    let enqueue_start = Instant::now();
    state
        .dispatcher
        .enqueue_auth(transaction, decision.clone());
    decision.timing_breakdown.outbox_enqueue_time_ms =
        Some(enqueue_start.elapsed().as_secs_f64() * 1000.0);

    state.metrics.record_latency(start);
    (
        StatusCode::OK,
        Json(SlimAuthResponse::from_decision(&decision)),
    )
        .into_response()
}

/// MONITORING evaluation: all-match analytics over an upstream decision.
///
/// The decision field is validated at this boundary (400 on missing or
/// invalid); the engine-side MISSING/INVALID degradation paths remain for
/// non-HTTP callers such as replay.
async fn handle_monitoring(
    State(state): State<Arc<AppState>>,
    Json(mut transaction): Json<Transaction>,
) -> axum::response::Response {
    let start = Instant::now();

    let normalized = transaction
        .decision
        .as_deref()
        .and_then(DecisionAction::parse)
        .filter(|action| matches!(action, DecisionAction::Approve | DecisionAction::Decline));
    let Some(normalized) = normalized else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::invalid_request(
                "decision must be APPROVE or DECLINE",
            )),
        )
            .into_response();
    };
    transaction.decision = Some(normalized.as_str().to_string());

    let ruleset_key = state.monitoring_ruleset_key.clone();
    let lookup_start = Instant::now();
    let ruleset = state
        .registry
        .get_with_fallback(transaction.country_code.as_deref(), &ruleset_key);
    let lookup_ms = lookup_start.elapsed().as_secs_f64() * 1000.0;

    let mut decision = match ruleset {
        Some(ruleset) => state.evaluator.evaluate(&transaction, &ruleset, false).await,
        None => {
            warn!(ruleset_key = %ruleset_key, "ruleset not found in registry");
            let decision = ruleset_not_loaded_decision(
                Some(&transaction),
                EvaluationType::Monitoring,
                &ruleset_key,
            );
            state.metrics.record_decision(&decision);
            decision
        }
    };
    decision.timing_breakdown.ruleset_lookup_time_ms = Some(lookup_ms);
    if decision.transaction_context.is_none() {
        decision.transaction_context = Some(transaction);
    }

    // MONITORING publishes straight to the bus; a failure degrades the
    // response in-band, never the status code.
    match serde_json::to_string(&decision) {
        Ok(payload) => {
            let key = decision
                .transaction_id
                .clone()
                .unwrap_or_else(|| decision.decision_id.clone());
            if let Err(e) = state.bus.publish(&key, &payload).await {
                warn!(error = %e, "monitoring decision publish failed");
                state.metrics.increment_publish_failure();
                decision.record_fault(
                    EngineMode::Degraded,
                    EngineErrorCode::EventPublishFailed,
                    "failed to publish decision event",
                );
            } else {
                state.metrics.record_publish_success(0);
            }
        }
        Err(e) => warn!(error = %e, "monitoring decision not serializable"),
    }

    state.metrics.record_latency(start);
    (StatusCode::OK, Json(decision)).into_response()
}

/// Load and register a ruleset (no monotonicity check).
async fn handle_load(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoadRulesetRequest>,
) -> axum::response::Response {
    if request.key.is_empty() || request.version == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::invalid_request(
                "key is required and version must be positive",
            )),
        )
            .into_response();
    }

    let country = request.country.as_deref();
    match state
        .registry
        .load_and_register(country, &request.key, request.version)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(LoadRulesetResponse {
                success: true,
                key: request.key,
                version: request.version,
                country: country.unwrap_or("global").to_string(),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(e.to_string(), "LOAD_FAILED")),
        )
            .into_response(),
    }
}

/// Bulk-load rulesets (startup warm-up).
async fn handle_bulk_load(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BulkLoadRequest>,
) -> axum::response::Response {
    if request.rulesets.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::invalid_request("rulesets list is required")),
        )
            .into_response();
    }

    let requested = request.rulesets.len();
    let loaded = state.registry.bulk_load(&request.rulesets).await;
    info!(loaded, requested, "bulk load completed");

    (StatusCode::OK, Json(BulkLoadResponse { loaded, requested })).into_response()
}

/// Atomically hot-swap a ruleset to a newer version.
async fn handle_hot_swap(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HotSwapRequest>,
) -> axum::response::Response {
    if request.key.is_empty() || request.version == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::invalid_request(
                "key is required and version must be positive",
            )),
        )
            .into_response();
    }

    let result = state
        .registry
        .hot_swap(request.country.as_deref(), &request.key, request.version)
        .await;

    let response = HotSwapResponse::from_result(&result, request.version);
    if result.success {
        (StatusCode::OK, Json(response)).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(response)).into_response()
    }
}

async fn handle_registry_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(RegistryStatusResponse {
        total_rulesets: state.registry.size(),
        countries: state.registry.countries().len(),
        storage_accessible: state.registry.source_available().await,
    })
}

async fn handle_country_rulesets(
    State(state): State<Arc<AppState>>,
    Path(country): Path<String>,
) -> impl IntoResponse {
    let mut keys: Vec<String> = state.registry.ruleset_keys(&country).into_iter().collect();
    keys.sort();
    Json(CountryRulesetsResponse { country, keys })
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "UP".to_string(),
        version: state.version.clone(),
        storage_accessible: state.registry.source_available().await,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn handle_ready(State(state): State<Arc<AppState>>) -> axum::response::Response {
    let loaded = state.registry.size();
    if loaded == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("no rulesets loaded", "NOT_READY")),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        Json(ReadyResponse {
            ready: true,
            rulesets_loaded: loaded,
        }),
    )
        .into_response()
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        state.metrics.to_prometheus(),
    )
}
