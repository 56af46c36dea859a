//! HTTP server and API endpoints for the faucet gate.

use crate::{
    clock::{parse_utc_offset, SystemClock},
    config::{GateConfig, StorageBackend},
    error::{GateError, GateResult},
    gate::{Decision, DisbursementGate, QuotaDimension, QuotaLimits, QuotaUsage},
    record::{parse_timestamp, Claim, DisbursementRecord},
    scorer::{ensure_min_score, PassportScorer, ScoreOracle},
    store::{MemoryStore, RecordStore, SledStore},
    transfer::{EvmTransfer, TransferExecutor},
};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct SharedState {
    pub gate: Arc<DisbursementGate>,
    pub executor: Option<Arc<dyn TransferExecutor>>,
    pub scorer: Option<Arc<dyn ScoreOracle>>,
    pub min_score: f64,
    pub transfer_timeout: Duration,
}

/// Body of `/faucet/check` and `/faucet/claim`.
///
/// Field aliases keep the original frontend's payload working.
#[derive(Debug, Default, Deserialize)]
pub struct ClaimRequest {
    #[serde(default, alias = "pass_port_address")]
    pub identity_address: Option<String>,
    #[serde(default, alias = "receive_address")]
    pub destination_address: Option<String>,
    #[serde(default, alias = "receive_amount")]
    pub amount: Option<serde_json::Value>,
}

impl ClaimRequest {
    fn to_claim(&self) -> GateResult<Claim> {
        Claim::from_parts(
            self.identity_address.as_deref(),
            self.destination_address.as_deref(),
            self.amount.as_ref(),
        )
    }
}

/// Body of `/faucet/add`
#[derive(Debug, Default, Deserialize)]
pub struct AddRequest {
    #[serde(flatten)]
    pub claim: ClaimRequest,
    #[serde(default, alias = "receive_time")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub identity_address: Option<String>,
    pub destination_address: Option<String>,
}

/// Default and upper bound for `GET /faucet/history?limit=`
const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub address: Option<String>,
    #[serde(default)]
    pub dimension: Option<QuotaDimension>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub dimension: QuotaDimension,
    pub address: String,
    pub records: Vec<DisbursementRecord>,
}

/// Response after a successful add or claim
#[derive(Debug, Serialize)]
pub struct AddedResponse {
    pub successful: bool,
    pub added: DisbursementRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage_available: bool,
    pub records: Option<usize>,
    pub active_lock_keys: Option<usize>,
    pub transfer_configured: bool,
    pub scorer_configured: bool,
}

fn log_failure(context: &str, e: &GateError) {
    if e.is_rejection() {
        info!("{} rejected: {}", context, e);
    } else {
        error!("{} failed: {}", context, e);
    }
}

/// `/faucet/check` replies with `{success, message}`
fn check_failure(e: GateError) -> Response {
    log_failure("Eligibility check", &e);
    let body = json!({ "success": false, "message": e.public_message() });
    (e.status_code(), Json(body)).into_response()
}

/// `/faucet/add` and `/faucet/claim` reply with `{successful, error}`
fn add_failure(context: &str, e: GateError) -> Response {
    log_failure(context, &e);
    let body = json!({ "successful": false, "error": e.public_message() });
    (e.status_code(), Json(body)).into_response()
}

fn body_error(rejection: JsonRejection) -> GateError {
    GateError::InvalidArgument(format!("invalid request body: {}", rejection.body_text()))
}

/// Create the HTTP router with all endpoints
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/faucet/check", post(check_eligibility))
        .route("/faucet/add", post(add_disbursement))
        .route("/faucet/claim", post(claim))
        .route("/faucet/usage", get(usage))
        .route("/faucet/history", get(history))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Root endpoint - provides basic information
async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": "Faucet Gate",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /faucet/check": "Check a claim against the daily quotas (identity_address, destination_address, amount)",
            "POST /faucet/add": "Record a completed disbursement (identity_address, destination_address, amount, timestamp?)",
            "POST /faucet/claim": "Check, transfer and record in one step",
            "GET /faucet/usage": "Today's usage (identity_address, destination_address)",
            "GET /faucet/history": "Recorded disbursements, newest first (address, dimension?, limit?)",
            "GET /health": "Health check",
        }
    }))
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let stats = state.gate.stats();
    if let Err(e) = &stats {
        warn!("Health check could not read storage: {}", e);
    }
    let stats = stats.ok();

    let response = HealthResponse {
        status: if stats.is_some() { "healthy" } else { "degraded" }.to_string(),
        storage_available: stats.is_some(),
        records: stats.as_ref().map(|s| s.records),
        active_lock_keys: stats.as_ref().map(|s| s.active_lock_keys),
        transfer_configured: state.executor.is_some(),
        scorer_configured: state.scorer.is_some(),
    };

    debug!("Health check completed: {:?}", response);
    Json(response)
}

/// Check a claim against today's quotas
async fn check_eligibility(
    State(state): State<SharedState>,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> Response {
    let claim = match payload.map_err(body_error).and_then(|Json(r)| r.to_claim()) {
        Ok(claim) => claim,
        Err(e) => return check_failure(e),
    };

    info!(
        "Check request: {} -> {} amount {}",
        claim.identity_address(),
        claim.destination_address(),
        claim.amount()
    );

    match state.gate.check_eligibility(&claim).await {
        Ok(Decision::Admitted) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "allow to get token, pass limit check",
            })),
        )
            .into_response(),
        Ok(Decision::Rejected(rejection)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "message": rejection.to_string(),
                "reason": rejection.reason(),
                "would_be_total": rejection.would_be_total,
                "limit": rejection.limit,
            })),
        )
            .into_response(),
        Err(e) => check_failure(e),
    }
}

/// Record a disbursement the caller has already completed
async fn add_disbursement(
    State(state): State<SharedState>,
    payload: Result<Json<AddRequest>, JsonRejection>,
) -> Response {
    let parsed = payload.map_err(body_error).and_then(|Json(r)| {
        let claim = r.claim.to_claim()?;
        let timestamp = parse_timestamp(r.timestamp.as_deref())?;
        Ok((claim, timestamp))
    });
    let (claim, timestamp) = match parsed {
        Ok(parsed) => parsed,
        Err(e) => return add_failure("Add", e),
    };

    match state.gate.record_disbursement(&claim, timestamp, None).await {
        Ok(record) => Json(AddedResponse {
            successful: true,
            added: record,
            transaction_hash: None,
        })
        .into_response(),
        Err(e) => add_failure("Add", e),
    }
}

/// Check, transfer and record in one critical section
async fn claim(
    State(state): State<SharedState>,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> Response {
    match run_claim(&state, payload).await {
        Ok(record) => {
            let transaction_hash = record.transaction_hash.clone();
            Json(AddedResponse {
                successful: true,
                added: record,
                transaction_hash,
            })
            .into_response()
        }
        Err(e) => add_failure("Claim", e),
    }
}

async fn run_claim(
    state: &SharedState,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> GateResult<DisbursementRecord> {
    let Json(request) = payload.map_err(body_error)?;
    let claim = request.to_claim()?;

    let executor = state
        .executor
        .as_ref()
        .ok_or(GateError::TransferNotConfigured)?;
    executor.validate_destination(claim.destination_address())?;

    info!(
        "Claim request: {} -> {} amount {}",
        claim.identity_address(),
        claim.destination_address(),
        claim.amount()
    );

    if let Some(scorer) = &state.scorer {
        ensure_min_score(scorer.as_ref(), claim.identity_address(), state.min_score).await?;
    }

    state
        .gate
        .claim(&claim, executor.as_ref(), state.transfer_timeout)
        .await
}

/// Today's used and remaining quota
async fn usage(
    State(state): State<SharedState>,
    Query(query): Query<UsageQuery>,
) -> GateResult<Json<QuotaUsage>> {
    let identity = query.identity_address.unwrap_or_default();
    let destination = query.destination_address.unwrap_or_default();
    // Validates both addresses; the amount is irrelevant here
    let addresses = Claim::new(&identity, &destination, 1)?;

    let usage = state
        .gate
        .usage(addresses.identity_address(), addresses.destination_address())
        .await?;
    Ok(Json(usage))
}

/// Recorded disbursements for one address
async fn history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> GateResult<Json<HistoryResponse>> {
    let address = query.address.as_deref().map(str::trim).unwrap_or_default();
    if address.is_empty() {
        return Err(GateError::InvalidArgument("address cannot be empty".to_string()));
    }
    let dimension = query.dimension.unwrap_or(QuotaDimension::Identity);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let records = state.gate.history(dimension, address, limit).await?;
    Ok(Json(HistoryResponse {
        dimension,
        address: address.to_string(),
        records,
    }))
}

/// Build the gate and its collaborators from configuration
pub fn build_state(config: &GateConfig) -> GateResult<SharedState> {
    let store: Arc<dyn RecordStore> = match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; disbursement records are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::Sled => Arc::new(SledStore::open(&config.storage.path)?),
    };

    let offset = parse_utc_offset(&config.quota.window_timezone_or_offset)?;
    let gate = Arc::new(DisbursementGate::new(
        store,
        Arc::new(SystemClock),
        offset,
        QuotaLimits {
            per_identity: config.quota.daily_limit_per_identity,
            per_destination: config.quota.daily_limit_per_destination,
        },
    ));

    let executor: Option<Arc<dyn TransferExecutor>> = if config.transfer.enabled {
        let executor = EvmTransfer::new(&config.transfer)?;
        info!("Transfers enabled from faucet address {}", executor.faucet_address());
        Some(Arc::new(executor))
    } else {
        None
    };

    let scorer: Option<Arc<dyn ScoreOracle>> = if config.scorer.enabled {
        Some(Arc::new(PassportScorer::new(&config.scorer)?))
    } else {
        None
    };

    Ok(SharedState {
        gate,
        executor,
        scorer,
        min_score: config.scorer.min_score,
        transfer_timeout: Duration::from_secs(config.transfer.timeout_secs),
    })
}

/// Start the HTTP server
pub async fn start_server(config: &GateConfig) -> GateResult<()> {
    info!("Starting faucet gate...");

    let shared_state = build_state(config)?;

    if let Some(executor) = &shared_state.executor {
        info!("Testing transfer RPC connection...");
        executor.health_check().await?;
    }

    // Start lock pruning task
    let prune_gate = shared_state.gate.clone();
    let prune_interval = config.http.lock_prune_interval_minutes.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(prune_interval * 60));

        loop {
            interval.tick().await;
            prune_gate.prune_idle_locks();
        }
    });

    let app = create_router(shared_state);

    let bind_addr = format!("{}:{}", config.http.bind_address, config.http.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| GateError::Internal(anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e)))?;

    info!("Faucet gate listening on {}", bind_addr);
    info!("Endpoints:");
    info!("  GET  /              - Server information");
    info!("  GET  /health        - Health check");
    info!("  POST /faucet/check  - Check daily quotas");
    info!("  POST /faucet/add    - Record a disbursement");
    info!("  POST /faucet/claim  - Check, transfer and record");
    info!("  GET  /faucet/usage  - Today's usage");
    info!("  GET  /faucet/history - Recorded disbursements");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await
        .map_err(|e| GateError::Internal(anyhow::anyhow!("Server error: {}", e)))?;

    Ok(())
}
