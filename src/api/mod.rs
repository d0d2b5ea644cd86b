//! HTTP API for health checks, swap submission and record inspection

use crate::chain::LedgerRpc;
use crate::config::ApiConfig;
use crate::coordination::{SwapOrchestrator, SwapRequest};
use crate::error::{RelayerError, RelayerResult};
use crate::metrics;
use crate::state::{AtomicTxRecord, AtomicTxState, Store, StoreStats, SwapRecord};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub orchestrator: Arc<SwapOrchestrator>,
    pub ledger: Arc<dyn LedgerRpc>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .route("/swaps", post(create_swap))
        .route("/swaps/:id", get(get_swap))
        .route("/transactions/:id", get(get_transaction))
        .route("/transactions/:id/cancel", post(cancel_transaction))
        .route("/transactions/:id/reject", post(reject_transaction))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> RelayerResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(format!("bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("api server: {}", e)))?;

    Ok(())
}

/// Error body returned by every failing handler
struct ApiError(RelayerError);

impl From<RelayerError> for ApiError {
    fn from(e: RelayerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RelayerError::NotFound { .. } => StatusCode::NOT_FOUND,
            RelayerError::IllegalTransition { .. } | RelayerError::StaleState { .. } => {
                StatusCode::CONFLICT
            }
            RelayerError::UnknownKey(_) | RelayerError::Build(_) => StatusCode::BAD_REQUEST,
            RelayerError::RemoteUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("API request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify the store and the node
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.store.health_check().await.is_ok();
    let ledger = state.ledger.health_check().await;
    let ready = database && ledger;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            database,
            ledger,
        }),
    )
}

/// Record counts per state
async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<StoreStats>> {
    let stats = state.store.stats().await?;
    metrics::record_state_counts(&stats);
    Ok(Json(stats))
}

async fn create_swap(
    State(state): State<AppState>,
    Json(request): Json<SwapRequest>,
) -> ApiResult<(StatusCode, Json<SwapRecord>)> {
    let swap = state.orchestrator.create_swap(&request).await?;
    Ok((StatusCode::CREATED, Json(swap)))
}

async fn get_swap(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SwapRecord>> {
    Ok(Json(state.store.get_swap(id).await?))
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AtomicTxRecord>> {
    Ok(Json(state.store.get_atomic_tx(id).await?))
}

async fn cancel_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AtomicTxRecord>> {
    withdraw(&state, id, AtomicTxRecord::cancel).await
}

async fn reject_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AtomicTxRecord>> {
    withdraw(&state, id, AtomicTxRecord::reject).await
}

/// Apply an operator transition to a `New` record
async fn withdraw(
    state: &AppState,
    id: Uuid,
    transition: fn(&mut AtomicTxRecord) -> RelayerResult<()>,
) -> ApiResult<Json<AtomicTxRecord>> {
    let mut tx = state.store.get_atomic_tx(id).await?;
    transition(&mut tx)?;
    state.store.update_atomic_tx(&tx, AtomicTxState::New).await?;

    metrics::record_transition("atomic_tx", tx.state().as_str());
    info!("Atomic transaction {} {} by operator", id, tx.state());
    Ok(Json(tx))
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    ledger: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
