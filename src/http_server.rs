//! HTTP server implementation using Axum.

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::ApiError;
use crate::orchestrator::{ExecutionRequest, ExecutionResult};
use crate::state::AppState;
use crate::store::{ExecutionLogEntry, HealthCheckRecord};

/// Number of entries `GET /api/executions` returns.
pub const RECENT_EXECUTIONS_LIMIT: u32 = 10;

const CODE_PREVIEW_CHARS: usize = 100;

#[derive(Deserialize)]
struct CreateStatusRequest {
    client_name: String,
}

#[derive(Serialize)]
struct ExecutionsResponse {
    executions: Vec<ExecutionLogEntry>,
}

/// Builds the router with all routes, CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api", get(root))
        .route("/api/", get(root))
        .route("/api/status", post(create_status).get(list_status))
        .route("/api/execute", post(execute))
        .route("/api/executions", get(list_executions))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server on the given port until `shutdown` resolves.
pub async fn run_server(
    port: u16,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> &'static str {
    "OK"
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Hello World" }))
}

async fn create_status(
    State(state): State<AppState>,
    Json(req): Json<CreateStatusRequest>,
) -> Result<Json<HealthCheckRecord>, ApiError> {
    let record = state
        .store
        .create_health_check(&req.client_name)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create status check");
            ApiError::new(format!("Failed to create status check: {}", e))
        })?;
    info!(id = %record.id, client_name = %record.client_name, "Status check recorded");
    Ok(Json(record))
}

async fn list_status(
    State(state): State<AppState>,
) -> Result<Json<Vec<HealthCheckRecord>>, ApiError> {
    let records = state.store.list_health_checks().await.map_err(|e| {
        error!(error = %e, "Failed to list status checks");
        ApiError::new(format!("Failed to fetch status checks: {}", e))
    })?;
    Ok(Json(records))
}

async fn execute(
    State(state): State<AppState>,
    Json(req): Json<ExecutionRequest>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let preview: String = req.code.chars().take(CODE_PREVIEW_CHARS).collect();
    info!(language = %req.language, code = %preview, "POST /api/execute");

    let result = state.orchestrator.execute(&req).await?;
    Ok(Json(result))
}

async fn list_executions(
    State(state): State<AppState>,
) -> Result<Json<ExecutionsResponse>, ApiError> {
    let executions = state
        .store
        .list_recent_executions(RECENT_EXECUTIONS_LIMIT)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to fetch execution history");
            ApiError::new(format!("Failed to fetch execution history: {}", e))
        })?;
    Ok(Json(ExecutionsResponse { executions }))
}
