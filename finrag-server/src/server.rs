use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use finrag_rag::{OrchestratorState, RagOrchestrator};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;
use crate::protocol::{QueryRequest, QueryResponse, ReadinessBody};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RagOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<RagOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on handling one request, provider calls included.
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout: Duration::from_secs(180),
            max_body_bytes: 64 * 1024,
        }
    }
}

pub fn app_router(state: AppState, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/query", post(query))
        .route("/admin/reload", post(reload))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Load the retrieval backend, then serve until Ctrl-C.
///
/// A failed load does not stop the server: it starts degraded and answers
/// queries with 503 until `/admin/reload` succeeds.
pub async fn run_server(state: AppState, config: ServerConfig) -> anyhow::Result<()> {
    let initial = state.orchestrator.initialize().await;
    info!(state = ?initial, "orchestrator initialized");

    let app = app_router(state, &config);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "finrag listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("finrag stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "OK"}))
}

fn readiness(state: &OrchestratorState) -> (StatusCode, Json<ReadinessBody>) {
    let status = match state {
        OrchestratorState::Ready => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(ReadinessBody::from(state)))
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    readiness(&state.orchestrator.state().await)
}

async fn reload(State(state): State<AppState>) -> impl IntoResponse {
    readiness(&state.orchestrator.reinitialize().await)
}

async fn query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let question = request.question.trim();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }

    let answer = state.orchestrator.query(question).await?;
    Ok(Json(QueryResponse::from(answer)))
}
