//! aivis HTTP REST API
//!
//! Axum-based HTTP server exposing monitoring runs and query generation.
//! Runs alongside the Unix socket IPC server on port 8766 (configurable).
//!
//! Each endpoint is a thin axum handler over an inner function that builds
//! the matching `AivisRequest` and maps the router's response to HTTP.
//!
//! Endpoints:
//! - GET  /health                   health check with store status
//! - GET  /version                  server version info
//! - POST /runs                     start or continue a monitoring run
//! - GET  /runs                     recent runs
//! - GET  /runs/:id                 run status and metrics
//! - POST /runs/:id/stop            stop a running run
//! - POST /topics/:id/generate      generate queries for every persona of a topic
//! - POST /topics/:id/personas      process one persona slice

use std::sync::Arc;
use std::time::Instant;

use aivis_core::ipc::{AivisRequest, AivisResponse, RunMode};
use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::router::{self, AppContext};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub ctx: Arc<AppContext>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/runs", post(start_run_handler).get(list_runs_handler))
        .route("/runs/:id", get(run_status_handler))
        .route("/runs/:id/stop", post(stop_run_handler))
        .route("/topics/:id/generate", post(generate_topic_handler))
        .route("/topics/:id/personas", post(process_personas_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(ctx: Arc<AppContext>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.http.host, ctx.config.http.port);
    let state = Arc::new(HttpState { ctx });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("aivis HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct StartRunRequest {
    /// "chat" (default) or "aio"
    pub mode: Option<String>,
    pub offset: Option<i64>,
    pub run_id: Option<i64>,
    pub max_pages: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListRunsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct GenerateRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct PersonaBatchRequest {
    #[serde(default)]
    pub start: usize,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(ctx: &AppContext) -> (StatusCode, serde_json::Value) {
    let response = router::handle_request(AivisRequest::Health, ctx).await;
    match response_to_http(response) {
        Ok(mut data) => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("version".to_string(), serde_json::json!(env!("CARGO_PKG_VERSION")));
                obj.insert("socket".to_string(), serde_json::json!(ctx.config.service.socket_path));
            }
            (StatusCode::OK, data)
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e,
            }),
        ),
    }
}

/// Pure, no IO.
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "aivis/1",
    })
}

pub async fn start_run_inner(ctx: &AppContext, req: StartRunRequest) -> (StatusCode, serde_json::Value) {
    let mode = match req.mode.as_deref() {
        None => RunMode::default(),
        Some(m) => match RunMode::parse(m) {
            Some(mode) => mode,
            None => return bad_request(format!("unknown mode '{m}' (expected chat or aio)")),
        },
    };
    if req.offset.is_some_and(|o| o < 0) {
        return bad_request("offset must be >= 0");
    }

    let start = Instant::now();
    let request = AivisRequest::RunMonitoring {
        mode,
        offset: req.offset.unwrap_or(0),
        run_id: req.run_id,
        max_pages: req.max_pages,
    };
    let response = router::handle_request(request, ctx).await;
    let took_ms = start.elapsed().as_millis() as u64;

    match response_to_http(response) {
        Ok(mut data) => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("took_ms".to_string(), serde_json::json!(took_ms));
            }
            (StatusCode::OK, data)
        }
        Err(e) => internal_error(e),
    }
}

pub async fn list_runs_inner(ctx: &AppContext, query: ListRunsQuery) -> (StatusCode, serde_json::Value) {
    dispatch(ctx, AivisRequest::ListRuns { limit: query.limit }).await
}

pub async fn run_status_inner(ctx: &AppContext, run_id: i64) -> (StatusCode, serde_json::Value) {
    let (status, body) = dispatch(ctx, AivisRequest::RunStatus { run_id }).await;
    not_found_if_missing(status, body)
}

pub async fn stop_run_inner(ctx: &AppContext, run_id: i64) -> (StatusCode, serde_json::Value) {
    let (status, body) = dispatch(ctx, AivisRequest::StopRun { run_id }).await;
    not_found_if_missing(status, body)
}

pub async fn generate_topic_inner(
    ctx: &AppContext,
    topic_id: i64,
    req: GenerateRequest,
) -> (StatusCode, serde_json::Value) {
    let (status, body) = dispatch(
        ctx,
        AivisRequest::GenerateTopic {
            topic_id,
            force: req.force,
        },
    )
    .await;
    if status == StatusCode::OK && body["cooldown_remaining_secs"].is_number() {
        return (StatusCode::TOO_MANY_REQUESTS, body);
    }
    not_found_if_missing(status, body)
}

pub async fn process_personas_inner(
    ctx: &AppContext,
    topic_id: i64,
    req: PersonaBatchRequest,
) -> (StatusCode, serde_json::Value) {
    let (status, body) = dispatch(
        ctx,
        AivisRequest::ProcessTopicPersonas {
            topic_id,
            start: req.start,
        },
    )
    .await;
    not_found_if_missing(status, body)
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.ctx).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn start_run_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<StartRunRequest>,
) -> impl IntoResponse {
    let (status, body) = start_run_inner(&state.ctx, req).await;
    (status, Json(body))
}

pub async fn list_runs_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<ListRunsQuery>,
) -> impl IntoResponse {
    let (status, body) = list_runs_inner(&state.ctx, query).await;
    (status, Json(body))
}

pub async fn run_status_handler(State(state): State<Arc<HttpState>>, Path(id): Path<i64>) -> impl IntoResponse {
    let (status, body) = run_status_inner(&state.ctx, id).await;
    (status, Json(body))
}

pub async fn stop_run_handler(State(state): State<Arc<HttpState>>, Path(id): Path<i64>) -> impl IntoResponse {
    let (status, body) = stop_run_inner(&state.ctx, id).await;
    (status, Json(body))
}

pub async fn generate_topic_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<i64>,
    body: Option<Json<GenerateRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = generate_topic_inner(&state.ctx, id, req).await;
    (status, Json(body))
}

pub async fn process_personas_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<i64>,
    body: Option<Json<PersonaBatchRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = process_personas_inner(&state.ctx, id, req).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Convert an IPC `AivisResponse` into an HTTP body value, or an error string.
pub fn response_to_http(response: AivisResponse) -> std::result::Result<serde_json::Value, String> {
    if response.status == "ok" {
        Ok(response.data.unwrap_or(serde_json::json!({})))
    } else {
        Err(response.error.unwrap_or_else(|| "unknown error".to_string()))
    }
}

async fn dispatch(ctx: &AppContext, request: AivisRequest) -> (StatusCode, serde_json::Value) {
    match response_to_http(router::handle_request(request, ctx).await) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => internal_error(e),
    }
}

fn not_found_if_missing(status: StatusCode, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let missing = body["error"].as_str().is_some_and(|e| e.ends_with("not found"));
    if status == StatusCode::INTERNAL_SERVER_ERROR && missing {
        (StatusCode::NOT_FOUND, body)
    } else {
        (status, body)
    }
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::BAD_REQUEST,
        serde_json::json!({
            "error": msg.into(),
            "status": "error",
        }),
    )
}

fn internal_error(msg: String) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        serde_json::json!({
            "error": msg,
            "status": "error",
        }),
    )
}

// ============================================================================
// Unit Tests
// ============================================================================
