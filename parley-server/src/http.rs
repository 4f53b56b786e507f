//! Parley HTTP REST API
//!
//! Axum-based HTTP server that exposes chat submission and feedback over
//! HTTP. Runs alongside the Unix socket IPC server on port 8787
//! (configurable).
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a
//! pure inner function. The inner functions are directly testable without
//! axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health             — provider/sink status
//! - GET  /version            — server version info
//! - POST /chat               — submit a prompt, get the assistant reply
//! - POST /feedback           — thumbs up/down for a turn
//! - GET  /history/:session   — session transcript
//! - POST /reset              — drop a session

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use parley_core::config::HttpConfig;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::sessions::SessionRegistry;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub registry: Arc<SessionRegistry>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/chat", post(chat_handler))
        .route("/feedback", post(feedback_handler))
        .route("/history/:session", get(history_handler))
        .route("/reset", post(reset_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    registry: Arc<SessionRegistry>,
    config: HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = HttpState { registry };

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Parley HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub session: Option<String>,
    pub provider: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequestBody {
    pub session: Option<String>,
    pub turn: Option<usize>,
    /// Raw front-end value; normalized totally downstream.
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequestBody {
    pub session: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

fn error_body(msg: &str) -> serde_json::Value {
    serde_json::to_value(ErrorResponse::new(msg)).unwrap_or_default()
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — reports provider and sink status.
pub async fn health_inner(registry: &SessionRegistry) -> (StatusCode, serde_json::Value) {
    let body = serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": registry.provider_names(),
        "default_provider": registry.default_provider(),
        "trace_sink": registry.sink_configured(),
        "sessions": registry.session_count().await,
    });
    (StatusCode::OK, body)
}

/// Inner chat submission — validates, then drives one prompt through the
/// session's engine.
pub async fn chat_inner(
    registry: &SessionRegistry,
    request: ChatRequestBody,
) -> (StatusCode, serde_json::Value) {
    let Some(session) = request.session.filter(|s| !s.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, error_body("Missing session"));
    };

    let prompt = match request.prompt {
        Some(p) if !p.trim().is_empty() => p,
        _ => return (StatusCode::BAD_REQUEST, error_body("Missing prompt")),
    };

    match registry
        .submit(&session, request.provider.as_deref(), &prompt)
        .await
    {
        Ok(reply) => (
            StatusCode::OK,
            serde_json::json!({
                "session": session,
                "reply": reply.reply,
                "turn_index": reply.turn_index,
                "trace_id": reply.trace_id,
            }),
        ),
        Err(e) => (StatusCode::NOT_FOUND, error_body(&e.to_string())),
    }
}

/// Inner feedback submission. Stale sessions and indices answer 200 with
/// `recorded: false` — feedback is never an error surface.
pub async fn feedback_inner(
    registry: &SessionRegistry,
    request: FeedbackRequestBody,
) -> (StatusCode, serde_json::Value) {
    let Some(session) = request.session.filter(|s| !s.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, error_body("Missing session"));
    };

    let Some(turn) = request.turn else {
        return (StatusCode::BAD_REQUEST, error_body("Missing turn"));
    };

    let reply = registry.feedback(&session, turn, &request.value).await;

    (
        StatusCode::OK,
        serde_json::json!({
            "session": session,
            "turn": turn,
            "recorded": reply.recorded,
            "scored": reply.scored,
        }),
    )
}

/// Inner history lookup — unknown sessions yield an empty transcript.
pub async fn history_inner(
    registry: &SessionRegistry,
    session: &str,
) -> (StatusCode, serde_json::Value) {
    let body = match registry.history(session).await {
        Some(conversation) => serde_json::json!({
            "session": session,
            "provider": conversation.provider,
            "model": conversation.model,
            "turns": conversation.turns.iter().collect::<Vec<_>>(),
        }),
        None => serde_json::json!({
            "session": session,
            "turns": [],
        }),
    };
    (StatusCode::OK, body)
}

/// Inner session reset.
pub async fn reset_inner(
    registry: &SessionRegistry,
    request: ResetRequestBody,
) -> (StatusCode, serde_json::Value) {
    let Some(session) = request.session.filter(|s| !s.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, error_body("Missing session"));
    };

    let reset = registry.reset(&session).await;
    (StatusCode::OK, serde_json::json!({ "reset": reset }))
}

// ============================================================================
// Thin axum handlers
// ============================================================================

async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.registry).await;
    (status, Json(body))
}

async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "parley/1",
    }))
}

async fn chat_handler(
    State(state): State<HttpState>,
    Json(request): Json<ChatRequestBody>,
) -> impl IntoResponse {
    let (status, body) = chat_inner(&state.registry, request).await;
    (status, Json(body))
}

async fn feedback_handler(
    State(state): State<HttpState>,
    Json(request): Json<FeedbackRequestBody>,
) -> impl IntoResponse {
    let (status, body) = feedback_inner(&state.registry, request).await;
    (status, Json(body))
}

async fn history_handler(
    State(state): State<HttpState>,
    Path(session): Path<String>,
) -> impl IntoResponse {
    let (status, body) = history_inner(&state.registry, &session).await;
    (status, Json(body))
}

async fn reset_handler(
    State(state): State<HttpState>,
    Json(request): Json<ResetRequestBody>,
) -> impl IntoResponse {
    let (status, body) = reset_inner(&state.registry, request).await;
    (status, Json(body))
}
