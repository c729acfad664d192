//! Web API server: axum router over TCP.
//!
//! Every `/api/*` route sits behind the `X-API-Key` guard. Chat requests go
//! through the gateway's admission check before the completion provider is
//! called, so a rejected request never costs a provider call.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use codegate_core::domain::SessionId;
use codegate_core::gateway::Gateway;
use codegate_core::ports::{CompletionPort, FALLBACK_REPLY};
use codegate_core::Error;

use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared state for all route handlers.
pub struct WebState {
    pub gateway: Arc<Gateway>,
    pub completion: Arc<dyn CompletionPort>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub protected: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RedeemRequest {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemResponse {
    pub session_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub remaining: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryItem {
    pub message: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<HistoryItem>,
}

/// Build the axum router with all web routes.
pub fn router(state: Arc<WebState>) -> Router {
    let api = Router::new()
        .route("/redeem", post(handle_redeem))
        .route("/chat", post(handle_chat))
        .route("/history/{session_id}", get(handle_history))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(handle_health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` is cancelled.
pub async fn serve(
    addr: &str,
    state: Arc<WebState>,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    let local: SocketAddr = listener.local_addr()?;
    info!(addr = %local, "web api listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("web api shutting down");
        })
        .await
}

async fn require_api_key(
    State(state): State<Arc<WebState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if !state.gateway.verify_api_key(presented) {
        tracing::warn!(path = %request.uri().path(), "rejected request without valid api key");
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        protected: true,
    })
}

async fn handle_redeem(
    State(state): State<Arc<WebState>>,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, ApiError> {
    let session_id = state.gateway.redeem_code(&req.code).await?;
    Ok(Json(RedeemResponse {
        session_id: session_id.0,
    }))
}

async fn handle_chat(
    State(state): State<Arc<WebState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::EmptyMessage);
    }
    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .map(SessionId)
        .ok_or(Error::SessionNotFound)?;

    let admission = state
        .gateway
        .admit_request(&session_id)
        .await
        .map_err(|e| ApiError::with_session(e, &session_id))?;

    let response = match state.completion.complete(message).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(error = %e, "completion failed");
            FALLBACK_REPLY.to_string()
        }
    };

    state
        .gateway
        .transcripts()
        .record(&session_id, message, &response)
        .await?;

    Ok(Json(ChatResponse {
        response,
        session_id: session_id.0,
        timestamp: Utc::now(),
        remaining: admission.remaining,
    }))
}

async fn handle_history(
    State(state): State<Arc<WebState>>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let entries = state
        .gateway
        .transcripts()
        .history(&SessionId(session_id))
        .await?;

    Ok(Json(HistoryResponse {
        history: entries
            .into_iter()
            .map(|e| HistoryItem {
                message: e.message,
                response: e.response,
                timestamp: e.created_at,
            })
            .collect(),
    }))
}
