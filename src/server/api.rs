//! Management HTTP API.
//!
//! Endpoints:
//! - GET /api — server info
//! - GET /api/status — aggregated engine status
//! - GET /api/hardware — latest hardware snapshot
//! - GET /api/layers — per-layer summaries
//! - POST /api/layers/transfer — queue a tier move (202 + ticket)

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::PlacementEngine;
use crate::error::EngineError;
use crate::registry::layer::{LayerId, Tier};

/// Application state shared across handlers.
pub struct AppState {
    pub engine: Arc<PlacementEngine>,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api", get(server_info))
        .route("/api/status", get(status))
        .route("/api/hardware", get(hardware))
        .route("/api/layers", get(list_layers))
        .route("/api/layers/transfer", post(submit_transfer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Rejection payload: a machine-checkable kind plus a human reason.
#[derive(Debug, Serialize)]
struct ApiError {
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn from_engine(err: &EngineError) -> (StatusCode, Json<ApiError>) {
        let status = match err {
            EngineError::UnknownLayer(_) => StatusCode::NOT_FOUND,
            EngineError::QueueFull { .. }
            | EngineError::TierUnavailable(_)
            | EngineError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::CapacityExceeded { .. } | EngineError::DuplicateLayer(_) => {
                StatusCode::CONFLICT
            }
            EngineError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ApiError {
                kind: err.kind(),
                message: err.to_string(),
            }),
        )
    }
}

async fn server_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.engine.get_status().await;
    Json(json!({
        "name": "tensor-tier",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": report.uptime_secs,
        "layer_count": report.layer_count,
        "endpoints": [
            "/api",
            "/api/status",
            "/api/hardware",
            "/api/layers",
            "/api/layers/transfer",
        ],
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.get_status().await)
}

async fn hardware(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.hardware())
}

async fn list_layers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let layers = state.engine.list_layers();
    Json(json!({
        "count": layers.len(),
        "layers": layers,
    }))
}

#[derive(Debug, Deserialize)]
struct TransferBody {
    layer_id: LayerId,
    destination_tier: Tier,
    #[serde(default)]
    priority: Option<u8>,
}

#[derive(Debug, Serialize)]
struct TransferAccepted {
    request_id: uuid::Uuid,
    layer_id: LayerId,
    destination_tier: Tier,
    queued_position: usize,
}

async fn submit_transfer(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TransferBody>,
) -> Response {
    match state
        .engine
        .request_transfer(body.layer_id, body.destination_tier, body.priority, None)
    {
        Ok(ticket) => {
            info!(
                layer_id = body.layer_id,
                destination = %body.destination_tier,
                request_id = %ticket.request_id,
                "Transfer accepted"
            );
            (
                StatusCode::ACCEPTED,
                Json(TransferAccepted {
                    request_id: ticket.request_id,
                    layer_id: body.layer_id,
                    destination_tier: body.destination_tier,
                    queued_position: ticket.queued_position,
                }),
            )
                .into_response()
        }
        Err(err) => ApiError::from_engine(&err).into_response(),
    }
}
