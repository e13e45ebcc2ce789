//! HTTP route handlers for the API.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info};

use relay_common::RelayError;
use relay_coordinator::{TurnRequest, TurnResponse};
use relay_mcp::{DiscoveryReport, Liveness};

use crate::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub capabilities: usize,
    pub providers: Vec<ProviderHealth>,
}

#[derive(Debug, Serialize)]
pub struct ProviderHealth {
    pub id: String,
    pub liveness: Liveness,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let aggregator = state.coordinator.aggregator();
    let snapshot = aggregator.snapshot().await;

    let providers = aggregator
        .providers()
        .iter()
        .map(|p| ProviderHealth {
            id: p.id.clone(),
            liveness: p.liveness(),
        })
        .collect();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        capabilities: snapshot.len(),
        providers,
    })
}

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip)]
    status: StatusCode,
}

impl ErrorResponse {
    fn from_relay_error(e: RelayError) -> Self {
        let (code, status) = match &e {
            RelayError::Reasoning(_) => ("REASONING_ERROR", StatusCode::BAD_GATEWAY),
            RelayError::Routing(_) => ("ROUTING_ERROR", StatusCode::BAD_REQUEST),
            _ => ("INTERNAL_ERROR", StatusCode::INTERNAL_SERVER_ERROR),
        };
        Self {
            error: e.to_string(),
            code,
            status,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

/// Process one conversation turn.
pub async fn process_turn(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, ErrorResponse> {
    info!(
        thread = %request.thread_id,
        preview = %request.message.chars().take(50).collect::<String>(),
        "received turn"
    );

    let response = state
        .coordinator
        .process_turn(request)
        .await
        .map_err(|e| {
            error!(error = %e, "turn failed");
            ErrorResponse::from_relay_error(e)
        })?;

    Ok(Json(response))
}

/// Re-run capability discovery across all providers.
pub async fn refresh_capabilities(
    State(state): State<Arc<AppState>>,
) -> Json<DiscoveryReport> {
    info!("capability refresh requested");
    Json(state.coordinator.refresh_capabilities().await)
}
