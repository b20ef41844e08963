//! Circuit breaker inspection and manual control.

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use conductor_core::resilience::circuit_breaker::CircuitBreakerStats;
use conductor_core::resilience::HealthSummary;
use conductor_types::error::{ErrorCode, OrchestratorError};
use serde::Serialize;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetAllResponse {
    pub reset: usize,
}

pub fn breaker_routes() -> Router<AppState> {
    Router::new()
        .route("/breakers", get(list_breakers))
        .route("/breakers/health", get(breaker_health))
        .route("/breakers/reset", post(reset_all))
        .route("/breakers/{name}/reset", post(reset_breaker))
        .route("/breakers/{name}/trip", post(trip_breaker))
}

fn unknown_breaker(name: &str) -> AppError {
    AppError(
        OrchestratorError::new(
            ErrorCode::ValidationFailed,
            format!("no circuit breaker named '{name}'"),
        )
        .with_resource_id(name.to_string()),
    )
}

/// GET /api/v1/breakers
pub async fn list_breakers(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<CircuitBreakerStats>>>, AppError> {
    let clock = RequestClock::start();
    Ok(clock.respond(state.breakers.all_stats()))
}

/// GET /api/v1/breakers/health
pub async fn breaker_health(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<HealthSummary>>, AppError> {
    let clock = RequestClock::start();
    Ok(clock.respond(state.breakers.health_summary()))
}

/// POST /api/v1/breakers/{name}/reset
pub async fn reset_breaker(
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<CircuitBreakerStats>>, AppError> {
    let clock = RequestClock::start();
    let Path(name) = name?;

    if !state.breakers.reset(&name) {
        return Err(unknown_breaker(&name));
    }
    tracing::info!(breaker = %name, "circuit breaker reset via API");
    let stats = state.breakers.stats(&name).ok_or_else(|| unknown_breaker(&name))?;
    Ok(clock.respond(stats))
}

/// POST /api/v1/breakers/{name}/trip - Force a breaker open.
pub async fn trip_breaker(
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<CircuitBreakerStats>>, AppError> {
    let clock = RequestClock::start();
    let Path(name) = name?;

    if !state.breakers.trip(&name) {
        return Err(unknown_breaker(&name));
    }
    tracing::warn!(breaker = %name, "circuit breaker tripped via API");
    let stats = state.breakers.stats(&name).ok_or_else(|| unknown_breaker(&name))?;
    Ok(clock.respond(stats))
}

/// POST /api/v1/breakers/reset
pub async fn reset_all(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ResetAllResponse>>, AppError> {
    let clock = RequestClock::start();
    let reset = state.breakers.reset_all();
    tracing::info!(reset, "all circuit breakers reset via API");
    Ok(clock.respond(ResetAllResponse { reset }))
}
