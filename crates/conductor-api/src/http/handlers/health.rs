//! GET /api/v1/health - Liveness plus a summary of engine and breaker health.

use axum::extract::State;
use axum::Json;
use conductor_core::resilience::HealthSummary;
use serde::Serialize;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// `ok`, or `degraded` while any circuit breaker is open.
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub active_runs: usize,
    pub queued_runs: usize,
    pub breakers: HealthSummary,
}

pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<HealthReport>>, AppError> {
    let clock = RequestClock::start();

    let stats = state.engine.get_statistics();
    let breakers = state.breakers.health_summary();
    let report = HealthReport {
        status: if breakers.is_healthy() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        active_runs: stats.active_runs,
        queued_runs: stats.queued_runs,
        breakers,
    };

    Ok(clock.respond(report))
}
