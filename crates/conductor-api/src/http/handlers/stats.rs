//! GET /api/v1/stats - Engine and event store statistics.

use axum::extract::State;
use axum::Json;
use conductor_core::event::EventStoreStats;
use conductor_core::workflow::EngineStatistics;
use serde::Serialize;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub engine: EngineStatistics,
    pub events: EventStoreStats,
    pub breakers: usize,
    pub event_subscribers: usize,
    pub llm_providers: usize,
    pub integrations: usize,
}

pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<StatsReport>>, AppError> {
    let clock = RequestClock::start();

    let report = StatsReport {
        engine: state.engine.get_statistics(),
        events: state.events.stats(),
        breakers: state.breakers.all_stats().len(),
        event_subscribers: state.events.bus().map_or(0, |bus| bus.subscriber_count()),
        llm_providers: state.config.llm_providers.len(),
        integrations: state.config.integrations.len(),
    };

    Ok(clock.respond(report))
}
