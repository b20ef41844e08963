//! Run inspection and control handlers.

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use conductor_types::error::ErrorCode;
use conductor_types::workflow::RunStatus;
use serde::{Deserialize, Serialize};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::http::views::{EventView, RunView};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRunsQuery {
    pub workflow_id: Option<String>,
    pub status: Option<RunStatus>,
}

/// Result of a control action. `changed` is false when the run was not in a
/// state the action applies to (for example cancelling a finished run).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunControlResponse {
    pub run_id: String,
    pub changed: bool,
    pub status: Option<RunStatus>,
}

pub fn run_routes() -> Router<AppState> {
    Router::new()
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/events", get(get_run_events))
        .route("/runs/{id}/cancel", post(cancel_run))
        .route("/runs/{id}/pause", post(pause_run))
        .route("/runs/{id}/resume", post(resume_run))
}

fn run_not_found(id: &str) -> AppError {
    AppError::not_found(ErrorCode::WorkflowRunNotFound, "run", id)
}

/// GET /api/v1/runs?workflowId=&status=
pub async fn list_runs(
    State(state): State<AppState>,
    query: Result<Query<ListRunsQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<RunView>>>, AppError> {
    let clock = RequestClock::start();
    let Query(query) = query?;

    let runs: Vec<RunView> = state
        .engine
        .list_runs(query.workflow_id.as_deref())
        .into_iter()
        .filter(|run| query.status.is_none_or(|status| run.status == status))
        .map(RunView::from)
        .collect();
    Ok(clock.respond(runs))
}

/// GET /api/v1/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<RunView>>, AppError> {
    let clock = RequestClock::start();
    let Path(id) = id?;

    let run = state.engine.get_run(&id).ok_or_else(|| run_not_found(&id))?;
    Ok(clock.respond(RunView::from(run)))
}

/// GET /api/v1/runs/{id}/events - The run's timeline, oldest first.
pub async fn get_run_events(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<Vec<EventView>>>, AppError> {
    let clock = RequestClock::start();
    let Path(id) = id?;

    let events = state.events.get_events_by_run_id(&id, None);
    if events.is_empty() && state.engine.get_run(&id).is_none() {
        return Err(run_not_found(&id));
    }
    Ok(clock.respond(events.into_iter().map(EventView::from).collect::<Vec<_>>()))
}

/// POST /api/v1/runs/{id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<RunControlResponse>>, AppError> {
    let clock = RequestClock::start();
    let Path(id) = id?;

    let changed = state.engine.cancel_run(&id)?;
    Ok(clock.respond(control_response(&state, id, changed)))
}

/// POST /api/v1/runs/{id}/pause
pub async fn pause_run(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<RunControlResponse>>, AppError> {
    let clock = RequestClock::start();
    let Path(id) = id?;

    let changed = state.engine.pause_run(&id)?;
    Ok(clock.respond(control_response(&state, id, changed)))
}

/// POST /api/v1/runs/{id}/resume
pub async fn resume_run(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<RunControlResponse>>, AppError> {
    let clock = RequestClock::start();
    let Path(id) = id?;

    let changed = state.engine.resume_run(&id)?;
    Ok(clock.respond(control_response(&state, id, changed)))
}

fn control_response(state: &AppState, run_id: String, changed: bool) -> RunControlResponse {
    RunControlResponse {
        status: state.engine.get_run_status(&run_id),
        run_id,
        changed,
    }
}
