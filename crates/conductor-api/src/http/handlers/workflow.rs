//! Workflow definition handlers and run triggering.
//!
//! Definitions are accepted as JSON and go through the same parse and
//! validation path as workflow files.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use conductor_core::workflow::definition::parse_workflow_json;
use conductor_core::workflow::StartOptions;
use conductor_types::error::ErrorCode;
use conductor_types::workflow::{Workflow, WorkflowStatus};
use serde::Deserialize;
use serde_json::Value;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::http::views::RunView;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: WorkflowStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(flatten)]
    pub options: StartOptions,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/workflows", get(list_workflows).post(create_workflow))
        .route("/workflows/{id}", get(get_workflow))
        .route("/workflows/{id}/status", put(set_workflow_status))
        .route("/workflows/{id}/runs", post(start_run))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/v1/workflows
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Workflow>>>, AppError> {
    let clock = RequestClock::start();
    Ok(clock.respond(state.engine.list_workflows()))
}

/// POST /api/v1/workflows - Register (or replace) a definition.
pub async fn create_workflow(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let clock = RequestClock::start();
    let Json(body) = payload?;

    let workflow = parse_workflow_json(&body.to_string())
        .map_err(|e| AppError(e.into()))?;
    state.engine.register_workflow(workflow.clone())?;

    tracing::info!(workflow_id = %workflow.id, version = workflow.version, "workflow registered");
    Ok(clock.respond_with(StatusCode::CREATED, workflow))
}

/// GET /api/v1/workflows/{id}
pub async fn get_workflow(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<Workflow>>, AppError> {
    let clock = RequestClock::start();
    let Path(id) = id?;

    let workflow = state
        .engine
        .get_workflow(&id)
        .ok_or_else(|| AppError::not_found(ErrorCode::WorkflowNotFound, "workflow", &id))?;
    Ok(clock.respond(workflow))
}

/// PUT /api/v1/workflows/{id}/status
pub async fn set_workflow_status(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<SetStatusRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Workflow>>, AppError> {
    let clock = RequestClock::start();
    let Path(id) = id?;
    let Json(body) = payload?;

    let workflow = state.engine.set_workflow_status(&id, body.status)?;
    Ok(clock.respond(workflow))
}

/// POST /api/v1/workflows/{id}/runs - Queue a run. Responds 202 with the
/// queued run; it does not wait for the run to finish.
pub async fn start_run(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<StartRunRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let clock = RequestClock::start();
    let Path(id) = id?;
    let Json(body) = payload?;

    let input = body
        .input
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    let run = state.engine.start_workflow(&id, input, body.options)?;
    Ok(clock.respond_with(StatusCode::ACCEPTED, RunView::from(run)))
}
