//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`. Middleware: CORS, request tracing.

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/stats", get(handlers::stats::get_stats))
        .route("/events", get(handlers::event::query_events))
        .merge(handlers::workflow::workflow_routes())
        .merge(handlers::run::run_routes())
        .merge(handlers::breaker::breaker_routes());

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use conductor_core::integration::IntegrationRegistry;
    use conductor_core::llm::LlmRegistry;
    use conductor_types::config::ConductorConfig;
    use conductor_types::workflow::RunStatus;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::assemble(
            ConductorConfig::default(),
            std::env::temp_dir(),
            LlmRegistry::new(),
            IntegrationRegistry::new(),
        )
    }

    fn pipeline() -> Value {
        json!({
            "id": "pipeline",
            "name": "Pipeline",
            "status": "active",
            "steps": [
                { "id": "first", "name": "First", "type": "wait", "durationMs": 1, "nextStepId": "second" },
                { "id": "second", "name": "Second", "type": "wait", "durationMs": 1 }
            ]
        })
    }

    async fn send(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = build_router(state.clone())
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health_reports_ok() {
        let state = test_state();
        let (status, body) = send(&state, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
        assert!(body["meta"]["requestId"].is_string());
        assert!(body.get("errors").is_none());
    }

    #[tokio::test]
    async fn test_register_and_fetch_workflow() {
        let state = test_state();
        let (status, body) = send(&state, "POST", "/api/v1/workflows", Some(pipeline())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["id"], "pipeline");

        let (status, body) = send(&state, "GET", "/api/v1/workflows/pipeline", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["steps"].as_array().unwrap().len(), 2);

        let (_, body) = send(&state, "GET", "/api/v1/workflows", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_definition_is_rejected() {
        let state = test_state();
        let mut workflow = pipeline();
        workflow["steps"][0]["nextStepId"] = json!("nowhere");

        let (status, body) = send(&state, "POST", "/api/v1/workflows", Some(workflow)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_INVALID_DEFINITION");
        assert_eq!(body["errors"][0]["retryable"], false);
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_input() {
        let state = test_state();
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/workflows")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["errors"][0]["code"], "VALIDATION_INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_unknown_workflow_and_run_are_not_found() {
        let state = test_state();
        let (status, body) = send(&state, "GET", "/api/v1/workflows/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_NOT_FOUND");

        let (status, body) = send(&state, "GET", "/api/v1/runs/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_RUN_NOT_FOUND");

        let (status, _) = send(&state, "POST", "/api/v1/runs/ghost/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_draft_workflow_cannot_start() {
        let state = test_state();
        let mut workflow = pipeline();
        workflow["status"] = json!("draft");
        send(&state, "POST", "/api/v1/workflows", Some(workflow)).await;

        let (status, body) =
            send(&state, "POST", "/api/v1/workflows/pipeline/runs", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_INVALID_STATE");

        let (status, body) = send(
            &state,
            "PUT",
            "/api/v1/workflows/pipeline/status",
            Some(json!({ "status": "active" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "active");

        let (status, _) =
            send(&state, "POST", "/api/v1/workflows/pipeline/runs", Some(json!({}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_run_lifecycle_and_event_queries() {
        let state = test_state();
        send(&state, "POST", "/api/v1/workflows", Some(pipeline())).await;

        let (status, body) = send(
            &state,
            "POST",
            "/api/v1/workflows/pipeline/runs",
            Some(json!({ "input": { "ticket": 7 }, "correlationId": "corr-api" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id = body["data"]["id"].as_str().unwrap().to_string();

        let finished = state.engine.wait_for_run(&run_id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Completed);

        let (status, body) = send(&state, "GET", &format!("/api/v1/runs/{run_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "completed");

        let (_, body) = send(&state, "GET", &format!("/api/v1/runs/{run_id}/events"), None).await;
        let types: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["type"].as_str().unwrap())
            .collect();
        assert_eq!(types.first(), Some(&"run.started"));
        assert_eq!(types.last(), Some(&"run.completed"));

        let (status, body) = send(
            &state,
            "GET",
            "/api/v1/events?correlationId=corr-api&type=step.started&order=desc",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 2);
        assert_eq!(body["data"]["events"][0]["stepId"], "second");

        let (_, body) = send(&state, "GET", "/api/v1/runs?status=completed", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, body) =
            send(&state, "POST", &format!("/api/v1/runs/{run_id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["changed"], false);
        assert_eq!(body["data"]["status"], "completed");
    }

    /// Every non-null `error` object anywhere in `value`.
    fn error_objects<'a>(value: &'a Value, found: &mut Vec<&'a Value>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    if key == "error" && child.is_object() {
                        found.push(child);
                    }
                    error_objects(child, found);
                }
            }
            Value::Array(items) => items.iter().for_each(|item| error_objects(item, found)),
            _ => {}
        }
    }

    fn assert_only_safe_errors(body: &Value) {
        let text = body.to_string();
        assert!(!text.contains("no default configured"), "{text}");
        for key in ["\"cause\"", "\"userMessage\"", "\"category\"", "\"statusCode\""] {
            assert!(!text.contains(key), "{key} leaked: {text}");
        }

        let mut errors = Vec::new();
        error_objects(body, &mut errors);
        assert!(!errors.is_empty());
        for error in errors {
            let mut keys: Vec<&str> = error.as_object().unwrap().keys().map(String::as_str).collect();
            keys.sort_unstable();
            assert_eq!(keys, ["code", "message", "retryable"]);
        }
    }

    #[tokio::test]
    async fn test_failed_run_exposes_only_safe_errors() {
        let state = test_state();
        let workflow = json!({
            "id": "unprovided",
            "name": "Unprovided",
            "status": "active",
            "steps": [{ "id": "S1", "name": "Ask", "type": "llm", "prompt": "hello" }]
        });
        send(&state, "POST", "/api/v1/workflows", Some(workflow)).await;

        let (_, body) =
            send(&state, "POST", "/api/v1/workflows/unprovided/runs", Some(json!({}))).await;
        let run_id = body["data"]["id"].as_str().unwrap().to_string();
        let finished = state.engine.wait_for_run(&run_id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Failed);

        let (status, body) = send(&state, "GET", &format!("/api/v1/runs/{run_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["error"]["code"], "WORKFLOW_STEP_FAILED");
        assert_eq!(
            body["data"]["context"]["stepResults"]["S1"]["error"]["code"],
            "LLM_PROVIDER_NOT_FOUND"
        );
        assert_only_safe_errors(&body);

        let (_, body) = send(&state, "GET", &format!("/api/v1/runs/{run_id}/events"), None).await;
        assert_only_safe_errors(&body);

        let (_, body) = send(&state, "GET", "/api/v1/events?type=step.failed,run.failed", None).await;
        assert_eq!(body["data"]["total"], 2);
        assert_only_safe_errors(&body);

        let (_, body) = send(&state, "GET", "/api/v1/runs?status=failed", None).await;
        assert_only_safe_errors(&body);
    }

    #[tokio::test]
    async fn test_bad_event_type_filter() {
        let state = test_state();
        let (status, body) = send(&state, "GET", "/api/v1/events?type=run.exploded", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_breaker_trip_and_reset() {
        let state = test_state();
        state.breakers.get_or_create("llm.primary");

        let (status, body) = send(&state, "POST", "/api/v1/breakers/llm.primary/trip", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["state"], "open");

        let (_, body) = send(&state, "GET", "/api/v1/health", None).await;
        assert_eq!(body["data"]["status"], "degraded");
        assert_eq!(body["data"]["breakers"]["openBreakers"][0], "llm.primary");

        let (_, body) = send(&state, "POST", "/api/v1/breakers/reset", None).await;
        assert_eq!(body["data"]["reset"], 1);

        let (_, body) = send(&state, "GET", "/api/v1/breakers/health", None).await;
        assert_eq!(body["data"]["open"], 0);

        let (status, _) = send(&state, "POST", "/api/v1/breakers/nope/reset", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_counts_workflows() {
        let state = test_state();
        send(&state, "POST", "/api/v1/workflows", Some(pipeline())).await;

        let (status, body) = send(&state, "GET", "/api/v1/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["engine"]["registeredWorkflows"], 1);
        assert_eq!(body["data"]["engine"]["registeredExecutors"], 5);
        assert_eq!(body["data"]["events"]["totalEvents"], 0);
    }
}
