//! Envelope response format for all API responses.
//!
//! ```json
//! {
//!   "data": { ... },
//!   "meta": { "requestId": "...", "timestamp": "...", "responseTimeMs": 5 },
//!   "errors": [{ "code": "...", "message": "...", "retryable": false }]
//! }
//! ```

use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use conductor_types::error::SafeError;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub meta: ApiMeta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SafeError>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMeta {
    pub request_id: String,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
    pub response_time_ms: u64,
}

impl ApiMeta {
    fn new(request_id: String, response_time_ms: u64) -> Self {
        Self {
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            response_time_ms,
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, request_id: String, response_time_ms: u64) -> Self {
        Self {
            data: Some(data),
            meta: ApiMeta::new(request_id, response_time_ms),
            errors: Vec::new(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(error: SafeError, request_id: String, response_time_ms: u64) -> Self {
        Self {
            data: None,
            meta: ApiMeta::new(request_id, response_time_ms),
            errors: vec![error],
        }
    }
}

/// Per-request id and timer. Handlers create one on entry and turn their
/// payload into an envelope with [`RequestClock::respond`].
pub struct RequestClock {
    start: Instant,
    request_id: String,
}

impl RequestClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            request_id: Uuid::now_v7().to_string(),
        }
    }

    pub fn respond<T: Serialize>(self, data: T) -> Json<ApiResponse<T>> {
        let elapsed = self.start.elapsed().as_millis() as u64;
        Json(ApiResponse::success(data, self.request_id, elapsed))
    }

    /// Same as [`respond`](Self::respond) with a non-200 success status.
    pub fn respond_with<T: Serialize>(self, status: StatusCode, data: T) -> Response {
        (status, self.respond(data)).into_response()
    }
}
