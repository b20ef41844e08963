//! Retrying JSON-over-HTTP client.
//!
//! Every call is bounded by a per-request timeout (reqwest aborts the request
//! when it expires) and retried with the configured backoff policy while the
//! failure is transient: timeouts, connection errors, 408, 429 and 5xx.

use std::fmt;
use std::time::{Duration, Instant};

use conductor_core::resilience::{retry_with_policy, RetryPolicy, Retryable};
use conductor_types::config::HttpSettings;
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;

/// Longest response body kept in a [`HttpError::Status`].
const MAX_ERROR_BODY: usize = 2_048;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response body: {0}")]
    Decode(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            HttpError::Timeout(timeout)
        } else if err.is_connect() {
            HttpError::Connect(err.to_string())
        } else if err.is_decode() {
            HttpError::Decode(err.to_string())
        } else if err.is_builder() {
            HttpError::InvalidRequest(err.to_string())
        } else {
            HttpError::Request(err.to_string())
        }
    }
}

impl Retryable for HttpError {
    fn is_retryable(&self) -> bool {
        match self {
            HttpError::Timeout(_) | HttpError::Connect(_) => true,
            HttpError::Status { status, .. } => {
                matches!(*status, 408 | 429) || *status >= 500
            }
            HttpError::Decode(_) | HttpError::Request(_) | HttpError::InvalidRequest(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// One logical request. Header values may carry credentials, so `Debug`
/// prints header names only.
#[derive(Clone)]
pub struct HttpRequestSpec {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Overrides the client's default timeout for this request.
    pub timeout: Option<Duration>,
}

impl HttpRequestSpec {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for HttpRequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("HttpRequestSpec")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &header_names)
            .field("query", &self.query)
            .field("has_body", &self.body.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Decoded JSON body; `Null` for an empty body, a JSON string for a
    /// non-JSON body.
    pub body: Value,
    pub duration: Duration,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    policy: RetryPolicy,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("conductor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            policy: RetryPolicy::from(settings),
            timeout: Duration::from_millis(settings.timeout_ms.max(1)),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Send with retries. Non-2xx responses are errors.
    pub async fn send(&self, req: &HttpRequestSpec) -> Result<HttpResponse, HttpError> {
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut response = retry_with_policy(&self.policy, |attempt| {
            attempts = attempt + 1;
            self.send_once(req)
        })
        .await?;
        response.duration = started.elapsed();
        response.attempts = attempts;
        Ok(response)
    }

    /// A single attempt, no retries.
    pub async fn send_once(&self, req: &HttpRequestSpec) -> Result<HttpResponse, HttpError> {
        let timeout = req.timeout.unwrap_or(self.timeout);
        let started = Instant::now();

        let mut request = self
            .client
            .request(req.method.clone(), &req.url)
            .timeout(timeout);
        for (name, value) in &req.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !req.query.is_empty() {
            request = request.query(&req.query);
        }
        if let Some(body) = &req.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HttpError::from_reqwest(e, timeout))?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        let text = response
            .text()
            .await
            .map_err(|e| HttpError::from_reqwest(e, timeout))?;

        tracing::debug!(
            method = %req.method,
            url = req.url.as_str(),
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "http request finished"
        );

        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
                body: truncate(text, MAX_ERROR_BODY),
            });
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            body: decode_body(text, is_json)?,
            duration: started.elapsed(),
            attempts: 1,
        })
    }
}

fn decode_body(text: String, is_json: bool) -> Result<Value, HttpError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_str(&text) {
        Ok(value) => Ok(value),
        Err(e) if is_json => Err(HttpError::Decode(e.to_string())),
        Err(_) => Ok(Value::String(text)),
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}
