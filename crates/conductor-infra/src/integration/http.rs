//! Config-driven REST integration.
//!
//! Each configured operation is a method plus a path template. `{name}`
//! segments are filled from the step parameters; the remaining parameters
//! become the query string for GET/DELETE and the JSON body otherwise.
//! Failures are reported in the result envelope, never as `Err`.

use std::collections::HashSet;
use std::time::Instant;

use conductor_core::integration::IntegrationAdapter;
use conductor_core::workflow::context::value_to_string;
use conductor_types::config::IntegrationConfig;
use conductor_types::context::ExecutionContext;
use conductor_types::error::ErrorCode;
use conductor_types::integration::{IntegrationError, IntegrationMetadata, IntegrationResult};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};

use crate::config::secret_from_env;
use crate::http::{HttpClient, HttpError, HttpRequestSpec};

pub struct HttpIntegration {
    config: IntegrationConfig,
    http: HttpClient,
    credential: Option<SecretString>,
}

impl HttpIntegration {
    /// Build from config, reading the credential from `auth_env` when set.
    /// A missing credential is logged and requests go out unauthenticated.
    pub fn from_config(config: IntegrationConfig, http: HttpClient) -> Self {
        let credential = match config.auth_env.as_deref() {
            Some(var) => match secret_from_env(var) {
                Ok(secret) => Some(secret),
                Err(e) => {
                    tracing::warn!(integration_id = config.id.as_str(), error = %e, "integration credential unavailable");
                    None
                }
            },
            None => None,
        };
        Self {
            config,
            http,
            credential,
        }
    }

    pub fn with_credential(mut self, credential: SecretString) -> Self {
        self.credential = Some(credential);
        self
    }

    fn build_request(
        &self,
        operation: &str,
        parameters: &Value,
        ctx: &ExecutionContext,
    ) -> Result<HttpRequestSpec, IntegrationError> {
        let op = self.config.operations.get(operation).ok_or_else(|| {
            IntegrationError::new(
                ErrorCode::IntegrationOperationUnsupported,
                format!("integration '{}' has no operation '{operation}'", self.config.id),
            )
        })?;
        let method = Method::from_bytes(op.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            IntegrationError::new(
                ErrorCode::IntegrationRequestFailed,
                format!("operation '{operation}' has invalid method '{}'", op.method),
            )
        })?;

        let empty = Map::new();
        let params = parameters.as_object().unwrap_or(&empty);
        let (path, used) = fill_path(&op.path, params)?;
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let rest: Map<String, Value> = params
            .iter()
            .filter(|(k, _)| !used.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut req = HttpRequestSpec::new(method.clone(), url)
            .header("x-correlation-id", ctx.correlation_id.as_str());
        if let (Some(header), Some(secret)) = (&self.config.auth_header, &self.credential) {
            req = req.header(header.as_str(), secret.expose_secret());
        }
        if method == Method::GET || method == Method::DELETE {
            for (k, v) in &rest {
                req = req.query(k.as_str(), value_to_string(v));
            }
        } else if !rest.is_empty() {
            req = req.json(Value::Object(rest));
        }
        Ok(req)
    }
}

// Holds a credential; no Debug.

impl IntegrationAdapter for HttpIntegration {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn operations(&self) -> Vec<String> {
        let mut ops: Vec<String> = self.config.operations.keys().cloned().collect();
        ops.sort();
        ops
    }

    async fn execute_operation(
        &self,
        operation: &str,
        parameters: &Value,
        ctx: &ExecutionContext,
    ) -> IntegrationResult {
        let started = Instant::now();
        let mut metadata = IntegrationMetadata {
            integration_id: Some(self.config.id.clone()),
            operation: Some(operation.to_string()),
            ..IntegrationMetadata::default()
        };

        let req = match self.build_request(operation, parameters, ctx) {
            Ok(req) => req,
            Err(error) => {
                metadata.duration_ms = started.elapsed().as_millis() as u64;
                return IntegrationResult::err(error, metadata);
            }
        };

        let outcome = self.http.send(&req).await;
        metadata.duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) => {
                metadata.status_code = Some(response.status);
                if response.attempts > 1 {
                    metadata.extra.insert("attempts".into(), Value::from(response.attempts));
                }
                IntegrationResult::ok(response.body, metadata)
            }
            Err(err) => {
                metadata.status_code = err.status();
                tracing::warn!(
                    integration_id = self.config.id.as_str(),
                    operation,
                    correlation_id = ctx.correlation_id.as_str(),
                    error = %err,
                    "integration call failed"
                );
                IntegrationResult::err(map_http_error(&err), metadata)
            }
        }
    }
}

/// Substitute `{name}` segments; returns the path and the parameter names used.
fn fill_path<'a>(
    template: &str,
    params: &'a Map<String, Value>,
) -> Result<(String, HashSet<&'a str>), IntegrationError> {
    let mut out = String::with_capacity(template.len());
    let mut used = HashSet::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let name = after[..close].trim();
        let Some((key, value)) = params.get_key_value(name) else {
            return Err(IntegrationError::new(
                ErrorCode::IntegrationRequestFailed,
                format!("missing path parameter '{name}'"),
            ));
        };
        out.push_str(&encode_segment(&value_to_string(value)));
        used.insert(key.as_str());
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok((out, used))
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn map_http_error(err: &HttpError) -> IntegrationError {
    let code = match err {
        HttpError::Timeout(_) => ErrorCode::IntegrationTimeout,
        HttpError::Connect(_) => ErrorCode::IntegrationUnavailable,
        HttpError::Status { status: 401 | 403, .. } => ErrorCode::IntegrationAuthFailed,
        HttpError::Status { status: 429, .. } => ErrorCode::IntegrationRateLimited,
        HttpError::Status { status, .. } if *status >= 500 => ErrorCode::IntegrationUnavailable,
        HttpError::Decode(_) => ErrorCode::IntegrationInvalidResponse,
        HttpError::Status { .. } | HttpError::Request(_) | HttpError::InvalidRequest(_) => {
            ErrorCode::IntegrationRequestFailed
        }
    };
    IntegrationError::new(code, err.to_string())
}
