//! Unified error taxonomy for Conductor.
//!
//! Every failure in the system, local or from an external call, is normalized
//! into [`OrchestratorError`]. The stable [`ErrorCode`] carries all policy:
//! category, severity, retryability and HTTP status come from one static table
//! ([`ErrorCode::metadata`]) so call sites never decide them ad hoc.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Categories and severity
// ---------------------------------------------------------------------------

/// The family an error code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Integration,
    Llm,
    Workflow,
    Database,
    Security,
    Observability,
    Resilience,
    Validation,
    System,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Integration => "integration",
            ErrorCategory::Llm => "llm",
            ErrorCategory::Workflow => "workflow",
            ErrorCategory::Database => "database",
            ErrorCategory::Security => "security",
            ErrorCategory::Observability => "observability",
            ErrorCategory::Resilience => "resilience",
            ErrorCategory::Validation => "validation",
            ErrorCategory::System => "system",
        };
        write!(f, "{s}")
    }
}

/// How bad an error is for the operator, independent of retryability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Stable, namespaced error code (serialized as `FAMILY_REASON`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    IntegrationNotFound,
    IntegrationOperationUnsupported,
    IntegrationAuthFailed,
    IntegrationRateLimited,
    IntegrationTimeout,
    IntegrationUnavailable,
    IntegrationRequestFailed,
    IntegrationInvalidResponse,

    LlmProviderNotFound,
    LlmAuthFailed,
    LlmRateLimited,
    LlmTimeout,
    LlmProviderUnavailable,
    LlmContextLengthExceeded,
    LlmInvalidResponse,
    LlmRequestFailed,

    WorkflowNotFound,
    WorkflowInvalidState,
    WorkflowInvalidDefinition,
    WorkflowRunNotFound,
    WorkflowStepFailed,
    WorkflowStepTimeout,
    WorkflowExecutorNotFound,
    WorkflowLoopLimitExceeded,
    WorkflowTimeout,
    WorkflowCancelled,

    DbConnectionFailed,
    DbQueryFailed,
    DbDuplicateKey,
    DbNotFound,

    SecurityUnauthorized,
    SecurityForbidden,
    SecurityInvalidToken,

    ObservabilityDuplicateEvent,
    ObservabilityEventNotFound,
    ObservabilityExportFailed,

    ResilienceCircuitOpen,
    ResilienceRetryExhausted,

    ValidationFailed,
    ValidationInvalidInput,

    SystemInternal,
    SystemTimeout,
    SystemRateLimited,
    SystemNetwork,
    SystemConfiguration,
    SystemUnknown,
}

/// Static policy attached to an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMetadata {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub status_code: u16,
}

const fn meta(
    category: ErrorCategory,
    severity: ErrorSeverity,
    retryable: bool,
    status_code: u16,
) -> ErrorMetadata {
    ErrorMetadata {
        category,
        severity,
        retryable,
        status_code,
    }
}

impl ErrorCode {
    /// Every code, in declaration order.
    pub const ALL: &'static [ErrorCode] = &[
        ErrorCode::IntegrationNotFound,
        ErrorCode::IntegrationOperationUnsupported,
        ErrorCode::IntegrationAuthFailed,
        ErrorCode::IntegrationRateLimited,
        ErrorCode::IntegrationTimeout,
        ErrorCode::IntegrationUnavailable,
        ErrorCode::IntegrationRequestFailed,
        ErrorCode::IntegrationInvalidResponse,
        ErrorCode::LlmProviderNotFound,
        ErrorCode::LlmAuthFailed,
        ErrorCode::LlmRateLimited,
        ErrorCode::LlmTimeout,
        ErrorCode::LlmProviderUnavailable,
        ErrorCode::LlmContextLengthExceeded,
        ErrorCode::LlmInvalidResponse,
        ErrorCode::LlmRequestFailed,
        ErrorCode::WorkflowNotFound,
        ErrorCode::WorkflowInvalidState,
        ErrorCode::WorkflowInvalidDefinition,
        ErrorCode::WorkflowRunNotFound,
        ErrorCode::WorkflowStepFailed,
        ErrorCode::WorkflowStepTimeout,
        ErrorCode::WorkflowExecutorNotFound,
        ErrorCode::WorkflowLoopLimitExceeded,
        ErrorCode::WorkflowTimeout,
        ErrorCode::WorkflowCancelled,
        ErrorCode::DbConnectionFailed,
        ErrorCode::DbQueryFailed,
        ErrorCode::DbDuplicateKey,
        ErrorCode::DbNotFound,
        ErrorCode::SecurityUnauthorized,
        ErrorCode::SecurityForbidden,
        ErrorCode::SecurityInvalidToken,
        ErrorCode::ObservabilityDuplicateEvent,
        ErrorCode::ObservabilityEventNotFound,
        ErrorCode::ObservabilityExportFailed,
        ErrorCode::ResilienceCircuitOpen,
        ErrorCode::ResilienceRetryExhausted,
        ErrorCode::ValidationFailed,
        ErrorCode::ValidationInvalidInput,
        ErrorCode::SystemInternal,
        ErrorCode::SystemTimeout,
        ErrorCode::SystemRateLimited,
        ErrorCode::SystemNetwork,
        ErrorCode::SystemConfiguration,
        ErrorCode::SystemUnknown,
    ];

    /// The static policy table. Timeouts, rate limits and upstream 5xx are
    /// retryable; validation, auth and not-found are not.
    pub const fn metadata(self) -> ErrorMetadata {
        use ErrorCategory as C;
        use ErrorSeverity as S;

        match self {
            ErrorCode::IntegrationNotFound => meta(C::Integration, S::Medium, false, 404),
            ErrorCode::IntegrationOperationUnsupported => meta(C::Integration, S::Medium, false, 400),
            ErrorCode::IntegrationAuthFailed => meta(C::Integration, S::High, false, 401),
            ErrorCode::IntegrationRateLimited => meta(C::Integration, S::Medium, true, 429),
            ErrorCode::IntegrationTimeout => meta(C::Integration, S::Medium, true, 504),
            ErrorCode::IntegrationUnavailable => meta(C::Integration, S::High, true, 503),
            ErrorCode::IntegrationRequestFailed => meta(C::Integration, S::Medium, false, 502),
            ErrorCode::IntegrationInvalidResponse => meta(C::Integration, S::Medium, false, 502),

            ErrorCode::LlmProviderNotFound => meta(C::Llm, S::High, false, 404),
            ErrorCode::LlmAuthFailed => meta(C::Llm, S::Critical, false, 401),
            ErrorCode::LlmRateLimited => meta(C::Llm, S::Medium, true, 429),
            ErrorCode::LlmTimeout => meta(C::Llm, S::Medium, true, 504),
            ErrorCode::LlmProviderUnavailable => meta(C::Llm, S::High, true, 503),
            ErrorCode::LlmContextLengthExceeded => meta(C::Llm, S::Medium, false, 400),
            ErrorCode::LlmInvalidResponse => meta(C::Llm, S::Medium, false, 502),
            ErrorCode::LlmRequestFailed => meta(C::Llm, S::Medium, false, 502),

            ErrorCode::WorkflowNotFound => meta(C::Workflow, S::Low, false, 404),
            ErrorCode::WorkflowInvalidState => meta(C::Workflow, S::Medium, false, 409),
            ErrorCode::WorkflowInvalidDefinition => meta(C::Workflow, S::Medium, false, 400),
            ErrorCode::WorkflowRunNotFound => meta(C::Workflow, S::Low, false, 404),
            ErrorCode::WorkflowStepFailed => meta(C::Workflow, S::High, false, 500),
            ErrorCode::WorkflowStepTimeout => meta(C::Workflow, S::Medium, true, 504),
            ErrorCode::WorkflowExecutorNotFound => meta(C::Workflow, S::High, false, 500),
            ErrorCode::WorkflowLoopLimitExceeded => meta(C::Workflow, S::Medium, false, 422),
            ErrorCode::WorkflowTimeout => meta(C::Workflow, S::High, false, 504),
            ErrorCode::WorkflowCancelled => meta(C::Workflow, S::Low, false, 409),

            ErrorCode::DbConnectionFailed => meta(C::Database, S::Critical, true, 503),
            ErrorCode::DbQueryFailed => meta(C::Database, S::High, false, 500),
            ErrorCode::DbDuplicateKey => meta(C::Database, S::Low, false, 409),
            ErrorCode::DbNotFound => meta(C::Database, S::Low, false, 404),

            ErrorCode::SecurityUnauthorized => meta(C::Security, S::High, false, 401),
            ErrorCode::SecurityForbidden => meta(C::Security, S::High, false, 403),
            ErrorCode::SecurityInvalidToken => meta(C::Security, S::High, false, 401),

            ErrorCode::ObservabilityDuplicateEvent => meta(C::Observability, S::Low, false, 409),
            ErrorCode::ObservabilityEventNotFound => meta(C::Observability, S::Low, false, 404),
            ErrorCode::ObservabilityExportFailed => meta(C::Observability, S::Low, true, 500),

            ErrorCode::ResilienceCircuitOpen => meta(C::Resilience, S::Medium, true, 503),
            ErrorCode::ResilienceRetryExhausted => meta(C::Resilience, S::High, false, 503),

            ErrorCode::ValidationFailed => meta(C::Validation, S::Low, false, 400),
            ErrorCode::ValidationInvalidInput => meta(C::Validation, S::Low, false, 422),

            ErrorCode::SystemInternal => meta(C::System, S::Critical, false, 500),
            ErrorCode::SystemTimeout => meta(C::System, S::Medium, true, 504),
            ErrorCode::SystemRateLimited => meta(C::System, S::Medium, true, 429),
            ErrorCode::SystemNetwork => meta(C::System, S::Medium, true, 503),
            ErrorCode::SystemConfiguration => meta(C::System, S::Critical, false, 500),
            ErrorCode::SystemUnknown => meta(C::System, S::High, false, 500),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::IntegrationNotFound => "INTEGRATION_NOT_FOUND",
            ErrorCode::IntegrationOperationUnsupported => "INTEGRATION_OPERATION_UNSUPPORTED",
            ErrorCode::IntegrationAuthFailed => "INTEGRATION_AUTH_FAILED",
            ErrorCode::IntegrationRateLimited => "INTEGRATION_RATE_LIMITED",
            ErrorCode::IntegrationTimeout => "INTEGRATION_TIMEOUT",
            ErrorCode::IntegrationUnavailable => "INTEGRATION_UNAVAILABLE",
            ErrorCode::IntegrationRequestFailed => "INTEGRATION_REQUEST_FAILED",
            ErrorCode::IntegrationInvalidResponse => "INTEGRATION_INVALID_RESPONSE",
            ErrorCode::LlmProviderNotFound => "LLM_PROVIDER_NOT_FOUND",
            ErrorCode::LlmAuthFailed => "LLM_AUTH_FAILED",
            ErrorCode::LlmRateLimited => "LLM_RATE_LIMITED",
            ErrorCode::LlmTimeout => "LLM_TIMEOUT",
            ErrorCode::LlmProviderUnavailable => "LLM_PROVIDER_UNAVAILABLE",
            ErrorCode::LlmContextLengthExceeded => "LLM_CONTEXT_LENGTH_EXCEEDED",
            ErrorCode::LlmInvalidResponse => "LLM_INVALID_RESPONSE",
            ErrorCode::LlmRequestFailed => "LLM_REQUEST_FAILED",
            ErrorCode::WorkflowNotFound => "WORKFLOW_NOT_FOUND",
            ErrorCode::WorkflowInvalidState => "WORKFLOW_INVALID_STATE",
            ErrorCode::WorkflowInvalidDefinition => "WORKFLOW_INVALID_DEFINITION",
            ErrorCode::WorkflowRunNotFound => "WORKFLOW_RUN_NOT_FOUND",
            ErrorCode::WorkflowStepFailed => "WORKFLOW_STEP_FAILED",
            ErrorCode::WorkflowStepTimeout => "WORKFLOW_STEP_TIMEOUT",
            ErrorCode::WorkflowExecutorNotFound => "WORKFLOW_EXECUTOR_NOT_FOUND",
            ErrorCode::WorkflowLoopLimitExceeded => "WORKFLOW_LOOP_LIMIT_EXCEEDED",
            ErrorCode::WorkflowTimeout => "WORKFLOW_TIMEOUT",
            ErrorCode::WorkflowCancelled => "WORKFLOW_CANCELLED",
            ErrorCode::DbConnectionFailed => "DB_CONNECTION_FAILED",
            ErrorCode::DbQueryFailed => "DB_QUERY_FAILED",
            ErrorCode::DbDuplicateKey => "DB_DUPLICATE_KEY",
            ErrorCode::DbNotFound => "DB_NOT_FOUND",
            ErrorCode::SecurityUnauthorized => "SECURITY_UNAUTHORIZED",
            ErrorCode::SecurityForbidden => "SECURITY_FORBIDDEN",
            ErrorCode::SecurityInvalidToken => "SECURITY_INVALID_TOKEN",
            ErrorCode::ObservabilityDuplicateEvent => "OBSERVABILITY_DUPLICATE_EVENT",
            ErrorCode::ObservabilityEventNotFound => "OBSERVABILITY_EVENT_NOT_FOUND",
            ErrorCode::ObservabilityExportFailed => "OBSERVABILITY_EXPORT_FAILED",
            ErrorCode::ResilienceCircuitOpen => "RESILIENCE_CIRCUIT_OPEN",
            ErrorCode::ResilienceRetryExhausted => "RESILIENCE_RETRY_EXHAUSTED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::ValidationInvalidInput => "VALIDATION_INVALID_INPUT",
            ErrorCode::SystemInternal => "SYSTEM_INTERNAL",
            ErrorCode::SystemTimeout => "SYSTEM_TIMEOUT",
            ErrorCode::SystemRateLimited => "SYSTEM_RATE_LIMITED",
            ErrorCode::SystemNetwork => "SYSTEM_NETWORK",
            ErrorCode::SystemConfiguration => "SYSTEM_CONFIGURATION",
            ErrorCode::SystemUnknown => "SYSTEM_UNKNOWN",
        }
    }

    pub const fn category(self) -> ErrorCategory {
        self.metadata().category
    }

    pub const fn is_retryable(self) -> bool {
        self.metadata().retryable
    }

    pub const fn status_code(self) -> u16 {
        self.metadata().status_code
    }

    /// Generic text safe to show an end user for this code.
    pub fn default_user_message(self) -> &'static str {
        match self {
            ErrorCode::WorkflowNotFound => "The requested workflow does not exist.",
            ErrorCode::WorkflowRunNotFound => "The requested workflow run does not exist.",
            ErrorCode::WorkflowInvalidState => "The workflow is not in a state that allows this action.",
            ErrorCode::WorkflowInvalidDefinition => "The workflow definition is invalid.",
            ErrorCode::WorkflowTimeout | ErrorCode::WorkflowStepTimeout => "The workflow took too long to complete.",
            ErrorCode::WorkflowCancelled => "The workflow run was cancelled.",
            ErrorCode::ResilienceCircuitOpen => "A dependency is temporarily unavailable. Please retry shortly.",
            _ => match self.category() {
                ErrorCategory::Integration => "An external integration failed to complete the request.",
                ErrorCategory::Llm => "The language model provider failed to complete the request.",
                ErrorCategory::Workflow => "The workflow could not be completed.",
                ErrorCategory::Database => "A storage error occurred.",
                ErrorCategory::Security => "You are not allowed to perform this action.",
                ErrorCategory::Observability => "The event log rejected the request.",
                ErrorCategory::Resilience => "A dependency is temporarily unavailable.",
                ErrorCategory::Validation => "The request is invalid.",
                ErrorCategory::System => "An unexpected error occurred.",
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| format!("unknown error code: '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Error context
// ---------------------------------------------------------------------------

/// Free-form identifiers locating where an error happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// OrchestratorError
// ---------------------------------------------------------------------------

/// The single error shape used across engine, executors and clients.
///
/// `message` is diagnostic and may contain internals; `user_message` is the
/// only text that crosses a system boundary (see [`SafeError`]).
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct OrchestratorError {
    pub code: ErrorCode,
    pub message: String,
    pub user_message: String,
    pub retryable: bool,
    pub context: ErrorContext,
    pub timestamp: DateTime<Utc>,
    #[source]
    pub cause: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl OrchestratorError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            user_message: code.default_user_message().to_string(),
            retryable: code.is_retryable(),
            context: ErrorContext::default(),
            timestamp: Utc::now(),
            cause: None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.code.metadata().severity
    }

    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = message.into();
        self
    }

    /// Override the table's retryability, e.g. when an upstream envelope says so.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.context.correlation_id = Some(id.into());
        self
    }

    pub fn with_run_id(mut self, id: impl Into<String>) -> Self {
        self.context.run_id = Some(id.into());
        self
    }

    pub fn with_step_id(mut self, id: impl Into<String>) -> Self {
        self.context.step_id = Some(id.into());
        self
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.context.resource_id = Some(id.into());
        self
    }

    pub fn with_operation_id(mut self, id: impl Into<String>) -> Self {
        self.context.operation_id = Some(id.into());
        self
    }

    /// Total conversion from any error value into the unified shape.
    ///
    /// An `OrchestratorError` passes through untouched. `std::io::Error` and
    /// `serde_json::Error` are classified by kind; anything else (including
    /// plain strings) by keywords in its message.
    pub fn normalize<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        let boxed: Box<dyn StdError + Send + Sync + 'static> = err.into();
        match boxed.downcast::<OrchestratorError>() {
            Ok(typed) => *typed,
            Err(other) => {
                let code = classify(other.as_ref());
                let message = other.to_string();
                Self::new(code, message).with_cause(other)
            }
        }
    }

    /// Conversion for values that are not errors at all.
    pub fn from_opaque<T: fmt::Debug + ?Sized>(value: &T) -> Self {
        Self::new(
            ErrorCode::SystemUnknown,
            format!("non-error value raised: {value:?}"),
        )
    }

    /// Projection that is safe to send to a client.
    pub fn to_safe(&self) -> SafeError {
        SafeError {
            code: self.code,
            message: self.user_message.clone(),
            retryable: self.retryable,
        }
    }

    /// Serializable snapshot used in step results, run records and events.
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            code: self.code,
            category: self.category(),
            severity: self.severity(),
            retryable: self.retryable,
            status_code: self.status_code(),
            message: self.message.clone(),
            user_message: self.user_message.clone(),
            context: self.context.clone(),
            cause: self.cause.as_ref().map(|c| c.to_string()),
            timestamp: self.timestamp,
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::normalize(err)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::normalize(err)
    }
}

impl From<ErrorRecord> for OrchestratorError {
    fn from(record: ErrorRecord) -> Self {
        Self {
            code: record.code,
            message: record.message,
            user_message: record.user_message,
            retryable: record.retryable,
            context: record.context,
            timestamp: record.timestamp,
            cause: record.cause.map(Into::into),
        }
    }
}

/// Keyword rules applied to the lowercased message of an untyped error.
/// First match wins.
const KEYWORD_RULES: &[(&[&str], ErrorCode)] = &[
    (&["timed out", "timeout", "deadline exceeded"], ErrorCode::SystemTimeout),
    (&["rate limit", "too many requests"], ErrorCode::SystemRateLimited),
    (
        &["connection refused", "connection reset", "network", "dns error"],
        ErrorCode::SystemNetwork,
    ),
    (&["unauthorized", "unauthenticated"], ErrorCode::SecurityUnauthorized),
    (&["forbidden", "permission denied"], ErrorCode::SecurityForbidden),
    (&["invalid", "validation"], ErrorCode::ValidationFailed),
];

fn classify(err: &(dyn StdError + Send + Sync + 'static)) -> ErrorCode {
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        use std::io::ErrorKind;
        return match io.kind() {
            ErrorKind::TimedOut => ErrorCode::SystemTimeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected => ErrorCode::SystemNetwork,
            ErrorKind::PermissionDenied => ErrorCode::SecurityForbidden,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => ErrorCode::ValidationFailed,
            _ => ErrorCode::SystemInternal,
        };
    }
    if err.downcast_ref::<serde_json::Error>().is_some() {
        return ErrorCode::ValidationFailed;
    }

    let message = err.to_string().to_lowercase();
    KEYWORD_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| message.contains(n)))
        .map(|(_, code)| *code)
        .unwrap_or(ErrorCode::SystemInternal)
}

// ---------------------------------------------------------------------------
// Serializable projections
// ---------------------------------------------------------------------------

/// Boundary-safe projection: user message, code and retryability only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

/// Full internal snapshot of an [`OrchestratorError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub status_code: u16,
    pub message: String,
    pub user_message: String,
    #[serde(default)]
    pub context: ErrorContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    /// Same projection as [`OrchestratorError::to_safe`], for stored records.
    pub fn to_safe(&self) -> SafeError {
        SafeError {
            code: self.code,
            message: self.user_message.clone(),
            retryable: self.retryable,
        }
    }
}
