//! API-specific error types
//!
//! Maps HTTP statuses and transport failures to one categorized taxonomy and
//! answers the two questions the request core asks of every failure: should
//! it be retried, and does it count against the circuit breaker.

use std::fmt;
use std::time::Duration;

use ghostctl_domain::GhostError;
use serde_json::Value;
use thiserror::Error;

use super::transport::{TransportError, TransportErrorKind};
use super::types::RateLimitInfo;

/// Categories of API errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCategory {
    /// Credentials rejected or unusable (401, 403, signing failures)
    Authentication,
    /// Rate limiting (429)
    RateLimit,
    /// Server errors (5xx) - retryable
    Server,
    /// Client errors (4xx except auth) - non-retryable
    Client,
    /// Network/connection errors - retryable
    Network,
    /// Configuration errors - non-retryable
    Config,
    /// Calls suspended by the circuit breaker
    Unavailable,
    /// Abandoned by the caller
    Cancelled,
}

/// Status, message and decoded payload of an error response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiErrorDetails {
    pub status: u16,
    pub message: String,
    pub payload: Option<Value>,
}

impl ApiErrorDetails {
    pub fn new(status: u16, message: impl Into<String>, payload: Option<Value>) -> Self {
        Self { status, message: message.into(), payload }
    }
}

impl fmt::Display for ApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// API operation errors
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(ApiErrorDetails),

    #[error("{0}")]
    Unauthorized(ApiErrorDetails),

    #[error("{0}")]
    Forbidden(ApiErrorDetails),

    #[error("{0}")]
    NotFound(ApiErrorDetails),

    #[error("{0}")]
    Conflict(ApiErrorDetails),

    #[error("{details}")]
    RateLimited { details: ApiErrorDetails, retry_after: Option<Duration> },

    #[error("{0}")]
    ServerError(ApiErrorDetails),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Request failed after {attempts} attempts: {cause}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        cause: Box<ApiError>,
    },

    #[error("Circuit breaker is open, admin API calls are suspended")]
    CircuitOpen,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Retry deadline of {deadline:?} exceeded after {attempts} attempts: {cause}")]
    DeadlineExceeded {
        attempts: u32,
        deadline: Duration,
        #[source]
        cause: Box<ApiError>,
    },

    #[error("{0}")]
    Unexpected(ApiErrorDetails),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Map a non-2xx status to its error.
    ///
    /// `payload` is the decoded error body, if any; `retry_after` is the
    /// already-resolved `Retry-After` delay.
    pub fn from_status(
        status: u16,
        payload: Option<Value>,
        rate_limit: &RateLimitInfo,
        retry_after: Option<Duration>,
    ) -> Self {
        let details = |message: String| ApiErrorDetails::new(status, message, payload.clone());

        match status {
            400 => Self::BadRequest(details("Bad request".to_string())),
            401 => Self::Unauthorized(details("Unauthorized - check your API keys".to_string())),
            403 => Self::Forbidden(details("Forbidden - insufficient permissions".to_string())),
            404 => Self::NotFound(details("Resource not found".to_string())),
            409 => Self::Conflict(details("Conflict".to_string())),
            422 => Self::BadRequest(details(validation_message(payload.as_ref()))),
            429 => Self::RateLimited {
                details: details(rate_limit_message(rate_limit)),
                retry_after,
            },
            _ if status >= 500 => Self::ServerError(details(format!("Server error: {status}"))),
            400..=499 => Self::BadRequest(details(format!("Client error: {status}"))),
            _ => Self::Unexpected(details(format!("Unexpected response status: {status}"))),
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ApiErrorCategory {
        match self {
            Self::Unauthorized(_) | Self::Forbidden(_) | Self::Authentication(_) => {
                ApiErrorCategory::Authentication
            }
            Self::RateLimited { .. } => ApiErrorCategory::RateLimit,
            Self::ServerError(_) => ApiErrorCategory::Server,
            Self::BadRequest(_)
            | Self::NotFound(_)
            | Self::Conflict(_)
            | Self::Decode(_)
            | Self::Unexpected(_) => ApiErrorCategory::Client,
            Self::Network(_) | Self::Timeout(_) => ApiErrorCategory::Network,
            Self::Config(_) => ApiErrorCategory::Config,
            Self::CircuitOpen => ApiErrorCategory::Unavailable,
            Self::Cancelled => ApiErrorCategory::Cancelled,
            Self::MaxRetriesExceeded { cause, .. } | Self::DeadlineExceeded { cause, .. } => {
                cause.category()
            }
        }
    }

    /// Whether the default retry conditions retry this error: connectivity,
    /// timeouts and 5xx. Rate limiting is retried only on request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_) | Self::ServerError(_))
    }

    /// Whether this failure counts against the admin API circuit breaker.
    ///
    /// Outages count; so does a 401 that survived re-authentication.
    /// Caller mistakes, throttling and local conditions do not.
    pub fn trips_circuit(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::ServerError(_) | Self::Unauthorized(_) => {
                true
            }
            Self::MaxRetriesExceeded { cause, .. } | Self::DeadlineExceeded { cause, .. } => {
                cause.trips_circuit()
            }
            _ => false,
        }
    }

    pub fn details(&self) -> Option<&ApiErrorDetails> {
        match self {
            Self::BadRequest(d)
            | Self::Unauthorized(d)
            | Self::Forbidden(d)
            | Self::NotFound(d)
            | Self::Conflict(d)
            | Self::ServerError(d)
            | Self::Unexpected(d)
            | Self::RateLimited { details: d, .. } => Some(d),
            Self::MaxRetriesExceeded { cause, .. } | Self::DeadlineExceeded { cause, .. } => {
                cause.details()
            }
            _ => None,
        }
    }

    /// HTTP status of the response behind this error, if there was one.
    pub fn status(&self) -> Option<u16> {
        self.details().map(|d| d.status)
    }

    pub fn payload(&self) -> Option<&Value> {
        self.details().and_then(|d| d.payload.as_ref())
    }

    /// Server-requested wait before retrying a rate-limited call.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

fn validation_message(payload: Option<&Value>) -> String {
    let messages: Vec<&str> = payload
        .and_then(|p| p.get("errors"))
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|e| e.get("message").and_then(Value::as_str).unwrap_or("Validation error"))
                .collect()
        })
        .unwrap_or_default();

    if messages.is_empty() {
        "Validation error: Invalid data".to_string()
    } else {
        format!("Validation error: {}", messages.join("; "))
    }
}

fn rate_limit_message(info: &RateLimitInfo) -> String {
    let mut message =
        format!("Rate limit exceeded. Remaining: {}", info.remaining.unwrap_or_default());
    if let Some(reset) = &info.reset {
        message.push_str(&format!(", resets at: {reset}"));
    }
    if let Some(retry_after) = &info.retry_after {
        message.push_str(&format!(", retry after: {retry_after} seconds"));
    }
    message
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err.kind {
            TransportErrorKind::Timeout => Self::Timeout(err.message),
            TransportErrorKind::Connect | TransportErrorKind::Other => Self::Network(err.message),
        }
    }
}

impl From<GhostError> for ApiError {
    fn from(err: GhostError) -> Self {
        match err {
            GhostError::Auth(msg) => Self::Authentication(msg),
            GhostError::Config(msg) | GhostError::InvalidInput(msg) => Self::Config(msg),
            GhostError::Network(msg) => Self::Network(msg),
            GhostError::Internal(msg) => Self::Unexpected(ApiErrorDetails::new(0, msg, None)),
        }
    }
}
