//! The one-exchange seam between the request core and the network.

use thiserror::Error;

use super::types::{AuthHeaders, RawResponse, RequestDescriptor};

/// Why an exchange produced no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not connect or the connection dropped
    Connect,
    /// The per-request timeout elapsed
    Timeout,
    /// Anything else, such as a malformed request
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::Connect, message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::Timeout, message: message.into() }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::Other, message: message.into() }
    }
}

/// Performs a single HTTP exchange. Retries, breaking and status
/// interpretation are the caller's job; a non-2xx status is a normal
/// response here.
pub trait Transport: Send + Sync {
    fn perform(
        &self,
        auth: &AuthHeaders,
        request: &RequestDescriptor,
    ) -> Result<RawResponse, TransportError>;
}

impl<F> Transport for F
where
    F: Fn(&AuthHeaders, &RequestDescriptor) -> Result<RawResponse, TransportError> + Send + Sync,
{
    fn perform(
        &self,
        auth: &AuthHeaders,
        request: &RequestDescriptor,
    ) -> Result<RawResponse, TransportError> {
        self(auth, request)
    }
}
