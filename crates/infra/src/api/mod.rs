//! Resilient request core for the Ghost Admin and Content APIs
//!
//! # Architecture
//!
//! - [`Transport`] performs one HTTP exchange; [`crate::http::HttpTransport`]
//!   is the reqwest implementation
//! - [`ApiClient`] adds auth headers, retry with backoff, the admin API
//!   circuit breaker and status mapping
//! - [`ApiError`] is the categorized error every call returns

pub mod client;
pub mod errors;
pub mod transport;
pub mod types;

pub use client::{
    ApiClient, ApiClientBuilder, ClientStats, SharedClock, DEFAULT_PAGE_SIZE, SITE_PATH,
};
pub use errors::{ApiError, ApiErrorCategory, ApiErrorDetails, ApiResult};
pub use transport::{Transport, TransportError, TransportErrorKind};
pub use types::{ApiResponse, AuthHeaders, RateLimitInfo, RawResponse, RequestDescriptor};
