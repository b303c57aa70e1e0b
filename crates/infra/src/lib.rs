//! # ghostctl infrastructure
//!
//! I/O side of the Ghost client.
//!
//! This crate contains:
//! - Admin key parsing, token signing and caching (`auth`)
//! - The resilient request core (`api`)
//! - The blocking reqwest transport (`http`)
//! - Configuration loading from env and files (`config`)
//! - Logging setup (`observability`)
//!
//! ## Architecture
//! - Resilience primitives come from `ghostctl-common`
//! - Error and configuration types come from `ghostctl-domain`

pub mod api;
pub mod auth;
pub mod config;
pub mod http;
pub mod observability;

// Re-export commonly used items
pub use api::{ApiClient, ApiClientBuilder, ApiError, ApiResult, RequestDescriptor, Transport};
pub use auth::{AdminKey, ContentKey, TokenCache, TokenSigner};
pub use http::HttpTransport;
