//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Construction-time error for ghostctl components.
///
/// Raised while building clients, parsing credentials, signing tokens or
/// loading configuration. Request-time failures use the categorized API error
/// in `ghostctl-infra` instead.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum GhostError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for ghostctl operations
pub type Result<T> = std::result::Result<T, GhostError>;
