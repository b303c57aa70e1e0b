//! Configuration loading
//!
//! Reads [`ClientConfig`](ghostctl_domain::ClientConfig) from environment
//! variables and TOML or JSON files. Nothing is ever written back.

pub mod loader;

// Re-export commonly used items
pub use loader::{apply_env_overrides, load, load_from_env, load_from_file, probe_config_paths};
