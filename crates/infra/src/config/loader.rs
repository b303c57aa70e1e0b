//! Configuration loader
//!
//! Loads client configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `GHOST_API_URL` is not set, falls back to loading from file
//! 3. Environment values override whatever the file set
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `GHOST_API_URL`: Site URL (required for env-only loading)
//! - `GHOST_ADMIN_API_KEY`: Admin API key, `id:secret`
//! - `GHOST_CONTENT_API_KEY`: Content API key
//! - `GHOST_TIMEOUT`: Request timeout in seconds
//! - `GHOST_RETRY_ATTEMPTS`: Maximum retries per request
//! - `GHOST_API_VERSION`: Value sent as `Accept-Version`
//! - `GHOST_RETRY_JITTER`: Whether backoff is jittered (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./ghostctl.toml` or `./ghostctl.json` (current working directory)
//! 2. `./config.toml` or `./config.json` (current working directory)
//! 3. The same names in the parent and grandparent directories
//! 4. The same names next to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ghostctl_domain::{ClientConfig, GhostError, Result};

pub const ENV_API_URL: &str = "GHOST_API_URL";
pub const ENV_ADMIN_KEY: &str = "GHOST_ADMIN_API_KEY";
pub const ENV_CONTENT_KEY: &str = "GHOST_CONTENT_API_KEY";
pub const ENV_TIMEOUT: &str = "GHOST_TIMEOUT";
pub const ENV_RETRY_ATTEMPTS: &str = "GHOST_RETRY_ATTEMPTS";
pub const ENV_API_VERSION: &str = "GHOST_API_VERSION";
pub const ENV_RETRY_JITTER: &str = "GHOST_RETRY_JITTER";

const CONFIG_FILE_NAMES: [&str; 4] = ["ghostctl.toml", "ghostctl.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If `GHOST_API_URL` is
/// missing, falls back to a config file and layers the environment on top.
/// The result is validated before it is returned.
///
/// # Errors
/// Returns `GhostError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - The loaded configuration fails validation
pub fn load() -> Result<ClientConfig> {
    let config = match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            config
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            let mut config = load_from_file(None)?;
            apply_env_overrides(&mut config)?;
            config
        }
    };

    config.validate()?;
    Ok(config)
}

/// Load configuration from environment variables
///
/// Only `GHOST_API_URL` is required; every other setting falls back to its
/// default. The result is not validated.
///
/// # Errors
/// Returns `GhostError::Config` if `GHOST_API_URL` is missing or a numeric
/// or boolean variable cannot be parsed.
pub fn load_from_env() -> Result<ClientConfig> {
    let url = env_var(ENV_API_URL)?;
    let mut config = ClientConfig::new(url);
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Overwrite fields of `config` with any `GHOST_*` variables that are set.
///
/// # Errors
/// Returns `GhostError::Config` if a numeric or boolean variable cannot be
/// parsed.
pub fn apply_env_overrides(config: &mut ClientConfig) -> Result<()> {
    if let Some(url) = optional_env(ENV_API_URL) {
        config.url = url;
    }
    if let Some(key) = optional_env(ENV_ADMIN_KEY) {
        config.admin_key = Some(key);
    }
    if let Some(key) = optional_env(ENV_CONTENT_KEY) {
        config.content_key = Some(key);
    }
    if let Some(timeout) = env_parse::<u64>(ENV_TIMEOUT)? {
        config.timeout_secs = timeout;
    }
    if let Some(retries) = env_parse::<u32>(ENV_RETRY_ATTEMPTS)? {
        config.retry.max_retries = retries;
    }
    if let Some(version) = optional_env(ENV_API_VERSION) {
        config.api_version = version;
    }
    if optional_env(ENV_RETRY_JITTER).is_some() {
        config.retry.jitter = env_bool(ENV_RETRY_JITTER, config.retry.jitter);
    }
    Ok(())
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `GhostError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<ClientConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(GhostError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            GhostError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| GhostError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<ClientConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| GhostError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| GhostError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(GhostError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// Searches the working directory, its parent and grandparent, then the
/// executable's directory, for each name in order.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend(cwd.ancestors().take(3).map(Path::to_path_buf));
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
        }
    }

    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.is_file())
}

/// Get required environment variable
///
/// # Errors
/// Returns `GhostError::Config` if the variable is not set or empty.
fn env_var(key: &str) -> Result<String> {
    optional_env(key).ok_or_else(|| {
        GhostError::Config(format!("Missing required environment variable: {key}"))
    })
}

/// Non-empty environment variable, trimmed.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| GhostError::Config(format!("Invalid {key} value {raw:?}: {e}")))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
