//! Integration tests for configuration loader
//!
//! Tests loading configuration from files and turning it into a client.

use std::io::Write;

use ghostctl_infra::api::{ApiClient, ApiError};
use ghostctl_infra::config;
use tempfile::NamedTempFile;

fn write_config(contents: &str, extension: &str) -> std::path::PathBuf {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file.write_all(contents.as_bytes()).expect("Failed to write to temp file");
    let path = temp_file.path().with_extension(extension);
    std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");
    path
}

#[test]
fn test_toml_file_builds_client() {
    let path = write_config(
        r#"
url = "https://blog.example.com/"
admin_key = "0123456789abcdef01234567:a1b2c3d4e5f60718293a4b5c6d7e8f90"
timeout_secs = 10

[retry]
max_retries = 2
jitter = false

[circuit_breaker]
failure_threshold = 3
recovery_timeout_secs = 30
"#,
        "toml",
    );

    let result = config::load_from_file(Some(path.clone()));
    std::fs::remove_file(path).ok();
    let config = result.expect("Failed to load config from TOML file");

    assert_eq!(config.base_url(), "https://blog.example.com");
    assert!(config.validate().is_ok());

    let client = ApiClient::from_config(&config).expect("client from config");
    let breaker = client.circuit_breaker().config();
    assert_eq!(breaker.failure_threshold, 3);
    assert_eq!(breaker.recovery_timeout.as_secs(), 30);
    assert!(client.token_cache().is_some());
}

#[test]
fn test_json_file_with_content_key_only() {
    let path = write_config(
        r#"{"url": "http://localhost:2368", "content_key": "abc123"}"#,
        "json",
    );

    let result = config::load_from_file(Some(path.clone()));
    std::fs::remove_file(path).ok();
    let config = result.expect("Failed to load config from JSON file");

    let client = ApiClient::from_config(&config).expect("client from config");
    assert!(client.token_cache().is_none());
    assert!(matches!(
        client.get("/ghost/api/admin/site/", &[], true),
        Err(ApiError::Authentication(_))
    ));
}

#[test]
fn test_file_with_malformed_admin_key_is_rejected() {
    let path = write_config(
        r#"
url = "https://blog.example.com"
admin_key = "short:abcd"
"#,
        "toml",
    );

    let result = config::load_from_file(Some(path.clone()));
    std::fs::remove_file(path).ok();
    let config = result.expect("file parses even with a bad key");

    assert!(matches!(ApiClient::from_config(&config), Err(ApiError::Authentication(_))));
}
