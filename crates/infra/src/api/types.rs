//! Request and response types exchanged with a [`Transport`](super::Transport).

use std::fmt;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;

pub const ACCEPT_VERSION_HEADER: &str = "Accept-Version";
pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const CONTENT_KEY_PARAM: &str = "key";

/// One API call: method, path relative to the site URL, query and body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    retry_rate_limited: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retry_rate_limited: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Set a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Treat 429 responses as retryable, waiting for `Retry-After` when the
    /// server sends one.
    pub fn retry_rate_limited(mut self, enabled: bool) -> Self {
        self.retry_rate_limited = enabled;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn retries_rate_limited(&self) -> bool {
        self.retry_rate_limited
    }
}

/// Headers and query parameters that authenticate one exchange.
///
/// Admin calls carry `Authorization: Ghost <token>`; content calls carry the
/// content key as the `key` query parameter and no bearer header.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct AuthHeaders {
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
}

impl AuthHeaders {
    pub fn admin(token: &str, api_version: &str) -> Self {
        Self {
            headers: vec![
                (AUTHORIZATION_HEADER.to_string(), format!("Ghost {token}")),
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Accept".to_string(), "application/json".to_string()),
                (ACCEPT_VERSION_HEADER.to_string(), api_version.to_string()),
            ],
            query: Vec::new(),
        }
    }

    pub fn content(key: &str, api_version: &str) -> Self {
        Self {
            headers: vec![
                ("Accept".to_string(), "application/json".to_string()),
                (ACCEPT_VERSION_HEADER.to_string(), api_version.to_string()),
            ],
            query: vec![(CONTENT_KEY_PARAM.to_string(), key.to_string())],
        }
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header(AUTHORIZATION_HEADER)
    }
}

impl fmt::Debug for AuthHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<_> = self
            .headers
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case(AUTHORIZATION_HEADER) {
                    (k.as_str(), "<redacted>")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        let query: Vec<_> = self.query.iter().map(|(k, _)| (k.as_str(), "<redacted>")).collect();
        f.debug_struct("AuthHeaders").field("headers", &headers).field("query", &query).finish()
    }
}

/// Status, headers and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, headers: Vec::new(), body: body.into() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Rate-limit headers seen on a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    /// `X-RateLimit-Reset` as sent by the server
    pub reset: Option<String>,
    /// `Retry-After` as sent by the server
    pub retry_after: Option<String>,
}

impl RateLimitInfo {
    pub fn from_response(response: &RawResponse) -> Self {
        let number = |name: &str| response.header(name).and_then(|v| v.trim().parse::<u64>().ok());
        let text = |name: &str| {
            response.header(name).map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
        };

        Self {
            limit: number("X-RateLimit-Limit"),
            remaining: number("X-RateLimit-Remaining"),
            reset: text("X-RateLimit-Reset"),
            retry_after: text("Retry-After"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.remaining.is_none()
            && self.reset.is_none()
            && self.retry_after.is_none()
    }

    /// Whether fewer than `threshold` requests remain. Unknown counts as not
    /// below.
    pub fn remaining_below(&self, threshold: u64) -> bool {
        self.remaining.is_some_and(|r| r < threshold)
    }

    /// `Retry-After` as a delay from `now`. Accepts delta-seconds or an
    /// HTTP date; a date in the past yields zero.
    pub fn retry_after_delay(&self, now: SystemTime) -> Option<Duration> {
        let raw = self.retry_after.as_deref()?;
        if let Ok(secs) = raw.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }

        let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
        let now: DateTime<Utc> = now.into();
        Some((at - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// A successful response with its decoded body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Decoded JSON body; `Null` when the server sent none
    pub body: Value,
    pub rate_limit: RateLimitInfo,
}

impl ApiResponse {
    pub fn into_body(self) -> Value {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let request = RequestDescriptor::get("/ghost/api/admin/posts/")
            .query("limit", 15)
            .query("page", 2)
            .retry_rate_limited(true);

        assert_eq!(request.method(), &Method::GET);
        assert_eq!(
            request.query_params(),
            &[("limit".to_string(), "15".to_string()), ("page".to_string(), "2".to_string())]
        );
        assert!(request.retries_rate_limited());
        assert!(request.body().is_none());

        let post = RequestDescriptor::post("/ghost/api/admin/tags/").json(json!({"tags": []}));
        assert_eq!(post.body(), Some(&json!({"tags": []})));
        assert!(!post.retries_rate_limited());
    }

    #[test]
    fn test_admin_and_content_auth() {
        let admin = AuthHeaders::admin("tok", "v5.0");
        assert_eq!(admin.authorization(), Some("Ghost tok"));
        assert_eq!(admin.header("accept-version"), Some("v5.0"));
        assert!(admin.query().is_empty());
        assert!(!format!("{admin:?}").contains("tok"));

        let content = AuthHeaders::content("ck", "v5.0");
        assert!(content.authorization().is_none());
        assert_eq!(content.query(), &[("key".to_string(), "ck".to_string())]);
        assert!(!format!("{content:?}").contains("ck\""));
    }

    #[test]
    fn test_rate_limit_parsing() {
        let response = RawResponse::new(200, "{}")
            .with_header("x-ratelimit-limit", "100")
            .with_header("X-RateLimit-Remaining", "4")
            .with_header("X-RateLimit-Reset", "1700000000");
        let info = RateLimitInfo::from_response(&response);

        assert_eq!(info.limit, Some(100));
        assert_eq!(info.remaining, Some(4));
        assert_eq!(info.reset.as_deref(), Some("1700000000"));
        assert!(info.remaining_below(5));
        assert!(!info.remaining_below(4));
        assert!(RateLimitInfo::from_response(&RawResponse::new(200, "")).is_empty());
    }

    #[test]
    fn test_retry_after_seconds_and_date() {
        let now = UNIX_EPOCH + Duration::from_secs(1_445_412_470);
        let seconds = RateLimitInfo { retry_after: Some("60".into()), ..Default::default() };
        assert_eq!(seconds.retry_after_delay(now), Some(Duration::from_secs(60)));

        // 2015-10-21T07:28:00Z is epoch 1445412480
        let date = RateLimitInfo {
            retry_after: Some("Wed, 21 Oct 2015 07:28:00 GMT".into()),
            ..Default::default()
        };
        assert_eq!(date.retry_after_delay(now), Some(Duration::from_secs(10)));

        let past = UNIX_EPOCH + Duration::from_secs(1_445_412_490);
        assert_eq!(date.retry_after_delay(past), Some(Duration::ZERO));

        let junk = RateLimitInfo { retry_after: Some("soon".into()), ..Default::default() };
        assert_eq!(junk.retry_after_delay(now), None);
    }
}
