//! Blocking reqwest transport for the request core.
//!
//! Maps each [`RequestDescriptor`] onto one HTTP exchange against the site's
//! base URL and reports connect and timeout failures as [`TransportError`]s.

use std::time::Duration;

use ghostctl_domain::{ClientConfig, GhostError};
use reqwest::blocking::Client as ReqwestClient;
use tracing::debug;

use crate::api::{AuthHeaders, RawResponse, RequestDescriptor, Transport, TransportError};

pub const DEFAULT_USER_AGENT: &str = concat!("ghostctl/", env!("CARGO_PKG_VERSION"));

/// [`Transport`] over a blocking reqwest client.
///
/// Performs exactly one exchange per call; retries belong to the caller.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
    base_url: String,
}

impl HttpTransport {
    /// Start building a transport for `base_url`.
    pub fn builder(base_url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder::new(base_url)
    }

    /// Transport for the site and timeout in `config`.
    ///
    /// # Errors
    /// Returns `GhostError::Network` if the client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, GhostError> {
        Self::builder(config.base_url()).timeout(config.timeout()).build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Transport for HttpTransport {
    fn perform(
        &self,
        auth: &AuthHeaders,
        request: &RequestDescriptor,
    ) -> Result<RawResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path());
        let method = request.method().clone();
        debug!(%method, %url, "sending HTTP request");

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .query(request.query_params())
            .query(auth.query());
        for (name, value) in auth.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().map_err(map_reqwest_error)?;
        debug!(%method, %url, status, "received HTTP response");

        Ok(RawResponse { status, headers, body })
    }
}

/// Builder for [`HttpTransport`].
#[derive(Debug)]
pub struct HttpTransportBuilder {
    base_url: String,
    timeout: Duration,
    user_agent: String,
    default_headers: Option<reqwest::header::HeaderMap>,
}

impl HttpTransportBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_headers: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn default_headers(mut self, headers: reqwest::header::HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    pub fn build(self) -> Result<HttpTransport, GhostError> {
        let mut builder = ReqwestClient::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .no_proxy();

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|err| GhostError::Network(format!("Failed to build HTTP client: {err}")))?;

        Ok(HttpTransport { client, base_url: self.base_url })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::timeout(err.to_string());
    }
    if err.is_connect() || err.is_request() {
        return TransportError::connect(err.to_string());
    }
    TransportError::other(err.to_string())
}
