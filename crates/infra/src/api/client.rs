//! API client with circuit breaker and retry logic
//!
//! Every call goes through [`ApiClient::execute`]. Admin calls run inside the
//! admin API circuit breaker, which wraps the retry loop; content calls skip
//! the breaker. Each attempt fetches auth headers, performs one exchange via
//! the [`Transport`] and maps the status to an [`ApiError`].

use std::sync::Arc;
use std::time::Duration;

use ghostctl_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, Clock,
    JitterSource, ResilienceError, RetryError, RetryExecutor, RetryMetricsSnapshot, RetryPolicy,
    Sleeper, StopReason, SystemClock, ThreadRngJitter, ThreadSleeper,
};
use ghostctl_domain::ClientConfig;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::errors::{ApiError, ApiResult};
use super::transport::Transport;
use super::types::{ApiResponse, AuthHeaders, RateLimitInfo, RawResponse, RequestDescriptor};
use crate::auth::{AdminKey, CacheStats, ContentKey, TokenCache, DEFAULT_TOKEN_LIFETIME};
use crate::http::HttpTransport;

/// Shared time source for the token cache, breaker and retry deadline.
pub type SharedClock = Arc<dyn Clock>;

/// Path probed by [`ApiClient::test_connection`].
pub const SITE_PATH: &str = "/ghost/api/admin/site/";

/// Below this many remaining requests a successful response logs a warning.
pub const RATE_LIMIT_WARN_THRESHOLD: u64 = 10;

/// Below this many remaining requests pagination pauses between pages.
pub const PAGINATION_PAUSE_THRESHOLD: u64 = 5;

pub const PAGINATION_PAUSE: Duration = Duration::from_secs(1);

/// Default page size for [`ApiClient::fetch_all`].
pub const DEFAULT_PAGE_SIZE: u32 = 15;

/// Point-in-time view of the client's resilience state.
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub retry: RetryMetricsSnapshot,
    pub circuit_breaker: CircuitBreakerMetrics,
    /// `None` when no admin key is configured
    pub token_cache: Option<CacheStats>,
    pub rate_limit: RateLimitInfo,
}

/// Resilient client for one Ghost site.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    tokens: Option<TokenCache<SharedClock>>,
    content_key: Option<ContentKey>,
    api_version: String,
    min_token_remaining: Duration,
    retry: RetryExecutor<ApiError>,
    circuit_breaker: CircuitBreaker<SharedClock>,
    clock: SharedClock,
    sleeper: Arc<dyn Sleeper>,
    rate_limit: Mutex<RateLimitInfo>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("tokens", &self.tokens)
            .field("content_key", &self.content_key)
            .field("api_version", &self.api_version)
            .field("retry", &self.retry)
            .field("circuit_breaker", &self.circuit_breaker)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a builder for fluent configuration
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Build a client for `config` on the blocking HTTP transport.
    ///
    /// # Errors
    /// Returns `ApiError::Config` for an invalid configuration and
    /// `ApiError::Authentication` for a malformed key.
    pub fn from_config(config: &ClientConfig) -> ApiResult<Self> {
        let transport = HttpTransport::from_config(config)?;
        ApiClientBuilder::from_config(config)?.transport(transport).build()
    }

    /// Perform `request` with authentication, retries and, for admin calls,
    /// the circuit breaker.
    ///
    /// # Errors
    /// - `CircuitOpen` when the admin breaker is rejecting calls
    /// - `MaxRetriesExceeded` once retryable failures exhaust the policy
    /// - `DeadlineExceeded` when the policy's elapsed bound is hit
    /// - `Cancelled` when a backoff sleep is cancelled
    /// - the mapped status error for non-retryable responses
    #[instrument(skip(self, request), fields(method = %request.method(), path = %request.path(), admin = use_admin_auth))]
    pub fn execute(&self, request: &RequestDescriptor, use_admin_auth: bool) -> ApiResult<ApiResponse> {
        if !use_admin_auth {
            return self.execute_with_retry(request, false);
        }

        let before = self.circuit_breaker.get_state();
        let result = self
            .circuit_breaker
            .call_with(|| self.execute_with_retry(request, true), ApiError::trips_circuit);
        let after = self.circuit_breaker.get_state();

        if before != after {
            match after {
                CircuitState::Open => warn!(from = %before, "admin API circuit breaker opened"),
                CircuitState::Closed => info!(from = %before, "admin API circuit breaker closed"),
                CircuitState::HalfOpen => debug!(from = %before, "admin API circuit breaker half-open"),
            }
        }

        result.map_err(|err| match err {
            ResilienceError::CircuitOpen => ApiError::CircuitOpen,
            ResilienceError::OperationFailed { source } => source,
        })
    }

    /// GET `path` and return the decoded body.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub fn get(&self, path: &str, query: &[(&str, &str)], use_admin_auth: bool) -> ApiResult<Value> {
        let request = query
            .iter()
            .fold(RequestDescriptor::get(path), |request, (name, value)| request.query(*name, value));
        self.execute(&request, use_admin_auth).map(ApiResponse::into_body)
    }

    /// POST a JSON body to an admin endpoint.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub fn post(&self, path: &str, body: Value) -> ApiResult<Value> {
        self.execute(&RequestDescriptor::post(path).json(body), true).map(ApiResponse::into_body)
    }

    /// PUT a JSON body to an admin endpoint.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub fn put(&self, path: &str, body: Value) -> ApiResult<Value> {
        self.execute(&RequestDescriptor::put(path).json(body), true).map(ApiResponse::into_body)
    }

    /// DELETE an admin resource. Returns `false` if it did not exist.
    ///
    /// # Errors
    /// See [`execute`](Self::execute); a 404 is not an error here.
    pub fn delete(&self, path: &str) -> ApiResult<bool> {
        match self.execute(&RequestDescriptor::delete(path), true) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Collect every item under `resource_key` from a paginated admin
    /// endpoint, following `meta.pagination.next`.
    ///
    /// # Errors
    /// Fails on the first page that fails; items already fetched are
    /// discarded.
    #[instrument(skip(self))]
    pub fn fetch_all(&self, path: &str, resource_key: &str, limit: u32) -> ApiResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut page: u32 = 1;

        loop {
            let request = RequestDescriptor::get(path).query("limit", limit).query("page", page);
            let body = self.execute(&request, true)?.into_body();

            let page_items = match body.get(resource_key).and_then(Value::as_array) {
                Some(page_items) if !page_items.is_empty() => page_items,
                _ => break,
            };
            items.extend(page_items.iter().cloned());
            debug!(page, fetched = items.len(), "fetched page");

            let has_next = body
                .pointer("/meta/pagination/next")
                .is_some_and(|next| !next.is_null() && next != &Value::Bool(false));
            if !has_next {
                break;
            }
            page += 1;

            if self.rate_limit.lock().remaining_below(PAGINATION_PAUSE_THRESHOLD) {
                warn!("rate limit approaching, pausing pagination");
                self.sleeper.sleep(PAGINATION_PAUSE).map_err(|_| ApiError::Cancelled)?;
            }
        }

        Ok(items)
    }

    /// Whether the admin API answers an authenticated site request.
    pub fn test_connection(&self) -> bool {
        match self.get(SITE_PATH, &[], true) {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "connection test failed");
                false
            }
        }
    }

    /// Rate-limit headers from the most recent response that carried any.
    pub fn rate_limit_info(&self) -> RateLimitInfo {
        self.rate_limit.lock().clone()
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            retry: self.retry.metrics(),
            circuit_breaker: self.circuit_breaker.metrics(),
            token_cache: self.tokens.as_ref().map(TokenCache::stats),
            rate_limit: self.rate_limit_info(),
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker<SharedClock> {
        &self.circuit_breaker
    }

    pub fn token_cache(&self) -> Option<&TokenCache<SharedClock>> {
        self.tokens.as_ref()
    }

    fn execute_with_retry(&self, request: &RequestDescriptor, admin: bool) -> ApiResult<ApiResponse> {
        let mut executor = self.retry.clone();
        if request.retries_rate_limited() {
            executor.add_retry_condition(|e: &ApiError| matches!(e, ApiError::RateLimited { .. }));
        }

        let mut reauthenticated = false;
        let result = executor.run(|| self.exchange(request, admin, &mut reauthenticated));

        result.map_err(|err| match err {
            RetryError::MaxRetriesExceeded { reason: StopReason::NonRetryable, source, .. } => source,
            RetryError::MaxRetriesExceeded { source, .. } if !executor.should_retry(&source) => source,
            RetryError::MaxRetriesExceeded { attempts, source, .. } => {
                ApiError::MaxRetriesExceeded { attempts, cause: Box::new(source) }
            }
            RetryError::DeadlineExceeded { attempts, deadline, source } => {
                ApiError::DeadlineExceeded { attempts, deadline, cause: Box::new(source) }
            }
            RetryError::Cancelled { .. } => ApiError::Cancelled,
        })
    }

    /// One attempt: a single exchange, plus one re-authenticated exchange the
    /// first time an admin call sees a 401.
    fn exchange(
        &self,
        request: &RequestDescriptor,
        admin: bool,
        reauthenticated: &mut bool,
    ) -> ApiResult<ApiResponse> {
        let auth = self.auth_headers(admin)?;
        let response = self.transport.perform(&auth, request)?;

        if admin && response.status == 401 && !*reauthenticated {
            *reauthenticated = true;
            warn!("admin token rejected, re-authenticating once");
            if let Some(tokens) = &self.tokens {
                tokens.invalidate();
            }
            let auth = self.auth_headers(admin)?;
            let retried = self.transport.perform(&auth, request)?;
            return self.handle_response(retried);
        }

        self.handle_response(response)
    }

    fn auth_headers(&self, admin: bool) -> ApiResult<AuthHeaders> {
        if admin {
            let tokens = self.tokens.as_ref().ok_or_else(|| {
                ApiError::Authentication("Admin API key is required for this request".to_string())
            })?;
            let token = tokens.get_valid_token(self.min_token_remaining)?;
            Ok(AuthHeaders::admin(&token, &self.api_version))
        } else {
            let key = self.content_key.as_ref().ok_or_else(|| {
                ApiError::Authentication("Content API key is required for this request".to_string())
            })?;
            Ok(AuthHeaders::content(key.as_str(), &self.api_version))
        }
    }

    fn handle_response(&self, response: RawResponse) -> ApiResult<ApiResponse> {
        let rate_limit = RateLimitInfo::from_response(&response);
        if !rate_limit.is_empty() {
            *self.rate_limit.lock() = rate_limit.clone();
        }

        debug!(status = response.status, remaining = ?rate_limit.remaining, "response received");

        if !response.is_success() {
            let payload = serde_json::from_str::<Value>(&response.body).ok();
            let retry_after = rate_limit.retry_after_delay(self.clock.system_time());
            return Err(ApiError::from_status(response.status, payload, &rate_limit, retry_after));
        }

        if let Some(remaining) = rate_limit.remaining.filter(|r| *r < RATE_LIMIT_WARN_THRESHOLD) {
            warn!(remaining, "only {remaining} API requests remaining");
        }

        let body = if response.body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&response.body).map_err(|e| {
                ApiError::Decode(format!("status {} with invalid JSON body: {e}", response.status))
            })?
        };

        Ok(ApiResponse { status: response.status, body, rate_limit })
    }
}

/// Builder for API client
pub struct ApiClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    admin_key: Option<AdminKey>,
    content_key: Option<ContentKey>,
    api_version: String,
    token_lifetime: Duration,
    min_token_remaining: Duration,
    retry_policy: RetryPolicy,
    circuit_breaker: CircuitBreakerConfig,
    clock: SharedClock,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn JitterSource>,
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            admin_key: None,
            content_key: None,
            api_version: ghostctl_domain::DEFAULT_API_VERSION.to_string(),
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            min_token_remaining: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(ThreadSleeper::new()),
            jitter: Arc::new(ThreadRngJitter),
        }
    }
}

impl ApiClientBuilder {
    /// Seed every setting except the transport from `config`.
    ///
    /// # Errors
    /// Returns `ApiError::Config` if `config` fails validation and
    /// `ApiError::Authentication` if a key is malformed.
    pub fn from_config(config: &ClientConfig) -> ApiResult<Self> {
        config.validate()?;

        let mut retry = RetryPolicy::builder()
            .max_retries(config.retry.max_retries)
            .base_delay(config.retry.base_delay())
            .max_delay(config.retry.max_delay())
            .backoff_factor(config.retry.backoff_factor)
            .jitter(config.retry.jitter);
        if let Some(limit) = config.retry.max_elapsed() {
            retry = retry.max_elapsed(limit);
        }
        let retry_policy = retry
            .build()
            .map_err(|e| ApiError::Config(format!("Invalid retry settings: {e}")))?;

        let circuit_breaker = CircuitBreakerConfig::builder()
            .failure_threshold(config.circuit_breaker.failure_threshold)
            .recovery_timeout(config.circuit_breaker.recovery_timeout())
            .build()
            .map_err(|e| ApiError::Config(format!("Invalid circuit breaker settings: {e}")))?;

        let mut builder = Self::default()
            .api_version(config.api_version.clone())
            .token_lifetime(config.token.lifetime())
            .min_token_remaining(config.token.min_remaining())
            .retry_policy(retry_policy)
            .circuit_breaker(circuit_breaker);

        if config.has_admin_key() {
            builder = builder.admin_key(AdminKey::parse(config.admin_key.as_deref().unwrap_or_default())?);
        }
        if config.has_content_key() {
            builder =
                builder.content_key(ContentKey::new(config.content_key.clone().unwrap_or_default())?);
        }
        Ok(builder)
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn admin_key(mut self, key: AdminKey) -> Self {
        self.admin_key = Some(key);
        self
    }

    pub fn content_key(mut self, key: ContentKey) -> Self {
        self.content_key = Some(key);
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    pub fn min_token_remaining(mut self, remaining: Duration) -> Self {
        self.min_token_remaining = remaining;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sleeper used for retry backoff and pagination pauses.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn jitter_source(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build the API client
    ///
    /// # Errors
    /// Returns `ApiError::Config` if no transport or key was supplied or a
    /// resilience setting is invalid.
    pub fn build(self) -> ApiResult<ApiClient> {
        let transport =
            self.transport.ok_or_else(|| ApiError::Config("Transport not set".to_string()))?;
        if self.admin_key.is_none() && self.content_key.is_none() {
            return Err(ApiError::Config(
                "Either an admin API key or a content API key is required".to_string(),
            ));
        }
        if self.token_lifetime <= self.min_token_remaining {
            return Err(ApiError::Config(
                "Token lifetime must exceed the minimum remaining lifetime".to_string(),
            ));
        }

        let circuit_breaker = CircuitBreaker::with_clock(self.circuit_breaker, Arc::clone(&self.clock))
            .map_err(|e| ApiError::Config(format!("Failed to create circuit breaker: {e}")))?;

        let retry = RetryExecutor::new(self.retry_policy)
            .with_sleeper(Arc::clone(&self.sleeper))
            .with_clock(Arc::clone(&self.clock))
            .with_jitter_source(self.jitter)
            .with_retry_condition(ApiError::is_retryable)
            .with_delay_hint(ApiError::retry_after);

        let tokens = self
            .admin_key
            .map(|key| TokenCache::with_clock(key, self.token_lifetime, Arc::clone(&self.clock)));

        Ok(ApiClient {
            transport,
            tokens,
            content_key: self.content_key,
            api_version: self.api_version,
            min_token_remaining: self.min_token_remaining,
            retry,
            circuit_breaker,
            clock: self.clock,
            sleeper: self.sleeper,
            rate_limit: Mutex::new(RateLimitInfo::default()),
        })
    }
}
