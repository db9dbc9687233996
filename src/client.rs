use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::ReqflowResult;
use crate::cache::{CacheLayer, CacheStore, CacheStrategy, MemoryStore, cache_key_for};
use crate::error::{ErrorKind, HttpClientError};
use crate::interceptor::{InterceptorChain, RequestInterceptor, ResponseInterceptor};
use crate::metrics::{ClientMetrics, ClientMetricsSnapshot};
use crate::pool::RequestPool;
use crate::request::{RequestBuilder, RequestDescriptor};
use crate::response::ResponseEnvelope;
use crate::retry::{AttemptRecord, RetryPolicy};
use crate::transport::Transport;
use crate::util::{join_base_path, merge_headers, parse_retry_after};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);
const DEFAULT_CLIENT_NAME: &str = "reqflow";

pub struct HttpClientBuilder {
    transport: Arc<dyn Transport>,
    base_url: Option<String>,
    default_headers: HeaderMap,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    cache_store: Arc<dyn CacheStore>,
    default_cache_ttl: Duration,
    default_cache_strategy: CacheStrategy,
    max_in_flight: Option<usize>,
    client_name: String,
}

impl HttpClientBuilder {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: None,
            default_headers: HeaderMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::standard(),
            cache_store: Arc::new(MemoryStore::new()),
            default_cache_ttl: DEFAULT_CACHE_TTL,
            default_cache_strategy: CacheStrategy::NetworkOnly,
            max_in_flight: None,
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn cache_store(mut self, cache_store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = cache_store;
        self
    }

    pub fn default_cache_ttl(mut self, default_cache_ttl: Duration) -> Self {
        self.default_cache_ttl = default_cache_ttl.max(Duration::from_millis(1));
        self
    }

    pub fn default_cache_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.default_cache_strategy = strategy;
        self
    }

    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight.max(1));
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn try_build(self) -> ReqflowResult<HttpClient> {
        if let Some(base_url) = &self.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(HttpClientError::new(
                    ErrorKind::Validation,
                    Method::GET,
                    base_url.clone(),
                    "client base_url must use an http or https scheme",
                ));
            }
        }

        Ok(HttpClient {
            transport: self.transport,
            base_url: self.base_url,
            default_headers: self.default_headers,
            request_timeout: self.request_timeout,
            retry_policy: self.retry_policy,
            cache: CacheLayer::new(self.cache_store, self.default_cache_ttl),
            default_cache_strategy: self.default_cache_strategy,
            pool: match self.max_in_flight {
                Some(capacity) => RequestPool::bounded(capacity),
                None => RequestPool::unbounded(),
            },
            client_name: self.client_name,
            request_interceptors: Arc::new(InterceptorChain::new()),
            response_interceptors: Arc::new(InterceptorChain::new()),
            metrics: ClientMetrics::default(),
        })
    }

    pub fn build(self) -> HttpClient {
        self.try_build()
            .unwrap_or_else(|error| panic!("failed to build reqflow http client: {error}"))
    }
}

/// The request pipeline: per dispatch it applies request interceptors,
/// consults the cache per strategy, acquires pool admission, invokes the
/// injected transport, classifies the outcome, retries or fails, applies
/// response interceptors and writes through to the cache.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    base_url: Option<String>,
    default_headers: HeaderMap,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    cache: CacheLayer,
    default_cache_strategy: CacheStrategy,
    pool: RequestPool,
    client_name: String,
    request_interceptors: Arc<InterceptorChain<dyn RequestInterceptor>>,
    response_interceptors: Arc<InterceptorChain<dyn ResponseInterceptor>>,
    metrics: ClientMetrics,
}

impl HttpClient {
    pub fn builder(transport: impl Transport + 'static) -> HttpClientBuilder {
        HttpClientBuilder::new(Arc::new(transport))
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, path.into())
    }

    pub fn get(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    pub fn head(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::HEAD, path)
    }

    /// Chain applied to every outgoing descriptor, in registration order.
    pub fn request_interceptors(&self) -> &InterceptorChain<dyn RequestInterceptor> {
        &self.request_interceptors
    }

    /// Chain applied to every attempt outcome, successes and faults alike.
    pub fn response_interceptors(&self) -> &InterceptorChain<dyn ResponseInterceptor> {
        &self.response_interceptors
    }

    pub fn metrics_snapshot(&self) -> ClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub(crate) fn default_cache_strategy(&self) -> CacheStrategy {
        self.default_cache_strategy
    }

    pub(crate) fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        match &self.base_url {
            Some(base_url) => join_base_path(base_url, path),
            None => path.to_owned(),
        }
    }

    /// Runs one logical request to a terminal state: an envelope or a
    /// classified error. See the crate docs for the full lifecycle.
    pub async fn dispatch(&self, descriptor: RequestDescriptor) -> ReqflowResult<ResponseEnvelope> {
        self.metrics.record_request_started();
        let _in_flight = self.metrics.enter_in_flight();
        let result = self.dispatch_inner(descriptor).await;
        match &result {
            Ok(_) => self.metrics.record_success(),
            Err(_) => self.metrics.record_failure(),
        }
        result
    }

    async fn dispatch_inner(
        &self,
        mut descriptor: RequestDescriptor,
    ) -> ReqflowResult<ResponseEnvelope> {
        descriptor.headers = merge_headers(&self.default_headers, &descriptor.headers);

        // A request-chain fault aborts before any cache or network activity.
        let descriptor = self.request_interceptors.run(descriptor)?;
        if descriptor.cancel.is_cancelled() {
            return Err(HttpClientError::cancelled(
                &descriptor.method,
                &descriptor.url,
                "dispatch",
            ));
        }

        let strategy = descriptor.cache.strategy;
        let key = cache_key_for(&descriptor);

        match strategy {
            CacheStrategy::CacheOnly => {
                return match self.cache.lookup(&key) {
                    Some(entry) => {
                        self.metrics.record_cache_hit();
                        debug!(key = %key, strategy = %strategy, "serving cached response");
                        Ok(entry.value)
                    }
                    None => Err(HttpClientError::cache_miss(
                        &descriptor.method,
                        &descriptor.url,
                    )),
                };
            }
            CacheStrategy::CacheFirst => {
                if let Some(entry) = self.cache.lookup(&key) {
                    if entry.is_fresh(SystemTime::now()) {
                        self.metrics.record_cache_hit();
                        debug!(key = %key, strategy = %strategy, "serving fresh cached response");
                        return Ok(entry.value);
                    }
                }
            }
            CacheStrategy::StaleWhileRevalidate => {
                if let Some(entry) = self.cache.lookup(&key) {
                    self.metrics.record_cache_hit();
                    debug!(key = %key, strategy = %strategy, "serving cached response, refreshing in background");
                    self.spawn_revalidate(descriptor.clone(), key);
                    return Ok(entry.value);
                }
            }
            CacheStrategy::NetworkFirst | CacheStrategy::NetworkOnly => {}
        }

        match self.execute_with_retry(&descriptor).await {
            Ok(envelope) => {
                if strategy.writes_through() {
                    self.cache
                        .store_response(key, envelope.clone(), descriptor.cache.ttl);
                }
                Ok(envelope)
            }
            Err(error) => {
                // Cancellation always surfaces as cancel, even when a stale
                // fallback exists.
                if strategy == CacheStrategy::NetworkFirst && error.kind != ErrorKind::Cancel {
                    if let Some(entry) = self.cache.lookup(&key) {
                        self.metrics.record_cache_hit();
                        warn!(key = %key, error = %error, "serving cached response after network failure");
                        return Ok(entry.value);
                    }
                }
                Err(error)
            }
        }
    }

    fn spawn_revalidate(&self, mut descriptor: RequestDescriptor, key: crate::cache::CacheKey) {
        // The caller has already been served; the refresh runs on its own
        // token so a later cancellation of the original request cannot
        // interrupt it.
        descriptor.cancel = CancellationToken::new();
        let client = self.clone();
        tokio::spawn(async move {
            match client.execute_with_retry(&descriptor).await {
                Ok(envelope) => {
                    client
                        .cache
                        .store_response(key, envelope, descriptor.cache.ttl);
                }
                Err(error) => {
                    // Stale entry stays in place on refresh failure.
                    debug!(key = %key, error = %error, "background revalidation failed");
                }
            }
        });
    }

    async fn execute_with_retry(
        &self,
        descriptor: &RequestDescriptor,
    ) -> ReqflowResult<ResponseEnvelope> {
        let retry_policy = descriptor
            .retry
            .clone()
            .unwrap_or_else(|| self.retry_policy.clone());
        let max_attempts = retry_policy.max_attempts_value();
        let timeout_value = descriptor
            .timeout
            .unwrap_or(self.request_timeout)
            .max(Duration::from_millis(1));
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut attempt = 0_usize;

        loop {
            attempt += 1;
            let span = info_span!(
                "reqflow.request",
                client = %self.client_name,
                method = %descriptor.method,
                url = %descriptor.url,
                attempt = attempt,
                max_attempts = max_attempts
            );
            let outcome = self
                .attempt_once(descriptor, timeout_value)
                .instrument(span)
                .await;

            match outcome {
                Ok(envelope) => {
                    return match self.response_interceptors.run(Ok(envelope)) {
                        Ok(envelope) => {
                            debug!(attempts = attempt, "request fulfilled");
                            Ok(envelope)
                        }
                        // An interceptor-raised fault is a logic error, not a
                        // transport fault; it is never retried.
                        Err(fault) => Err(fault.with_attempts(attempt).with_history(attempts)),
                    };
                }
                Err(error) => {
                    // The response chain sees the fault and may recover it.
                    let error = match self.response_interceptors.run(Err(error)) {
                        Ok(envelope) => return Ok(envelope),
                        Err(error) => error,
                    };

                    if error.kind == ErrorKind::Cancel {
                        return Err(error.with_attempts(attempt).with_history(attempts));
                    }

                    if retry_policy.should_retry(&error, attempt) {
                        let delay = retry_policy.delay_with_hint(attempt, error.retry_after);
                        attempts.push(AttemptRecord {
                            index: attempt - 1,
                            error: Some(error.clone()),
                            delay: Some(delay),
                        });
                        warn!(
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "retrying request"
                        );
                        self.metrics.record_retry();
                        if !delay.is_zero() {
                            tokio::select! {
                                biased;
                                _ = descriptor.cancel.cancelled() => {
                                    return Err(HttpClientError::cancelled(
                                        &descriptor.method,
                                        &descriptor.url,
                                        "retry backoff",
                                    )
                                    .with_attempts(attempt)
                                    .with_history(attempts));
                                }
                                _ = sleep(delay) => {}
                            }
                        }
                        continue;
                    }

                    attempts.push(AttemptRecord {
                        index: attempt - 1,
                        error: Some(error.clone()),
                        delay: None,
                    });
                    debug!(
                        attempts = attempts.len(),
                        kind = %error.kind,
                        "request failed terminally"
                    );
                    return Err(error.with_attempts(attempt).with_history(attempts));
                }
            }
        }
    }

    async fn attempt_once(
        &self,
        descriptor: &RequestDescriptor,
        timeout_value: Duration,
    ) -> ReqflowResult<ResponseEnvelope> {
        let method = &descriptor.method;
        let url = &descriptor.url;
        if descriptor.cancel.is_cancelled() {
            return Err(HttpClientError::cancelled(method, url, "dispatch"));
        }

        // One ticket per attempt, released before any backoff wait so queued
        // requests are not starved by a sleeping retry.
        let ticket = self.pool.acquire(method, url, &descriptor.cancel).await?;
        debug!("sending request");
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = descriptor.cancel.cancelled() => {
                Err(HttpClientError::cancelled(method, url, "transport"))
            }
            outcome = timeout(timeout_value, self.transport.send(descriptor.clone())) => {
                match outcome {
                    Ok(Ok(envelope)) => {
                        let envelope =
                            envelope.with_context(method.clone(), url, started.elapsed());
                        if envelope.status().is_success() {
                            debug!(
                                status = envelope.status().as_u16(),
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "request completed"
                            );
                            Ok(envelope)
                        } else {
                            let retry_after =
                                parse_retry_after(envelope.headers(), SystemTime::now());
                            Err(HttpClientError::from_status(envelope, retry_after))
                        }
                    }
                    Ok(Err(fault)) => Err(HttpClientError::from_fault(fault, method, url)),
                    Err(_) => Err(HttpClientError::timeout(method, url, timeout_value)),
                }
            }
        };

        ticket.release();
        outcome
    }
}
