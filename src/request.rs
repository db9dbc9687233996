use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::ReqflowResult;
use crate::cache::{CacheKey, CachePolicy, CacheStrategy};
use crate::client::HttpClient;
use crate::error::{ErrorKind, HttpClientError};
use crate::response::ResponseEnvelope;
use crate::retry::RetryPolicy;

/// The logical request handed to the pipeline. Immutable once dispatched;
/// interceptors produce a new descriptor rather than mutating shared state.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    /// Case-insensitive keys, last write wins.
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    pub cache: CachePolicy,
    /// Per-request retry override; the client policy applies when unset.
    pub retry: Option<RetryPolicy>,
    pub cancel: CancellationToken,
    pub metadata: BTreeMap<String, String>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
            cache: CachePolicy::default(),
            retry: None,
            cancel: CancellationToken::new(),
            metadata: BTreeMap::new(),
        }
    }
}

#[doc(hidden)]
pub struct RequestBuilder<'a> {
    client: &'a HttpClient,
    method: Method,
    path: String,
    headers: HeaderMap,
    query_pairs: Vec<(String, String)>,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    cache_strategy: Option<CacheStrategy>,
    cache_ttl: Option<Duration>,
    cache_key: Option<crate::cache::CacheKeyFn>,
    retry_policy: Option<RetryPolicy>,
    cancel: Option<CancellationToken>,
    metadata: BTreeMap<String, String>,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a HttpClient, method: Method, path: String) -> Self {
        Self {
            client,
            method,
            path,
            headers: HeaderMap::new(),
            query_pairs: Vec::new(),
            body: None,
            timeout: None,
            cache_strategy: None,
            cache_ttl: None,
            cache_key: None,
            retry_policy: None,
            cancel: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> ReqflowResult<Self> {
        let name = parse_header_name(name, &self.method, &self.path)?;
        let value = parse_header_value(name.as_str(), value, &self.method, &self.path)?;
        Ok(self.header(name, value))
    }

    pub fn query_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_pairs.push((name.into(), value.into()));
        self
    }

    pub fn query<T>(mut self, params: &T) -> ReqflowResult<Self>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_urlencoded::to_string(params).map_err(|source| {
            HttpClientError::new(
                ErrorKind::Validation,
                self.method.clone(),
                self.path.clone(),
                format!("failed to serialize request query: {source}"),
            )
        })?;
        self.query_pairs.extend(
            url::form_urlencoded::parse(encoded.as_bytes())
                .map(|(name, value)| (name.into_owned(), value.into_owned())),
        );
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json<T>(self, payload: &T) -> ReqflowResult<Self>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload).map_err(|source| {
            HttpClientError::new(
                ErrorKind::Validation,
                self.method.clone(),
                self.path.clone(),
                format!("failed to serialize request json: {source}"),
            )
        })?;
        let with_body = self.body(Bytes::from(body));
        Ok(with_body.header(CONTENT_TYPE, HeaderValue::from_static("application/json")))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn cache_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.cache_strategy = Some(strategy);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn cache_key<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&RequestDescriptor) -> CacheKey + Send + Sync + 'static,
    {
        self.cache_key = Some(std::sync::Arc::new(key_fn));
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Builds the descriptor, resolving client defaults, and dispatches it.
    pub async fn send(self) -> ReqflowResult<ResponseEnvelope> {
        let client = self.client;
        let descriptor = self.into_descriptor();
        client.dispatch(descriptor).await
    }

    /// Builds the final descriptor without dispatching it.
    pub fn into_descriptor(self) -> RequestDescriptor {
        let url = self.client.resolve_url(&self.path);
        let mut descriptor = RequestDescriptor::new(self.method, url);
        descriptor.headers = self.headers;
        descriptor.query = self.query_pairs;
        descriptor.body = self.body;
        descriptor.timeout = self.timeout;
        descriptor.cache = CachePolicy {
            strategy: self
                .cache_strategy
                .unwrap_or_else(|| self.client.default_cache_strategy()),
            ttl: self.cache_ttl,
            key: self.cache_key,
        };
        descriptor.retry = self.retry_policy;
        if let Some(cancel) = self.cancel {
            descriptor.cancel = cancel;
        }
        descriptor.metadata = self.metadata;
        descriptor
    }
}

fn parse_header_name(
    name: &str,
    method: &Method,
    url: &str,
) -> ReqflowResult<HeaderName> {
    name.parse().map_err(|_| {
        HttpClientError::new(
            ErrorKind::Validation,
            method.clone(),
            url,
            format!("invalid header name: {name}"),
        )
    })
}

fn parse_header_value(
    name: &str,
    value: &str,
    method: &Method,
    url: &str,
) -> ReqflowResult<HeaderValue> {
    value.parse().map_err(|_| {
        HttpClientError::new(
            ErrorKind::Validation,
            method.clone(),
            url,
            format!("invalid header value for {name}"),
        )
    })
}
