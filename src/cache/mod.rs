mod lru;
mod memory;
#[cfg(feature = "sled-store")]
mod sled_store;

pub use lru::LruStore;
pub use memory::MemoryStore;
#[cfg(feature = "sled-store")]
pub use sled_store::SledStore;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::header::{ETAG, HeaderName, HeaderValue, LAST_MODIFIED};
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::request::RequestDescriptor;
use crate::response::ResponseEnvelope;

/// Per-request policy governing when the cache is consulted versus the
/// network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheStrategy {
    /// Serve a fresh entry without a transport call; on miss or stale, go to
    /// the network and store the result.
    CacheFirst,
    /// Always attempt the network; on terminal transport failure, fall back
    /// to any cached entry regardless of freshness.
    NetworkFirst,
    /// Serve the cached entry or fail with a not-found classification. Never
    /// calls the transport.
    CacheOnly,
    /// Bypass cache reads entirely; successful responses still write through.
    #[default]
    NetworkOnly,
    /// Serve any cached entry immediately while refreshing in the background
    /// for subsequent calls.
    StaleWhileRevalidate,
}

impl CacheStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CacheFirst => "cache-first",
            Self::NetworkFirst => "network-first",
            Self::CacheOnly => "cache-only",
            Self::NetworkOnly => "network-only",
            Self::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }

    pub(crate) fn writes_through(self) -> bool {
        !matches!(self, Self::CacheOnly)
    }
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

pub type CacheKeyFn = Arc<dyn Fn(&RequestDescriptor) -> CacheKey + Send + Sync>;

/// Per-request cache directives; unset fields fall back to client defaults.
#[derive(Clone, Default)]
pub struct CachePolicy {
    pub strategy: CacheStrategy,
    pub ttl: Option<Duration>,
    pub key: Option<CacheKeyFn>,
}

impl std::fmt::Debug for CachePolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CachePolicy")
            .field("strategy", &self.strategy)
            .field("ttl", &self.ttl)
            .field("custom_key", &self.key.is_some())
            .finish()
    }
}

/// Deterministic cache key: normalized method + URL + sorted query pairs.
/// Header order and casing never participate.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Builds the key for a descriptor, honoring a custom key function when set.
pub fn cache_key_for(request: &RequestDescriptor) -> CacheKey {
    if let Some(key_fn) = &request.cache.key {
        return key_fn(request);
    }

    let (base, mut pairs) = split_url(&request.url);
    pairs.extend(request.query.iter().cloned());
    pairs.sort();

    if pairs.is_empty() {
        return CacheKey(format!("{} {base}", request.method));
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in &pairs {
        serializer.append_pair(name, value);
    }
    CacheKey(format!("{} {base}?{}", request.method, serializer.finish()))
}

/// Splits a URL into a normalized base (scheme/host lowercased, default port
/// and fragment dropped) and its inline query pairs.
fn split_url(raw: &str) -> (String, Vec<(String, String)>) {
    if let Ok(mut parsed) = url::Url::parse(raw) {
        let pairs = parsed
            .query_pairs()
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        parsed.set_query(None);
        parsed.set_fragment(None);
        return (parsed.to_string(), pairs);
    }

    let without_fragment = raw.split('#').next().unwrap_or(raw);
    match without_fragment.split_once('?') {
        Some((base, query)) => {
            let pairs = url::form_urlencoded::parse(query.as_bytes())
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect();
            (base.to_owned(), pairs)
        }
        None => (without_fragment.to_owned(), Vec::new()),
    }
}

/// One stored response with its freshness metadata.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: ResponseEnvelope,
    pub created_at: SystemTime,
    pub ttl: Duration,
    pub validator: Option<String>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, value: ResponseEnvelope, ttl: Duration) -> Self {
        let validator = extract_validator(value.headers());
        Self {
            key,
            value,
            created_at: SystemTime::now(),
            ttl,
            validator,
        }
    }

    /// An entry is fresh iff `now < created_at + ttl`.
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        match self.created_at.checked_add(self.ttl) {
            Some(deadline) => now < deadline,
            None => true,
        }
    }

    pub fn to_persisted(&self) -> PersistedEntry {
        PersistedEntry {
            key: self.key.as_str().to_owned(),
            value: PersistedResponse {
                status: self.value.status().as_u16(),
                headers: self
                    .value
                    .headers()
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.as_str().to_owned(),
                            String::from_utf8_lossy(value.as_bytes()).into_owned(),
                        )
                    })
                    .collect(),
                body: self.value.body().to_vec(),
                method: self.value.method().as_str().to_owned(),
                url: self.value.url().to_owned(),
            },
            created_at_ms: self
                .created_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            ttl_ms: self.ttl.as_millis().min(u64::MAX as u128) as u64,
            validator: self.validator.clone(),
        }
    }

    /// Rebuilds an entry from its persisted shape; `None` when the stored
    /// record no longer decodes to valid HTTP vocabulary.
    pub fn from_persisted(persisted: PersistedEntry) -> Option<Self> {
        let status = StatusCode::from_u16(persisted.value.status).ok()?;
        let method = Method::from_bytes(persisted.value.method.as_bytes()).ok()?;
        let mut headers = HeaderMap::new();
        for (name, value) in &persisted.value.headers {
            let name: HeaderName = name.parse().ok()?;
            let value = HeaderValue::from_str(value).ok()?;
            headers.append(name, value);
        }
        let envelope = ResponseEnvelope::new(status, headers, Bytes::from(persisted.value.body))
            .with_context(method, &persisted.value.url, Duration::ZERO);
        Some(Self {
            key: CacheKey::new(persisted.key),
            value: envelope,
            created_at: UNIX_EPOCH + Duration::from_millis(persisted.created_at_ms),
            ttl: Duration::from_millis(persisted.ttl_ms),
            validator: persisted.validator,
        })
    }
}

fn extract_validator(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(ETAG).or_else(|| headers.get(LAST_MODIFIED))?;
    value.to_str().ok().map(ToOwned::to_owned)
}

/// Persisted shape of a cache entry, for storage backends that outlive the
/// process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: String,
    pub value: PersistedResponse,
    pub created_at_ms: u64,
    pub ttl_ms: u64,
    pub validator: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub method: String,
    pub url: String,
}

/// Capability contract every backend exposes. Each operation is atomic per
/// key; a concurrent reader sees either the previous entry or the new one,
/// never a partial write.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;
    fn set(&self, entry: CacheEntry);
    fn delete(&self, key: &CacheKey);
    fn clear(&self);
}

/// Strategy-agnostic view of the store the pipeline talks to.
#[derive(Clone)]
pub(crate) struct CacheLayer {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
}

impl CacheLayer {
    pub(crate) fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    pub(crate) fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.store.get(key)
    }

    pub(crate) fn store_response(
        &self,
        key: CacheKey,
        value: ResponseEnvelope,
        ttl: Option<Duration>,
    ) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.store.set(CacheEntry::new(key, value, ttl));
    }

    pub(crate) fn clear(&self) {
        self.store.clear();
    }
}
