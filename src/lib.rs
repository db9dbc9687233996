//! `reqflow` is an HTTP request-lifecycle engine: it turns a logical request
//! description into a response or a classified failure, coordinating
//! interceptor transforms, response caching, retry/backoff decisions and
//! bounded request concurrency over an injected transport.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use bytes::Bytes;
//! use http::{HeaderMap, StatusCode};
//! use reqflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::builder(|_request: RequestDescriptor| async move {
//!         Ok::<_, TransportFault>(ResponseEnvelope::new(
//!             StatusCode::OK,
//!             HeaderMap::new(),
//!             Bytes::from_static(b"{\"id\":\"demo\"}"),
//!         ))
//!     })
//!     .base_url("https://api.example.com")
//!     .request_timeout(Duration::from_secs(3))
//!     .retry_policy(RetryPolicy::standard().max_attempts(3))
//!     .max_in_flight(32)
//!     .try_build()?;
//!
//!     let response = client
//!         .get("/v1/items")
//!         .query_pair("page", "1")
//!         .cache_strategy(CacheStrategy::CacheFirst)
//!         .send()
//!         .await?;
//!
//!     println!("status={}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! # Request lifecycle
//!
//! Each dispatch runs: request interceptors → cache consult per strategy →
//! pool admission → transport → outcome classification → retry-or-fail →
//! response interceptors → cache write-through. A request suspends only at
//! pool admission, the retry backoff wait and the transport call, and each
//! suspension is cancellable through the descriptor's token; cancellation
//! always surfaces as an error of kind `cancel`.

pub mod cache;
mod client;
mod error;
mod interceptor;
mod metrics;
mod pool;
mod request;
mod response;
mod retry;
mod transport;
mod util;

pub use crate::cache::{
    CacheEntry, CacheKey, CachePolicy, CacheStore, CacheStrategy, LruStore, MemoryStore,
    cache_key_for,
};
pub use crate::client::{HttpClient, HttpClientBuilder};
pub use crate::error::{
    ErrorKind, ErrorRecord, HttpClientError, TransportFaultCode, classify_fault_code,
    classify_status,
};
pub use crate::interceptor::{
    InterceptorChain, InterceptorHandle, RequestInterceptor, ResponseInterceptor,
};
pub use crate::metrics::ClientMetricsSnapshot;
pub use crate::pool::{PoolTicket, RequestPool};
pub use crate::request::{RequestBuilder, RequestDescriptor};
pub use crate::response::ResponseEnvelope;
pub use crate::retry::{AttemptRecord, JitterMode, RetryPolicy};
pub use crate::transport::{Transport, TransportFault, TransportFuture};

pub use tokio_util::sync::CancellationToken;

pub type ReqflowResult<T> = std::result::Result<T, HttpClientError>;

pub mod prelude {
    pub use crate::{
        CacheStrategy, CancellationToken, ErrorKind, HttpClient, HttpClientError, JitterMode,
        ReqflowResult, RequestDescriptor, ResponseEnvelope, RetryPolicy, Transport, TransportFault,
        TransportFaultCode,
    };
}
