use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::ReqflowResult;
use crate::error::{ErrorKind, HttpClientError};
use crate::util::truncate_body;

/// A fully buffered response, produced exactly once per successful attempt.
///
/// Transports construct it with [`ResponseEnvelope::new`]; the pipeline stamps
/// the originating method, URL and attempt timing before handing it out.
#[derive(Clone, Debug)]
pub struct ResponseEnvelope {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    method: Method,
    url: String,
    elapsed: Duration,
}

impl ResponseEnvelope {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            method: Method::default(),
            url: String::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn with_context(mut self, method: Method, url: &str, elapsed: Duration) -> Self {
        self.method = method;
        self.url = url.to_owned();
        self.elapsed = elapsed;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("unknown")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Method of the originating request.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// URL of the originating request.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wall-clock duration of the successful attempt.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> ReqflowResult<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|source| {
            HttpClientError::new(
                ErrorKind::Parse,
                self.method.clone(),
                self.url.clone(),
                format!(
                    "failed to decode response json: {source}; body={}",
                    truncate_body(&self.body)
                ),
            )
        })
    }
}
