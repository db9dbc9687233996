use std::time::Duration;

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::response::ResponseEnvelope;
use crate::retry::AttemptRecord;
use crate::transport::TransportFault;
use crate::util::truncate_body;

/// Closed taxonomy of terminal failure kinds.
///
/// Every error surfaced by [`crate::HttpClient::dispatch`] carries exactly one
/// kind. Retryability usually follows the kind; statuses 408 and 429 are
/// retryable regardless of the kind they map to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Cancel,
    Parse,
    Validation,
    Authentication,
    Authorization,
    NotFound,
    ServerError,
    RateLimit,
    PayloadTooLarge,
    UnsupportedMediaType,
    Unknown,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Cancel => "cancel",
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::ServerError => "server_error",
            Self::RateLimit => "rate_limit",
            Self::PayloadTooLarge => "payload_too_large",
            Self::UnsupportedMediaType => "unsupported_media_type",
            Self::Unknown => "unknown",
        }
    }

    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::ServerError | Self::RateLimit
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Connection-level fault codes reported by the injected transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportFaultCode {
    HostNotFound,
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    Other,
}

impl TransportFaultCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HostNotFound => "host_not_found",
            Self::ConnectionRefused => "connection_refused",
            Self::ConnectionReset => "connection_reset",
            Self::ConnectionAborted => "connection_aborted",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for TransportFaultCode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Maps an HTTP status to its error kind. Success statuses never reach this.
pub fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        400 => ErrorKind::Validation,
        401 => ErrorKind::Authentication,
        403 => ErrorKind::Authorization,
        404 => ErrorKind::NotFound,
        413 => ErrorKind::PayloadTooLarge,
        415 => ErrorKind::UnsupportedMediaType,
        429 => ErrorKind::RateLimit,
        code if code >= 500 => ErrorKind::ServerError,
        _ => ErrorKind::Unknown,
    }
}

/// Maps a transport fault code to its error kind.
pub fn classify_fault_code(code: TransportFaultCode) -> ErrorKind {
    match code {
        TransportFaultCode::ConnectionAborted => ErrorKind::Timeout,
        TransportFaultCode::HostNotFound
        | TransportFaultCode::ConnectionRefused
        | TransportFaultCode::ConnectionReset => ErrorKind::Network,
        TransportFaultCode::Other => ErrorKind::Unknown,
    }
}

/// A classified terminal failure.
///
/// One struct with a closed `kind` tag rather than one error type per kind;
/// the optional fields carry whatever the originating outcome supplied.
#[derive(Clone, Debug, Error)]
#[error("{kind} error for {method} {url}: {message}")]
pub struct HttpClientError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub fault_code: Option<TransportFaultCode>,
    pub retryable: bool,
    /// Attempts performed before this error became terminal. Zero when the
    /// failure happened before any transport attempt.
    pub attempts: usize,
    pub method: Method,
    pub url: String,
    pub message: String,
    /// Server-supplied Retry-After hint, when the failing response carried one.
    pub retry_after: Option<Duration>,
    /// The failing response, when the error came from an HTTP status.
    pub response: Option<Box<ResponseEnvelope>>,
    /// Per-attempt outcomes of the dispatch this error terminated, oldest
    /// first. Empty when the failure happened before any transport attempt.
    pub attempt_history: Vec<AttemptRecord>,
}

impl HttpClientError {
    pub fn new(
        kind: ErrorKind,
        method: Method,
        url: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            status: None,
            fault_code: None,
            retryable: kind.is_retryable(),
            attempts: 0,
            method,
            url: url.into(),
            message: message.into(),
            retry_after: None,
            response: None,
            attempt_history: Vec::new(),
        }
    }

    pub(crate) fn cancelled(method: &Method, url: &str, stage: &str) -> Self {
        Self::new(
            ErrorKind::Cancel,
            method.clone(),
            url,
            format!("request cancelled during {stage}"),
        )
    }

    pub(crate) fn timeout(method: &Method, url: &str, timeout: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            method.clone(),
            url,
            format!("request timed out after {}ms", timeout.as_millis()),
        )
    }

    pub(crate) fn from_fault(fault: TransportFault, method: &Method, url: &str) -> Self {
        let kind = classify_fault_code(fault.code);
        let mut error = Self::new(
            kind,
            method.clone(),
            url,
            format!("transport fault ({}): {}", fault.code, fault.message),
        );
        error.fault_code = Some(fault.code);
        error
    }

    pub(crate) fn from_status(
        response: ResponseEnvelope,
        retry_after: Option<Duration>,
    ) -> Self {
        let status = response.status();
        let kind = classify_status(status);
        let mut error = Self::new(
            kind,
            response.method().clone(),
            response.url(),
            format!(
                "http status {} ({}): {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown"),
                truncate_body(response.body()),
            ),
        );
        error.status = Some(status.as_u16());
        // 408 and 429 are retryable whatever kind they carry.
        error.retryable = kind.is_retryable() || matches!(status.as_u16(), 408 | 429);
        error.retry_after = retry_after;
        error.response = Some(Box::new(response));
        error
    }

    pub(crate) fn cache_miss(method: &Method, url: &str) -> Self {
        Self::new(
            ErrorKind::NotFound,
            method.clone(),
            url,
            "cache-only request found no cached entry",
        )
    }

    pub(crate) fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    pub(crate) fn with_history(mut self, attempt_history: Vec<AttemptRecord>) -> Self {
        self.attempt_history = attempt_history;
        self
    }

    /// Lossless serialization to a plain record for cross-boundary diagnostics.
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind,
            status: self.status,
            fault_code: self.fault_code,
            retryable: self.retryable,
            attempts: self.attempts,
            method: self.method.as_str().to_owned(),
            url: self.url.clone(),
            message: self.message.clone(),
        }
    }

    pub fn from_record(record: ErrorRecord) -> Self {
        Self {
            kind: record.kind,
            status: record.status,
            fault_code: record.fault_code,
            retryable: record.retryable,
            attempts: record.attempts,
            method: Method::from_bytes(record.method.as_bytes()).unwrap_or(Method::GET),
            url: record.url,
            message: record.message,
            retry_after: None,
            response: None,
            attempt_history: Vec::new(),
        }
    }
}

/// Plain serializable form of [`HttpClientError`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub fault_code: Option<TransportFaultCode>,
    pub retryable: bool,
    pub attempts: usize,
    pub method: String,
    pub url: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_follows_closed_mapping() {
        let table = [
            (400, ErrorKind::Validation),
            (401, ErrorKind::Authentication),
            (403, ErrorKind::Authorization),
            (404, ErrorKind::NotFound),
            (408, ErrorKind::Unknown),
            (413, ErrorKind::PayloadTooLarge),
            (415, ErrorKind::UnsupportedMediaType),
            (429, ErrorKind::RateLimit),
            (500, ErrorKind::ServerError),
            (503, ErrorKind::ServerError),
            (418, ErrorKind::Unknown),
        ];
        for (code, expected) in table {
            let status = StatusCode::from_u16(code).expect("valid status");
            assert_eq!(classify_status(status), expected, "status {code}");
        }
    }

    #[test]
    fn status_408_is_unknown_kind_but_retryable() {
        use bytes::Bytes;
        use http::HeaderMap;

        for (code, kind) in [(408, ErrorKind::Unknown), (429, ErrorKind::RateLimit)] {
            let envelope = ResponseEnvelope::new(
                StatusCode::from_u16(code).expect("valid status"),
                HeaderMap::new(),
                Bytes::from_static(b"try later"),
            );
            let error = HttpClientError::from_status(envelope, None);
            assert_eq!(error.kind, kind, "status {code}");
            assert_eq!(error.status, Some(code));
            assert!(error.retryable, "status {code} should be retryable");
        }

        let envelope = ResponseEnvelope::new(
            StatusCode::BAD_REQUEST,
            HeaderMap::new(),
            Bytes::from_static(b"nope"),
        );
        let error = HttpClientError::from_status(envelope, None);
        assert!(!error.retryable);
    }

    #[test]
    fn fault_code_classification_follows_closed_mapping() {
        assert_eq!(
            classify_fault_code(TransportFaultCode::ConnectionAborted),
            ErrorKind::Timeout
        );
        for code in [
            TransportFaultCode::HostNotFound,
            TransportFaultCode::ConnectionRefused,
            TransportFaultCode::ConnectionReset,
        ] {
            assert_eq!(classify_fault_code(code), ErrorKind::Network);
        }
        assert_eq!(
            classify_fault_code(TransportFaultCode::Other),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn retryable_kinds_are_exactly_the_transient_ones() {
        let retryable = [
            ErrorKind::Network,
            ErrorKind::Timeout,
            ErrorKind::ServerError,
            ErrorKind::RateLimit,
        ];
        let terminal = [
            ErrorKind::Cancel,
            ErrorKind::Parse,
            ErrorKind::Validation,
            ErrorKind::Authentication,
            ErrorKind::Authorization,
            ErrorKind::NotFound,
            ErrorKind::PayloadTooLarge,
            ErrorKind::UnsupportedMediaType,
            ErrorKind::Unknown,
        ];
        for kind in retryable {
            assert!(kind.is_retryable(), "{kind} should be retryable");
        }
        for kind in terminal {
            assert!(!kind.is_retryable(), "{kind} should not be retryable");
        }
    }

    #[test]
    fn error_record_round_trip_preserves_fields() {
        let mut error = HttpClientError::new(
            ErrorKind::RateLimit,
            Method::POST,
            "https://api.example.com/v1/items",
            "http status 429 (Too Many Requests)",
        )
        .with_attempts(3);
        error.status = Some(429);

        let record = error.to_record();
        let encoded = serde_json::to_string(&record).expect("record should encode");
        let decoded: ErrorRecord = serde_json::from_str(&encoded).expect("record should decode");
        assert_eq!(decoded, record);

        let restored = HttpClientError::from_record(decoded);
        assert_eq!(restored.kind, error.kind);
        assert_eq!(restored.status, error.status);
        assert_eq!(restored.fault_code, error.fault_code);
        assert_eq!(restored.retryable, error.retryable);
        assert_eq!(restored.attempts, error.attempts);
        assert_eq!(restored.method, error.method);
        assert_eq!(restored.url, error.url);
        assert_eq!(restored.message, error.message);
    }
}
