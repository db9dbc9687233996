use std::future::Future;
use std::pin::Pin;

use crate::error::TransportFaultCode;
use crate::request::RequestDescriptor;
use crate::response::ResponseEnvelope;

/// A connection-level failure reported by the transport, before any HTTP
/// status exists. Status-bearing responses are returned as envelopes instead,
/// whatever the status code.
#[derive(Clone, Debug)]
pub struct TransportFault {
    pub code: TransportFaultCode,
    pub message: String,
}

impl TransportFault {
    pub fn new(code: TransportFaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TransportFault {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}: {}", self.code, self.message)
    }
}

pub type TransportFuture =
    Pin<Box<dyn Future<Output = Result<ResponseEnvelope, TransportFault>> + Send>>;

/// The wire boundary. The pipeline owns everything above this seam; whatever
/// encodes the request on the wire is injected at client construction.
pub trait Transport: Send + Sync {
    fn send(&self, request: RequestDescriptor) -> TransportFuture;
}

impl<F, Fut> Transport for F
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResponseEnvelope, TransportFault>> + Send + 'static,
{
    fn send(&self, request: RequestDescriptor) -> TransportFuture {
        Box::pin((self)(request))
    }
}
