//! The transport seam: something that performs one HTTP exchange at a time
//! and reports back exactly once.
//!
//! # Design
//! `Transport::submit` never blocks on the network. It returns a handle
//! whose only power is cancellation; the transport keeps ownership of the
//! exchange itself. Completion arrives as an `Exchange` on a thread of the
//! transport's choosing, and a cancelled exchange still completes, with a
//! `Cancelled` error.

use std::fmt;

use thiserror::Error;

use crate::http::{HttpRequest, ResponseMetadata};

pub mod agent;
pub mod mock;

pub use agent::{TransportConfig, UreqTransport};
pub use mock::MockTransport;

/// Invoked by the transport once the exchange is over, successfully or not.
pub type CompletionFn = Box<dyn FnOnce(Exchange) + Send + 'static>;

/// What a transport reports for one exchange: raw body, response metadata
/// and transport error, any of which may be absent.
#[derive(Debug, Default)]
pub struct Exchange {
    pub body: Option<Vec<u8>>,
    pub response: Option<ResponseMetadata>,
    pub error: Option<TransportError>,
}

impl Exchange {
    pub fn success(response: ResponseMetadata, body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            response: Some(response),
            error: None,
        }
    }

    pub fn failure(error: TransportError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self::failure(TransportError::new(TransportErrorKind::Cancelled, "cancelled"))
    }
}

/// Something that can carry out HTTP exchanges.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Begin the exchange described by `request`. `on_complete` runs exactly
    /// once, possibly before `submit` returns.
    fn submit(&self, request: HttpRequest, on_complete: CompletionFn) -> Box<dyn TransportHandle>;

    /// Cancel everything in flight and refuse further work.
    fn invalidate_and_cancel(&self);
}

/// Cancels one exchange. Cancelling a finished exchange does nothing.
pub trait TransportHandle: Send + Sync {
    fn cancel(&self);
}

/// Broad classes of network-layer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    TimedOut,
    HostNotFound,
    ConnectionRefused,
    /// An established connection went away mid-exchange.
    ConnectionLost,
    /// There is no usable network path at all.
    NotConnected,
    /// The request may only be answered from a cache, and nothing is cached.
    ResourceUnavailable,
    Cancelled,
    Other,
}

impl TransportErrorKind {
    /// Stable integer code recorded in the client's status.
    pub fn code(self) -> i64 {
        match self {
            TransportErrorKind::Cancelled => -999,
            TransportErrorKind::TimedOut => -1001,
            TransportErrorKind::HostNotFound => -1003,
            TransportErrorKind::ConnectionRefused => -1004,
            TransportErrorKind::ConnectionLost => -1005,
            TransportErrorKind::ResourceUnavailable => -1008,
            TransportErrorKind::NotConnected => -1009,
            TransportErrorKind::Other => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportErrorKind::TimedOut => "timed out",
            TransportErrorKind::HostNotFound => "host not found",
            TransportErrorKind::ConnectionRefused => "connection refused",
            TransportErrorKind::ConnectionLost => "connection lost",
            TransportErrorKind::NotConnected => "not connected",
            TransportErrorKind::ResourceUnavailable => "resource unavailable",
            TransportErrorKind::Cancelled => "cancelled",
            TransportErrorKind::Other => "transport failure",
        }
    }
}

/// A network-layer failure reported by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}: {message}", .kind.as_str())]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> i64 {
        self.kind.code()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == TransportErrorKind::Cancelled
    }

    /// Lost connections and a missing network path are worth retrying once
    /// the network returns; DNS failures and refusals are not.
    pub fn is_connectivity_lost(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::ConnectionLost | TransportErrorKind::NotConnected
        )
    }
}
