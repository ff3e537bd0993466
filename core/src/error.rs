//! Error types for the JSON service client.
//!
//! # Design
//! `InvalidUrl` and `InvalidJson` are caller-input errors returned
//! synchronously before any I/O. The remaining variants only ever reach the
//! caller inside an `Outcome`, on the callback.

use thiserror::Error;

use crate::json::CodecError;
use crate::transport::TransportError;

/// Status code recorded when a response body fails to decode.
pub const DECODE_ERROR_CODE: i64 = 3840;

/// Errors produced by `Client`, `RequestTask` and `RetryingOperation`.
#[derive(Debug, Error)]
pub enum Error {
    /// The path (and query items, if any) could not be resolved against the
    /// base URL.
    #[error("invalid URL {path:?}: {source}")]
    InvalidUrl {
        path: String,
        query: Option<Vec<(String, String)>>,
        #[source]
        source: url::ParseError,
    },

    /// The POST payload could not be encoded as JSON.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[source] CodecError),

    /// The exchange failed at the network layer.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request was cancelled before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// The exchange succeeded but the body was not usable JSON.
    #[error("failed to decode response: {0}")]
    Decode(#[source] CodecError),
}

impl Error {
    /// The code recorded in `Client::status` for this failure, if it is one
    /// that gets recorded.
    pub fn code(&self) -> Option<i64> {
        match self {
            Error::Transport(err) => Some(err.code()),
            Error::Decode(_) => Some(DECODE_ERROR_CODE),
            Error::InvalidUrl { .. } | Error::InvalidJson(_) | Error::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Whether this failure means the device lost its network path, as
    /// opposed to the host being unknown or refusing.
    pub fn is_connectivity_lost(&self) -> bool {
        matches!(self, Error::Transport(err) if err.is_connectivity_lost())
    }
}
