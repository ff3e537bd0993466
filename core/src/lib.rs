//! Callback-driven client core for a single HTTP JSON service.
//!
//! # Overview
//! `Client` issues `GET` and `POST` requests against one base URL, encodes
//! and decodes JSON payloads, and reports each request through a callback
//! that fires exactly once. The most recent failure is kept in
//! `Client::status` for diagnostics. `RetryingOperation` adds a
//! reachability-gated retry for requests that must survive a flaky network.
//!
//! # Design
//! - Requests are built as plain data (`build_get` / `build_post`) before
//!   anything is submitted, so input errors are synchronous `Result`s.
//! - The network, reachability and callback scheduling sit behind traits
//!   (`Transport`, `Reachability`, `DeliveryContext`), each with a
//!   production implementation and an in-memory one for tests.
//! - Every failure after submission travels inside an `Outcome`; nothing is
//!   thrown across the asynchronous boundary.

pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod http;
pub mod json;
pub mod operation;
pub mod reachability;
pub mod task;
pub mod transport;

pub use client::{Client, ClientBuilder, GetOptions, Status};
pub use config::{ClientConfig, ConfigError, RetryPolicy};
pub use delivery::{DeliveryContext, Inline, SerialQueue};
pub use error::{Error, DECODE_ERROR_CODE};
pub use http::{CachePolicy, HttpMethod, HttpRequest, ResponseMetadata};
pub use json::CodecError;
pub use operation::{AttemptState, RetryingOperation};
pub use reachability::{Reachability, ReachabilityStatus, Registration, TcpReachability};
pub use task::{Outcome, RequestTask};
pub use transport::{
    Exchange, Transport, TransportConfig, TransportError, TransportErrorKind, TransportHandle,
    UreqTransport,
};
