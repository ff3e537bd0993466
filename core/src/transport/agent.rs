//! Blocking `ureq` transport, one worker thread per exchange.
//!
//! # Design
//! Every submitted exchange gets an entry in an in-flight registry keyed by
//! a fresh `Uuid`. Whoever gets to the entry's completion first (the worker
//! thread, a `cancel`, or `invalidate_and_cancel`) reports the exchange; the
//! others find the slot empty. A cancelled worker keeps running until the
//! blocking call returns (bounded by the configured timeout), and its
//! result is discarded.
//!
//! There is no local cache. Cache policies become `Cache-Control` request
//! directives, and a cache-only request fails with `ResourceUnavailable`
//! without opening a connection.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use super::{CompletionFn, Exchange, Transport, TransportError, TransportErrorKind, TransportHandle};
use crate::http::{CachePolicy, HttpMethod, HttpRequest, ResponseMetadata};

/// Settings for `UreqTransport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Upper bound on a whole exchange. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

type Registry = Arc<Mutex<HashMap<Uuid, Arc<Slot>>>>;

/// Production transport executing requests with a shared `ureq::Agent`.
pub struct UreqTransport {
    agent: ureq::Agent,
    inflight: Registry,
    invalidated: AtomicBool,
}

impl UreqTransport {
    pub fn new(config: &TransportConfig) -> Self {
        // Status codes are data here; only the body decides success.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(config.timeout)
            .build()
            .new_agent();
        Self {
            agent,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            invalidated: AtomicBool::new(false),
        }
    }

    /// Number of exchanges submitted but not yet reported.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UreqTransport")
            .field("in_flight", &self.in_flight())
            .field("invalidated", &self.invalidated.load(Ordering::Acquire))
            .finish()
    }
}

impl Transport for UreqTransport {
    fn submit(&self, request: HttpRequest, on_complete: CompletionFn) -> Box<dyn TransportHandle> {
        let id = Uuid::new_v4();
        let slot = Arc::new(Slot::new(on_complete));
        let handle = Box::new(UreqHandle {
            id,
            slot: slot.clone(),
            inflight: self.inflight.clone(),
        });

        {
            let mut inflight = self.inflight.lock();
            if self.invalidated.load(Ordering::Acquire) {
                drop(inflight);
                tracing::debug!(exchange = %id, "transport invalidated, refusing exchange");
                slot.complete(Exchange::cancelled());
                return handle;
            }
            inflight.insert(id, slot.clone());
        }

        let agent = self.agent.clone();
        let inflight = self.inflight.clone();
        let worker_slot = slot.clone();
        let spawned = thread::Builder::new()
            .name("patron-transport".to_string())
            .spawn(move || {
                let exchange = perform(&agent, &request);
                inflight.lock().remove(&id);
                worker_slot.complete(exchange);
            });

        if let Err(err) = spawned {
            self.inflight.lock().remove(&id);
            slot.complete(Exchange::failure(TransportError::new(
                TransportErrorKind::Other,
                format!("failed to spawn transport worker: {err}"),
            )));
        }

        handle
    }

    fn invalidate_and_cancel(&self) {
        self.invalidated.store(true, Ordering::Release);
        let slots: Vec<Arc<Slot>> = self.inflight.lock().drain().map(|(_, slot)| slot).collect();
        if !slots.is_empty() {
            tracing::debug!(count = slots.len(), "cancelling in-flight exchanges");
        }
        for slot in slots {
            slot.complete(Exchange::cancelled());
        }
    }
}

struct Slot {
    on_complete: Mutex<Option<CompletionFn>>,
}

impl Slot {
    fn new(on_complete: CompletionFn) -> Self {
        Self {
            on_complete: Mutex::new(Some(on_complete)),
        }
    }

    fn complete(&self, exchange: Exchange) {
        let on_complete = self.on_complete.lock().take();
        if let Some(on_complete) = on_complete {
            on_complete(exchange);
        }
    }
}

struct UreqHandle {
    id: Uuid,
    slot: Arc<Slot>,
    inflight: Registry,
}

impl TransportHandle for UreqHandle {
    fn cancel(&self) {
        self.inflight.lock().remove(&self.id);
        self.slot.complete(Exchange::cancelled());
    }
}

fn perform(agent: &ureq::Agent, request: &HttpRequest) -> Exchange {
    // There is no local cache, so a cache-only request can never be answered.
    if request.cache_policy == CachePolicy::ReturnCacheDataDontLoad {
        return Exchange::failure(TransportError::new(
            TransportErrorKind::ResourceUnavailable,
            format!("{} is not cached and may not be loaded", request.url),
        ));
    }

    let url = request.url.as_str();
    let result = match request.method {
        HttpMethod::Get => with_headers(agent.get(url), request).call(),
        HttpMethod::Post => {
            with_headers(agent.post(url), request).send(request.body.as_deref().unwrap_or_default())
        }
    };

    let mut response = match result {
        Ok(response) => response,
        Err(err) => return Exchange::failure(classify(err)),
    };

    let metadata = ResponseMetadata {
        status: response.status().as_u16(),
        headers: response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
        url: request.url.to_string(),
    };

    match response.body_mut().read_to_vec() {
        Ok(body) => Exchange::success(metadata, body),
        Err(err) => Exchange {
            body: None,
            response: Some(metadata),
            error: Some(classify(err)),
        },
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    request: &HttpRequest,
) -> ureq::RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(directive) = cache_control(request.cache_policy) {
        builder = builder.header("cache-control", directive);
    }
    builder
}

/// The `Cache-Control` request directive asking intermediaries to honor
/// `policy`.
fn cache_control(policy: CachePolicy) -> Option<&'static str> {
    match policy {
        CachePolicy::UseProtocolCachePolicy => None,
        CachePolicy::ReloadIgnoringLocalCacheData => Some("no-cache"),
        CachePolicy::ReturnCacheDataElseLoad => Some("max-stale"),
        CachePolicy::ReturnCacheDataDontLoad => Some("only-if-cached"),
    }
}

fn classify(err: ureq::Error) -> TransportError {
    let kind = match &err {
        ureq::Error::Timeout(_) => TransportErrorKind::TimedOut,
        ureq::Error::HostNotFound => TransportErrorKind::HostNotFound,
        ureq::Error::Io(io) => classify_io(io.kind()),
        _ => TransportErrorKind::Other,
    };
    TransportError::new(kind, err.to_string())
}

fn classify_io(kind: io::ErrorKind) -> TransportErrorKind {
    match kind {
        io::ErrorKind::TimedOut => TransportErrorKind::TimedOut,
        io::ErrorKind::ConnectionRefused => TransportErrorKind::ConnectionRefused,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => TransportErrorKind::ConnectionLost,
        io::ErrorKind::NotConnected
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkDown => TransportErrorKind::NotConnected,
        _ => TransportErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    fn request(url: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: Url::parse(url).unwrap(),
            headers: Vec::new(),
            body: None,
            cache_policy: CachePolicy::default(),
            allows_cellular_access: true,
        }
    }

    #[test]
    fn io_errors_map_to_kinds() {
        use io::ErrorKind as Io;

        assert_eq!(classify_io(Io::ConnectionReset), TransportErrorKind::ConnectionLost);
        assert_eq!(classify_io(Io::NetworkUnreachable), TransportErrorKind::NotConnected);
        assert_eq!(classify_io(Io::ConnectionRefused), TransportErrorKind::ConnectionRefused);
        assert_eq!(classify_io(Io::PermissionDenied), TransportErrorKind::Other);
    }

    #[test]
    fn cache_policies_map_to_directives() {
        assert_eq!(cache_control(CachePolicy::UseProtocolCachePolicy), None);
        assert_eq!(cache_control(CachePolicy::ReloadIgnoringLocalCacheData), Some("no-cache"));
        assert_eq!(cache_control(CachePolicy::ReturnCacheDataElseLoad), Some("max-stale"));
        assert_eq!(cache_control(CachePolicy::ReturnCacheDataDontLoad), Some("only-if-cached"));
    }

    #[test]
    fn cache_only_request_never_touches_the_network() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        listener.set_nonblocking(true).unwrap();

        let mut cached = request(&format!("http://{addr}/"));
        cached.cache_policy = CachePolicy::ReturnCacheDataDontLoad;
        let exchange = perform(&UreqTransport::default().agent, &cached);

        let err = exchange.error.unwrap();
        assert_eq!(err.kind(), TransportErrorKind::ResourceUnavailable);
        assert_eq!(err.code(), -1008);
        assert!(exchange.response.is_none());
        assert_eq!(
            listener.accept().unwrap_err().kind(),
            io::ErrorKind::WouldBlock,
            "no connection may be opened"
        );
    }

    #[test]
    fn invalidated_transport_refuses_new_exchanges() {
        let transport = UreqTransport::default();
        transport.invalidate_and_cancel();

        let (tx, rx) = crossbeam_channel::bounded(1);
        transport.submit(
            request("http://127.0.0.1:9/"),
            Box::new(move |exchange| tx.send(exchange).unwrap()),
        );

        let exchange = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(exchange.error.unwrap().is_cancelled());
        assert_eq!(transport.in_flight(), 0);
    }
}
