//! An in-memory transport, suitable for testing transport-dependent code.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::{CompletionFn, Exchange, Transport, TransportHandle};
use crate::http::{HttpRequest, ResponseMetadata};

type Responder = Arc<dyn Fn(&HttpRequest) -> Option<Exchange> + Send + Sync>;

/// A transport that records every submission and completes exchanges only
/// when told to.
///
/// Without a responder every exchange stays pending until the test calls
/// `complete_next`. With a responder, exchanges it answers complete inline,
/// on the submitting thread, before `submit` returns.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    responder: Option<Responder>,
}

#[derive(Default)]
struct MockState {
    submitted: Vec<HttpRequest>,
    pending: VecDeque<Pending>,
    invalidated: bool,
}

struct Pending {
    id: Uuid,
    url: String,
    on_complete: CompletionFn,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer submissions inline with `responder`. Requests it returns
    /// `None` for stay pending.
    pub fn responding<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> Option<Exchange> + Send + Sync + 'static,
    {
        Self {
            state: Arc::default(),
            responder: Some(Arc::new(responder)),
        }
    }

    /// Every request submitted so far, in submission order.
    pub fn submitted(&self) -> Vec<HttpRequest> {
        self.state.lock().submitted.clone()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Complete the oldest pending exchange. Returns `false` if nothing was
    /// pending.
    pub fn complete_next(&self, exchange: Exchange) -> bool {
        let next = self.state.lock().pending.pop_front();
        match next {
            Some(pending) => {
                (pending.on_complete)(exchange);
                true
            }
            None => false,
        }
    }

    /// Complete the oldest pending exchange with a 200 response carrying
    /// `body`.
    pub fn respond_next(&self, body: &[u8]) -> bool {
        let url = self
            .state
            .lock()
            .pending
            .front()
            .map(|pending| pending.url.clone())
            .unwrap_or_default();
        self.complete_next(Exchange::success(ok_metadata(url), body.to_vec()))
    }
}

/// Metadata for a plain `200 OK` JSON response from `url`.
pub fn ok_metadata(url: impl Into<String>) -> ResponseMetadata {
    ResponseMetadata {
        status: 200,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        url: url.into(),
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("submitted", &state.submitted.len())
            .field("pending", &state.pending.len())
            .field("invalidated", &state.invalidated)
            .finish()
    }
}

impl Transport for MockTransport {
    fn submit(&self, request: HttpRequest, on_complete: CompletionFn) -> Box<dyn TransportHandle> {
        let id = Uuid::new_v4();
        let handle = Box::new(MockHandle {
            id,
            state: self.state.clone(),
        });

        let invalidated = {
            let mut state = self.state.lock();
            state.submitted.push(request.clone());
            state.invalidated
        };
        if invalidated {
            on_complete(Exchange::cancelled());
            return handle;
        }

        if let Some(exchange) = self.responder.as_ref().and_then(|respond| respond(&request)) {
            on_complete(exchange);
            return handle;
        }

        self.state.lock().pending.push_back(Pending {
            id,
            url: request.url.to_string(),
            on_complete,
        });
        handle
    }

    fn invalidate_and_cancel(&self) {
        let pending: Vec<_> = {
            let mut state = self.state.lock();
            state.invalidated = true;
            state.pending.drain(..).collect()
        };
        for pending in pending {
            (pending.on_complete)(Exchange::cancelled());
        }
    }
}

struct MockHandle {
    id: Uuid,
    state: Arc<Mutex<MockState>>,
}

impl TransportHandle for MockHandle {
    fn cancel(&self) {
        let removed = {
            let mut state = self.state.lock();
            let position = state.pending.iter().position(|pending| pending.id == self.id);
            position.and_then(|index| state.pending.remove(index))
        };
        if let Some(pending) = removed {
            (pending.on_complete)(Exchange::cancelled());
        }
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::http::{CachePolicy, HttpMethod};

    fn request() -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: Url::parse("http://localhost:8080/hello/michael").unwrap(),
            headers: Vec::new(),
            body: None,
            cache_policy: CachePolicy::default(),
            allows_cellular_access: true,
        }
    }

    #[test]
    fn pending_until_completed() {
        let transport = MockTransport::new();
        let done = Arc::new(Mutex::new(None));
        let sink = done.clone();
        transport.submit(request(), Box::new(move |exchange| *sink.lock() = Some(exchange)));

        assert_eq!(transport.pending(), 1);
        assert!(done.lock().is_none());

        assert!(transport.respond_next(br#"{"ok":true}"#));
        assert_eq!(transport.pending(), 0);
        assert_eq!(done.lock().as_ref().unwrap().body.as_deref(), Some(&br#"{"ok":true}"#[..]));
        assert!(!transport.respond_next(b"{}"));
    }

    #[test]
    fn cancel_reports_cancellation_once() {
        let transport = MockTransport::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let handle = transport.submit(
            request(),
            Box::new(move |exchange| {
                sink.lock().push(exchange.error.map(|err| err.is_cancelled()))
            }),
        );

        handle.cancel();
        handle.cancel();

        assert_eq!(*calls.lock(), vec![Some(true)]);
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn responder_answers_inline() {
        let transport = MockTransport::responding(|req| {
            Some(Exchange::success(ok_metadata(req.url.as_str()), b"[]".to_vec()))
        });
        let done = Arc::new(Mutex::new(false));
        let sink = done.clone();
        transport.submit(request(), Box::new(move |_| *sink.lock() = true));

        assert!(*done.lock());
        assert_eq!(transport.submitted().len(), 1);
        assert_eq!(transport.pending(), 0);
    }
}
