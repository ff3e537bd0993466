//! One in-flight request and the outcome delivered for it.
//!
//! # Design
//! A `RequestTask` is submitted the moment it is created. It holds the
//! caller's sink behind a mutex; taking the sink out is the terminal
//! transition. The transport's completion and `cancel` both try to take it,
//! and whichever gets it delivers. The loser is a no-op, so the callback
//! fires exactly once however the two race.
//!
//! The transport handle is kept only to cancel through. Once the task is
//! finished the handle is dropped, and anything the transport reports
//! afterwards is ignored.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::client::{ClientCore, Status};
use crate::error::{Error, DECODE_ERROR_CODE};
use crate::http::{HttpRequest, ResponseMetadata};
use crate::json::{self, CodecError};
use crate::transport::{Exchange, TransportHandle};

/// Receives the outcome of a request, exactly once.
pub type Callback = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// What a request produced: the decoded body or the reason there is none,
/// along with whatever response metadata the transport saw.
#[derive(Debug)]
pub struct Outcome {
    pub result: Result<Value, Error>,
    pub response: Option<ResponseMetadata>,
}

impl Outcome {
    pub(crate) fn cancelled() -> Self {
        Self {
            result: Err(Error::Cancelled),
            response: None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.result, Err(Error::Cancelled))
    }

    /// Convert the decoded body into `T`.
    pub fn json<T: DeserializeOwned>(self) -> Result<T, Error> {
        let value = self.result?;
        serde_json::from_value(value).map_err(|err| Error::Decode(CodecError::Malformed(err)))
    }
}

/// Handle to a submitted request. Clones refer to the same request.
#[derive(Clone)]
pub struct RequestTask {
    shared: Arc<TaskShared>,
}

struct TaskShared {
    id: Uuid,
    url: Url,
    sink: Mutex<Option<Callback>>,
    handle: Mutex<Option<Box<dyn TransportHandle>>>,
}

impl RequestTask {
    /// Submit `request` on the client's transport. `sink` receives the
    /// outcome on the transport's completion thread, or on the cancelling
    /// thread.
    pub(crate) fn submit(core: &Arc<ClientCore>, request: HttpRequest, sink: Callback) -> Self {
        let shared = Arc::new(TaskShared {
            id: Uuid::new_v4(),
            url: request.url.clone(),
            sink: Mutex::new(Some(sink)),
            handle: Mutex::new(None),
        });
        tracing::debug!(
            task = %shared.id,
            method = request.method.as_str(),
            url = %request.url,
            "submitting request"
        );

        let completion = shared.clone();
        let completion_core = core.clone();
        let handle = core.transport.submit(
            request,
            Box::new(move |exchange| completion.complete(&completion_core, exchange)),
        );

        let mut slot = shared.handle.lock();
        if shared.is_finished() {
            drop(slot);
            handle.cancel();
        } else {
            *slot = Some(handle);
            drop(slot);
        }

        Self { shared }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// Whether the callback has fired (or is firing).
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// Abort the request. If it has not finished yet, the callback fires
    /// with `Error::Cancelled`; otherwise nothing happens. Never blocks.
    pub fn cancel(&self) {
        let sink = self.shared.sink.lock().take();
        let handle = self.shared.handle.lock().take();
        if let Some(handle) = handle {
            handle.cancel();
        }
        if let Some(sink) = sink {
            tracing::debug!(task = %self.shared.id, "request cancelled");
            sink(Outcome::cancelled());
        }
    }
}

impl fmt::Debug for RequestTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTask")
            .field("id", &self.shared.id)
            .field("url", &self.shared.url.as_str())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl TaskShared {
    fn is_finished(&self) -> bool {
        self.sink.lock().is_none()
    }

    fn complete(&self, core: &ClientCore, exchange: Exchange) {
        let Some(sink) = self.sink.lock().take() else {
            tracing::trace!(task = %self.id, "completion after terminal transition ignored");
            return;
        };
        self.handle.lock().take();

        let outcome = resolve(self.id, core, exchange);
        sink(outcome);
    }
}

/// Turn a transport exchange into an outcome, recording the client status
/// on the way.
fn resolve(task: Uuid, core: &ClientCore, exchange: Exchange) -> Outcome {
    let Exchange {
        body,
        response,
        error,
    } = exchange;

    if let Some(err) = error {
        if err.is_cancelled() {
            tracing::debug!(%task, "transport reported cancellation");
            return Outcome::cancelled();
        }
        tracing::warn!(%task, code = err.code(), %err, "request failed");
        core.record(Some(Status::now(err.code())));
        return Outcome {
            result: Err(Error::Transport(err)),
            response,
        };
    }

    match json::decode(body.as_deref().unwrap_or_default()) {
        Ok(value) => {
            let status = response.as_ref().map(|r| r.status);
            tracing::trace!(%task, status, "request completed");
            core.record(None);
            Outcome {
                result: Ok(value),
                response,
            }
        }
        Err(err) => {
            tracing::debug!(%task, %err, "response body did not decode");
            core.record(Some(Status::now(DECODE_ERROR_CODE)));
            Outcome {
                result: Err(Error::Decode(err)),
                response,
            }
        }
    }
}
