//! A client for one remote JSON service.
//!
//! # Design
//! `Client` owns the base URL, the transport, and the last-failure `status`.
//! Requests are built as plain `HttpRequest` values (`build_get`,
//! `build_post`) and then submitted, so input errors surface synchronously
//! before any I/O, and everything after submission arrives on the callback.
//!
//! Completions may land on several transport threads at once; `status`
//! sits behind its own mutex and is only ever read as a copy.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use url::Url;

use crate::config::{ClientConfig, RetryPolicy};
use crate::delivery::{DeliveryContext, Inline};
use crate::error::Error;
use crate::http::{CachePolicy, HttpMethod, HttpRequest};
use crate::json;
use crate::operation::RetryingOperation;
use crate::reachability::Reachability;
use crate::task::{Outcome, RequestTask};
use crate::transport::{Transport, TransportConfig, UreqTransport};

/// The most recent recorded failure: its code, and when it happened in
/// seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Status {
    pub code: i64,
    pub timestamp: f64,
}

impl Status {
    pub fn now(code: i64) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or_default();
        Self { code, timestamp }
    }
}

/// Per-request knobs for `Client::get_with`. Unset fields fall back to the
/// client's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetOptions {
    pub query: Option<Vec<(String, String)>>,
    pub cache_policy: Option<CachePolicy>,
    pub allows_cellular_access: Option<bool>,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query<I, K, V>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query = Some(
            items
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    pub fn allows_cellular_access(mut self, allowed: bool) -> Self {
        self.allows_cellular_access = Some(allowed);
        self
    }
}

/// State shared between a client and the requests it has issued.
pub(crate) struct ClientCore {
    pub(crate) base_url: Url,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) delivery: Arc<dyn DeliveryContext>,
    status: Mutex<Option<Status>>,
}

impl ClientCore {
    /// Last writer wins; completions are not ordered across requests.
    pub(crate) fn record(&self, status: Option<Status>) {
        *self.status.lock() = status;
    }

    pub(crate) fn status(&self) -> Option<Status> {
        *self.status.lock()
    }

    /// Run `callback` with `outcome` on the delivery context.
    pub(crate) fn deliver<F>(&self, callback: F, outcome: Outcome)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.delivery.dispatch(Box::new(move || callback(outcome)));
    }
}

/// Client for a single HTTP JSON service.
///
/// Dropping the client invalidates its transport, cancelling anything
/// still in flight.
pub struct Client {
    core: Arc<ClientCore>,
    cache_policy: CachePolicy,
    allows_cellular_access: bool,
    retry: RetryPolicy,
}

impl Client {
    /// A client for `base_url` using the default `ureq` transport and
    /// inline delivery.
    pub fn new(base_url: &str) -> Result<Self, Error> {
        Self::builder(base_url).build()
    }

    pub fn builder(base_url: &str) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, Error> {
        Self::builder(&config.base_url)
            .timeout(config.timeout())
            .cache_policy(config.cache_policy)
            .allows_cellular_access(config.allows_cellular_access)
            .retry_policy(config.retry.clone())
            .build()
    }

    pub fn base_url(&self) -> &Url {
        &self.core.base_url
    }

    /// Hostname of the service.
    pub fn host(&self) -> &str {
        self.core.base_url.host_str().unwrap_or_default()
    }

    /// The last transport or decode failure and when it happened. Reset to
    /// `None` by the next successful request; untouched by cancellation.
    pub fn status(&self) -> Option<Status> {
        self.core.status()
    }

    pub(crate) fn core(&self) -> &Arc<ClientCore> {
        &self.core
    }

    /// Resolve `path` against the base URL.
    pub fn resolve(&self, path: &str) -> Result<Url, Error> {
        self.core.base_url.join(path).map_err(|source| Error::InvalidUrl {
            path: path.to_string(),
            query: None,
            source,
        })
    }

    /// Describe a `GET` of `path` without sending it.
    pub fn build_get(&self, path: &str, options: &GetOptions) -> Result<HttpRequest, Error> {
        let mut url = self.core.base_url.join(path).map_err(|source| Error::InvalidUrl {
            path: path.to_string(),
            query: options.query.clone(),
            source,
        })?;
        if let Some(query) = options.query.as_ref().filter(|query| !query.is_empty()) {
            url.query_pairs_mut()
                .clear()
                .extend_pairs(query.iter().map(|(key, value)| (key.as_str(), value.as_str())));
        }

        Ok(HttpRequest {
            method: HttpMethod::Get,
            url,
            headers: Vec::new(),
            body: None,
            cache_policy: options.cache_policy.unwrap_or(self.cache_policy),
            allows_cellular_access: options
                .allows_cellular_access
                .unwrap_or(self.allows_cellular_access),
        })
    }

    /// Describe a `POST` of `json` to `path` without sending it. Fails with
    /// `Error::InvalidJson` if `json` cannot be encoded.
    pub fn build_post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        json: &T,
    ) -> Result<HttpRequest, Error> {
        let body = json::encode(json).map_err(Error::InvalidJson)?;
        let url = self.resolve(path)?;
        Ok(HttpRequest {
            method: HttpMethod::Post,
            url,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body),
            cache_policy: self.cache_policy,
            allows_cellular_access: self.allows_cellular_access,
        })
    }

    /// Send a prepared request. `callback` runs exactly once, on the
    /// client's delivery context.
    pub fn submit<F>(&self, request: HttpRequest, callback: F) -> RequestTask
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let core = self.core.clone();
        RequestTask::submit(
            &self.core,
            request,
            Box::new(move |outcome| core.deliver(callback, outcome)),
        )
    }

    /// Issue a `GET` request for `path`.
    pub fn get<F>(&self, path: &str, callback: F) -> Result<RequestTask, Error>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.get_with(path, &GetOptions::default(), callback)
    }

    /// Issue a `GET` request with query items, cache policy or cellular
    /// access overrides.
    pub fn get_with<F>(
        &self,
        path: &str,
        options: &GetOptions,
        callback: F,
    ) -> Result<RequestTask, Error>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let request = self.build_get(path, options)?;
        Ok(self.submit(request, callback))
    }

    /// Issue a `POST` request with `json` as its body. Nothing is sent if
    /// `json` cannot be encoded.
    pub fn post<T, F>(&self, path: &str, json: &T, callback: F) -> Result<RequestTask, Error>
    where
        T: Serialize + ?Sized,
        F: FnOnce(Outcome) + Send + 'static,
    {
        let request = self.build_post(path, json)?;
        Ok(self.submit(request, callback))
    }

    /// Wrap `request` in an operation that survives lost connectivity. The
    /// operation is returned idle; call `start` or `run` on it.
    pub fn operation<F>(
        &self,
        request: HttpRequest,
        reachability: Arc<dyn Reachability>,
        callback: F,
    ) -> RetryingOperation
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        RetryingOperation::new(
            self.core.clone(),
            request,
            reachability,
            self.retry.clone(),
            Box::new(callback),
        )
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.core.base_url.as_str())
            .field("transport", &self.core.transport)
            .field("delivery", &self.core.delivery)
            .field("status", &self.status())
            .finish()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        tracing::debug!(base_url = %self.core.base_url, "client dropped, invalidating transport");
        self.core.transport.invalidate_and_cancel();
    }
}

/// Configures and builds a `Client`.
#[derive(Debug)]
pub struct ClientBuilder {
    base_url: String,
    transport: Option<Arc<dyn Transport>>,
    delivery: Arc<dyn DeliveryContext>,
    timeout: Option<Duration>,
    cache_policy: CachePolicy,
    allows_cellular_access: bool,
    retry: RetryPolicy,
}

impl ClientBuilder {
    fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            transport: None,
            delivery: Arc::new(Inline),
            timeout: TransportConfig::default().timeout,
            cache_policy: CachePolicy::default(),
            allows_cellular_access: true,
            retry: RetryPolicy::default(),
        }
    }

    /// Use `transport` instead of the default `UreqTransport`.
    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn delivery<D: DeliveryContext + 'static>(mut self, delivery: D) -> Self {
        self.delivery = Arc::new(delivery);
        self
    }

    /// Timeout for the default transport; ignored with a custom transport.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn allows_cellular_access(mut self, allowed: bool) -> Self {
        self.allows_cellular_access = allowed;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        let invalid = |source| Error::InvalidUrl {
            path: self.base_url.clone(),
            query: None,
            source,
        };
        let base_url = Url::parse(&self.base_url).map_err(invalid)?;
        if base_url.host_str().is_none() {
            return Err(invalid(url::ParseError::EmptyHost));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(UreqTransport::new(&TransportConfig {
                timeout: self.timeout,
            })),
        };

        Ok(Client {
            core: Arc::new(ClientCore {
                base_url,
                transport,
                delivery: self.delivery,
                status: Mutex::new(None),
            }),
            cache_policy: self.cache_policy,
            allows_cellular_access: self.allows_cellular_access,
            retry: self.retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde::ser::Error as _;
    use serde_json::json;

    use super::*;
    use crate::delivery::SerialQueue;
    use crate::json::CodecError;
    use crate::transport::MockTransport;

    fn client(base: &str, transport: &MockTransport) -> Client {
        Client::builder(base)
            .transport(transport.clone())
            .build()
            .unwrap()
    }

    struct Cyclic;

    impl Serialize for Cyclic {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("self-referential value"))
        }
    }

    #[test]
    fn host_comes_from_base_url() {
        let transport = MockTransport::new();
        let client = client("https://api.example.com:8443/v1/", &transport);
        assert_eq!(client.host(), "api.example.com");
    }

    #[test]
    fn paths_resolve_like_relative_urls() {
        let transport = MockTransport::new();
        let client = client("http://localhost:8080/api/", &transport);

        let cases = [
            ("users", "http://localhost:8080/api/users"),
            ("/hello/michael", "http://localhost:8080/hello/michael"),
            ("../root", "http://localhost:8080/root"),
            ("?page=2", "http://localhost:8080/api/?page=2"),
            ("https://other.example.com/x", "https://other.example.com/x"),
        ];
        for (path, expected) in cases {
            let req = client.build_get(path, &GetOptions::default()).unwrap();
            assert_eq!(req.url.as_str(), expected, "{path}");
            assert_eq!(req.method, HttpMethod::Get);
        }
    }

    #[test]
    fn query_items_replace_the_query() {
        let transport = MockTransport::new();
        let client = client("http://localhost:8080", &transport);
        let options = GetOptions::new().query([("q", "rust lang"), ("page", "2")]);

        let req = client.build_get("/search?stale=1", &options).unwrap();
        assert_eq!(req.url.as_str(), "http://localhost:8080/search?q=rust+lang&page=2");
    }

    #[test]
    fn invalid_path_with_query_fails_before_io() {
        let transport = MockTransport::new();
        let client = client("http://localhost:8080", &transport);
        let options = GetOptions::new().query([("a", "b")]);

        let err = client.get_with("http://[::1", &options, |_| panic!("called")).unwrap_err();
        match err {
            Error::InvalidUrl { path, query, .. } => {
                assert_eq!(path, "http://[::1");
                assert_eq!(query, Some(vec![("a".to_string(), "b".to_string())]));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(transport.submitted().is_empty());
    }

    #[test]
    fn options_override_client_defaults() {
        let transport = MockTransport::new();
        let client = Client::builder("http://localhost:8080")
            .transport(transport.clone())
            .allows_cellular_access(false)
            .cache_policy(CachePolicy::ReturnCacheDataElseLoad)
            .build()
            .unwrap();

        let plain = client.build_get("/x", &GetOptions::default()).unwrap();
        assert!(!plain.allows_cellular_access);
        assert_eq!(plain.cache_policy, CachePolicy::ReturnCacheDataElseLoad);

        let options = GetOptions::new()
            .allows_cellular_access(true)
            .cache_policy(CachePolicy::ReloadIgnoringLocalCacheData);
        let tuned = client.build_get("/x", &options).unwrap();
        assert!(tuned.allows_cellular_access);
        assert_eq!(tuned.cache_policy, CachePolicy::ReloadIgnoringLocalCacheData);
    }

    #[test]
    fn post_encodes_json_body() {
        let transport = MockTransport::new();
        let client = client("http://localhost:8080", &transport);
        client.post("/echo", &json!({ "name": "michael" }), |_| {}).unwrap();

        let submitted = transport.submitted();
        assert_eq!(submitted.len(), 1);
        let req = &submitted[0];
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url.as_str(), "http://localhost:8080/echo");
        assert_eq!(
            req.headers,
            vec![("content-type".to_string(), "application/json".to_string())]
        );
        let body: serde_json::Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({ "name": "michael" }));
    }

    #[test]
    fn unrepresentable_post_fails_without_submitting() {
        let transport = MockTransport::new();
        let client = client("http://localhost:8080", &transport);

        let err = client.post("/echo", &Cyclic, |_| panic!("called")).unwrap_err();
        assert!(matches!(err, Error::InvalidJson(CodecError::NotRepresentable(_))));

        let mut keyed = HashMap::new();
        keyed.insert(vec![1], "not a string key");
        let err = client.post("/echo", &keyed, |_| panic!("called")).unwrap_err();
        assert!(matches!(err, Error::InvalidJson(_)));

        assert!(transport.submitted().is_empty());
        assert_eq!(client.status(), None);
    }

    #[test]
    fn base_url_must_have_a_host() {
        assert!(matches!(
            Client::builder("not a url").build(),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(matches!(
            Client::builder("mailto:someone@example.com").build(),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[test]
    fn callbacks_run_on_the_delivery_context() {
        let transport = MockTransport::new();
        let client = Client::builder("http://localhost:8080")
            .transport(transport.clone())
            .delivery(SerialQueue::new("patron-delivery-test").unwrap())
            .build()
            .unwrap();

        let (tx, rx) = crossbeam_channel::bounded(1);
        client
            .get("/hello/michael", move |outcome| {
                let name = std::thread::current().name().map(str::to_string);
                tx.send((outcome.value().cloned(), name)).unwrap();
            })
            .unwrap();
        transport.respond_next(br#""hello michael""#);

        let (value, thread) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(value, Some(json!("hello michael")));
        assert_eq!(thread.as_deref(), Some("patron-delivery-test"));
    }

    #[test]
    fn dropping_the_client_cancels_in_flight_requests() {
        let transport = MockTransport::new();
        let client = client("http://localhost:8080", &transport);
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let sink = outcomes.clone();
            client
                .get("/slow/1000", move |outcome| sink.lock().push(outcome.is_cancelled()))
                .unwrap();
        }
        assert_eq!(transport.pending(), 3);

        drop(client);

        assert_eq!(*outcomes.lock(), vec![true, true, true]);
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn status_is_last_writer_wins() {
        let transport = MockTransport::new();
        let client = client("http://localhost:8080", &transport);
        client.core().record(Some(Status::now(-1001)));
        client.core().record(Some(Status::now(-1004)));
        assert_eq!(client.status().unwrap().code, -1004);
        client.core().record(None);
        assert_eq!(client.status(), None);
    }
}
