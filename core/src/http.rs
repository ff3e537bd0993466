//! Plain-data request and response descriptors.
//!
//! # Design
//! The client builds `HttpRequest` values without touching the network and
//! hands them to a `Transport`, which reports back with `ResponseMetadata`.
//! Both are owned data (`String`, `Vec`) so they move freely between the
//! calling thread and transport worker threads.

use serde::{Deserialize, Serialize};
use url::Url;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// How a request may be answered from a local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Whatever the protocol's caching headers allow.
    #[default]
    UseProtocolCachePolicy,
    /// Always go to the origin.
    ReloadIgnoringLocalCacheData,
    /// Use cached data of any age, load only if nothing is cached.
    ReturnCacheDataElseLoad,
    /// Use cached data of any age, never load.
    ReturnCacheDataDontLoad,
}

/// An HTTP request described as plain data.
///
/// Built by `Client::build_get` / `Client::build_post` and immutable once
/// submitted to a transport.
///
/// `allows_cellular_access` does not select a network interface: transports
/// ignore it. It only decides whether a `RetryingOperation` treats a
/// constrained network as good enough to retry on.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub cache_policy: CachePolicy,
    pub allows_cellular_access: bool,
}

impl HttpRequest {
    /// The hostname this request targets. Empty for host-less URLs.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// The port this request targets, falling back to the scheme's default.
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }
}

/// What the transport learned about the response, minus the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub url: String,
}

impl ResponseMetadata {
    /// First header value matching `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_exposes_host_and_default_port() {
        let req = HttpRequest {
            method: HttpMethod::Get,
            url: Url::parse("https://api.example.com/hello").unwrap(),
            headers: Vec::new(),
            body: None,
            cache_policy: CachePolicy::default(),
            allows_cellular_access: true,
        };
        assert_eq!(req.host(), "api.example.com");
        assert_eq!(req.port(), 443);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let meta = ResponseMetadata {
            status: 200,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            url: "http://localhost/".to_string(),
        };
        assert_eq!(meta.header("content-type"), Some("application/json"));
        assert_eq!(meta.header("etag"), None);
    }

    #[test]
    fn cache_policy_uses_kebab_case() {
        let policy: CachePolicy =
            serde_json::from_str(r#""reload-ignoring-local-cache-data""#).unwrap();
        assert_eq!(policy, CachePolicy::ReloadIgnoringLocalCacheData);
    }
}
