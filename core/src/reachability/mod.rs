//! Whether the network path to a host is currently usable.
//!
//! # Design
//! A `Reachability` answers two questions: what is the status right now
//! (`probe`), and tell me once when it changes (`on_change`). The one-shot
//! registration is an owned `Registration`; dropping it abandons the
//! callback, so an operation that finishes cannot be woken up afterwards.

use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub mod mock;

pub use mock::ManualReachability;

/// How (and whether) a host can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReachabilityStatus {
    Unreachable,
    Reachable,
    /// Reachable, but only over a constrained or metered network such as
    /// cellular.
    Constrained,
}

impl ReachabilityStatus {
    /// Whether a request may go out under this status. Constrained
    /// networks count only when the request allows cellular access.
    pub fn permits(self, allows_cellular_access: bool) -> bool {
        match self {
            ReachabilityStatus::Reachable => true,
            ReachabilityStatus::Constrained => allows_cellular_access,
            ReachabilityStatus::Unreachable => false,
        }
    }
}

pub type ReachabilityCallback = Box<dyn FnOnce(ReachabilityStatus) + Send + 'static>;

/// A source of reachability information.
pub trait Reachability: Send + Sync + fmt::Debug {
    /// Current status of `host:port`. May block briefly.
    fn probe(&self, host: &str, port: u16) -> ReachabilityStatus;

    /// Call `callback` once, the next time the status of `host:port`
    /// changes. The callback is abandoned when the returned registration is
    /// dropped.
    fn on_change(&self, host: &str, port: u16, callback: ReachabilityCallback) -> Registration;
}

/// A live one-shot reachability registration.
#[must_use = "dropping a Registration abandons its callback"]
pub struct Registration {
    teardown: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Registration {
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A registration with nothing to tear down.
    pub fn inert() -> Self {
        Self { teardown: None }
    }

    /// Abandon the callback now. Same as dropping.
    pub fn cancel(self) {}
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("live", &self.teardown.is_some())
            .finish()
    }
}

/// Reachability judged by opening a TCP connection to the host.
///
/// TCP cannot tell a metered network from any other, so this never reports
/// `Constrained`. Change notifications come from a background thread that
/// re-probes every `poll_interval`.
#[derive(Debug, Clone)]
pub struct TcpReachability {
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl Default for TcpReachability {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(1))
    }
}

impl TcpReachability {
    pub fn new(connect_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            connect_timeout,
            poll_interval,
        }
    }
}

impl Reachability for TcpReachability {
    fn probe(&self, host: &str, port: u16) -> ReachabilityStatus {
        let addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(err) => {
                tracing::trace!(host, port, %err, "reachability lookup failed");
                return ReachabilityStatus::Unreachable;
            }
        };
        for addr in addrs {
            if TcpStream::connect_timeout(&addr, self.connect_timeout).is_ok() {
                return ReachabilityStatus::Reachable;
            }
        }
        ReachabilityStatus::Unreachable
    }

    fn on_change(&self, host: &str, port: u16, callback: ReachabilityCallback) -> Registration {
        // The baseline must be taken before returning.
        let initial = self.probe(host, port);
        let stopped = Arc::new(AtomicBool::new(false));
        let probe = self.clone();
        let host = host.to_string();
        let flag = stopped.clone();

        let spawned = thread::Builder::new()
            .name("patron-reachability".to_string())
            .spawn(move || loop {
                thread::sleep(probe.poll_interval);
                if flag.load(Ordering::Acquire) {
                    return;
                }
                let status = probe.probe(&host, port);
                if status != initial {
                    if !flag.load(Ordering::Acquire) {
                        tracing::debug!(%host, port, ?status, "reachability changed");
                        callback(status);
                    }
                    return;
                }
            });

        match spawned {
            Ok(_) => Registration::new(move || stopped.store(true, Ordering::Release)),
            Err(err) => {
                tracing::warn!(%err, "failed to spawn reachability watcher");
                Registration::inert()
            }
        }
    }
}
