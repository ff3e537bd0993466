//! Reachability driven by hand, for tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::{Reachability, ReachabilityCallback, ReachabilityStatus, Registration};

/// Reports whatever status it was last `set` to, for every host.
#[derive(Clone)]
pub struct ManualReachability {
    state: Arc<Mutex<ManualState>>,
}

struct ManualState {
    status: ReachabilityStatus,
    probes: usize,
    waiting: HashMap<Uuid, ReachabilityCallback>,
}

impl ManualReachability {
    pub fn new(status: ReachabilityStatus) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                status,
                probes: 0,
                waiting: HashMap::new(),
            })),
        }
    }

    /// Change the status. If it differs from the current one, every live
    /// registration fires with it and is consumed.
    pub fn set(&self, status: ReachabilityStatus) {
        let fired: Vec<ReachabilityCallback> = {
            let mut state = self.state.lock();
            if state.status == status {
                return;
            }
            state.status = status;
            state.waiting.drain().map(|(_, callback)| callback).collect()
        };
        for callback in fired {
            callback(status);
        }
    }

    pub fn status(&self) -> ReachabilityStatus {
        self.state.lock().status
    }

    /// How many times `probe` has been called.
    pub fn probes(&self) -> usize {
        self.state.lock().probes
    }

    /// Registrations that have neither fired nor been dropped.
    pub fn registrations(&self) -> usize {
        self.state.lock().waiting.len()
    }
}

impl fmt::Debug for ManualReachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualReachability")
            .field("status", &state.status)
            .field("registrations", &state.waiting.len())
            .finish()
    }
}

impl Reachability for ManualReachability {
    fn probe(&self, _host: &str, _port: u16) -> ReachabilityStatus {
        let mut state = self.state.lock();
        state.probes += 1;
        state.status
    }

    fn on_change(&self, _host: &str, _port: u16, callback: ReachabilityCallback) -> Registration {
        let id = Uuid::new_v4();
        self.state.lock().waiting.insert(id, callback);
        let state = self.state.clone();
        Registration::new(move || {
            state.lock().waiting.remove(&id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_fires_and_consumes_registrations() {
        let reachability = ManualReachability::new(ReachabilityStatus::Unreachable);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _registration = reachability.on_change(
            "localhost",
            80,
            Box::new(move |status| sink.lock().push(status)),
        );
        assert_eq!(reachability.registrations(), 1);

        reachability.set(ReachabilityStatus::Constrained);
        reachability.set(ReachabilityStatus::Reachable);

        assert_eq!(*seen.lock(), vec![ReachabilityStatus::Constrained]);
        assert_eq!(reachability.registrations(), 0);
    }

    #[test]
    fn same_status_does_not_fire() {
        let reachability = ManualReachability::new(ReachabilityStatus::Unreachable);
        let _registration = reachability.on_change("localhost", 80, Box::new(|_| panic!("fired")));
        reachability.set(ReachabilityStatus::Unreachable);
        assert_eq!(reachability.registrations(), 1);
    }

    #[test]
    fn dropped_registration_is_abandoned() {
        let reachability = ManualReachability::new(ReachabilityStatus::Unreachable);
        let registration = reachability.on_change("localhost", 80, Box::new(|_| panic!("fired")));
        drop(registration);
        assert_eq!(reachability.registrations(), 0);
        reachability.set(ReachabilityStatus::Reachable);
    }

    #[test]
    fn probe_is_counted() {
        let reachability = ManualReachability::new(ReachabilityStatus::Reachable);
        assert_eq!(reachability.probe("localhost", 80), ReachabilityStatus::Reachable);
        assert_eq!(reachability.probes(), 1);
    }
}
