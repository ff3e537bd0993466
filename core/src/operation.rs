//! A request that waits out lost connectivity instead of failing.
//!
//! # Design
//! `RetryingOperation` drives one request through
//! `Idle -> Requesting -> {Done | AwaitingReachability}`, with
//! `AwaitingReachability -> Requesting` once the host is reachable again and
//! `* -> Done` on cancel. Only connectivity-lost transport failures lead to
//! `AwaitingReachability`; every other outcome is final.
//!
//! Every asynchronous event (an attempt completing, a reachability change)
//! carries the attempt number, and the reachability callback also carries a
//! registration generation. Events that no longer match the current state
//! are dropped, so a late completion from an old attempt cannot disturb a
//! newer one.
//!
//! The operation's shared state is referenced from the in-flight task and
//! from the reachability registration. Both are released at the terminal
//! transition, which also wakes anyone blocked in `wait`.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use crate::client::ClientCore;
use crate::config::RetryPolicy;
use crate::http::HttpRequest;
use crate::reachability::{Reachability, ReachabilityStatus, Registration};
use crate::task::{Callback, Outcome, RequestTask};

/// Where a `RetryingOperation` is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Requesting,
    AwaitingReachability,
    Done,
}

/// Handle to a connectivity-aware request. Clones refer to the same
/// operation.
#[derive(Clone)]
pub struct RetryingOperation {
    shared: Arc<OperationShared>,
}

struct OperationShared {
    id: Uuid,
    core: Arc<ClientCore>,
    request: HttpRequest,
    reachability: Arc<dyn Reachability>,
    policy: RetryPolicy,
    state: Mutex<OperationState>,
    gate: Condvar,
}

struct OperationState {
    phase: AttemptState,
    attempt: u32,
    generation: u64,
    task: Option<RequestTask>,
    watcher: Option<HostReachability>,
    registration: Option<Registration>,
    callback: Option<Callback>,
    released: bool,
}

/// The reachability source narrowed to the operation's target host.
#[derive(Debug, Clone)]
struct HostReachability {
    reachability: Arc<dyn Reachability>,
    host: String,
    port: u16,
}

impl HostReachability {
    fn probe(&self) -> ReachabilityStatus {
        self.reachability.probe(&self.host, self.port)
    }

    fn on_change<F>(&self, callback: F) -> Registration
    where
        F: FnOnce(ReachabilityStatus) + Send + 'static,
    {
        self.reachability
            .on_change(&self.host, self.port, Box::new(callback))
    }
}

impl RetryingOperation {
    pub(crate) fn new(
        core: Arc<ClientCore>,
        request: HttpRequest,
        reachability: Arc<dyn Reachability>,
        policy: RetryPolicy,
        callback: Callback,
    ) -> Self {
        Self {
            shared: Arc::new(OperationShared {
                id: Uuid::new_v4(),
                core,
                request,
                reachability,
                policy,
                state: Mutex::new(OperationState {
                    phase: AttemptState::Idle,
                    attempt: 0,
                    generation: 0,
                    task: None,
                    watcher: None,
                    registration: None,
                    callback: Some(callback),
                    released: false,
                }),
                gate: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> AttemptState {
        self.shared.state.lock().phase
    }

    /// Attempts issued so far, the first one included.
    pub fn attempts(&self) -> u32 {
        self.shared.state.lock().attempt
    }

    /// Issue the first attempt. Does nothing unless the operation is idle.
    pub fn start(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.phase != AttemptState::Idle {
                return;
            }
            state.phase = AttemptState::Requesting;
        }
        self.shared.attempt();
    }

    /// Stop the operation. Cancels the in-flight attempt, abandons any
    /// reachability registration, and delivers `Error::Cancelled` unless the
    /// callback already fired. Never blocks.
    pub fn cancel(&self) {
        self.shared.terminate(Outcome::cancelled());
    }

    /// Block until the callback has been dispatched, or until `timeout`
    /// passes. Returns whether the operation finished.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.shared.state.lock();
        while !state.released {
            match deadline {
                Some(deadline) => {
                    if self.shared.gate.wait_until(&mut state, deadline).timed_out() {
                        return state.released;
                    }
                }
                None => self.shared.gate.wait(&mut state),
            }
        }
        true
    }

    /// `start`, then `wait`. For callers that must hold their thread until
    /// the request is over.
    pub fn run(&self, timeout: Option<Duration>) -> bool {
        self.start();
        self.wait(timeout)
    }
}

impl fmt::Debug for RetryingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("RetryingOperation")
            .field("id", &self.shared.id)
            .field("url", &self.shared.request.url.as_str())
            .field("state", &state.phase)
            .field("attempts", &state.attempt)
            .finish()
    }
}

impl OperationShared {
    fn attempt(self: &Arc<Self>) {
        let attempt = {
            let mut state = self.state.lock();
            if state.phase != AttemptState::Requesting {
                return;
            }
            state.attempt += 1;
            state.attempt
        };
        tracing::debug!(operation = %self.id, attempt, url = %self.request.url, "issuing attempt");

        let this = self.clone();
        let task = RequestTask::submit(
            &self.core,
            self.request.clone(),
            Box::new(move |outcome| this.on_attempt_complete(attempt, outcome)),
        );

        let mut state = self.state.lock();
        if state.phase == AttemptState::Done {
            drop(state);
            task.cancel();
        } else if state.phase == AttemptState::Requesting
            && state.attempt == attempt
            && !task.is_finished()
        {
            state.task = Some(task);
        }
    }

    fn on_attempt_complete(self: &Arc<Self>, attempt: u32, outcome: Outcome) {
        let mut state = self.state.lock();
        if state.phase != AttemptState::Requesting || state.attempt != attempt {
            tracing::trace!(operation = %self.id, attempt, "stale attempt completion ignored");
            return;
        }
        state.task = None;

        let connectivity_lost = matches!(&outcome.result, Err(err) if err.is_connectivity_lost());
        if !connectivity_lost {
            drop(state);
            self.terminate(outcome);
            return;
        }

        if !self.policy.allows(attempt - 1) {
            drop(state);
            tracing::warn!(operation = %self.id, attempt, "connectivity retries exhausted");
            self.terminate(outcome);
            return;
        }

        state.phase = AttemptState::AwaitingReachability;
        drop(state);
        tracing::debug!(operation = %self.id, attempt, "connectivity lost, checking reachability");
        self.check_reachability(attempt);
    }

    fn check_reachability(self: &Arc<Self>, attempt: u32) {
        let watcher = {
            let mut state = self.state.lock();
            if !self.awaiting(&state, attempt) {
                return;
            }
            state
                .watcher
                .get_or_insert_with(|| HostReachability {
                    reachability: self.reachability.clone(),
                    host: self.request.host().to_string(),
                    port: self.request.port(),
                })
                .clone()
        };

        if self.permits(watcher.probe()) {
            self.retry(attempt);
            return;
        }

        let generation = {
            let mut state = self.state.lock();
            if !self.awaiting(&state, attempt) {
                return;
            }
            state.generation += 1;
            state.generation
        };

        let this = self.clone();
        let registration = watcher.on_change(move |status| {
            this.on_reachability_change(attempt, generation, status)
        });

        {
            let mut state = self.state.lock();
            if self.awaiting(&state, attempt) && state.generation == generation {
                state.registration = Some(registration);
            } else {
                drop(state);
                drop(registration);
                return;
            }
        }

        // The status may have flipped between the probe and the registration.
        if self.permits(watcher.probe()) {
            self.retry(attempt);
        }
    }

    fn on_reachability_change(
        self: &Arc<Self>,
        attempt: u32,
        generation: u64,
        status: ReachabilityStatus,
    ) {
        let spent = {
            let mut state = self.state.lock();
            if !self.awaiting(&state, attempt) || state.generation != generation {
                return;
            }
            state.registration.take()
        };
        drop(spent);

        if self.permits(status) {
            tracing::debug!(operation = %self.id, attempt, ?status, "host reachable again");
            self.retry(attempt);
        } else {
            tracing::debug!(
                operation = %self.id,
                attempt,
                ?status,
                "host still not usable, waiting"
            );
            self.check_reachability(attempt);
        }
    }

    fn retry(self: &Arc<Self>, attempt: u32) {
        let registration = {
            let mut state = self.state.lock();
            if !self.awaiting(&state, attempt) {
                return;
            }
            state.phase = AttemptState::Requesting;
            state.registration.take()
        };
        drop(registration);

        let delay = self.policy.backoff(attempt);
        if delay.is_zero() {
            self.attempt();
            return;
        }

        tracing::debug!(operation = %self.id, attempt, ?delay, "retrying after backoff");
        let this = self.clone();
        let spawned = thread::Builder::new()
            .name("patron-retry".to_string())
            .spawn(move || {
                thread::sleep(delay);
                this.attempt();
            });
        if let Err(err) = spawned {
            tracing::warn!(
                operation = %self.id,
                %err,
                "failed to spawn backoff timer, retrying now"
            );
            self.attempt();
        }
    }

    /// The terminal transition. The first caller delivers `outcome`; later
    /// callers do nothing.
    fn terminate(&self, outcome: Outcome) {
        let (callback, task, registration) = {
            let mut state = self.state.lock();
            if state.phase == AttemptState::Done {
                return;
            }
            state.phase = AttemptState::Done;
            (
                state.callback.take(),
                state.task.take(),
                state.registration.take(),
            )
        };

        drop(registration);
        if let Some(task) = task {
            task.cancel();
        }
        if outcome.is_cancelled() {
            tracing::debug!(operation = %self.id, "operation cancelled");
        }
        if let Some(callback) = callback {
            self.core.deliver(callback, outcome);
        }

        self.state.lock().released = true;
        self.gate.notify_all();
    }

    fn awaiting(&self, state: &OperationState, attempt: u32) -> bool {
        state.phase == AttemptState::AwaitingReachability && state.attempt == attempt
    }

    fn permits(&self, status: ReachabilityStatus) -> bool {
        status.permits(self.request.allows_cellular_access)
    }
}
