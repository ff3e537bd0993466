//! Where callbacks run.
//!
//! Transports complete on their own threads. A `DeliveryContext` decides
//! whether the caller's callback runs right there (`Inline`) or is handed
//! to a dedicated thread (`SerialQueue`).

use std::fmt;
use std::thread;

use crossbeam_channel::Sender;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An execution context for callbacks.
pub trait DeliveryContext: Send + Sync + fmt::Debug {
    fn dispatch(&self, job: Job);
}

/// Runs callbacks on whichever thread completed the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl DeliveryContext for Inline {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// A labelled worker thread running callbacks one at a time, in the order
/// they were dispatched.
///
/// The worker exits once the queue is dropped and every queued job has run.
pub struct SerialQueue {
    label: String,
    sender: Sender<Job>,
}

impl SerialQueue {
    pub fn new(label: impl Into<String>) -> std::io::Result<Self> {
        let label = label.into();
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        thread::Builder::new().name(label.clone()).spawn(move || {
            for job in receiver.iter() {
                job();
            }
        })?;
        Ok(Self { label, sender })
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.label)
            .field("queued", &self.sender.len())
            .finish()
    }
}

impl DeliveryContext for SerialQueue {
    fn dispatch(&self, job: Job) {
        if let Err(err) = self.sender.send(job) {
            // Only possible if the worker died.
            tracing::warn!(queue = %self.label, "delivery queue closed, running inline");
            (err.into_inner())();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn inline_runs_immediately() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Inline.dispatch(Box::new(move || tx.send(7).unwrap()));
        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[test]
    fn serial_queue_runs_on_its_own_thread_in_order() {
        let queue = SerialQueue::new("patron-test-queue").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..10 {
            let tx = tx.clone();
            queue.dispatch(Box::new(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            }));
        }

        for expected in 0..10 {
            let (i, name) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(i, expected);
            assert_eq!(name.as_deref(), Some("patron-test-queue"));
        }
    }
}
