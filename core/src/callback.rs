//! Where `Session` handlers run.
//!
//! `Immediate` runs the handler on whichever thread the transport completed
//! on. The other strategies hand the handler to a different execution
//! context and return right away.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use tracing::{error, warn};

type Job = Box<dyn FnOnce() + Send>;

#[derive(Clone, Default)]
pub enum CallbackQueue {
    /// Run on the transport's callback thread.
    #[default]
    Immediate,
    /// Run on a single designated thread, in submission order.
    Worker(WorkerQueue),
    /// Run on the blocking pool of a tokio runtime.
    Runtime(tokio::runtime::Handle),
}

impl CallbackQueue {
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            CallbackQueue::Immediate => job(),
            CallbackQueue::Worker(worker) => worker.submit(Box::new(job)),
            CallbackQueue::Runtime(handle) => {
                handle.spawn_blocking(job);
            }
        }
    }
}

impl fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackQueue::Immediate => f.write_str("Immediate"),
            CallbackQueue::Worker(worker) => f.debug_tuple("Worker").field(&worker.name()).finish(),
            CallbackQueue::Runtime(_) => f.write_str("Runtime"),
        }
    }
}

/// A named thread draining a FIFO of callbacks.
///
/// A panicking callback is logged and the thread moves on to the next one.
/// The thread exits once every clone of the queue has been dropped and the
/// pending jobs have run.
#[derive(Clone)]
pub struct WorkerQueue {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    name: String,
    sender: Sender<Job>,
}

impl WorkerQueue {
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let queue = name.clone();
        thread::Builder::new().name(name.clone()).spawn(move || {
            for job in receiver {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!(queue = %queue, reason = panic_message(&*payload), "callback panicked");
                }
            }
        })?;
        Ok(Self {
            inner: Arc::new(WorkerInner { name, sender }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn submit(&self, job: Job) {
        if self.inner.sender.send(job).is_err() {
            warn!(queue = %self.inner.name, "callback worker has exited, dropping callback");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
