//! Sends requests through a transport and delivers typed results.
//!
//! # Design
//! - `Session` owns the transport, a default `CallbackQueue`, and a registry
//!   that maps every live `TaskId` to the `Request` that produced it. The
//!   registry is what `cancel_requests` consults to decide which live tasks
//!   belong to a given request type and predicate.
//! - The registry sits behind one mutex. Registration (on `send`) and
//!   removal (on completion) both happen under that lock, and the lock is
//!   never held while calling into the transport or a handler.
//! - A completion removes its registry entry before the handler is
//!   dispatched, so a cancellation racing with a finished task finds nothing
//!   to cancel.
//! - Cancellation is advisory. Whether the handler then sees a cancelled
//!   connection error or the real result depends on timing.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use crate::callback::CallbackQueue;
use crate::error::{ResponseError, SessionTaskError};
use crate::http::ResponseMetadata;
use crate::request::Request;
use crate::transport::{CompletionHandler, TaskHandle, TaskId, Transport, TransportError};

struct TaskRecord {
    request: Arc<dyn Any + Send + Sync>,
    request_type: &'static str,
}

/// Ties a completion handler to its task id, which only exists once
/// `create_task` has returned.
#[derive(Default)]
struct TaskSlot {
    id: OnceLock<TaskId>,
    completed: AtomicBool,
}

#[derive(Default)]
struct TaskRegistry {
    records: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl TaskRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false if the task already completed, in which case nothing is
    /// stored.
    fn register(&self, slot: &TaskSlot, id: TaskId, record: TaskRecord) -> bool {
        let mut records = self.lock();
        if slot.completed.load(Ordering::SeqCst) {
            return false;
        }
        let _ = slot.id.set(id);
        debug!(task = %id, request = record.request_type, "task registered");
        records.insert(id, record);
        true
    }

    fn complete(&self, slot: &TaskSlot) -> Option<TaskId> {
        let mut records = self.lock();
        slot.completed.store(true, Ordering::SeqCst);
        let id = *slot.id.get()?;
        records.remove(&id);
        Some(id)
    }

    fn lookup(&self, id: TaskId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.lock().get(&id).map(|record| Arc::clone(&record.request))
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Manages tasks for typed requests over a pluggable `Transport`.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn Transport>,
    callback_queue: CallbackQueue,
    registry: Arc<TaskRegistry>,
}

impl Session {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    /// Build a session around a transport the caller keeps a handle to.
    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            callback_queue: CallbackQueue::default(),
            registry: Arc::default(),
        }
    }

    /// Default queue for handlers when `send` is not given one.
    pub fn with_callback_queue(mut self, callback_queue: CallbackQueue) -> Self {
        self.callback_queue = callback_queue;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn callback_queue(&self) -> &CallbackQueue {
        &self.callback_queue
    }

    /// Number of tasks sent but not yet completed.
    pub fn pending_tasks(&self) -> usize {
        self.registry.len()
    }

    /// Send `request` and deliver its result to `handler` on `callback_queue`
    /// (or the session default).
    ///
    /// Returns `None` if the wire request could not be built; the handler
    /// still receives a `SessionTaskError::Request` through the queue.
    pub fn send<R, F>(&self, request: R, callback_queue: Option<CallbackQueue>, handler: F) -> Option<Arc<dyn TaskHandle>>
    where
        R: Request,
        F: FnOnce(Result<R::Response, SessionTaskError>) + Send + 'static,
    {
        let queue = callback_queue.unwrap_or_else(|| self.callback_queue.clone());

        let wire = match request.build_request() {
            Ok(wire) => wire,
            Err(e) => {
                debug!(request = type_name::<R>(), error = %e, "request construction failed");
                queue.execute(move || handler(Err(SessionTaskError::Request(e))));
                return None;
            }
        };
        debug!(method = %wire.method, url = %wire.url, "sending request");

        let request = Arc::new(request);
        let slot = Arc::new(TaskSlot::default());

        let on_complete: CompletionHandler = {
            let request = Arc::clone(&request);
            let registry = Arc::clone(&self.registry);
            let slot = Arc::clone(&slot);
            Box::new(move |data, metadata, error| {
                let result = decode(&*request, data, metadata, error);
                let id = registry.complete(&slot);
                debug!(task = ?id, ok = result.is_ok(), "dispatching result");
                queue.execute(move || handler(result));
            })
        };

        let task = self.transport.create_task(wire, on_complete);
        let request: Arc<dyn Any + Send + Sync> = request;
        let record = TaskRecord {
            request,
            request_type: type_name::<R>(),
        };
        if !self.registry.register(&slot, task.id(), record) {
            debug!(task = %task.id(), "task completed before registration");
        }
        task.resume();
        Some(task)
    }

    /// Cancel live tasks created from requests of type `R` that satisfy
    /// `predicate`.
    pub fn cancel_requests<R, P>(&self, predicate: P)
    where
        R: Request,
        P: Fn(&R) -> bool + Send + 'static,
    {
        let registry = Arc::downgrade(&self.registry);
        self.transport.live_tasks(Box::new(move |tasks| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            for task in tasks {
                let Some(record) = registry.lookup(task.id()) else {
                    continue;
                };
                let Some(request) = (*record).downcast_ref::<R>() else {
                    continue;
                };
                if predicate(request) {
                    debug!(task = %task.id(), request = type_name::<R>(), "cancelling task");
                    task.cancel();
                }
            }
        }));
    }

    /// Cancel every live task created from a request of type `R`.
    pub fn cancel_all<R: Request>(&self) {
        self.cancel_requests::<R, _>(|_| true);
    }

    /// Send `request` and await its result.
    ///
    /// Dropping the returned future before it resolves cancels the task.
    pub async fn response<R: Request>(
        &self,
        request: R,
        callback_queue: Option<CallbackQueue>,
    ) -> Result<R::Response, SessionTaskError> {
        let (tx, rx) = oneshot::channel();
        let task = self.send(request, callback_queue, move |result| {
            let _ = tx.send(result);
        });
        let mut guard = CancelOnDrop { task };
        let result = rx.await;
        guard.task = None;
        result.unwrap_or_else(|_| {
            Err(SessionTaskError::Connection(TransportError::other(
                "handler dropped before delivering a result",
            )))
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("callback_queue", &self.callback_queue)
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

struct CancelOnDrop {
    task: Option<Arc<dyn TaskHandle>>,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!(task = %task.id(), "response future dropped, cancelling");
            task.cancel();
        }
    }
}

fn decode<R: Request>(
    request: &R,
    data: Option<Vec<u8>>,
    metadata: Option<ResponseMetadata>,
    error: Option<TransportError>,
) -> Result<R::Response, SessionTaskError> {
    if let Some(error) = error {
        return Err(SessionTaskError::Connection(error));
    }
    let head = match metadata {
        Some(ResponseMetadata::Http(head)) => head,
        other => return Err(SessionTaskError::ResponseShape(ResponseError::NonHttpResponse(other))),
    };
    let data = data.ok_or(SessionTaskError::ResponseShape(ResponseError::MissingBody))?;
    request
        .parse_response(&data, &head)
        .map_err(SessionTaskError::ResponseDecoding)
}
