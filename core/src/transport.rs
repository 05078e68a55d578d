//! The boundary to whatever actually moves bytes over the network.
//!
//! A `Transport` turns a `WireRequest` into a task, runs it once resumed and
//! reports the outcome through the completion handler exactly once. Which
//! thread the handler runs on is up to the transport.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::http::{ResponseMetadata, WireRequest};

/// Identifier of a transport task, unique within one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Handle to an in-flight transport task.
pub trait TaskHandle: Send + Sync {
    fn id(&self) -> TaskId;

    fn resume(&self);

    /// Request cancellation. Advisory: the task may still complete normally.
    fn cancel(&self);
}

/// Receives `(body bytes, response metadata, transport error)`.
pub type CompletionHandler =
    Box<dyn FnOnce(Option<Vec<u8>>, Option<ResponseMetadata>, Option<TransportError>) + Send>;

/// Receives the tasks that are still live.
pub type TasksHandler = Box<dyn FnOnce(Vec<Arc<dyn TaskHandle>>) + Send>;

pub trait Transport: Send + Sync {
    /// Create a suspended task for `request`. `on_complete` must be called
    /// exactly once, after the task finishes, fails, or is cancelled.
    fn create_task(&self, request: WireRequest, on_complete: CompletionHandler) -> Arc<dyn TaskHandle>;

    /// Enumerate live tasks. `on_result` may run on any thread.
    fn live_tasks(&self, on_result: TasksHandler);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The task was cancelled before it completed.
    Cancelled,
    /// Socket-level or DNS failure.
    Io,
    Other,
}

/// Failure reported by a transport.
pub struct TransportError {
    kind: TransportErrorKind,
    cause: Option<Box<dyn Error + Send + Sync>>,
}

impl TransportError {
    pub fn new<T>(kind: TransportErrorKind, cause: Option<T>) -> Self
    where
        T: Into<Box<dyn Error + Send + Sync>>,
    {
        Self {
            kind,
            cause: cause.map(Into::into),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: TransportErrorKind::Cancelled,
            cause: None,
        }
    }

    pub fn io<T: Into<Box<dyn Error + Send + Sync>>>(cause: T) -> Self {
        Self::new(TransportErrorKind::Io, Some(cause))
    }

    pub fn other<T: Into<Box<dyn Error + Send + Sync>>>(cause: T) -> Self {
        Self::new(TransportErrorKind::Other, Some(cause))
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == TransportErrorKind::Cancelled
    }
}

impl fmt::Debug for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("TransportError");
        builder.field("kind", &self.kind);
        if let Some(ref cause) = self.cause {
            builder.field("cause", cause);
        }
        builder.finish()
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TransportErrorKind::Cancelled => "task cancelled",
            TransportErrorKind::Io => "io error",
            TransportErrorKind::Other => "transport error",
        };
        f.write_str(kind)?;
        if let Some(ref cause) = self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|e| &**e as _)
    }
}
