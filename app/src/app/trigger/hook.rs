//! Interfaces the host CRUD service exposes to the trigger.

use futures::future::BoxFuture;
use http::HeaderMap;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// Work to run once the originating transaction is durably committed.
pub type CommitTask = BoxFuture<'static, ()>;

/// Post-commit notification of the host's transaction.
///
/// Implementations must run a registered task only after the write is
/// durable and must drop it if the transaction rolls back.
pub trait TransactionCommitHook: Send + Sync {
    fn on_committed(&self, task: CommitTask);
}

/// The write request seen by an after-write handler.
pub trait WriteRequest: TransactionCommitHook {
    /// Case-insensitive request header lookup.
    fn header(&self, name: &str) -> Option<String>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteOperation {
    Create,
    Update,
}

pub trait AfterWriteHandler: Send + Sync {
    /// Called with the written record after the write succeeded, before commit.
    fn after_write(&self, record: &Map<String, Value>, request: &dyn WriteRequest);
}

/// Where the host accepts after-write handlers per entity.
pub trait EntityHandlerRegistry {
    fn register_after(
        &mut self,
        entity: &str,
        operation: WriteOperation,
        handler: Arc<dyn AfterWriteHandler>,
    );
}

/// Write request for hosts that carry http headers and decide the
/// transaction outcome themselves.
///
/// Tasks are queued until `committed` spawns them onto the runtime;
/// `rolled_back` drops them unrun.
pub struct CommitScopedRequest {
    headers: HeaderMap,
    pending: Mutex<Vec<CommitTask>>,
}

impl CommitScopedRequest {
    pub fn new(headers: HeaderMap) -> Self {
        Self {
            headers,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn pending_len(&self) -> usize {
        match self.pending.lock() {
            Ok(p) => p.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Detach every queued task from the request. Must be called inside a tokio runtime.
    pub fn committed(self) -> Vec<tokio::task::JoinHandle<()>> {
        self.take_pending().into_iter().map(tokio::spawn).collect()
    }

    pub fn rolled_back(self) {
        let dropped = self.take_pending().len();
        if dropped > 0 {
            tracing::debug!("transaction rolled back: dropped {} commit task(s)", dropped);
        }
    }

    fn take_pending(&self) -> Vec<CommitTask> {
        match self.pending.lock() {
            Ok(mut p) => std::mem::take(&mut *p),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl TransactionCommitHook for CommitScopedRequest {
    fn on_committed(&self, task: CommitTask) {
        match self.pending.lock() {
            Ok(mut p) => p.push(task),
            Err(poisoned) => poisoned.into_inner().push(task),
        }
    }
}

impl WriteRequest for CommitScopedRequest {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }
}
