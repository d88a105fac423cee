//! RequestContextRegistry: maps worker identity to its request context.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::context::{DEFAULT_VIEW_PREFIX, RequestContext};
use crate::worker::WorkerId;

/// Process-wide table of request contexts, one per live worker.
///
/// Lookups take the read lock; creation takes the write lock and inserts only
/// if the entry is still absent, so a worker never ends up with two contexts.
/// Entries are removed explicitly with [`retire`](Self::retire) or by
/// dropping the [`WorkerGuard`] returned from [`bind`](Self::bind).
pub struct RequestContextRegistry {
    contexts: RwLock<HashMap<WorkerId, Arc<RequestContext>>>,
    view_prefix: String,
}

impl RequestContextRegistry {
    pub fn new() -> Self {
        Self::with_view_prefix(DEFAULT_VIEW_PREFIX)
    }

    pub fn with_view_prefix(view_prefix: impl Into<String>) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            view_prefix: view_prefix.into(),
        }
    }

    /// Context for `worker`, created empty on first access.
    pub fn context_for(&self, worker: WorkerId) -> Arc<RequestContext> {
        if let Some(ctx) = self.contexts.read().get(&worker) {
            return ctx.clone();
        }

        let mut contexts = self.contexts.write();
        contexts
            .entry(worker)
            .or_insert_with(|| {
                debug!("Request context created for {worker}");
                Arc::new(RequestContext::with_view_prefix(worker, self.view_prefix.clone()))
            })
            .clone()
    }

    /// Context of the calling worker.
    pub fn current(&self) -> Arc<RequestContext> {
        self.context_for(WorkerId::current())
    }

    /// Context for `worker` if one exists, without creating it.
    pub fn get(&self, worker: WorkerId) -> Option<Arc<RequestContext>> {
        self.contexts.read().get(&worker).cloned()
    }

    /// Drop the context of a worker that will serve no more requests.
    pub fn retire(&self, worker: WorkerId) -> bool {
        let removed = self.contexts.write().remove(&worker).is_some();
        if removed {
            debug!("Request context retired for {worker}");
        }
        removed
    }

    /// Create the context for `worker` and tie its lifetime to the returned guard.
    pub fn bind(self: &Arc<Self>, worker: WorkerId) -> WorkerGuard {
        self.context_for(worker);
        WorkerGuard {
            registry: self.clone(),
            worker,
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }
}

impl Default for RequestContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Retires its worker's context when dropped.
pub struct WorkerGuard {
    registry: Arc<RequestContextRegistry>,
    worker: WorkerId,
}

impl WorkerGuard {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn context(&self) -> Arc<RequestContext> {
        self.registry.context_for(self.worker)
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.registry.retire(self.worker);
    }
}
