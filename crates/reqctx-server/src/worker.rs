//! Worker identity: the key under which a request context is stored.
//!
//! A worker is whatever unit of execution serves one request end to end.
//! Inside a [`WorkerId::scope`] the id follows the task across runtime
//! threads; outside any scope each OS thread gets its own lazily assigned id.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_WORKER: WorkerId = WorkerId::next();
}

tokio::task_local! {
    static TASK_WORKER: WorkerId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Allocate an id no other worker in this process has used.
    pub fn next() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Identity of the caller: the enclosing task scope if any, else the OS thread.
    pub fn current() -> Self {
        TASK_WORKER
            .try_with(|id| *id)
            .unwrap_or_else(|_| THREAD_WORKER.with(|id| *id))
    }

    /// Run `fut` with `self` as the current worker, across every `.await` inside it.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        TASK_WORKER.scope(self, fut).await
    }

    /// Synchronous counterpart of [`WorkerId::scope`].
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        TASK_WORKER.sync_scope(self, f)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}
