//! Background task tracking.
//!
//! Spawned request handlers are kept here until they finish so the server
//! can report what is still in flight. Tasks are never cancelled by a
//! connection closing; [`TaskRegistry::abort_all`] is only used on shutdown.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::task::{AbortHandle, JoinHandle};

#[derive(Default)]
struct Inner {
    next: AtomicU64,
    tasks: DashMap<u64, AbortHandle>,
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

/// Removes a finished task from the registry, even if it panicked.
struct Deregister {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.inner.tasks.remove(&self.id);
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let id = self.inner.next.fetch_add(1, Ordering::Relaxed);
        let guard = Deregister {
            inner: Arc::clone(&self.inner),
            id,
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            future.await
        });
        // A task that already finished has dropped its guard; don't resurrect it.
        if !handle.is_finished() {
            self.inner.tasks.insert(id, handle.abort_handle());
            if handle.is_finished() {
                self.inner.tasks.remove(&id);
            }
        }
        handle
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }

    pub fn abort_all(&self) {
        let ids: Vec<u64> = self.inner.tasks.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, handle)) = self.inner.tasks.remove(&id) {
                handle.abort();
            }
        }
    }
}
