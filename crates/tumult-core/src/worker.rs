//! Runtime-owned task pool.
//!
//! Actor instance lifecycles and dispatched activity runs execute as tasks on
//! a [`WorkerPool`]. The pool bounds concurrency with a semaphore, logs failed
//! tasks instead of propagating them, and is drained during finalize:
//! `shutdown` refuses new work and waits for in-flight tasks to complete.

use std::{
    future::Future,
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use tokio::{
    runtime::Handle,
    sync::{Notify, Semaphore},
};
use tracing::{debug, warn};

use crate::error::{CoreError, LifecycleError};

/// Bounded pool of tasks spawned on the current tokio runtime.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_workers: usize,
    closed: AtomicBool,
    active: AtomicUsize,
    spawned: AtomicU64,
    failed: AtomicU64,
    idle: Notify,
}

impl WorkerPool {
    /// Create a pool running at most `max_workers` tasks at once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(max_workers: usize) -> Result<Self, LifecycleError> {
        let handle = Handle::try_current().map_err(|_| LifecycleError::NoRuntime)?;
        let max_workers = max_workers.max(1);
        Ok(Self {
            inner: Arc::new(Inner {
                handle,
                permits: Arc::new(Semaphore::new(max_workers)),
                max_workers,
                closed: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                spawned: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                idle: Notify::new(),
            }),
        })
    }

    /// Queue a task. Its error, if any, is logged and counted.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(LifecycleError::PoolClosed);
        }

        let name = name.into();
        let guard = ActiveGuard::enter(Arc::clone(&self.inner));
        let permits = Arc::clone(&self.inner.permits);
        self.inner.spawned.fetch_add(1, Ordering::Relaxed);

        self.inner.handle.spawn(async move {
            let guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match task.await {
                Ok(()) => debug!(task = %name, "task completed"),
                Err(e) => {
                    guard.inner.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(task = %name, error = %e, "task failed");
                },
            }
        });
        Ok(())
    }

    /// Wait until no task is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.inner.idle.notified());
            notified.as_mut().enable();
            if self.inner.active.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Refuse new work, then drain in-flight tasks.
    pub async fn shutdown(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(active = self.active(), "worker pool draining");
        }
        self.wait_idle().await;
    }

    /// True once `shutdown` was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Tasks queued or running.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Tasks accepted since creation.
    pub fn spawned(&self) -> u64 {
        self.inner.spawned.load(Ordering::Relaxed)
    }

    /// Tasks that returned an error.
    pub fn failed(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Concurrency bound.
    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }
}

/// Counts a task as active until dropped, even if the task panics.
struct ActiveGuard {
    inner: Arc<Inner>,
}

impl ActiveGuard {
    fn enter(inner: Arc<Inner>) -> Self {
        inner.active.fetch_add(1, Ordering::AcqRel);
        Self { inner }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}
