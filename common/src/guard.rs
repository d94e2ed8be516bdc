//! At-most-one-task concurrency guard (C3).
//!
//! `ConcurrencyGuard` is strict mutual exclusion, not a queue: a second
//! caller never waits for the first to finish, it is rejected immediately
//! with [`SessionError::Busy`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, SessionError};

/// Enforces that at most one task runs at a time.
///
/// Cloning a `ConcurrencyGuard` shares the same underlying flag, so the same
/// guard can be handed to multiple HTTP handlers or tasks while still
/// serializing them against each other.
#[derive(Clone, Default)]
pub struct ConcurrencyGuard {
    busy: Arc<AtomicBool>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a task is currently running under this guard.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run `task` iff no task is in-flight; otherwise returns
    /// [`SessionError::Busy`] without running `task` at all.
    pub async fn execute<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        if self
            .busy
            .compare_exchange(
                false,
                true,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(SessionError::Busy);
        }

        let _release = ReleaseOnDrop(self.busy.clone());
        Ok(task().await)
    }

    /// Like [`execute`](Self::execute), but fails fast with
    /// [`SessionError::Cancelled`] if `cancel` has already fired, before
    /// even attempting to acquire the guard.
    pub async fn execute_with_cancel<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        task: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        self.execute(task).await
    }

    /// Acquires the guard for a caller-managed scope instead of a single
    /// awaited future — useful when "the task" is actually a long-lived
    /// streaming response whose lifetime isn't a single `Future` the guard
    /// can own end-to-end (e.g. an SSE handler). Returns `None` if already
    /// busy; the returned permit releases the guard on drop.
    pub fn try_acquire(&self) -> Option<ConcurrencyPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ConcurrencyPermit(self.busy.clone()))
    }
}

/// An acquired [`ConcurrencyGuard`] slot; releases it when dropped.
pub struct ConcurrencyPermit(Arc<AtomicBool>);
impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Releases the busy flag when the guarded future finishes, including on
/// cancellation of the outer task (e.g. the HTTP handler's future being
/// dropped), so a panicked or aborted task never leaves the guard stuck.
struct ReleaseOnDrop(Arc<AtomicBool>);
impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
