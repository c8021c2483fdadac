//! Lifecycle guards: teardown registration and request cancellation.
//!
//! Nothing created during a consumer context - in-flight requests, interval
//! timers, push subscriptions - may outlive it. The cleanup guard collects
//! teardown actions and runs them exactly once; the cancel pool lets a
//! context abort every outstanding request in one call.

use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::watch;
use tracing::warn;

/// Single-use teardown collector.
///
/// Actions run exactly once, in registration order. A panicking action is
/// logged and does not prevent later actions from running. After `run_all`
/// (or drop), further registrations are rejected.
pub struct CleanupGuard {
    actions: Vec<Box<dyn FnOnce() + Send>>,
    ran: bool,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
            ran: false,
        }
    }

    /// Record a teardown action. Returns false (and drops the action)
    /// when the guard has already run.
    pub fn register<F>(&mut self, action: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.ran {
            warn!("cleanup registration after run_all rejected");
            return false;
        }
        self.actions.push(Box::new(action));
        true
    }

    /// Run every registered action in order. Idempotent: a second call is
    /// a no-op. Returns the number of actions executed.
    pub fn run_all(&mut self) -> usize {
        if self.ran {
            return 0;
        }
        self.ran = true;
        let actions = std::mem::take(&mut self.actions);
        let count = actions.len();
        for action in actions {
            if catch_unwind(AssertUnwindSafe(action)).is_err() {
                warn!("cleanup action panicked; continuing with the rest");
            }
        }
        count
    }

    pub fn has_run(&self) -> bool {
        self.ran
    }
}

impl Default for CleanupGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.run_all();
    }
}

/// Pool issuing cancellation handles for outbound requests.
///
/// `cancel_all` trips every handle issued so far; handles issued
/// afterwards are born already-cancelled so callers fail fast instead of
/// starting doomed work.
pub struct CancelPool {
    tx: watch::Sender<bool>,
}

impl CancelPool {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Issue a fresh handle tied to this pool.
    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel_all(&self) {
        let _ = self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle observed by one outbound request.
#[derive(Clone)]
pub struct CancelHandle {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when the pool cancels. If the pool is dropped without
    /// cancelling, this handle can no longer fire and pends forever.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
