//! # Engine: shared worker lifecycle for drain loops and retry tasks.
//!
//! [`Engine`] is the process-wide home of every asynchronous task the
//! engine spawns: per-subscriber drain loops, saturation retry tasks, and
//! the short-lived notifiers for late subscribers. It is created at engine
//! start and **injected** into each publisher — never looked up as an
//! ambient singleton — so tests and embedders can run isolated engines
//! side by side.
//!
//! ## Lifecycle
//! ```text
//! Engine::new()
//!   ├─► BroadcastPublisher::new(&engine)   (any number)
//!   │       └─► engine.spawn(drain loop / retry task)
//!   └─► engine.shutdown().await
//!         ├─ cancellation token fires → workers exit at safe points
//!         └─ task tracker joins every outstanding worker
//! ```
//!
//! Shutdown is abrupt by design: workers observe the token and exit without
//! delivering further items. For a graceful end of stream, close the
//! publishers first and let the drain loops finish, then shut the engine
//! down.

use std::future::Future;

use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Shared handle to the engine's worker pool.
///
/// Cheap to clone (both members are `Arc`-backed). All publishers created
/// from the same `Engine` share one tracker and one shutdown token.
#[derive(Clone, Debug)]
pub struct Engine {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl Engine {
    /// Creates a new engine with an open task tracker.
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        }
    }

    /// Spawns a worker on the engine.
    ///
    /// After [`Engine::shutdown`] has been initiated the future is dropped
    /// instead of spawned; callers treat this the same as a worker that
    /// observed the token immediately.
    pub(crate) fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            log::warn!("engine is shut down; worker not spawned");
            return;
        }
        let _ = self.tracker.spawn(fut);
    }

    /// Token observed by every worker; fires once on shutdown.
    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// True once shutdown has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels all workers and waits for them to finish.
    ///
    /// Idempotent; concurrent callers all wait for the same join.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_joins_spawned_workers() {
        let engine = Engine::new();
        let token = engine.shutdown_token();
        engine.spawn(async move {
            token.cancelled().await;
        });

        engine.shutdown().await;
        assert!(engine.is_shutdown());
    }

    #[tokio::test]
    async fn test_spawn_after_shutdown_is_dropped() {
        let engine = Engine::new();
        engine.shutdown().await;

        // Worker must not run; if it did, it would hang shutdown below.
        engine.spawn(async {
            std::future::pending::<()>().await;
        });
        engine.shutdown().await;
    }
}
