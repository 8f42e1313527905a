//! # Publisher and stage configuration.
//!
//! [`PublisherConfig`] defines a publisher's behavior: per-subscriber buffer
//! capacity and the pacing policy for saturation retries. [`Prefetch`]
//! configures how aggressively a [`Processor`](crate::Processor) requests
//! upstream credit.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use flowcast::{Prefetch, PublisherConfig, RetryPolicy};
//!
//! let mut cfg = PublisherConfig::default();
//! cfg.capacity = 64;
//! cfg.retry = RetryPolicy {
//!     first: Duration::from_millis(1),
//!     ..RetryPolicy::default()
//! };
//!
//! assert_eq!(cfg.capacity, 64);
//! assert_eq!(Prefetch::default(), Prefetch::One);
//! ```

use crate::policies::RetryPolicy;

/// Configuration for a [`BroadcastPublisher`](crate::BroadcastPublisher).
///
/// Controls the per-subscriber buffer bound and how saturated buffers are
/// retried.
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    /// Capacity of each subscriber's buffer (items). A buffer whose backlog
    /// reaches this bound is saturated and further items are deferred to
    /// the retry task.
    pub capacity: usize,
    /// Pacing policy for saturation retries.
    pub retry: RetryPolicy,
}

impl Default for PublisherConfig {
    /// Provides a default configuration:
    /// - `capacity = 256`
    /// - `retry = RetryPolicy::default()` (constant 1ms quantum)
    fn default() -> Self {
        Self {
            capacity: 256,
            retry: RetryPolicy::default(),
        }
    }
}

impl PublisherConfig {
    /// Creates a configuration with the given buffer capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Effective capacity; the minimum is 1 (clamped).
    pub(crate) fn capacity_clamped(&self) -> usize {
        self.capacity.max(1)
    }
}

/// Upstream credit policy for a [`Processor`](crate::Processor).
///
/// Decides the initial credit window a stage requests from its upstream
/// publisher. The window is replenished one unit per delivered item, so the
/// chosen size stays constant over the stage's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prefetch {
    /// Strict one-in-flight: request 1, replenish 1. Lowest memory,
    /// pipeline throughput bounded by the slowest stage round-trip.
    One,
    /// Keep `n` items in flight to pipeline throughput against latency.
    /// Values below 1 are treated as 1.
    Window(usize),
}

impl Default for Prefetch {
    /// Returns [`Prefetch::One`]: backpressure-first, no hidden buffering.
    fn default() -> Self {
        Prefetch::One
    }
}

impl Prefetch {
    /// The initial credit a stage requests on subscribe.
    pub(crate) fn initial(&self) -> i64 {
        match self {
            Prefetch::One => 1,
            Prefetch::Window(n) => (*n).max(1) as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_clamped_to_one() {
        let cfg = PublisherConfig::with_capacity(0);
        assert_eq!(cfg.capacity_clamped(), 1);
    }

    #[test]
    fn test_prefetch_initial_window() {
        assert_eq!(Prefetch::One.initial(), 1);
        assert_eq!(Prefetch::Window(8).initial(), 8);
        assert_eq!(Prefetch::Window(0).initial(), 1);
    }
}
