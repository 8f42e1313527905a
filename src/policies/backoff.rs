//! # Retry pacing for saturated subscriber buffers.
//!
//! [`RetryPolicy`] controls how the delay between retry rounds grows while a
//! subscriber's buffer stays saturated. It is parameterized by:
//! - [`RetryPolicy::factor`] the multiplicative growth factor;
//! - [`RetryPolicy::first`] the initial quantum;
//! - [`RetryPolicy::max`] the maximum quantum cap.
//!
//! The quantum for round `n` is computed as `first × factor^n`, clamped to
//! `max`, then jitter is applied. The base is derived purely from the round
//! number, so jitter output never feeds back into subsequent calculations.
//!
//! Retries are unbounded: a deferred item is re-offered every quantum until
//! it is accepted, its subscription is cancelled, or the publisher closes.
//! A bounded retry count would turn flow control into data loss.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use flowcast::{JitterPolicy, RetryPolicy};
//!
//! let retry = RetryPolicy {
//!     first: Duration::from_millis(1),
//!     max: Duration::from_millis(64),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! // Round 0 — uses 'first' (1ms)
//! assert_eq!(retry.quantum(0), Duration::from_millis(1));
//!
//! // Round 3 — first × factor^3 = 8ms
//! assert_eq!(retry.quantum(3), Duration::from_millis(8));
//!
//! // Round 10 — 1ms × 2^10 = 1024ms → capped at max=64ms
//! assert_eq!(retry.quantum(10), Duration::from_millis(64));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Saturation retry pacing policy.
///
/// Encapsulates parameters that determine how the delay between retry
/// rounds grows:
/// - [`RetryPolicy::factor`] — multiplicative growth factor;
/// - [`RetryPolicy::first`] — the initial quantum;
/// - [`RetryPolicy::max`] — the maximum quantum cap.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Initial delay before the first retry round.
    pub first: Duration,
    /// Maximum delay cap for retry rounds.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter policy to decorrelate many publishers retrying at once.
    pub jitter: JitterPolicy,
}

impl Default for RetryPolicy {
    /// Returns a policy with:
    /// - `factor = 1.0` (constant quantum);
    /// - `first = 1ms`;
    /// - `max = 50ms`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(1),
            max: Duration::from_millis(50),
            jitter: JitterPolicy::None,
            factor: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Computes the quantum for the given retry round (0-indexed).
    ///
    /// The base is `first × factor^round`, clamped to [`RetryPolicy::max`].
    /// Jitter is applied to the clamped base; the result is never fed back
    /// into subsequent calculations.
    ///
    /// # Notes
    /// - `factor == 1.0` keeps the quantum constant at `first` (up to `max`).
    /// - `factor > 1.0` lets pressure decay exponentially up to `max`.
    pub fn quantum(&self, round: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let clamped_exp = round.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(clamped_exp);

        let base =
            if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
                self.max
            } else {
                Duration::from_secs_f64(unclamped_secs)
            };

        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_round_zero_returns_first() {
        let policy = RetryPolicy {
            first: Duration::from_millis(1),
            max: Duration::from_millis(50),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.quantum(0), Duration::from_millis(1));
    }

    #[test]
    fn test_exponential_growth_no_jitter() {
        let policy = RetryPolicy {
            first: Duration::from_millis(1),
            max: Duration::from_secs(1),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };

        assert_eq!(policy.quantum(0), Duration::from_millis(1));
        assert_eq!(policy.quantum(1), Duration::from_millis(2));
        assert_eq!(policy.quantum(2), Duration::from_millis(4));
        assert_eq!(policy.quantum(3), Duration::from_millis(8));
    }

    #[test]
    fn test_constant_factor() {
        let policy = RetryPolicy {
            first: Duration::from_millis(5),
            max: Duration::from_millis(50),
            factor: 1.0,
            jitter: JitterPolicy::None,
        };
        for round in 0..10 {
            assert_eq!(
                policy.quantum(round),
                Duration::from_millis(5),
                "round {} should be constant at 5ms",
                round
            );
        }
    }

    #[test]
    fn test_clamped_to_max() {
        let policy = RetryPolicy {
            first: Duration::from_millis(1),
            max: Duration::from_millis(16),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.quantum(10), Duration::from_millis(16));
    }

    #[test]
    fn test_first_exceeds_max() {
        let policy = RetryPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_millis(50),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.quantum(0), Duration::from_millis(50));
    }

    #[test]
    fn test_full_jitter_bounded_by_base() {
        let policy = RetryPolicy {
            first: Duration::from_millis(10),
            max: Duration::from_millis(50),
            factor: 1.0,
            jitter: JitterPolicy::Full,
        };
        for round in 0..50 {
            assert!(policy.quantum(round) <= Duration::from_millis(10));
        }
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let policy = RetryPolicy {
            first: Duration::from_millis(10),
            max: Duration::from_millis(50),
            factor: 1.0,
            jitter: JitterPolicy::Equal,
        };
        for round in 0..50 {
            let quantum = policy.quantum(round);
            assert!(quantum >= Duration::from_millis(5));
            assert!(quantum <= Duration::from_millis(10));
        }
    }

    #[test]
    fn test_huge_round_clamps_to_max() {
        let policy = RetryPolicy {
            first: Duration::from_millis(1),
            max: Duration::from_millis(50),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.quantum(u32::MAX), Duration::from_millis(50));
    }
}
