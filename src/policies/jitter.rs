//! # Jitter policy for retry quanta.
//!
//! [`JitterPolicy`] adds randomness to retry quanta so that many publishers
//! sharing one runtime do not hammer their saturated buffers in lockstep.
//!
//! - [`JitterPolicy::None`] — no randomization, predictable quanta
//! - [`JitterPolicy::Full`] — random delay in [0, quantum] (most aggressive)
//! - [`JitterPolicy::Equal`] — delay = quantum/2 + random[0, quantum/2] (balanced)

use rand::Rng;
use std::time::Duration;

/// Policy controlling randomization of retry quanta.
///
/// ## Trade-offs
/// - **None**: Predictable, but synchronized retry rounds across publishers
/// - **Full**: Maximum randomness, aggressive load spreading
/// - **Equal**: Balanced (recommended when many publishers share a runtime)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JitterPolicy {
    /// No jitter: use the exact quantum.
    ///
    /// Use when:
    /// - Only one publisher is retrying (no herd risk)
    /// - Predictable timing required
    /// - Testing/debugging
    #[default]
    None,

    /// Full jitter: random delay in [0, quantum].
    ///
    /// Most aggressive jitter, can significantly shorten a round.
    Full,

    /// Equal jitter: delay = quantum/2 + random[0, quantum/2].
    ///
    /// Preserves ~75% of the original quantum on average.
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to the given quantum.
    pub fn apply(&self, quantum: Duration) -> Duration {
        match self {
            JitterPolicy::None => quantum,
            JitterPolicy::Full => self.full_jitter(quantum),
            JitterPolicy::Equal => self.equal_jitter(quantum),
        }
    }

    /// Full jitter: random[0, quantum]
    fn full_jitter(&self, quantum: Duration) -> Duration {
        let mut rng = rand::rng();
        let ms = quantum.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.random_range(0..=ms))
    }

    /// Equal jitter: quantum/2 + random[0, quantum/2]
    fn equal_jitter(&self, quantum: Duration) -> Duration {
        let mut rng = rand::rng();
        let ms = quantum.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let half = ms / 2;
        let jitter = if half == 0 {
            0
        } else {
            rng.random_range(0..=half)
        };
        Duration::from_millis(half + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_identity() {
        let d = Duration::from_millis(7);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn test_full_jitter_within_bounds() {
        for _ in 0..100 {
            let d = JitterPolicy::Full.apply(Duration::from_millis(20));
            assert!(d <= Duration::from_millis(20));
        }
    }

    #[test]
    fn test_equal_jitter_within_bounds() {
        for _ in 0..100 {
            let d = JitterPolicy::Equal.apply(Duration::from_millis(20));
            assert!(d >= Duration::from_millis(10));
            assert!(d <= Duration::from_millis(20));
        }
    }

    #[test]
    fn test_zero_quantum_stays_zero() {
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }
}
