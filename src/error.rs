//! Error types used by the flowcast engine.
//!
//! This module defines [`FlowError`], the single error enum that travels
//! through the engine. Two kinds of failure exist:
//!
//! - **Subscription-local** — [`FlowError::InvalidDemand`]; delivered to one
//!   subscriber only, siblings are unaffected.
//! - **Publisher-wide** — [`FlowError::Upstream`] and
//!   [`FlowError::Transform`]; broadcast to every current and future
//!   subscriber of the failed publisher.
//!
//! Saturation (a full per-subscriber buffer) is deliberately **not** an
//! error: it is a flow-control state resolved by the retry machinery and
//! never surfaces through subscriber callbacks.
//!
//! Terminal errors are shared between many subscribers, so they travel as
//! `Arc<FlowError>`.

use thiserror::Error;

/// # Errors produced by the flowcast engine.
///
/// All failures are represented as terminal signals on the affected
/// subscription(s); nothing here is fatal to the process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FlowError {
    /// A subscriber called `request` with a non-positive amount.
    ///
    /// A contract violation local to one subscription: it cancels that
    /// subscription and is delivered to its subscriber via `on_error`.
    #[error("invalid demand: request({requested}) must be positive")]
    InvalidDemand {
        /// The offending requested amount.
        requested: i64,
    },

    /// The publisher is no longer accepting items (closing, closed, or
    /// already failed).
    #[error("publisher is closed")]
    Closed,

    /// The producer terminated the stream exceptionally.
    ///
    /// Propagated verbatim to every subscriber of the failed publisher.
    #[error("upstream failure: {message}")]
    Upstream {
        /// Description of the producer-side failure.
        message: String,
    },

    /// A processor's transform function failed.
    ///
    /// Converted into a publisher-wide terminal signal for the processor's
    /// downstream subscribers; the processor's upstream subscription is
    /// cancelled as a side effect.
    #[error("transform failed: {message}")]
    Transform {
        /// Description of the transform failure.
        message: String,
    },
}

impl FlowError {
    /// Creates an [`FlowError::Upstream`] from any displayable cause.
    pub fn upstream(message: impl Into<String>) -> Self {
        FlowError::Upstream {
            message: message.into(),
        }
    }

    /// Creates a [`FlowError::Transform`] from any displayable cause.
    pub fn transform(message: impl Into<String>) -> Self {
        FlowError::Transform {
            message: message.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use flowcast::FlowError;
    ///
    /// let err = FlowError::InvalidDemand { requested: 0 };
    /// assert_eq!(err.as_label(), "invalid_demand");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            FlowError::InvalidDemand { .. } => "invalid_demand",
            FlowError::Closed => "publisher_closed",
            FlowError::Upstream { .. } => "upstream_failure",
            FlowError::Transform { .. } => "transform_failure",
        }
    }

    /// Indicates whether the error affects a single subscription rather
    /// than the whole publisher.
    ///
    /// # Example
    /// ```
    /// use flowcast::FlowError;
    ///
    /// assert!(FlowError::InvalidDemand { requested: -5 }.is_subscription_local());
    /// assert!(!FlowError::upstream("boom").is_subscription_local());
    /// ```
    pub fn is_subscription_local(&self) -> bool {
        matches!(self, FlowError::InvalidDemand { .. })
    }
}
