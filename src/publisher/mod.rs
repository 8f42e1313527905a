//! Producer side: broadcast fan-out, per-subscriber buffering, retry.
//!
//! Internal modules:
//! - [`broadcast`]: the publisher — fan-out pass, close/error propagation,
//!   lazy sweep;
//! - [`buffer`]: one subscriber's bounded queue and its drain loop;
//! - [`retry`]: the per-pass saturation retry task.
//!
//! The only public API from this module is [`BroadcastPublisher`] and its
//! [`PublisherState`].

pub(crate) mod broadcast;
pub(crate) mod buffer;
pub(crate) mod retry;

pub use broadcast::{BroadcastPublisher, PublisherState};
