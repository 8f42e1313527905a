//! Flow contract: the subscriber callback set and the subscription handle.
//!
//! This module defines the two role-based surfaces consumers interact
//! with:
//! - [`Subscriber`] — the callback set a consumer implements
//!   (`on_subscribe` / `on_next` / `on_error` / `on_complete`);
//! - [`Subscription`] — the handle a consumer drives (`request` /
//!   `cancel`), carrying demand credit and cancellation state.
//!
//! [`SubscriberFn`] wraps plain closures into a `Subscriber` for call
//! sites that do not want a dedicated type.

mod subscriber;
mod subscription;

pub use subscriber::{Subscriber, SubscriberFn};
pub use subscription::{Subscription, SubscriptionState};

pub(crate) use subscription::SubscriptionShared;
