//! # Core subscriber trait
//!
//! `Subscriber` is the extension point for consuming a stream. Each
//! subscriber is driven by a dedicated drain loop fed by a bounded buffer
//! owned by the [`BroadcastPublisher`](crate::BroadcastPublisher).
//!
//! ## Contract
//! - `on_subscribe` is always the first callback, exactly once.
//! - `on_next` is invoked once per delivered item, in submission order,
//!   never concurrently with itself for the same subscriber.
//! - Exactly one of `on_error` / `on_complete` follows, at most once,
//!   strictly after every accepted `on_next`.
//! - Implementations may be slow (I/O, batching) — they never block the
//!   producer nor other subscribers; pacing is expressed through
//!   [`Subscription::request`](crate::Subscription::request).
//!
//! ## Example (skeleton)
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use flowcast::{FlowError, Subscriber, Subscription};
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl Subscriber<String> for Printer {
//!     async fn on_subscribe(&self, subscription: Subscription) {
//!         subscription.request_unbounded();
//!     }
//!     async fn on_next(&self, item: String) {
//!         println!("{item}");
//!     }
//!     async fn on_error(&self, error: Arc<FlowError>) {
//!         eprintln!("stream failed: {error}");
//!     }
//!     async fn on_complete(&self) {}
//!     fn name(&self) -> &str { "printer" }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FlowError;
use crate::flow::subscription::Subscription;

/// Contract for stream consumers.
///
/// Called from a subscriber-dedicated drain loop. Implementations should
/// avoid blocking the async runtime (prefer async I/O and cooperative
/// waits).
#[async_trait]
pub trait Subscriber<T: Send + 'static>: Send + Sync + 'static {
    /// First callback, delivered exactly once with the handle for pacing
    /// and cancellation. No item arrives before the first `request`.
    async fn on_subscribe(&self, subscription: Subscription);

    /// Handles one delivered item.
    async fn on_next(&self, item: T);

    /// Terminal failure signal. No further callbacks follow.
    async fn on_error(&self, error: Arc<FlowError>);

    /// Terminal completion signal. No further callbacks follow.
    async fn on_complete(&self);

    /// Human-readable name (for logs).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Closure-backed subscriber.
///
/// Wraps a plain `Fn(T)` item handler, with optional completion and error
/// handlers, for call sites that do not want a dedicated type. By default
/// it requests unbounded credit on subscribe; use
/// [`SubscriberFn::with_initial_demand`] to pace deliveries explicitly.
pub struct SubscriberFn<T> {
    name: &'static str,
    initial_demand: i64,
    next: Box<dyn Fn(T) + Send + Sync>,
    complete: Option<Box<dyn Fn() + Send + Sync>>,
    error: Option<Box<dyn Fn(Arc<FlowError>) + Send + Sync>>,
}

impl<T> SubscriberFn<T> {
    /// Creates a subscriber from an item handler.
    pub fn new(name: &'static str, next: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            name,
            initial_demand: i64::MAX,
            next: Box::new(next),
            complete: None,
            error: None,
        }
    }

    /// Creates the subscriber and returns it as a shared handle.
    ///
    /// ## Example
    /// ```rust
    /// use flowcast::SubscriberFn;
    ///
    /// let sub = SubscriberFn::arc("collector", |item: u32| { let _ = item; });
    /// ```
    pub fn arc(name: &'static str, next: impl Fn(T) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self::new(name, next))
    }

    /// Sets the credit requested on subscribe (default: unbounded).
    /// `0` requests nothing; pace deliveries through the handle instead.
    #[must_use]
    pub fn with_initial_demand(mut self, demand: i64) -> Self {
        self.initial_demand = demand;
        self
    }

    /// Sets a completion handler.
    #[must_use]
    pub fn with_complete(mut self, complete: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(complete));
        self
    }

    /// Sets an error handler.
    #[must_use]
    pub fn with_error(
        mut self,
        error: impl Fn(Arc<FlowError>) + Send + Sync + 'static,
    ) -> Self {
        self.error = Some(Box::new(error));
        self
    }

    /// Wraps the built subscriber into a shared handle.
    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl<T: Send + 'static> Subscriber<T> for SubscriberFn<T> {
    async fn on_subscribe(&self, subscription: Subscription) {
        if self.initial_demand != 0 {
            subscription.request(self.initial_demand);
        }
    }

    async fn on_next(&self, item: T) {
        (self.next)(item);
    }

    async fn on_error(&self, error: Arc<FlowError>) {
        if let Some(handler) = &self.error {
            handler(error);
        } else {
            log::warn!("subscriber '{}' dropped error signal: {}", self.name, error);
        }
    }

    async fn on_complete(&self) {
        if let Some(handler) = &self.complete {
            handler();
        }
    }

    fn name(&self) -> &str {
        self.name
    }
}
