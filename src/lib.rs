//! # flowcast
//!
//! **flowcast** is a backpressured broadcast stream engine for Rust.
//!
//! One producer delivers items to any number of independently paced
//! consumers. Each consumer announces how much it can currently absorb
//! (demand credit), and the engine decouples producer throughput from the
//! slowest consumer without unbounded memory growth or lost items.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  Producer ──► BroadcastPublisher ── fan-out pass ──┬─► [buffer S1] ─► drain S1 ─► Subscriber 1
//!                     │                              ├─► [buffer S2] ─► drain S2 ─► Subscriber 2
//!                     │ saturated buffers            └─► [buffer SN] ─► drain SN ─► Subscriber N
//!                     ▼                                        ▲
//!               retry task (per pass,                          │ request(n) / cancel()
//!               engine worker, FIFO)                     Subscription
//!
//!  Pipelines:
//!    Publisher ─► Processor(f) ─► Processor(g) ─► terminal Subscriber
//!    (each Processor is a Subscriber upstream and a Publisher downstream;
//!     demand credit propagates back through every stage)
//! ```
//!
//! ### Delivery contract
//! - Per-subscriber delivery order equals submission order (FIFO); no
//!   ordering is guaranteed *across* subscribers.
//! - `on_subscribe` first, then zero or more `on_next`, then exactly one
//!   of `on_error` / `on_complete`, at most once.
//! - Nothing is delivered beyond the credit a subscriber requested.
//! - A full buffer defers items to an asynchronous retry task; saturation
//!   is flow control, not an error, and is invisible to subscribers.
//! - Delivery is at-most-once per subscriber: `close` drains backlogs,
//!   an exceptional close discards them.
//!
//! ## Features
//! | Area              | Description                                                       | Key types / traits                     |
//! |-------------------|-------------------------------------------------------------------|----------------------------------------|
//! | **Publishing**    | Non-blocking broadcast with a max-lag backpressure signal.        | [`BroadcastPublisher`]                 |
//! | **Consuming**     | Callback contract plus closure-backed convenience subscriber.     | [`Subscriber`], [`SubscriberFn`]       |
//! | **Pacing**        | Demand credit, cancellation, lifecycle inspection.                | [`Subscription`], [`SubscriptionState`]|
//! | **Pipelines**     | Stages that consume, transform, and republish.                    | [`Processor`], [`Prefetch`]            |
//! | **Saturation**    | Per-pass retry with configurable quantum pacing.                  | [`RetryPolicy`], [`JitterPolicy`]      |
//! | **Lifecycle**     | Explicit worker pool, injected, joined on shutdown.               | [`Engine`]                             |
//! | **Errors**        | Typed terminal signals, local vs publisher-wide.                  | [`FlowError`]                          |
//!
//! ## Example
//! ```no_run
//! use std::sync::{Arc, Mutex};
//! use flowcast::{BroadcastPublisher, Engine, Processor, SubscriberFn};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let engine = Engine::new();
//!     let source: BroadcastPublisher<u32> = BroadcastPublisher::new(&engine);
//!
//!     // A stage: consumes the source, doubles, republished downstream.
//!     let double = Processor::new(&engine, "double", |item: u32| Ok(item * 2));
//!     source.subscribe(double.clone());
//!
//!     let seen = Arc::new(Mutex::new(Vec::new()));
//!     let sink = {
//!         let seen = Arc::clone(&seen);
//!         SubscriberFn::arc("collector", move |item: u32| {
//!             seen.lock().unwrap().push(item);
//!         })
//!     };
//!     double.subscribe(sink);
//!
//!     for item in 1..=3 {
//!         let lag = source.submit(item).expect("publisher is open");
//!         let _ = lag; // producer-side backpressure signal
//!     }
//!     source.close();
//!     engine.shutdown().await;
//! }
//! ```

mod config;
mod engine;
mod error;
mod flow;
mod policies;
mod publisher;
mod stage;

#[cfg(test)]
pub(crate) mod test_support;

// ---- Public re-exports ----

pub use config::{Prefetch, PublisherConfig};
pub use engine::Engine;
pub use error::FlowError;
pub use flow::{Subscriber, SubscriberFn, Subscription, SubscriptionState};
pub use policies::{JitterPolicy, RetryPolicy};
pub use publisher::{BroadcastPublisher, PublisherState};
pub use stage::Processor;
