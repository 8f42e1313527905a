//! # Processor: a pipeline stage that is both consumer and producer.
//!
//! A [`Processor`] subscribes to an upstream publisher, applies a
//! transform to every item, and re-publishes the results through its own
//! embedded [`BroadcastPublisher`]. Chaining processors builds pipelines
//! of arbitrary length; demand credit propagates back through every stage,
//! so a slow terminal consumer paces the original producer.
//!
//! ## Wiring
//! ```text
//! upstream ── on_next(item) ──► transform(item) ──► downstream.submit(out)
//!      ▲                                                    │
//!      └──────────── request(1) per delivered item ◄────────┘
//! ```
//!
//! ## Rules
//! - The initial credit window comes from [`Prefetch`]; one unit is
//!   replenished per delivered item, so the window size stays constant.
//! - Terminal signals are forwarded downstream verbatim and upstream
//!   credit stops.
//! - A transform failure (error or panic) cancels the upstream
//!   subscription and fails the downstream publisher with
//!   [`FlowError::Transform`]; it never crashes the process.
//!
//! ## Example
//! ```no_run
//! use flowcast::{BroadcastPublisher, Engine, Processor, SubscriberFn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let engine = Engine::new();
//! let source: BroadcastPublisher<u32> = BroadcastPublisher::new(&engine);
//!
//! let doubler = Processor::new(&engine, "doubler", |item: u32| Ok(item * 2));
//! source.subscribe(doubler.clone());
//! doubler.subscribe(SubscriberFn::arc("printer", |item: u32| {
//!     println!("{item}");
//! }));
//!
//! source.submit(21).expect("open");
//! source.close();
//! engine.shutdown().await;
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{Prefetch, PublisherConfig};
use crate::engine::Engine;
use crate::error::FlowError;
use crate::flow::{Subscriber, Subscription};
use crate::publisher::{BroadcastPublisher, PublisherState};

/// A stage composing one upstream subscriber role with one downstream
/// publisher role, wired by a transform function.
///
/// Create it with [`Processor::new`], subscribe it to an upstream
/// publisher, and subscribe downstream consumers to it.
pub struct Processor<T, U, F> {
    name: &'static str,
    transform: F,
    prefetch: Prefetch,
    downstream: BroadcastPublisher<U>,
    upstream: Mutex<Option<Subscription>>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, U, F> Processor<T, U, F>
where
    T: Send + 'static,
    U: Clone + Send + 'static,
    F: Fn(T) -> Result<U, FlowError> + Send + Sync + 'static,
{
    /// Creates a stage with default configuration and
    /// [`Prefetch::One`] upstream pacing.
    pub fn new(engine: &Engine, name: &'static str, transform: F) -> Arc<Self> {
        Self::with_config(engine, name, PublisherConfig::default(), Prefetch::One, transform)
    }

    /// Creates a stage with explicit downstream configuration and
    /// upstream prefetch window.
    pub fn with_config(
        engine: &Engine,
        name: &'static str,
        config: PublisherConfig,
        prefetch: Prefetch,
        transform: F,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            transform,
            prefetch,
            downstream: BroadcastPublisher::with_config(engine, config),
            upstream: Mutex::new(None),
            _marker: std::marker::PhantomData,
        })
    }

    /// Registers a downstream subscriber with this stage's publisher.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<U>>) -> Subscription {
        self.downstream.subscribe(subscriber)
    }

    /// The embedded downstream publisher.
    pub fn publisher(&self) -> &BroadcastPublisher<U> {
        &self.downstream
    }

    /// Downstream lifecycle state.
    pub fn state(&self) -> PublisherState {
        self.downstream.state()
    }

    /// Caller-bounded downstream injection, for feeding a stage directly
    /// (bypassing upstream wiring) in tests and adapters.
    pub async fn offer(&self, item: U, timeout: Duration) -> Result<bool, FlowError> {
        self.downstream.offer(item, timeout).await
    }

    fn take_upstream(&self) -> Option<Subscription> {
        self.upstream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn with_upstream(&self, f: impl FnOnce(&Subscription)) {
        let guard = self.upstream.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(subscription) = guard.as_ref() {
            f(subscription);
        }
    }

    fn fail_stage(&self, error: FlowError) {
        log::warn!("stage '{}': {}", self.name, error);
        if let Some(upstream) = self.take_upstream() {
            upstream.cancel();
        }
        self.downstream.close_exceptionally(error);
    }
}

#[async_trait]
impl<T, U, F> Subscriber<T> for Processor<T, U, F>
where
    T: Send + 'static,
    U: Clone + Send + 'static,
    F: Fn(T) -> Result<U, FlowError> + Send + Sync + 'static,
{
    async fn on_subscribe(&self, subscription: Subscription) {
        let initial = self.prefetch.initial();
        {
            let mut guard = self.upstream.lock().unwrap_or_else(PoisonError::into_inner);
            *guard = Some(subscription.clone());
        }
        subscription.request(initial);
        log::debug!(
            "stage '{}': subscribed upstream with prefetch {}",
            self.name,
            initial
        );
    }

    async fn on_next(&self, item: T) {
        let transformed =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.transform)(item)));
        let out = match transformed {
            Ok(Ok(out)) => out,
            Ok(Err(error)) => {
                self.fail_stage(FlowError::transform(error.to_string()));
                return;
            }
            Err(panic) => {
                self.fail_stage(FlowError::transform(format!(
                    "transform panicked: {panic:?}"
                )));
                return;
            }
        };

        match self.downstream.submit(out) {
            Ok(_lag) => {
                // Downstream absorbed (or deferred) the item: replenish
                // one unit of upstream credit to keep the window constant.
                self.with_upstream(|upstream| upstream.request(1));
            }
            Err(_closed) => {
                // Downstream is gone; stop pulling from upstream.
                if let Some(upstream) = self.take_upstream() {
                    upstream.cancel();
                }
            }
        }
    }

    async fn on_error(&self, error: Arc<FlowError>) {
        self.take_upstream();
        self.downstream.close_exceptionally_arc(error);
    }

    async fn on_complete(&self) {
        self.take_upstream();
        self.downstream.close();
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Recording, TerminalSignal};

    #[tokio::test]
    async fn test_three_stage_chain_transforms_in_order() {
        let engine = Engine::new();
        let source: BroadcastPublisher<i64> = BroadcastPublisher::new(&engine);

        let add = Processor::new(&engine, "add-one", |item: i64| Ok(item + 1));
        let double = Processor::new(&engine, "double", |item: i64| Ok(item * 2));
        let stringify = Processor::new(&engine, "stringify", |item: i64| Ok(item.to_string()));

        source.subscribe(add.clone());
        add.subscribe(double.clone());
        double.subscribe(stringify.clone());

        let sink = Recording::<String>::unbounded();
        stringify.subscribe(sink.clone());

        for item in [1, 2, 3] {
            source.submit(item).expect("open");
        }
        source.close();

        sink.wait_terminal().await;
        assert_eq!(sink.items(), vec!["4", "6", "8"]);
        assert!(matches!(sink.terminal(), Some(TerminalSignal::Completed)));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_prefetch_window_paces_upstream() {
        let engine = Engine::new();
        let source: BroadcastPublisher<i64> = BroadcastPublisher::new(&engine);

        let stage = Processor::with_config(
            &engine,
            "windowed",
            PublisherConfig::default(),
            Prefetch::Window(4),
            |item: i64| Ok(item),
        );
        source.subscribe(stage.clone());

        let sink = Recording::<i64>::unbounded();
        stage.subscribe(sink.clone());

        for item in 0..32 {
            source.submit(item).expect("open");
        }
        source.close();

        sink.wait_terminal().await;
        assert_eq!(sink.items(), (0..32).collect::<Vec<_>>());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_transform_error_fails_downstream_and_cancels_upstream() {
        let engine = Engine::new();
        let source: BroadcastPublisher<i64> = BroadcastPublisher::new(&engine);

        let stage = Processor::new(&engine, "fallible", |item: i64| {
            if item == 2 {
                Err(FlowError::upstream("cannot handle two"))
            } else {
                Ok(item * 10)
            }
        });
        source.subscribe(stage.clone());

        let sink = Recording::<i64>::unbounded();
        stage.subscribe(sink.clone());

        source.submit(1).expect("open");
        // Let the healthy item reach the sink before triggering the
        // failure, so the exceptional close cannot discard it.
        sink.wait_items(1).await;
        source.submit(2).expect("open");

        sink.wait_terminal().await;
        assert_eq!(sink.items(), vec![10], "items after the failure must not flow");
        match sink.terminal() {
            Some(TerminalSignal::Errored(error)) => {
                assert!(matches!(*error, FlowError::Transform { .. }));
            }
            other => panic!("expected transform failure, got {other:?}"),
        }

        // The stage stopped pulling: the source still has a buffered item
        // for the cancelled stage, which the next pass sweeps away.
        source.close();
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_transform_panic_is_contained() {
        let engine = Engine::new();
        let source: BroadcastPublisher<i64> = BroadcastPublisher::new(&engine);

        let stage = Processor::new(&engine, "panicky", |item: i64| {
            if item == 1 {
                panic!("boom");
            }
            Ok(item)
        });
        source.subscribe(stage.clone());

        let sink = Recording::<i64>::unbounded();
        stage.subscribe(sink.clone());

        source.submit(1).expect("open");

        sink.wait_terminal().await;
        assert!(sink.items().is_empty());
        match sink.terminal() {
            Some(TerminalSignal::Errored(error)) => {
                assert!(matches!(*error, FlowError::Transform { .. }));
            }
            other => panic!("expected transform failure, got {other:?}"),
        }
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_upstream_error_is_forwarded_verbatim() {
        let engine = Engine::new();
        let source: BroadcastPublisher<i64> = BroadcastPublisher::new(&engine);

        let stage = Processor::new(&engine, "pass", |item: i64| Ok(item));
        source.subscribe(stage.clone());

        let sink = Recording::<i64>::unbounded();
        stage.subscribe(sink.clone());

        source.submit(7).expect("open");
        source.close_exceptionally(FlowError::upstream("producer died"));

        sink.wait_terminal().await;
        match sink.terminal() {
            Some(TerminalSignal::Errored(error)) => {
                assert!(matches!(
                    &*error,
                    FlowError::Upstream { message } if message == "producer died"
                ));
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
        engine.shutdown().await;
    }
}
