//! # BroadcastPublisher: fan-out, saturation retry, and close propagation.
//!
//! [`BroadcastPublisher<T>`] owns the set of active subscriptions and is
//! the producer-facing surface of the engine: `subscribe`, `submit`,
//! `offer`, `close`, `close_exceptionally`.
//!
//! ## High-level architecture
//! ```text
//! Producer ── submit(item) ──► fan-out pass over the buffer set
//!                                │  per buffer: offer(item.clone())
//!                                ├─ Accepted(lag)  → track max lag
//!                                ├─ Saturated(item)→ ticket + retry list
//!                                └─ Closed         → flag for lazy sweep
//!                                │
//!                                ├─► retry list non-empty → retry task
//!                                │     (engine worker, one per pass)
//!                                └─► returns max lag to the producer
//!
//! Each buffer:  [bounded queue] ──► drain loop ──► Subscriber callbacks
//!                                    (credit-gated, one task per buffer)
//! ```
//!
//! ## Rules
//! - `submit` never blocks and never runs subscriber code; it serializes
//!   with other producers only on the buffer-set snapshot.
//! - Buffer link/unlink happens only at subscribe time and at sweep time,
//!   under a narrow write lock — never while a pass iterates.
//! - Once the publisher leaves `Open`, no new buffer is linked; late
//!   subscribers get `on_subscribe` plus the terminal signal immediately.
//! - `close` lets every backlog drain before completion; an exceptional
//!   close discards backlogs and wins over an in-progress graceful close.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::PublisherConfig;
use crate::engine::Engine;
use crate::error::FlowError;
use crate::flow::{Subscriber, Subscription, SubscriptionShared, SubscriptionState};
use crate::publisher::buffer::{drain, invoke, BufferedSubscription, Offer};
use crate::publisher::retry::{self, retry_pass, Deferred};

/// Lifecycle state of a [`BroadcastPublisher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PublisherState {
    /// Accepting subscribers and items.
    Open = 0,
    /// `close()` called; backlogs are still draining.
    Closing = 1,
    /// Every subscriber observed `on_complete`.
    Closed = 2,
    /// `close_exceptionally()` called; the terminal error is broadcast.
    Errored = 3,
}

impl PublisherState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PublisherState::Open,
            1 => PublisherState::Closing,
            2 => PublisherState::Closed,
            _ => PublisherState::Errored,
        }
    }
}

/// State shared between the publisher, its drain loops, and retry tasks.
pub(crate) struct PublisherShared {
    state: AtomicU8,
    /// Drain loops still running (including terminal ones not yet swept).
    live: AtomicUsize,
    terminal_error: Mutex<Option<Arc<FlowError>>>,
    /// Set when a pass observed a terminal buffer; consumed by the next
    /// sweep.
    needs_sweep: AtomicBool,
}

impl PublisherShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PublisherState::Open as u8),
            live: AtomicUsize::new(0),
            terminal_error: Mutex::new(None),
            needs_sweep: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> PublisherState {
        PublisherState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn terminal_error(&self) -> Option<Arc<FlowError>> {
        self.terminal_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn flag_sweep(&self) {
        self.needs_sweep.store(true, Ordering::Release);
    }

    /// Called by every drain loop on exit.
    pub(crate) fn drain_exited(&self) {
        self.flag_sweep();
        let prev = self.live.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            // Last backlog drained: a graceful close can finish now.
            self.transition(PublisherState::Closing, PublisherState::Closed);
        }
    }

    fn set_terminal_error(&self, error: Arc<FlowError>) {
        let mut slot = self
            .terminal_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    fn take_sweep(&self) -> bool {
        self.needs_sweep.swap(false, Ordering::AcqRel)
    }

    fn add_live(&self) {
        self.live.fetch_add(1, Ordering::AcqRel);
    }

    fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn transition(&self, from: PublisherState, to: PublisherState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Broadcasts each submitted item to every active subscriber, decoupling
/// the producer from the slowest consumer through per-subscriber bounded
/// buffers, demand credit, and asynchronous saturation retry.
///
/// # Example
/// ```no_run
/// use flowcast::{BroadcastPublisher, Engine, SubscriberFn};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let engine = Engine::new();
/// let publisher: BroadcastPublisher<u64> = BroadcastPublisher::new(&engine);
///
/// publisher.subscribe(SubscriberFn::arc("printer", |item: u64| {
///     println!("got {item}");
/// }));
///
/// for item in 0..10 {
///     let lag = publisher.submit(item).expect("publisher is open");
///     let _ = lag; // backpressure signal
/// }
/// publisher.close();
/// engine.shutdown().await;
/// # }
/// ```
pub struct BroadcastPublisher<T> {
    engine: Engine,
    config: PublisherConfig,
    shared: Arc<PublisherShared>,
    /// Subscription order is preserved; mutated only at subscribe and
    /// sweep time.
    buffers: RwLock<Vec<Arc<BufferedSubscription<T>>>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> BroadcastPublisher<T> {
    /// Creates a publisher with the default configuration.
    pub fn new(engine: &Engine) -> Self {
        Self::with_config(engine, PublisherConfig::default())
    }

    /// Creates a publisher with the given configuration.
    pub fn with_config(engine: &Engine, config: PublisherConfig) -> Self {
        Self {
            engine: engine.clone(),
            config,
            shared: Arc::new(PublisherShared::new()),
            buffers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a subscriber and returns its pacing handle.
    ///
    /// The subscriber's `on_subscribe` runs on the new drain loop before
    /// any other callback. Nothing is delivered until the subscription's
    /// first `request`. If the publisher is already terminal the
    /// subscriber immediately receives the terminal signal instead and no
    /// buffer is linked.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.engine.is_shutdown() {
            return Subscription::new(Arc::new(SubscriptionShared::terminal(
                id,
                SubscriptionState::Cancelled,
            )));
        }

        let shared_sub = Arc::new(SubscriptionShared::new(id));
        let capacity = self.config.capacity_clamped();
        let (tx, rx) = mpsc::channel(capacity);
        let buffer = Arc::new(BufferedSubscription::new(
            subscriber.name().to_string(),
            capacity,
            tx,
            Arc::clone(&shared_sub),
        ));

        {
            let mut buffers = self.buffers.write().unwrap_or_else(PoisonError::into_inner);
            // Re-checked under the lock so a concurrent close cannot miss
            // this buffer.
            if self.shared.state() != PublisherState::Open {
                drop(buffers);
                return self.subscribe_terminal(subscriber, id);
            }
            buffers.push(Arc::clone(&buffer));
            self.shared.add_live();
        }

        log::debug!(
            "publisher: subscription {} ('{}') linked (capacity {})",
            id,
            buffer.name(),
            capacity
        );
        self.engine.spawn(drain(
            buffer,
            rx,
            subscriber,
            Arc::clone(&self.shared),
            self.engine.shutdown_token(),
        ));
        Subscription::new(shared_sub)
    }

    /// Broadcasts one item to every active subscriber without blocking.
    ///
    /// Returns the maximum buffer lag observed across subscribers — the
    /// producer's backpressure signal. Saturated buffers do not reject the
    /// item: it is deferred to an asynchronous retry task that re-offers
    /// it until accepted, cancelled, or the publisher closes.
    ///
    /// # Errors
    /// [`FlowError::Closed`] once the publisher is closing, closed, or
    /// failed.
    pub fn submit(&self, item: T) -> Result<usize, FlowError> {
        if self.shared.state() != PublisherState::Open {
            return Err(FlowError::Closed);
        }
        let (max_lag, deferred) = self.fan_out(item);
        self.sweep_if_flagged();
        if !deferred.is_empty() {
            log::trace!(
                "publisher: {} saturated buffer(s); scheduling retry task",
                deferred.len()
            );
            retry::schedule(
                &self.engine,
                deferred,
                self.config.retry,
                Arc::clone(&self.shared),
            );
        }
        Ok(max_lag)
    }

    /// Caller-bounded variant of [`BroadcastPublisher::submit`]: retries
    /// saturated buffers inline until the deadline, then drops the item
    /// for subscribers that still have no room.
    ///
    /// Returns `Ok(true)` when every live subscriber accepted the item,
    /// `Ok(false)` when at least one dropped it at the deadline.
    ///
    /// # Errors
    /// [`FlowError::Closed`] when the publisher is not open at the call or
    /// leaves `Open` while retrying.
    pub async fn offer(&self, item: T, timeout: Duration) -> Result<bool, FlowError> {
        if self.shared.state() != PublisherState::Open {
            return Err(FlowError::Closed);
        }
        let deadline = tokio::time::Instant::now() + timeout;
        let (_, mut deferred) = self.fan_out(item);
        self.sweep_if_flagged();

        let mut round: u32 = 0;
        while !deferred.is_empty() {
            if self.shared.state() != PublisherState::Open {
                for entry in &deferred {
                    entry.buffer.abandon_ticket();
                }
                return Err(FlowError::Closed);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                log::warn!(
                    "publisher: offer deadline expired; dropping item for {} subscriber(s)",
                    deferred.len()
                );
                // Tickets must be retired in turn; a background task does
                // the discards so this call can return.
                retry::schedule_abandon(
                    &self.engine,
                    deferred,
                    self.config.retry,
                    Arc::clone(&self.shared),
                );
                return Ok(false);
            }
            let quantum = self.config.retry.quantum(round).min(deadline - now);
            round = round.saturating_add(1);
            tokio::time::sleep(quantum).await;
            deferred = retry_pass(deferred, &self.shared);
        }
        Ok(true)
    }

    /// Ends the stream gracefully: every subscriber receives its remaining
    /// backlog (still credit-gated), then `on_complete`. The publisher
    /// becomes `Closed` when the last backlog has drained. Idempotent.
    pub fn close(&self) {
        if !self.shared.transition(PublisherState::Open, PublisherState::Closing) {
            return;
        }
        let snapshot = self.snapshot();
        for buffer in &snapshot {
            buffer.close();
        }
        log::debug!(
            "publisher: closing, {} subscription(s) draining",
            snapshot.len()
        );
        if self.shared.live() == 0 {
            self.shared
                .transition(PublisherState::Closing, PublisherState::Closed);
        }
    }

    /// Ends the stream exceptionally: residual backlogs are discarded and
    /// every current subscriber receives `on_error` with this error, as
    /// does every later subscriber. Preempts an in-progress graceful
    /// close. Idempotent; the first error wins.
    pub fn close_exceptionally(&self, error: FlowError) {
        self.close_exceptionally_arc(Arc::new(error));
    }

    pub(crate) fn close_exceptionally_arc(&self, error: Arc<FlowError>) {
        self.shared.set_terminal_error(Arc::clone(&error));
        let moved = self
            .shared
            .transition(PublisherState::Open, PublisherState::Errored)
            || self
                .shared
                .transition(PublisherState::Closing, PublisherState::Errored);
        if !moved {
            return;
        }
        let snapshot = self.snapshot();
        for buffer in &snapshot {
            buffer.fail(Arc::clone(&error));
        }
        log::warn!(
            "publisher: failed with '{}', {} subscription(s) signalled",
            error,
            snapshot.len()
        );
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PublisherState {
        self.shared.state()
    }

    /// Number of non-terminal subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|buffer| !buffer.is_terminal())
            .count()
    }

    /// Maximum backlog currently buffered for any subscriber. A snapshot;
    /// useful as a producer-side pressure probe between submissions.
    pub fn max_lag(&self) -> usize {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|buffer| buffer.lag())
            .max()
            .unwrap_or(0)
    }

    /// One fan-out pass: offer the item to every buffer in subscription
    /// order, deferring saturated ones with tickets.
    fn fan_out(&self, item: T) -> (usize, Vec<Deferred<T>>) {
        let snapshot = self.snapshot();
        let mut max_lag = 0usize;
        let mut deferred = Vec::new();
        for buffer in snapshot {
            match buffer.offer(item.clone()) {
                Offer::Accepted { lag } => max_lag = max_lag.max(lag),
                Offer::Saturated(item) => {
                    max_lag = max_lag.max(buffer.capacity());
                    let ticket = buffer.take_ticket();
                    deferred.push(Deferred {
                        buffer,
                        ticket,
                        item,
                    });
                }
                Offer::Closed => self.shared.flag_sweep(),
            }
        }
        (max_lag, deferred)
    }

    fn snapshot(&self) -> Vec<Arc<BufferedSubscription<T>>> {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Unlinks terminal buffers. Runs only when a pass flagged one, and
    /// never during iteration.
    fn sweep_if_flagged(&self) {
        if !self.shared.take_sweep() {
            return;
        }
        let mut buffers = self.buffers.write().unwrap_or_else(PoisonError::into_inner);
        let before = buffers.len();
        buffers.retain(|buffer| !buffer.is_terminal());
        let removed = before - buffers.len();
        if removed > 0 {
            log::trace!("publisher: swept {} terminal subscription(s)", removed);
        }
    }

    /// Late-subscriber path: `on_subscribe` with an already-terminal
    /// handle, then the terminal signal, with no buffer linked.
    fn subscribe_terminal(&self, subscriber: Arc<dyn Subscriber<T>>, id: u64) -> Subscription {
        let (state, error) = match self.shared.state() {
            PublisherState::Errored => (
                SubscriptionState::Errored,
                Some(
                    self.shared
                        .terminal_error()
                        .unwrap_or_else(|| Arc::new(FlowError::Closed)),
                ),
            ),
            _ => (SubscriptionState::Completed, None),
        };
        let shared_sub = Arc::new(SubscriptionShared::terminal(id, state));
        let handle = Subscription::new(Arc::clone(&shared_sub));

        let task_handle = handle.clone();
        self.engine.spawn(async move {
            let name = subscriber.name().to_string();
            invoke(&name, "on_subscribe", subscriber.on_subscribe(task_handle)).await;
            match error {
                Some(error) => {
                    invoke(&name, "on_error", subscriber.on_error(error)).await;
                }
                None => {
                    invoke(&name, "on_complete", subscriber.on_complete()).await;
                }
            }
        });
        log::debug!("publisher: terminal subscribe for subscription {}", id);
        handle
    }
}
