//! # Subscription: the consumer-side handle for one stream.
//!
//! A [`Subscription`] binds one subscriber to one producer-side buffer. The
//! subscriber owns the logical right to pace and end the stream through it;
//! the publisher owns the buffer memory. The handle carries two pieces of
//! shared state:
//!
//! - **demand credit** — how many items the subscriber has authorized
//!   itself to receive; incremented by [`Subscription::request`],
//!   decremented by the drain loop on delivery, saturating at `i64::MAX`
//!   ("unbounded");
//! - **state** — the lifecycle machine below.
//!
//! ## Lifecycle
//! ```text
//! Pending ──request(n>0)──► Active ──┬─► Cancelled   (cancel / invalid demand)
//!                                    ├─► Completed   (publisher closed, backlog drained)
//!                                    └─► Errored     (publisher failed)
//! ```
//!
//! ## Rules
//! - `request(n)` with `n <= 0` is a contract violation: the subscription
//!   moves to `Cancelled` and its subscriber (alone) receives
//!   [`FlowError::InvalidDemand`] as a terminal signal.
//! - All mutation is atomic; `request` and `cancel` are safe from any
//!   thread and reentrant from within a delivery callback.
//! - `cancel()` takes effect asynchronously: an item the drain loop has
//!   already dequeued may still be delivered; nothing after it will be.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;

use crate::error::FlowError;

/// Lifecycle state of a [`Subscription`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriptionState {
    /// Created, no demand requested yet; nothing is delivered.
    Pending = 0,
    /// At least one successful `request`; delivery permitted.
    Active = 1,
    /// Cancelled by the consumer (or by an invalid demand request).
    Cancelled = 2,
    /// Publisher closed and the backlog was fully delivered.
    Completed = 3,
    /// Publisher failed; the terminal error was (or will be) delivered.
    Errored = 4,
}

impl SubscriptionState {
    /// True for `Cancelled`, `Completed`, and `Errored`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionState::Cancelled | SubscriptionState::Completed | SubscriptionState::Errored
        )
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SubscriptionState::Pending,
            1 => SubscriptionState::Active,
            2 => SubscriptionState::Cancelled,
            3 => SubscriptionState::Completed,
            _ => SubscriptionState::Errored,
        }
    }
}

/// State shared between the consumer handle, the producer-side buffer, and
/// the drain loop.
#[derive(Debug)]
pub(crate) struct SubscriptionShared {
    id: u64,
    state: AtomicU8,
    demand: AtomicI64,
    /// Wakes the drain loop when credit, state, or backlog may have changed.
    wakeup: Notify,
    /// Terminal error for this subscription, delivered once by the drain
    /// loop. Publisher-wide errors and local invalid-demand both land here.
    terminal_error: Mutex<Option<Arc<FlowError>>>,
}

impl SubscriptionShared {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(SubscriptionState::Pending as u8),
            demand: AtomicI64::new(0),
            wakeup: Notify::new(),
            terminal_error: Mutex::new(None),
        }
    }

    /// A handle that is already terminal; used when subscribing to a
    /// publisher that has closed or failed (no buffer is linked).
    pub(crate) fn terminal(id: u64, state: SubscriptionState) -> Self {
        let shared = Self::new(id);
        shared.state.store(state as u8, Ordering::Release);
        shared
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn demand(&self) -> i64 {
        self.demand.load(Ordering::Acquire)
    }

    /// Adds `n` demand credit (saturating) and activates a pending
    /// subscription. Non-positive `n` cancels with `InvalidDemand`.
    pub(crate) fn request(&self, n: i64) {
        if self.state().is_terminal() {
            return;
        }
        if n <= 0 {
            log::warn!("subscription {}: invalid demand request({})", self.id, n);
            self.set_terminal_error(Arc::new(FlowError::InvalidDemand { requested: n }));
            self.transition_live(SubscriptionState::Cancelled);
            self.wakeup.notify_one();
            return;
        }

        let _ = self
            .demand
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_add(n))
            });
        let _ = self.state.compare_exchange(
            SubscriptionState::Pending as u8,
            SubscriptionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.wakeup.notify_one();
    }

    /// Consumes one unit of credit. Unbounded credit (`i64::MAX`) is never
    /// decremented. Returns false when no credit is available.
    pub(crate) fn try_consume_credit(&self) -> bool {
        self.demand
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                if cur <= 0 {
                    None
                } else if cur == i64::MAX {
                    Some(cur)
                } else {
                    Some(cur - 1)
                }
            })
            .is_ok()
    }

    /// Idempotent transition to `Cancelled`.
    pub(crate) fn cancel(&self) {
        self.transition_live(SubscriptionState::Cancelled);
        self.wakeup.notify_one();
    }

    /// Publisher-driven failure: records the shared error and moves to
    /// `Errored`.
    pub(crate) fn fail(&self, error: Arc<FlowError>) {
        self.set_terminal_error(error);
        self.transition_live(SubscriptionState::Errored);
        self.wakeup.notify_one();
    }

    /// Transition to `Completed`; returns true if this call made the
    /// transition (exactly-once terminal delivery relies on it).
    pub(crate) fn complete(&self) -> bool {
        self.transition_live(SubscriptionState::Completed)
    }

    pub(crate) fn wake(&self) {
        self.wakeup.notify_one();
    }

    pub(crate) async fn notified(&self) {
        self.wakeup.notified().await;
    }

    pub(crate) fn take_terminal_error(&self) -> Option<Arc<FlowError>> {
        self.terminal_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
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

    fn transition_live(&self, to: SubscriptionState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                match SubscriptionState::from_u8(cur) {
                    SubscriptionState::Pending | SubscriptionState::Active => Some(to as u8),
                    _ => None,
                }
            })
            .is_ok()
    }
}

/// Consumer-facing handle binding one subscriber to one publisher buffer.
///
/// Cheap to clone; all clones drive the same subscription.
///
/// # Example
/// ```no_run
/// # use flowcast::{BroadcastPublisher, Engine, SubscriberFn};
/// # let engine = Engine::new();
/// # let publisher: BroadcastPublisher<u32> = BroadcastPublisher::new(&engine);
/// let subscription = publisher.subscribe(SubscriberFn::arc("printer", |item: u32| {
///     println!("got {item}");
/// }));
/// subscription.request(10);
/// // later:
/// subscription.cancel();
/// ```
#[derive(Clone, Debug)]
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
}

impl Subscription {
    pub(crate) fn new(shared: Arc<SubscriptionShared>) -> Self {
        Self { shared }
    }

    /// Authorizes `n` more deliveries (saturating at unbounded).
    ///
    /// `n <= 0` cancels this subscription and delivers
    /// [`FlowError::InvalidDemand`] to its subscriber; other subscriptions
    /// are unaffected. Safe to call from any thread and from within
    /// `on_next`.
    pub fn request(&self, n: i64) {
        self.shared.request(n);
    }

    /// Requests unbounded credit: every item is delivered as soon as the
    /// drain loop reaches it.
    pub fn request_unbounded(&self) {
        self.shared.request(i64::MAX);
    }

    /// Stops the stream for this subscriber. Idempotent; takes effect
    /// asynchronously (see module docs).
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Identifier of this subscription, unique within its publisher.
    pub fn id(&self) -> u64 {
        self.shared.id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    /// Currently outstanding demand credit.
    pub fn demand(&self) -> i64 {
        self.shared.demand()
    }
}
