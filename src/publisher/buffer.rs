//! # BufferedSubscription: one subscriber's bounded queue and drain loop.
//!
//! Each subscriber owns a bounded item queue on the producer side. The
//! publisher's fan-out pass feeds the queue through [`BufferedSubscription::offer`];
//! a dedicated drain loop empties it, gated by the subscription's demand
//! credit.
//!
//! ## Diagram
//! ```text
//!   fan-out pass                       drain loop (one task per buffer)
//!   offer(item) ──► [bounded queue] ──► credit gate ──► on_next(item)
//!        │                                  ▲
//!        └─ Saturated ─► retry ticket       └─ request(n) / cancel()
//! ```
//!
//! ## Rules
//! - `offer` never blocks. The atomic `lag` counter is authoritative for
//!   saturation (`lag == capacity`); the channel is only the transport.
//! - One drain loop per buffer: the subscriber's callbacks are never
//!   invoked concurrently with themselves, and per-subscriber delivery
//!   order equals submission order.
//! - Terminal state is checked before every delivery; an error discards
//!   the remaining backlog, a close drains it first.
//! - Deferred items (saturation) hold **tickets**: a buffer with undrained
//!   tickets reports `Saturated` to fresh offers, so retried items keep
//!   their place in the per-subscriber order.
//! - A panic in a subscriber callback is caught, logged, and treated as
//!   `cancel()` for that subscriber only.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FlowError;
use crate::flow::{Subscriber, Subscription, SubscriptionShared, SubscriptionState};
use crate::publisher::broadcast::PublisherShared;

/// Outcome of offering one item to one buffer.
pub(crate) enum Offer<T> {
    /// Item enqueued; `lag` is the backlog size including it.
    Accepted {
        lag: usize,
    },
    /// Buffer full (or items queued before this one are still deferred);
    /// the item is handed back for the retry list.
    Saturated(T),
    /// Buffer is terminal; the item was dropped and the caller should flag
    /// the buffer for removal.
    Closed,
}

/// Producer-side record for one subscription: bounded queue, lag counter,
/// and retry-ticket accounting.
pub(crate) struct BufferedSubscription<T> {
    name: String,
    capacity: usize,
    /// Items accepted but not yet delivered. Never exceeds `capacity`.
    lag: AtomicUsize,
    /// Next retry ticket to be served / to be issued. Equal when no item
    /// is deferred.
    retry_head: AtomicU64,
    retry_tail: AtomicU64,
    /// Taken (set to `None`) on close/fail so the drain loop observes end
    /// of stream after the backlog.
    tx: Mutex<Option<mpsc::Sender<T>>>,
    shared: Arc<SubscriptionShared>,
}

impl<T: Send + 'static> BufferedSubscription<T> {
    pub(crate) fn new(
        name: String,
        capacity: usize,
        tx: mpsc::Sender<T>,
        shared: Arc<SubscriptionShared>,
    ) -> Self {
        Self {
            name,
            capacity,
            lag: AtomicUsize::new(0),
            retry_head: AtomicU64::new(0),
            retry_tail: AtomicU64::new(0),
            tx: Mutex::new(Some(tx)),
            shared,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.shared.id()
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn lag(&self) -> usize {
        self.lag.load(Ordering::Acquire)
    }

    pub(crate) fn shared(&self) -> &Arc<SubscriptionShared> {
        &self.shared
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.shared.state().is_terminal()
    }

    /// Offers a fresh item (fan-out path).
    ///
    /// A buffer with deferred items reports `Saturated` even when a slot
    /// is free: the deferred items were submitted earlier and must be
    /// delivered first.
    pub(crate) fn offer(&self, item: T) -> Offer<T> {
        if self.is_terminal() {
            return Offer::Closed;
        }
        if self.retry_tail.load(Ordering::Acquire) != self.retry_head.load(Ordering::Acquire) {
            return Offer::Saturated(item);
        }
        self.raw_offer(item)
    }

    /// Issues a ticket for a deferred item. Tickets are served in FIFO
    /// order by [`BufferedSubscription::offer_deferred`].
    pub(crate) fn take_ticket(&self) -> u64 {
        self.retry_tail.fetch_add(1, Ordering::AcqRel)
    }

    /// Re-offers a deferred item holding `ticket`.
    pub(crate) fn offer_deferred(&self, ticket: u64, item: T) -> Offer<T> {
        if self.is_terminal() {
            self.retire_ticket();
            return Offer::Closed;
        }
        if self.retry_head.load(Ordering::Acquire) != ticket {
            return Offer::Saturated(item);
        }
        match self.raw_offer(item) {
            Offer::Accepted { lag } => {
                self.retire_ticket();
                Offer::Accepted { lag }
            }
            Offer::Saturated(item) => Offer::Saturated(item),
            Offer::Closed => {
                self.retire_ticket();
                Offer::Closed
            }
        }
    }

    /// True when `ticket` is the next deferred delivery for this buffer.
    pub(crate) fn ticket_turn(&self, ticket: u64) -> bool {
        self.retry_head.load(Ordering::Acquire) == ticket
    }

    /// Drops a deferred item's ticket without delivering it. Only safe
    /// when the ticket's turn has come or no further offers can reach this
    /// buffer; otherwise the head would skip a ticket another retry task
    /// still holds.
    pub(crate) fn abandon_ticket(&self) {
        self.retire_ticket();
    }

    /// Closes the queue: the drain loop completes the subscriber after the
    /// remaining backlog.
    pub(crate) fn close(&self) {
        self.take_sender();
        self.shared.wake();
    }

    /// Fails the subscription: the backlog is discarded and the drain loop
    /// delivers the error.
    pub(crate) fn fail(&self, error: Arc<FlowError>) {
        self.shared.fail(error);
        self.take_sender();
    }

    fn retire_ticket(&self) {
        self.retry_head.fetch_add(1, Ordering::AcqRel);
    }

    fn take_sender(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Lag-gated enqueue. The lag reservation bounds the backlog, so the
    /// channel itself never rejects a reserved item.
    fn raw_offer(&self, item: T) -> Offer<T> {
        let reserved = self
            .lag
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |lag| {
                if lag >= self.capacity {
                    None
                } else {
                    Some(lag + 1)
                }
            });
        let prev = match reserved {
            Ok(prev) => prev,
            Err(_) => return Offer::Saturated(item),
        };

        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            drop(guard);
            self.lag.fetch_sub(1, Ordering::AcqRel);
            return Offer::Closed;
        };
        match tx.try_send(item) {
            Ok(()) => Offer::Accepted { lag: prev + 1 },
            Err(mpsc::error::TrySendError::Full(item)) => {
                self.lag.fetch_sub(1, Ordering::AcqRel);
                Offer::Saturated(item)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.lag.fetch_sub(1, Ordering::AcqRel);
                Offer::Closed
            }
        }
    }

    fn dec_lag(&self) {
        self.lag.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The per-subscriber drain loop.
///
/// Delivers `on_subscribe`, then items one at a time while credit is
/// available, then exactly one terminal signal. Parks on the subscription's
/// wakeup handle when the queue is empty or credit is exhausted.
pub(crate) async fn drain<T: Send + 'static>(
    buffer: Arc<BufferedSubscription<T>>,
    mut rx: mpsc::Receiver<T>,
    subscriber: Arc<dyn Subscriber<T>>,
    publisher: Arc<PublisherShared>,
    shutdown: CancellationToken,
) {
    let shared = Arc::clone(buffer.shared());
    let handle = Subscription::new(Arc::clone(&shared));
    if !invoke(buffer.name(), "on_subscribe", subscriber.on_subscribe(handle)).await {
        shared.cancel();
    }

    let mut parked: Option<T> = None;
    loop {
        let state = shared.state();
        if state.is_terminal() {
            deliver_terminal(subscriber.as_ref(), &buffer, &publisher, state).await;
            break;
        }

        if parked.is_none() {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    shared.cancel();
                    break;
                }
                _ = shared.notified() => continue,
                received = rx.recv() => match received {
                    Some(item) => parked = Some(item),
                    None => {
                        // Queue closed and backlog drained: graceful end.
                        if shared.complete() {
                            invoke(buffer.name(), "on_complete", subscriber.on_complete()).await;
                        } else {
                            let state = shared.state();
                            deliver_terminal(subscriber.as_ref(), &buffer, &publisher, state)
                                .await;
                        }
                        break;
                    }
                }
            }
        }

        let Some(item) = parked.take() else {
            continue;
        };
        if !shared.try_consume_credit() {
            parked = Some(item);
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    shared.cancel();
                    break;
                }
                _ = shared.notified() => {}
            }
            continue;
        }
        // Cancellation or failure may have won between the credit grant
        // and this delivery; the terminal branch above handles it.
        if shared.state().is_terminal() {
            continue;
        }
        buffer.dec_lag();
        if !invoke(buffer.name(), "on_next", subscriber.on_next(item)).await {
            shared.cancel();
        }
    }

    publisher.drain_exited();
    log::debug!(
        "subscription {} ('{}') drain loop exited: {:?}",
        buffer.id(),
        buffer.name(),
        shared.state()
    );
}

/// Delivers the terminal signal matching an observed terminal state.
///
/// `Completed` is handled at the transition site (the `rx.recv() == None`
/// arm); `Cancelled` only signals when a local error (invalid demand) was
/// recorded.
async fn deliver_terminal<T: Send + 'static>(
    subscriber: &dyn Subscriber<T>,
    buffer: &BufferedSubscription<T>,
    publisher: &PublisherShared,
    state: SubscriptionState,
) {
    match state {
        SubscriptionState::Cancelled => {
            if let Some(error) = buffer.shared().take_terminal_error() {
                invoke(buffer.name(), "on_error", subscriber.on_error(error)).await;
            }
        }
        SubscriptionState::Errored => {
            let error = buffer
                .shared()
                .take_terminal_error()
                .or_else(|| publisher.terminal_error())
                .unwrap_or_else(|| Arc::new(FlowError::Closed));
            invoke(buffer.name(), "on_error", subscriber.on_error(error)).await;
        }
        SubscriptionState::Completed
        | SubscriptionState::Pending
        | SubscriptionState::Active => {}
    }
}

/// Runs one subscriber callback, isolating panics.
///
/// Returns false when the callback panicked; the caller cancels the
/// subscription in response.
pub(crate) async fn invoke<F>(name: &str, callback: &str, fut: F) -> bool
where
    F: Future<Output = ()>,
{
    match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        Ok(()) => true,
        Err(panic) => {
            log::warn!("subscriber '{}' panicked in {}: {:?}", name, callback, panic);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_of(capacity: usize) -> (BufferedSubscription<u32>, mpsc::Receiver<u32>) {
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(SubscriptionShared::new(7));
        (
            BufferedSubscription::new("test".into(), capacity, tx, shared),
            rx,
        )
    }

    #[test]
    fn test_offer_tracks_lag_until_capacity() {
        let (buffer, _rx) = buffer_of(2);

        assert!(matches!(buffer.offer(1), Offer::Accepted { lag: 1 }));
        assert!(matches!(buffer.offer(2), Offer::Accepted { lag: 2 }));
        assert!(matches!(buffer.offer(3), Offer::Saturated(3)));
        assert_eq!(buffer.lag(), 2);
    }

    #[test]
    fn test_offer_after_close_reports_closed() {
        let (buffer, _rx) = buffer_of(2);
        buffer.close();
        assert!(matches!(buffer.offer(1), Offer::Closed));
        assert_eq!(buffer.lag(), 0);
    }

    #[test]
    fn test_offer_after_fail_reports_closed() {
        let (buffer, _rx) = buffer_of(2);
        buffer.fail(Arc::new(FlowError::upstream("boom")));
        assert!(matches!(buffer.offer(1), Offer::Closed));
    }

    #[test]
    fn test_deferred_items_block_fresh_offers() {
        let (buffer, mut rx) = buffer_of(1);

        assert!(matches!(buffer.offer(1), Offer::Accepted { .. }));
        let ticket = match buffer.offer(2) {
            Offer::Saturated(item) => {
                let t = buffer.take_ticket();
                (t, item)
            }
            _ => panic!("expected saturation"),
        };

        // A slot frees up, but item 3 must stay behind deferred item 2.
        assert_eq!(rx.try_recv().ok(), Some(1));
        buffer.dec_lag();
        assert!(matches!(buffer.offer(3), Offer::Saturated(3)));

        // The deferred item takes the freed slot, then fresh offers flow.
        assert!(matches!(
            buffer.offer_deferred(ticket.0, ticket.1),
            Offer::Accepted { lag: 1 }
        ));
        assert_eq!(rx.try_recv().ok(), Some(2));
        buffer.dec_lag();
        assert!(matches!(buffer.offer(3), Offer::Accepted { lag: 1 }));
    }

    #[test]
    fn test_tickets_serve_in_fifo_order() {
        let (buffer, mut rx) = buffer_of(1);

        assert!(matches!(buffer.offer(1), Offer::Accepted { .. }));
        let t1 = buffer.take_ticket();
        let t2 = buffer.take_ticket();

        // Second ticket is not eligible while the first is pending.
        assert!(matches!(buffer.offer_deferred(t2, 30), Offer::Saturated(30)));

        assert_eq!(rx.try_recv().ok(), Some(1));
        buffer.dec_lag();
        assert!(matches!(buffer.offer_deferred(t1, 20), Offer::Accepted { .. }));

        assert_eq!(rx.try_recv().ok(), Some(20));
        buffer.dec_lag();
        assert!(matches!(buffer.offer_deferred(t2, 30), Offer::Accepted { .. }));
    }

    #[test]
    fn test_abandoned_ticket_unblocks_successors() {
        let (buffer, mut rx) = buffer_of(1);

        assert!(matches!(buffer.offer(1), Offer::Accepted { .. }));
        let _t1 = buffer.take_ticket();
        let t2 = buffer.take_ticket();

        buffer.abandon_ticket();
        assert_eq!(rx.try_recv().ok(), Some(1));
        buffer.dec_lag();
        assert!(matches!(buffer.offer_deferred(t2, 30), Offer::Accepted { .. }));
    }
}
