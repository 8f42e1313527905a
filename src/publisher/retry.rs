//! # Saturation retry task.
//!
//! A fan-out pass that meets saturated buffers defers those items into a
//! transient retry list — `(buffer, ticket, item)` entries in submission
//! order, privately owned by that pass. One retry task per non-empty list
//! is scheduled on the engine, off the producer's calling thread, so a slow
//! subscriber never blocks submission or other subscribers' delivery.
//!
//! Each scheduling quantum the task re-offers every entry in FIFO order;
//! still-saturated entries roll over to a fresh list for the next quantum
//! (no spinning). Tickets keep deferred items ahead of fresh offers, so
//! per-subscriber delivery order survives saturation. The task ends when
//! every entry is accepted, its subscription goes terminal, the publisher
//! leaves `Open`, or the engine shuts down.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::policies::RetryPolicy;
use crate::publisher::broadcast::{PublisherShared, PublisherState};
use crate::publisher::buffer::{BufferedSubscription, Offer};

/// One deferred delivery: an item that could not be enqueued plus its
/// place in the buffer's retry order.
pub(crate) struct Deferred<T> {
    pub(crate) buffer: Arc<BufferedSubscription<T>>,
    pub(crate) ticket: u64,
    pub(crate) item: T,
}

/// Schedules the asynchronous retry task for one fan-out pass.
pub(crate) fn schedule<T: Send + 'static>(
    engine: &Engine,
    deferred: Vec<Deferred<T>>,
    policy: RetryPolicy,
    publisher: Arc<PublisherShared>,
) {
    let token = engine.shutdown_token();
    engine.spawn(run(deferred, policy, publisher, token));
}

async fn run<T: Send + 'static>(
    mut list: Vec<Deferred<T>>,
    policy: RetryPolicy,
    publisher: Arc<PublisherShared>,
    shutdown: CancellationToken,
) {
    let mut round: u32 = 0;
    while !list.is_empty() {
        if publisher.state() != PublisherState::Open {
            abandon(list);
            return;
        }

        let quantum = policy.quantum(round);
        round = round.saturating_add(1);
        tokio::select! {
            _ = tokio::time::sleep(quantum) => {}
            _ = shutdown.cancelled() => {
                abandon(list);
                return;
            }
        }

        list = retry_pass(list, &publisher);
    }
    log::trace!("retry task: all deferred items delivered after {} round(s)", round);
}

/// Schedules turn-ordered discards for items dropped at an `offer`
/// deadline.
///
/// The items will never be delivered, but their tickets must still be
/// retired in FIFO order — retiring out of turn would let the ticket head
/// skip a deferred item another retry task is still holding.
pub(crate) fn schedule_abandon<T: Send + 'static>(
    engine: &Engine,
    deferred: Vec<Deferred<T>>,
    policy: RetryPolicy,
    publisher: Arc<PublisherShared>,
) {
    let token = engine.shutdown_token();
    engine.spawn(run_abandon(deferred, policy, publisher, token));
}

async fn run_abandon<T: Send + 'static>(
    mut list: Vec<Deferred<T>>,
    policy: RetryPolicy,
    publisher: Arc<PublisherShared>,
    shutdown: CancellationToken,
) {
    let mut round: u32 = 0;
    while !list.is_empty() {
        // Once the publisher is terminal no further offer can reach these
        // buffers, so blind retirement is safe.
        if publisher.state() != PublisherState::Open {
            abandon(list);
            return;
        }
        let mut next = Vec::with_capacity(list.len());
        for entry in list {
            if entry.buffer.is_terminal() || entry.buffer.ticket_turn(entry.ticket) {
                entry.buffer.abandon_ticket();
            } else {
                next.push(entry);
            }
        }
        list = next;
        if list.is_empty() {
            return;
        }

        let quantum = policy.quantum(round);
        round = round.saturating_add(1);
        tokio::select! {
            _ = tokio::time::sleep(quantum) => {}
            _ = shutdown.cancelled() => {
                abandon(list);
                return;
            }
        }
    }
}

/// Re-offers every entry once, in list order. Returns the entries that are
/// still saturated, preserving order.
pub(crate) fn retry_pass<T: Send + 'static>(
    list: Vec<Deferred<T>>,
    publisher: &PublisherShared,
) -> Vec<Deferred<T>> {
    let mut next = Vec::with_capacity(list.len());
    for entry in list {
        let Deferred {
            buffer,
            ticket,
            item,
        } = entry;
        match buffer.offer_deferred(ticket, item) {
            Offer::Accepted { .. } => {}
            Offer::Saturated(item) => next.push(Deferred {
                buffer,
                ticket,
                item,
            }),
            Offer::Closed => publisher.flag_sweep(),
        }
    }
    next
}

/// Drops the remaining entries, retiring their tickets so the buffers do
/// not report deferred work forever.
fn abandon<T: Send + 'static>(list: Vec<Deferred<T>>) {
    if !list.is_empty() {
        log::trace!("retry task: dropping {} deferred item(s)", list.len());
    }
    for entry in &list {
        entry.buffer.abandon_ticket();
    }
}
