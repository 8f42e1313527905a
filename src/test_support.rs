//! Shared helpers for the crate's test suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::FlowError;
use crate::flow::{Subscriber, Subscription};

const WAIT_BUDGET: Duration = Duration::from_secs(5);

/// Routes engine logs to the test harness when `RUST_LOG` is set.
pub(crate) fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Terminal signal observed by a [`Recording`] subscriber.
#[derive(Clone, Debug)]
pub(crate) enum TerminalSignal {
    Completed,
    Errored(Arc<FlowError>),
}

/// Subscriber that records everything it observes, for assertions.
pub(crate) struct Recording<T> {
    initial_demand: i64,
    cancel_after: Option<usize>,
    items: Mutex<Vec<T>>,
    terminal: Mutex<Option<TerminalSignal>>,
    subscription: Mutex<Option<Subscription>>,
    on_subscribe_calls: AtomicUsize,
    terminal_calls: AtomicUsize,
    signal: Notify,
}

impl<T: Clone + Send + 'static> Recording<T> {
    fn with_options(initial_demand: i64, cancel_after: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            initial_demand,
            cancel_after,
            items: Mutex::new(Vec::new()),
            terminal: Mutex::new(None),
            subscription: Mutex::new(None),
            on_subscribe_calls: AtomicUsize::new(0),
            terminal_calls: AtomicUsize::new(0),
            signal: Notify::new(),
        })
    }

    /// Requests unbounded credit on subscribe.
    pub(crate) fn unbounded() -> Arc<Self> {
        Self::with_options(i64::MAX, None)
    }

    /// Requests `demand` credit on subscribe (`0` requests nothing).
    pub(crate) fn with_demand(demand: i64) -> Arc<Self> {
        Self::with_options(demand, None)
    }

    /// Unbounded credit, but cancels from inside `on_next` once `count`
    /// items have arrived.
    pub(crate) fn cancelling_after(count: usize) -> Arc<Self> {
        Self::with_options(i64::MAX, Some(count))
    }

    pub(crate) fn items(&self) -> Vec<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn terminal(&self) -> Option<TerminalSignal> {
        self.terminal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn subscription(&self) -> Subscription {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .expect("on_subscribe not delivered yet")
    }

    pub(crate) fn on_subscribe_calls(&self) -> usize {
        self.on_subscribe_calls.load(Ordering::Acquire)
    }

    pub(crate) fn terminal_calls(&self) -> usize {
        self.terminal_calls.load(Ordering::Acquire)
    }

    pub(crate) async fn wait_subscribed(&self) {
        self.wait_until("on_subscribe", |sub| sub.on_subscribe_calls() > 0)
            .await;
    }

    pub(crate) async fn wait_items(&self, count: usize) {
        self.wait_until("items", |sub| sub.items().len() >= count)
            .await;
    }

    pub(crate) async fn wait_terminal(&self) {
        self.wait_until("terminal signal", |sub| sub.terminal().is_some())
            .await;
    }

    async fn wait_until(&self, what: &str, cond: impl Fn(&Self) -> bool) {
        let waited = tokio::time::timeout(WAIT_BUDGET, async {
            loop {
                if cond(self) {
                    return;
                }
                self.signal.notified().await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {what}");
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Subscriber<T> for Recording<T> {
    async fn on_subscribe(&self, subscription: Subscription) {
        {
            let mut slot = self
                .subscription
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *slot = Some(subscription.clone());
        }
        self.on_subscribe_calls.fetch_add(1, Ordering::AcqRel);
        if self.initial_demand != 0 {
            subscription.request(self.initial_demand);
        }
        self.signal.notify_one();
    }

    async fn on_next(&self, item: T) {
        let count = {
            let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
            items.push(item);
            items.len()
        };
        if self.cancel_after == Some(count) {
            self.subscription().cancel();
        }
        self.signal.notify_one();
    }

    async fn on_error(&self, error: Arc<FlowError>) {
        {
            let mut terminal = self.terminal.lock().unwrap_or_else(PoisonError::into_inner);
            *terminal = Some(TerminalSignal::Errored(error));
        }
        self.terminal_calls.fetch_add(1, Ordering::AcqRel);
        self.signal.notify_one();
    }

    async fn on_complete(&self) {
        {
            let mut terminal = self.terminal.lock().unwrap_or_else(PoisonError::into_inner);
            *terminal = Some(TerminalSignal::Completed);
        }
        self.terminal_calls.fetch_add(1, Ordering::AcqRel);
        self.signal.notify_one();
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Polls a condition until it holds, failing the test after a budget.
pub(crate) async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let waited = tokio::time::timeout(WAIT_BUDGET, async {
        loop {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
