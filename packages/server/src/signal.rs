//! Minimal observer primitive used for shutdown and membership notification.
//!
//! A [`Signal`] delivers published values synchronously, in subscription
//! order, to every live subscriber. There is no history: a subscriber only
//! sees values published after it subscribed.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned by [`Signal::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

/// Synchronous publish/subscribe channel.
///
/// Delivery guarantees:
/// - subscribers are invoked in subscription order;
/// - a subscriber is never invoked after `unsubscribe` for it has returned;
/// - handlers registered during a publish are not invoked for that publish.
///
/// The subscriber list is snapshotted before delivery and each entry's
/// liveness is re-checked per call, so handlers may subscribe or
/// unsubscribe from within a callback without deadlocking.
pub struct Signal<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Signal<T> {
    /// Creates a signal with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                handlers: Vec::new(),
            }),
        }
    }

    /// Registers a handler, returning the id needed to unsubscribe it.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.push((id, Arc::new(handler)));
        SubscriptionId(id)
    }

    /// Removes a subscription. Returns `false` if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.handlers.len();
        inner.handlers.retain(|(handler_id, _)| *handler_id != id.0);
        inner.handlers.len() != before
    }

    /// Invokes every live subscriber with `value`, in subscription order.
    pub fn publish(&self, value: &T) {
        let snapshot: Vec<(u64, Handler<T>)> = self.inner.lock().handlers.clone();
        for (id, handler) in snapshot {
            // Re-check liveness so a handler unsubscribed mid-publish
            // (possibly by an earlier handler) is skipped.
            let live = self
                .inner
                .lock()
                .handlers
                .iter()
                .any(|(handler_id, _)| *handler_id == id);
            if live {
                handler(value);
            }
        }
    }

    /// Number of currently registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
