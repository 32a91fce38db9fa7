//! Explicit publish/subscribe channel for store state.
//!
//! Subscribers are plain callbacks. They are invoked outside the internal
//! lock, so a subscriber may subscribe or unsubscribe from inside a
//! notification.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Callback<S> = Arc<dyn Fn(&S) + Send + Sync>;

/// Handle returned by [`Publisher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscribers<S> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Callback<S>)>,
}

/// Fans published values out to registered callbacks.
pub struct Publisher<S> {
    subscribers: Mutex<Subscribers<S>>,
}

impl<S> Publisher<S> {
    /// Creates a publisher with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Subscribers {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers<S>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a callback invoked on every publish.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let mut subs = self.lock();
        let id = SubscriptionId(subs.next_id);
        subs.next_id += 1;
        subs.entries.push((id, Arc::new(callback)));
        id
    }

    /// Removes a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.lock();
        let before = subs.entries.len();
        subs.entries.retain(|(sid, _)| *sid != id);
        subs.entries.len() != before
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Delivers `state` to every subscriber in registration order.
    pub fn publish(&self, state: &S) {
        let callbacks: Vec<Callback<S>> =
            self.lock().entries.iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(state);
        }
    }
}

impl<S> Default for Publisher<S> {
    fn default() -> Self {
        Self::new()
    }
}
