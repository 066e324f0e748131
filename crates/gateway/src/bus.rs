//! In-process publish/subscribe keyed by channel name or correlation token.
//!
//! Dispatch runs against a snapshot of the subscriptions taken when `emit`
//! starts, so callbacks may subscribe, unsubscribe or emit again without
//! affecting the pass in progress.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by every registration, used for explicit removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifetime {
    Durable,
    Once,
    /// Removed once the callback returns `true`.
    Until,
}

type Callback<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

struct Subscription<E> {
    id: SubscriptionId,
    channel: String,
    callback: Callback<E>,
    lifetime: Lifetime,
}

pub struct EventBus<E> {
    subscriptions: Mutex<Vec<Subscription<E>>>,
    next_id: AtomicU64,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, channel: &str, callback: Callback<E>, lifetime: Lifetime) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().push(Subscription {
            id,
            channel: channel.to_string(),
            callback,
            lifetime,
        });
        id
    }

    /// Register a durable subscription.
    pub fn on<F>(&self, channel: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(
            channel,
            Arc::new(move |event| {
                callback(event);
                false
            }),
            Lifetime::Durable,
        )
    }

    /// Register a subscription that is removed after its first invocation.
    pub fn once<F>(&self, channel: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(
            channel,
            Arc::new(move |event| {
                callback(event);
                true
            }),
            Lifetime::Once,
        )
    }

    /// Register a subscription that stays until `callback` returns `true`.
    pub fn on_until<F>(&self, channel: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.register(channel, Arc::new(callback), Lifetime::Until)
    }

    /// Invoke every subscription on `channel` in registration order.
    /// Returns the number of callbacks invoked.
    pub fn emit(&self, channel: &str, event: &E) -> usize {
        let snapshot: Vec<(SubscriptionId, Callback<E>, Lifetime)> = {
            let mut subs = self.subscriptions.lock();
            let matching: Vec<_> = subs
                .iter()
                .filter(|s| s.channel == channel)
                .map(|s| (s.id, s.callback.clone(), s.lifetime))
                .collect();
            // One-shot entries leave the list before they run so that a
            // reentrant emit cannot invoke them a second time.
            subs.retain(|s| !(s.channel == channel && s.lifetime == Lifetime::Once));
            matching
        };

        for (id, callback, lifetime) in &snapshot {
            let done = callback(event);
            if done && *lifetime == Lifetime::Until {
                self.remove(channel, *id);
            }
        }
        snapshot.len()
    }

    pub fn remove(&self, channel: &str, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.lock();
        let before = subs.len();
        subs.retain(|s| !(s.channel == channel && s.id == id));
        subs.len() != before
    }

    pub fn remove_all(&self, channel: &str) -> usize {
        let mut subs = self.subscriptions.lock();
        let before = subs.len();
        subs.retain(|s| s.channel != channel);
        before - subs.len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscriptions
            .lock()
            .iter()
            .filter(|s| s.channel == channel)
            .count()
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
