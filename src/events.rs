use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entry::CacheEntry;

/// A change notification emitted by a cache.
#[derive(Debug, Clone)]
pub enum CacheEvent<K, V> {
    /// An explicit invalidation removed this key.
    ///
    /// Fired exactly once per removal, and never for collection-driven
    /// drops.
    Invalidated(K),

    /// A collection (or a clear) dropped these entries.
    ///
    /// Fired at most once per collection, carrying exactly the mapping that
    /// left the cache. An empty drop is not announced.
    Evicted(HashMap<K, CacheEntry<V>>),
}

/// Callback invoked for every [`CacheEvent`] of a subscribed cache.
pub type EventHandler<K, V> = Arc<dyn Fn(&CacheEvent<K, V>) + Send + Sync>;

/// Subscriber list shared by a store and its collector.
pub(crate) struct EventSink<K, V> {
    handlers: RwLock<Vec<EventHandler<K, V>>>,
}

impl<K, V> EventSink<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self, handler: EventHandler<K, V>) {
        self.handlers.write().push(handler);
    }

    /// Delivers `event` to every subscriber.
    ///
    /// Callers must not hold a store mutex here; handlers may re-enter the
    /// cache. A panicking handler is logged and skipped, it can neither
    /// corrupt cache state nor starve later handlers.
    pub(crate) fn emit(&self, event: &CacheEvent<K, V>) {
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| (*handler)(event))).is_err() {
                tracing::warn!("cache event subscriber panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn panicking_subscriber_does_not_starve_the_rest() {
        let sink = EventSink::<u32, u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));

        sink.subscribe(Arc::new(|_| panic!("bad subscriber")));
        let counter = Arc::clone(&seen);
        sink.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sink.emit(&CacheEvent::Invalidated(1));
        sink.emit(&CacheEvent::Invalidated(2));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
