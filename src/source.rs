use std::sync::Arc;

use futures::future::{self, BoxFuture};

use crate::entry::CacheEntry;
use crate::error::CacheResult;

/// Callback a source invokes to push an invalidation into subscribed caches.
pub type InvalidationHandler<K> = Arc<dyn Fn(&K) + Send + Sync>;

/// The backing source a read-through cache loads from on a miss.
///
/// Implementations must be thread-safe: one source is shared across all
/// partitions and all in-flight loads. Batch outputs must be aligned to the
/// input — same length, same order, [`CacheEntry::Absent`] for keys the
/// source knows nothing about. Failures are reported as `Err` and are never
/// cached.
pub trait DataSource<K, V: Send>: Send + Sync {
    /// Looks up a single key.
    fn get(&self, key: &K) -> CacheResult<CacheEntry<V>>;

    /// Looks up a batch of keys.
    ///
    /// Defaults to key-by-key [`get`](Self::get), failing the whole batch at
    /// the first error. Sources with a cheaper bulk path should override.
    fn get_batch(&self, keys: &[K]) -> CacheResult<Vec<CacheEntry<V>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Asynchronous [`get`](Self::get).
    ///
    /// Defaults to wrapping the synchronous lookup; sources with a real
    /// async backend should override.
    fn get_async<'a>(&'a self, key: &'a K) -> BoxFuture<'a, CacheResult<CacheEntry<V>>>
    where
        V: 'a,
    {
        Box::pin(future::ready(self.get(key)))
    }

    /// Asynchronous [`get_batch`](Self::get_batch).
    fn get_batch_async<'a>(&'a self, keys: &'a [K]) -> BoxFuture<'a, CacheResult<Vec<CacheEntry<V>>>>
    where
        V: 'a,
    {
        Box::pin(future::ready(self.get_batch(keys)))
    }

    /// Registers a callback for source-driven invalidations.
    ///
    /// Sources that cannot signal invalidations keep the default no-op.
    fn subscribe_invalidations(&self, _handler: InvalidationHandler<K>) {}
}
