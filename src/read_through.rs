use std::hash::Hash;
use std::sync::{Arc, Weak};

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::events::EventHandler;
use crate::single_flight::SingleFlight;
use crate::source::DataSource;
use crate::store::{GenerationalStore, GenerationState};

/// Read-through cache over a [`DataSource`], memoizing both presence and
/// absence.
///
/// A miss loads from the source — routed through [`SingleFlight`] so
/// concurrent misses for one key share a single source call — and stores
/// the outcome in the young generation, whether the source found a value or
/// not. A source *failure* is different: it propagates to the caller and
/// caches nothing.
///
/// The load never runs under the store lock. The probe snapshots the store
/// version before releasing it; on reacquisition, a changed version plus a
/// now-cached key means another thread won the race, and its entry is
/// adopted instead of overwritten.
pub struct ReadThroughGenerational<K, V, S> {
    store: GenerationalStore<K, V>,
    flight: SingleFlight<K, V, S>,
}

impl<K, V, S> ReadThroughGenerational<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: DataSource<K, V> + 'static,
{
    /// Creates the cache and subscribes it to the source's invalidation
    /// signal. Fails on an invalid configuration.
    pub fn new(config: CacheConfig, source: Arc<S>) -> CacheResult<Arc<Self>> {
        let store = GenerationalStore::new(config)?;
        let cache = Arc::new(Self {
            store,
            flight: SingleFlight::new(Arc::clone(&source)),
        });
        let weak: Weak<Self> = Arc::downgrade(&cache);
        source.subscribe_invalidations(Arc::new(move |key: &K| {
            if let Some(cache) = weak.upgrade() {
                cache.invalidate(key);
            }
        }));
        Ok(cache)
    }

    /// Looks up `key`, loading it from the source on a miss.
    ///
    /// `Ok(None)` means the source has no value for this key — memoized, so
    /// repeating the call within the entry's lifetime does not touch the
    /// source again.
    pub fn get(&self, key: &K) -> CacheResult<Option<V>> {
        let (hit, snapshot) = self.store.get_versioned(key);
        if let Some(entry) = hit {
            return Ok(entry.into_option());
        }
        // The store lock is released here; the load happens outside every
        // cache critical section.
        let loaded = self.flight.get(key)?;
        Ok(self.store.resolve_load(key, loaded, snapshot).into_option())
    }

    /// Asynchronous [`get`](Self::get): the same probe and reconcile
    /// phases, with the load awaited instead of blocked on.
    pub async fn get_async(&self, key: &K) -> CacheResult<Option<V>> {
        let (hit, snapshot) = self.store.get_versioned(key);
        if let Some(entry) = hit {
            return Ok(entry.into_option());
        }
        let loaded = self.flight.get_async(key).await?;
        Ok(self.store.resolve_load(key, loaded, snapshot).into_option())
    }

    /// [`get`](Self::get), substituting `V::default()` for absence.
    pub fn get_or_default(&self, key: &K) -> CacheResult<V>
    where
        V: Default,
    {
        Ok(self.get(key)?.unwrap_or_default())
    }

    /// [`get_async`](Self::get_async), substituting `V::default()` for
    /// absence.
    pub async fn get_or_default_async(&self, key: &K) -> CacheResult<V>
    where
        V: Default,
    {
        Ok(self.get_async(key).await?.unwrap_or_default())
    }

    /// Looks up a batch of keys.
    ///
    /// The output is aligned to `keys` — same length, same order. A slot is
    /// `None` when the key loaded as absent or its load failed; only
    /// present results are written back to the cache. The call errors only
    /// when the batch load failed as a whole.
    pub fn get_batch(&self, keys: &[K]) -> CacheResult<Vec<Option<V>>> {
        let (cached, missed, snapshot) = self.store.get_many_versioned(keys);
        if missed.is_empty() {
            return Ok(flatten_hits(cached));
        }
        let missed_keys: Vec<K> = missed.iter().map(|(_, key)| key.clone()).collect();
        let loaded = self.flight.get_batch(&missed_keys);
        self.reconcile_batch(cached, missed, loaded, snapshot)
    }

    /// Asynchronous [`get_batch`](Self::get_batch).
    pub async fn get_batch_async(&self, keys: &[K]) -> CacheResult<Vec<Option<V>>> {
        let (cached, missed, snapshot) = self.store.get_many_versioned(keys);
        if missed.is_empty() {
            return Ok(flatten_hits(cached));
        }
        let missed_keys: Vec<K> = missed.iter().map(|(_, key)| key.clone()).collect();
        let loaded = self.flight.get_batch_async(&missed_keys).await;
        self.reconcile_batch(cached, missed, loaded, snapshot)
    }

    /// Phase three of a batch lookup: adopt-or-insert each present load
    /// under one store lock acquisition and scatter the winners back into
    /// the output slots.
    fn reconcile_batch(
        &self,
        cached: Vec<Option<CacheEntry<V>>>,
        missed: Vec<(usize, K)>,
        loaded: Vec<CacheResult<CacheEntry<V>>>,
        snapshot: u64,
    ) -> CacheResult<Vec<Option<V>>> {
        // Every slot failing means the batch load itself failed; that error
        // belongs to the caller. Partial failures degrade to `None` below.
        if loaded.iter().all(Result::is_err) {
            if let Some(Err(error)) = loaded.first() {
                return Err(error.clone());
            }
        }

        let mut results = flatten_hits(cached);
        let mut insert_slots = Vec::new();
        let mut items = Vec::new();
        for ((index, key), result) in missed.into_iter().zip(loaded) {
            if let Ok(entry @ CacheEntry::Present(_)) = result {
                insert_slots.push(index);
                items.push((key, entry));
            }
        }
        if !items.is_empty() {
            let winners = self.store.resolve_batch(items, snapshot);
            for (index, winner) in insert_slots.into_iter().zip(winners) {
                results[index] = winner.into_option();
            }
        }
        Ok(results)
    }

    /// Removes `key`, emitting `Invalidated` iff an entry was removed. The
    /// next `get` will consult the source again.
    pub fn invalidate(&self, key: &K) -> bool {
        self.store.invalidate(key)
    }

    /// Invalidates every key under a single store lock acquisition,
    /// emitting one `Invalidated` per removed key.
    pub fn invalidate_many(&self, keys: &[K]) -> usize {
        self.store.invalidate_many(keys)
    }

    /// Empties the cache, emitting one `Evicted` event with the contents.
    pub fn clear(&self) {
        self.store.clear()
    }

    /// Runs a collection unconditionally.
    pub fn force_collect(&self) {
        self.store.force_collect()
    }

    /// Entries across both generations, memoized absences included.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Coarse occupancy of the two generations.
    pub fn state(&self) -> GenerationState {
        self.store.state()
    }

    /// Subscribes to invalidation and eviction events.
    pub fn subscribe(&self, handler: EventHandler<K, V>) {
        self.store.subscribe(handler)
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &GenerationalStore<K, V> {
        &self.store
    }
}

/// Turns probe hits into output slots: a cached absence reads as `None`,
/// exactly like an unknown key does after its load came back absent.
fn flatten_hits<V>(cached: Vec<Option<CacheEntry<V>>>) -> Vec<Option<V>> {
    cached
        .into_iter()
        .map(|hit| hit.and_then(CacheEntry::into_option))
        .collect()
}
