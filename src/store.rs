use std::collections::HashMap;
use std::hash::Hash;
use std::mem;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::events::{CacheEvent, EventHandler, EventSink};
use crate::telemetry;

/// Coarse occupancy of a store's two generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    /// Both generations are empty.
    Empty,
    /// Exactly one generation holds entries — fresh inserts, or the moment
    /// right after a collection.
    Warming,
    /// Both generations hold entries.
    Full,
}

/// What provoked a collection; tags metrics and logs.
#[derive(Debug, Clone, Copy)]
enum CollectionTrigger {
    Size,
    Time,
    Forced,
}

impl CollectionTrigger {
    fn as_str(self) -> &'static str {
        match self {
            CollectionTrigger::Size => "size",
            CollectionTrigger::Time => "time",
            CollectionTrigger::Forced => "forced",
        }
    }
}

/// The mutable half of a store: both generations plus the bookkeeping the
/// read-through layer relies on. One mutex guards all of it; the version
/// counter moves on every mutation so a caller that dropped the lock can
/// tell whether anything changed before it reacquired.
struct Generations<K, V> {
    gen0: HashMap<K, CacheEntry<V>>,
    gen1: HashMap<K, CacheEntry<V>>,
    version: u64,
    last_collection: Instant,
}

impl<K, V> Generations<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new() -> Self {
        Self {
            gen0: HashMap::new(),
            gen1: HashMap::new(),
            version: 0,
            last_collection: Instant::now(),
        }
    }

    /// Probes both generations. A gen0 hit leaves the entry untouched; a
    /// gen1 hit moves it back into gen0 (promotion).
    fn probe(&mut self, key: &K) -> Option<CacheEntry<V>> {
        if let Some(entry) = self.gen0.get(key) {
            return Some(entry.clone());
        }
        let entry = self.gen1.remove(key)?;
        self.gen0.insert(key.clone(), entry.clone());
        self.version += 1;
        Some(entry)
    }

    /// Drops gen1, demotes gen0 wholesale (a map swap, no per-entry copies)
    /// and starts a fresh gen0. Returns the dropped mapping; `None` when
    /// the store was entirely empty and nothing happened.
    fn collect(&mut self) -> Option<HashMap<K, CacheEntry<V>>> {
        if self.gen0.is_empty() && self.gen1.is_empty() {
            return None;
        }
        let dropped = mem::replace(&mut self.gen1, mem::take(&mut self.gen0));
        self.version += 1;
        self.last_collection = Instant::now();
        Some(dropped)
    }

    /// Upserts into gen0, collecting first when gen0 is at the limit. Any
    /// stale copy of `key` leaves gen1 — including one the collection just
    /// demoted — so a key never lives in both generations.
    fn upsert(
        &mut self,
        key: K,
        entry: CacheEntry<V>,
        gen0_limit: Option<usize>,
    ) -> Option<HashMap<K, CacheEntry<V>>> {
        self.gen1.remove(&key);
        let mut dropped = None;
        if let Some(limit) = gen0_limit {
            if self.gen0.len() >= limit {
                dropped = self.collect();
                self.gen1.remove(&key);
            }
        }
        self.gen0.insert(key, entry);
        self.version += 1;
        dropped
    }

    fn remove(&mut self, key: &K) -> bool {
        let removed = self.gen0.remove(key).is_some() || self.gen1.remove(key).is_some();
        if removed {
            self.version += 1;
        }
        removed
    }

    fn clear(&mut self) -> HashMap<K, CacheEntry<V>> {
        let mut dropped = mem::take(&mut self.gen1);
        dropped.extend(mem::take(&mut self.gen0));
        if !dropped.is_empty() {
            self.version += 1;
        }
        dropped
    }

    fn len(&self) -> usize {
        self.gen0.len() + self.gen1.len()
    }
}

/// The two-generation storage primitive.
///
/// New and promoted entries live in gen0 (young); a collection demotes all
/// of gen0 to gen1 (old) and drops the previous gen1. There is no per-entry
/// bookkeeping: eviction is coarse but memory overhead per key is a hash
/// map slot, nothing more. Collections are triggered by size (before an
/// insert would reach [`gen0_limit`](CacheConfig::gen0_limit)) and by time
/// (a periodic collector waking every `time_to_live / 2`).
///
/// This type is the "explicit `set`" variant: it never calls a source. See
/// [`ReadThroughGenerational`](crate::ReadThroughGenerational) for the
/// read-through front.
pub struct GenerationalStore<K, V> {
    name: String,
    gen0_limit: Option<usize>,
    inner: Arc<Mutex<Generations<K, V>>>,
    events: Arc<EventSink<K, V>>,
    // Owns the collector thread; dropped (stopped and joined) last.
    collector: Option<Collector>,
}

impl<K, V> GenerationalStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a store and, when `time_to_live` is set, its periodic
    /// collector. Fails on an invalid configuration.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let inner = Arc::new(Mutex::new(Generations::new()));
        let events = Arc::new(EventSink::new());
        let collector = config.time_to_live.map(|ttl| {
            Collector::spawn(
                config.name.clone(),
                ttl / 2,
                Arc::clone(&inner),
                Arc::clone(&events),
            )
        });
        Ok(Self {
            name: config.name,
            gen0_limit: config.gen0_limit,
            inner,
            events,
            collector,
        })
    }

    /// The configured name, used to tag logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to this store's invalidation and eviction events.
    pub fn subscribe(&self, handler: EventHandler<K, V>) {
        self.events.subscribe(handler);
    }

    /// Looks up `key`, promoting a gen1 hit back into gen0.
    ///
    /// `None` means the key is unknown to the cache; a memoized absence
    /// comes back as `Some(CacheEntry::Absent)`.
    pub fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        self.get_versioned(key).0
    }

    /// Probe plus version snapshot under one lock acquisition. The
    /// read-through layer hands the snapshot back to
    /// [`resolve_load`](Self::resolve_load) to detect racing inserts.
    pub(crate) fn get_versioned(&self, key: &K) -> (Option<CacheEntry<V>>, u64) {
        let (hit, version) = {
            let mut inner = self.inner.lock();
            (inner.probe(key), inner.version)
        };
        metrics::counter!(telemetry::ACCESSES_TOTAL, "cache" => self.name.clone()).increment(1);
        let outcome = if hit.is_some() {
            telemetry::HITS_TOTAL
        } else {
            telemetry::MISSES_TOTAL
        };
        metrics::counter!(outcome, "cache" => self.name.clone()).increment(1);
        (hit, version)
    }

    /// Batch probe under a single lock acquisition: per-key results, the
    /// missed `(index, key)` pairs, and the version snapshot.
    pub(crate) fn get_many_versioned(
        &self,
        keys: &[K],
    ) -> (Vec<Option<CacheEntry<V>>>, Vec<(usize, K)>, u64) {
        let mut results = Vec::with_capacity(keys.len());
        let mut missed = Vec::new();
        let version = {
            let mut inner = self.inner.lock();
            for (index, key) in keys.iter().enumerate() {
                let hit = inner.probe(key);
                if hit.is_none() {
                    missed.push((index, key.clone()));
                }
                results.push(hit);
            }
            inner.version
        };
        metrics::counter!(telemetry::ACCESSES_TOTAL, "cache" => self.name.clone())
            .increment(keys.len() as u64);
        metrics::counter!(telemetry::HITS_TOTAL, "cache" => self.name.clone())
            .increment((keys.len() - missed.len()) as u64);
        metrics::counter!(telemetry::MISSES_TOTAL, "cache" => self.name.clone())
            .increment(missed.len() as u64);
        (results, missed, version)
    }

    /// Upserts `value` into gen0, running a size-triggered collection first
    /// when gen0 is at its limit.
    pub fn set(&self, key: K, value: V) {
        let dropped = {
            let mut inner = self.inner.lock();
            inner.upsert(key, CacheEntry::Present(value), self.gen0_limit)
        };
        publish_collection(&self.name, &self.events, dropped, CollectionTrigger::Size);
    }

    /// Reconciles a completed load with the store.
    ///
    /// When the version moved since `snapshot` and another thread already
    /// cached the key, the racing entry wins and the load is discarded;
    /// otherwise the load — present or absent — lands in gen0. Returns the
    /// entry the caller should observe.
    pub(crate) fn resolve_load(&self, key: &K, loaded: CacheEntry<V>, snapshot: u64) -> CacheEntry<V> {
        let dropped = {
            let mut inner = self.inner.lock();
            if inner.version != snapshot {
                if let Some(existing) = inner.probe(key) {
                    return existing;
                }
            }
            inner.upsert(key.clone(), loaded.clone(), self.gen0_limit)
        };
        publish_collection(&self.name, &self.events, dropped, CollectionTrigger::Size);
        loaded
    }

    /// Batch counterpart of [`resolve_load`](Self::resolve_load): one lock
    /// acquisition for all items, winners returned in item order. Callers
    /// only offer entries that should be cached (the read-through layer
    /// excludes absent and failed batch slots).
    pub(crate) fn resolve_batch(
        &self,
        items: Vec<(K, CacheEntry<V>)>,
        snapshot: u64,
    ) -> Vec<CacheEntry<V>> {
        let mut winners = Vec::with_capacity(items.len());
        let mut evictions = Vec::new();
        {
            let mut inner = self.inner.lock();
            for (key, loaded) in items {
                if inner.version != snapshot {
                    if let Some(existing) = inner.probe(&key) {
                        winners.push(existing);
                        continue;
                    }
                }
                if let Some(dropped) = inner.upsert(key, loaded.clone(), self.gen0_limit) {
                    evictions.push(dropped);
                }
                winners.push(loaded);
            }
        }
        for dropped in evictions {
            publish_collection(
                &self.name,
                &self.events,
                Some(dropped),
                CollectionTrigger::Size,
            );
        }
        winners
    }

    /// Removes `key` from whichever generation holds it.
    ///
    /// Emits `Invalidated` exactly once iff an entry was removed; an absent
    /// key is a silent no-op. Returns whether something was removed.
    pub fn invalidate(&self, key: &K) -> bool {
        let removed = self.inner.lock().remove(key);
        if removed {
            metrics::counter!(telemetry::INVALIDATIONS_TOTAL, "cache" => self.name.clone())
                .increment(1);
            self.events.emit(&CacheEvent::Invalidated(key.clone()));
        }
        removed
    }

    /// Invalidates every key under a single lock acquisition, emitting one
    /// `Invalidated` per actually removed key. Returns the removal count.
    pub fn invalidate_many(&self, keys: &[K]) -> usize {
        let removed: Vec<K> = {
            let mut inner = self.inner.lock();
            keys.iter()
                .filter(|key| inner.remove(key))
                .cloned()
                .collect()
        };
        if !removed.is_empty() {
            metrics::counter!(telemetry::INVALIDATIONS_TOTAL, "cache" => self.name.clone())
                .increment(removed.len() as u64);
        }
        let count = removed.len();
        for key in removed {
            self.events.emit(&CacheEvent::Invalidated(key));
        }
        count
    }

    /// Empties both generations, emitting a single `Evicted` event carrying
    /// their union. No `Invalidated` events fire.
    pub fn clear(&self) {
        let dropped = self.inner.lock().clear();
        if dropped.is_empty() {
            return;
        }
        tracing::debug!(cache = %self.name, dropped = dropped.len(), "cleared cache");
        metrics::counter!(telemetry::EVICTED_ENTRIES_TOTAL, "cache" => self.name.clone())
            .increment(dropped.len() as u64);
        self.events.emit(&CacheEvent::Evicted(dropped));
    }

    /// Runs a collection unconditionally.
    pub fn force_collect(&self) {
        let dropped = self.inner.lock().collect();
        publish_collection(&self.name, &self.events, dropped, CollectionTrigger::Forced);
    }

    /// Entries across both generations, memoized absences included.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coarse occupancy of the two generations.
    pub fn state(&self) -> GenerationState {
        let inner = self.inner.lock();
        match (inner.gen0.is_empty(), inner.gen1.is_empty()) {
            (true, true) => GenerationState::Empty,
            (false, false) => GenerationState::Full,
            _ => GenerationState::Warming,
        }
    }

    #[cfg(test)]
    pub(crate) fn generation_lens(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.gen0.len(), inner.gen1.len())
    }
}

/// Announces the outcome of a collection once the store lock is released.
///
/// `None` means no collection ran. An empty dropped mapping counts the
/// collection but emits no event.
fn publish_collection<K, V>(
    name: &str,
    events: &EventSink<K, V>,
    dropped: Option<HashMap<K, CacheEntry<V>>>,
    trigger: CollectionTrigger,
) {
    let Some(dropped) = dropped else { return };
    metrics::counter!(
        telemetry::COLLECTIONS_TOTAL,
        "cache" => name.to_owned(),
        "trigger" => trigger.as_str(),
    )
    .increment(1);
    tracing::debug!(
        cache = %name,
        trigger = trigger.as_str(),
        dropped = dropped.len(),
        "collected generation",
    );
    if dropped.is_empty() {
        return;
    }
    metrics::counter!(telemetry::EVICTED_ENTRIES_TOTAL, "cache" => name.to_owned())
        .increment(dropped.len() as u64);
    events.emit(&CacheEvent::Evicted(dropped));
}

/// The periodic collector: one named thread per store, parked on a condvar
/// so that drop can wake it immediately instead of waiting out the period.
struct Collector {
    stop: Arc<StopSignal>,
    thread: Option<thread::JoinHandle<()>>,
}

struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Collector {
    fn spawn<K, V>(
        name: String,
        period: Duration,
        inner: Arc<Mutex<Generations<K, V>>>,
        events: Arc<EventSink<K, V>>,
    ) -> Self
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let stop = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let signal = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name(format!("{name}-collector"))
            .spawn(move || collector_loop(name, period, inner, events, signal))
            .expect("failed to spawn cache collector thread");
        Self {
            stop,
            thread: Some(thread),
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        *self.stop.stopped.lock() = true;
        self.stop.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn collector_loop<K, V>(
    name: String,
    period: Duration,
    inner: Arc<Mutex<Generations<K, V>>>,
    events: Arc<EventSink<K, V>>,
    stop: Arc<StopSignal>,
) where
    K: Eq + Hash + Clone,
    V: Clone,
{
    loop {
        {
            let mut stopped = stop.stopped.lock();
            if !*stopped {
                let _ = stop.wake.wait_for(&mut stopped, period);
            }
            if *stopped {
                return;
            }
        }
        let dropped = {
            let mut generations = inner.lock();
            // A size-triggered collection within the last period already
            // aged the generations; skip this wake.
            if generations.last_collection.elapsed() < period {
                None
            } else {
                generations.collect()
            }
        };
        publish_collection(&name, &events, dropped, CollectionTrigger::Time);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;
    use crate::config::CacheConfig;

    fn store(limit: usize) -> GenerationalStore<u32, String> {
        GenerationalStore::new(CacheConfig::new().gen0_limit(limit)).unwrap()
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = store(10);
        store.set(1, "one".into());
        assert_eq!(store.get(&1), Some(CacheEntry::Present("one".into())));
        assert_eq!(store.get(&2), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn promotion_keeps_key_in_one_generation() {
        let store = store(10);
        store.set(1, "one".into());
        store.force_collect();
        assert_eq!(store.generation_lens(), (0, 1));

        // The gen1 hit moves the entry back into gen0.
        assert!(store.get(&1).is_some());
        assert_eq!(store.generation_lens(), (1, 0));
    }

    #[test]
    fn size_trigger_collects_before_insert() {
        let store = store(3);
        for key in 1..=3 {
            store.set(key, key.to_string());
        }
        assert_eq!(store.generation_lens(), (3, 0));

        store.set(4, "four".into());
        assert_eq!(store.generation_lens(), (1, 3));

        // Keys 1..=3 survive in gen1 until the next collection.
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn double_collection_empties_the_store() {
        let store = store(10);
        store.set(1, "one".into());
        store.force_collect();
        store.force_collect();
        assert!(store.is_empty());
        assert_eq!(store.state(), GenerationState::Empty);
    }

    #[test]
    fn upsert_at_limit_keeps_generations_disjoint() {
        let store = store(2);
        store.set(1, "a".into());
        store.set(2, "b".into());
        // Gen0 is at the limit; this upsert collects first, demoting the old
        // copy of key 1, which must not survive next to the new one.
        store.set(1, "a2".into());
        assert_eq!(store.get(&1), Some(CacheEntry::Present("a2".into())));
        assert_eq!(store.generation_lens(), (1, 1));
    }

    #[test]
    fn state_machine_transitions() {
        let store = store(10);
        assert_eq!(store.state(), GenerationState::Empty);
        store.set(1, "one".into());
        assert_eq!(store.state(), GenerationState::Warming);
        store.force_collect();
        store.set(2, "two".into());
        assert_eq!(store.state(), GenerationState::Full);
        store.force_collect();
        assert_eq!(store.state(), GenerationState::Warming);
    }

    #[test]
    fn invalidate_emits_exactly_once() {
        let store = store(10);
        let invalidations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invalidations);
        store.subscribe(Arc::new(move |event| {
            if matches!(event, CacheEvent::Invalidated(_)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        store.set(1, "one".into());
        assert!(store.invalidate(&1));
        assert!(!store.invalidate(&1));
        assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidate_many_emits_per_removed_key() {
        let store = store(10);
        let invalidated = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&invalidated);
        store.subscribe(Arc::new(move |event| {
            if let CacheEvent::Invalidated(key) = event {
                seen.lock().push(*key);
            }
        }));

        store.set(1, "one".into());
        store.set(2, "two".into());
        assert_eq!(store.invalidate_many(&[1, 2, 3]), 2);
        assert_eq!(&*invalidated.lock(), &[1, 2]);
    }

    #[test]
    fn collection_drops_do_not_emit_invalidated() {
        let store = store(10);
        let invalidations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invalidations);
        store.subscribe(Arc::new(move |event| {
            if matches!(event, CacheEvent::Invalidated(_)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        store.set(1, "one".into());
        store.force_collect();
        store.force_collect();
        assert!(store.is_empty());
        assert_eq!(invalidations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn evicted_event_carries_the_dropped_mapping() {
        let store = store(10);
        let evictions = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&evictions);
        store.subscribe(Arc::new(move |event| {
            if let CacheEvent::Evicted(dropped) = event {
                seen.lock().push(dropped.clone());
            }
        }));

        store.set(1, "one".into());
        store.force_collect();
        store.force_collect();

        let evictions = evictions.lock();
        // First collection drops an empty gen1, which is not announced.
        assert_eq!(evictions.len(), 1);
        assert_eq!(
            evictions[0].get(&1),
            Some(&CacheEntry::Present("one".into()))
        );
    }

    #[test]
    fn resolve_load_adopts_a_racing_insert() {
        let store = store(10);
        let (_, snapshot) = store.get_versioned(&1);

        // Another thread wins the race while the lock is released.
        store.set(1, "racing".into());

        let winner = store.resolve_load(&1, CacheEntry::Present("loaded".into()), snapshot);
        assert_eq!(winner, CacheEntry::Present("racing".into()));
        assert_eq!(store.get(&1), Some(CacheEntry::Present("racing".into())));
    }

    #[test]
    fn resolve_load_inserts_when_unraced() {
        let store = store(10);
        let (_, snapshot) = store.get_versioned(&1);
        let winner = store.resolve_load(&1, CacheEntry::Absent, snapshot);
        assert_eq!(winner, CacheEntry::Absent);
        assert_eq!(store.get(&1), Some(CacheEntry::Absent));
    }

    #[test]
    fn periodic_collector_expires_untouched_entries() {
        let store: GenerationalStore<u32, String> = GenerationalStore::new(
            CacheConfig::new()
                .name("ttl")
                .time_to_live(Duration::from_millis(100)),
        )
        .unwrap();
        store.set(1, "one".into());
        assert_eq!(store.len(), 1);

        // Two wake intervals (plus slack) demote and then drop the entry.
        thread::sleep(Duration::from_millis(300));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn collector_shutdown_is_prompt() {
        let started = Instant::now();
        let store: GenerationalStore<u32, String> =
            GenerationalStore::new(CacheConfig::new().time_to_live(Duration::from_secs(600)))
                .unwrap();
        drop(store);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
