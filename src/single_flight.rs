use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::Shared;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::source::DataSource;
use crate::telemetry;
use crate::utils::defer;

type LoadResult<V> = CacheResult<CacheEntry<V>>;

// `Shared` hands every waiter its own clone of the published result.
type LoadHandle<V> = Shared<oneshot::Receiver<LoadResult<V>>>;

/// Either joins an in-flight load or owns a fresh one.
enum Claim<V> {
    /// Another load for this key is already in flight; wait for its
    /// broadcast.
    Join(LoadHandle<V>),
    /// This caller claimed the key and must publish through the sender.
    Own(oneshot::Sender<LoadResult<V>>, LoadHandle<V>),
}

/// Coordinates loads so that at most one source call per key is in flight.
///
/// Concurrent callers for the same key share the one outcome — value,
/// absence, or error alike — while different keys proceed in parallel. The
/// pending map lives behind its own mutex, independent of any store lock.
///
/// The pending entry for a key exists only while its load is in flight: it
/// is removed on success, on error, and on a producer panic (the guard runs
/// during the unwind), so the table can never hold a handle that no longer
/// completes. Waiters of such a dropped handle observe
/// [`CacheError::Interrupted`] instead of blocking forever.
///
/// On the async paths the owning load runs as a detached task: cancelling a
/// waiter — the claimer included — never cancels the source call, so the
/// remaining waiters are still served.
pub struct SingleFlight<K, V, S> {
    source: Arc<S>,
    pending: Arc<Mutex<HashMap<K, LoadHandle<V>>>>,
}

impl<K, V, S> SingleFlight<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: DataSource<K, V> + 'static,
{
    /// Creates a coordinator over `source`.
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn claim(&self, key: &K) -> Claim<V> {
        let claim = {
            let mut pending = self.pending.lock();
            match pending.entry(key.clone()) {
                MapEntry::Occupied(entry) => Claim::Join(entry.get().clone()),
                MapEntry::Vacant(slot) => {
                    let (tx, rx) = oneshot::channel();
                    let handle = rx.shared();
                    slot.insert(handle.clone());
                    Claim::Own(tx, handle)
                }
            }
        };
        if matches!(claim, Claim::Join(_)) {
            metrics::counter!(telemetry::COALESCED_LOADS_TOTAL).increment(1);
        }
        claim
    }

    /// Loads `key`, joining an already in-flight load when one exists.
    pub fn get(&self, key: &K) -> LoadResult<V> {
        match self.claim(key) {
            Claim::Join(handle) => wait_sync(handle),
            Claim::Own(tx, _handle) => {
                // The guard clears the pending entry on every exit from this
                // scope, a panicking source call included.
                let _cleanup = defer(|| {
                    self.pending.lock().remove(key);
                });
                let result = self.source.get(key);
                record_load(result.is_ok());
                let _ = tx.send(result.clone());
                result
            }
        }
    }

    /// Asynchronous [`get`](Self::get); the owning load runs detached.
    pub async fn get_async(&self, key: &K) -> LoadResult<V> {
        match self.claim(key) {
            Claim::Join(handle) => wait_async(handle).await,
            Claim::Own(tx, handle) => {
                let source = Arc::clone(&self.source);
                let pending = Arc::clone(&self.pending);
                let key = key.clone();
                tokio::spawn(async move {
                    let cleanup_key = key.clone();
                    let _cleanup = defer(move || {
                        pending.lock().remove(&cleanup_key);
                    });
                    let result = source.get_async(&key).await;
                    record_load(result.is_ok());
                    let _ = tx.send(result);
                });
                wait_async(handle).await
            }
        }
    }

    /// Loads a batch, joining in-flight loads for overlapping keys and
    /// issuing a single `get_batch` source call for the rest.
    ///
    /// The output is aligned to `keys` — same length, same order. A source
    /// failure is broadcast to every slot this call claimed; slots joined
    /// from other in-flight loads carry whatever those loads observed.
    pub fn get_batch(&self, keys: &[K]) -> Vec<LoadResult<V>> {
        let (handles, claimed) = self.claim_batch(keys);
        if !claimed.keys.is_empty() {
            let cleanup_keys = claimed.keys.clone();
            let _cleanup = defer(move || self.release_batch(&cleanup_keys));
            let results = self.source.get_batch(&claimed.keys);
            record_load(results.is_ok());
            claimed.publish(results);
        }
        handles.into_iter().map(wait_sync).collect()
    }

    /// Asynchronous [`get_batch`](Self::get_batch); the batch source call
    /// runs detached, like [`get_async`](Self::get_async).
    pub async fn get_batch_async(&self, keys: &[K]) -> Vec<LoadResult<V>> {
        let (handles, claimed) = self.claim_batch(keys);
        if !claimed.keys.is_empty() {
            let source = Arc::clone(&self.source);
            let pending = Arc::clone(&self.pending);
            tokio::spawn(async move {
                let cleanup_keys = claimed.keys.clone();
                let _cleanup = defer(move || {
                    let mut pending = pending.lock();
                    for key in &cleanup_keys {
                        pending.remove(key);
                    }
                });
                let results = source.get_batch_async(&claimed.keys).await;
                record_load(results.is_ok());
                claimed.publish(results);
            });
        }
        futures::future::join_all(handles.into_iter().map(wait_async)).await
    }

    /// Classifies every key under one lock acquisition: per-input handles
    /// plus the newly claimed keys and their senders, in claim order.
    fn claim_batch(&self, keys: &[K]) -> (Vec<LoadHandle<V>>, ClaimedBatch<K, V>) {
        let mut handles = Vec::with_capacity(keys.len());
        let mut claimed = ClaimedBatch {
            keys: Vec::new(),
            senders: Vec::new(),
        };
        {
            let mut pending = self.pending.lock();
            for key in keys {
                match pending.entry(key.clone()) {
                    MapEntry::Occupied(entry) => handles.push(entry.get().clone()),
                    MapEntry::Vacant(slot) => {
                        let (tx, rx) = oneshot::channel();
                        let handle = rx.shared();
                        slot.insert(handle.clone());
                        handles.push(handle);
                        claimed.keys.push(key.clone());
                        claimed.senders.push(tx);
                    }
                }
            }
        }
        let joined = keys.len() - claimed.keys.len();
        if joined > 0 {
            metrics::counter!(telemetry::COALESCED_LOADS_TOTAL).increment(joined as u64);
        }
        (handles, claimed)
    }

    fn release_batch(&self, keys: &[K]) {
        let mut pending = self.pending.lock();
        for key in keys {
            pending.remove(key);
        }
    }
}

/// The slots one batch call claimed for itself.
struct ClaimedBatch<K, V> {
    keys: Vec<K>,
    senders: Vec<oneshot::Sender<LoadResult<V>>>,
}

impl<K, V: Clone> ClaimedBatch<K, V> {
    /// Publishes one batch outcome to every claimed slot. A source failure
    /// — or a batch that broke the alignment contract — is broadcast to all
    /// of them.
    fn publish(self, results: CacheResult<Vec<CacheEntry<V>>>) {
        match results {
            Ok(values) if values.len() == self.senders.len() => {
                for (sender, value) in self.senders.into_iter().zip(values) {
                    let _ = sender.send(Ok(value));
                }
            }
            Ok(values) => {
                tracing::error!(
                    expected = self.senders.len(),
                    got = values.len(),
                    "data source returned a misaligned batch",
                );
                let error = CacheError::Source("misaligned batch result".into());
                for sender in self.senders {
                    let _ = sender.send(Err(error.clone()));
                }
            }
            Err(error) => {
                for sender in self.senders {
                    let _ = sender.send(Err(error.clone()));
                }
            }
        }
    }
}

/// Blocks on a broadcast handle. A handle whose producer went away without
/// publishing resolves to `Interrupted` rather than deadlocking.
fn wait_sync<V: Clone>(handle: LoadHandle<V>) -> LoadResult<V> {
    futures::executor::block_on(handle).unwrap_or(Err(CacheError::Interrupted))
}

async fn wait_async<V: Clone>(handle: LoadHandle<V>) -> LoadResult<V> {
    handle.await.unwrap_or(Err(CacheError::Interrupted))
}

fn record_load(ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(telemetry::LOADS_TOTAL, "status" => status).increment(1);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::BoxFuture;

    use super::*;

    /// Source that sleeps inside the load so concurrent callers overlap.
    struct SlowSource {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail: AtomicBool,
        panic: AtomicBool,
    }

    impl SlowSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                panic: AtomicBool::new(false),
            })
        }
    }

    impl DataSource<u32, String> for SlowSource {
        fn get(&self, key: &u32) -> CacheResult<CacheEntry<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let live = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(live, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.panic.load(Ordering::SeqCst) {
                panic!("source blew up");
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(CacheError::Source("boom".into()));
            }
            Ok(CacheEntry::Present(format!("value-{key}")))
        }

        fn get_async<'a>(&'a self, key: &'a u32) -> BoxFuture<'a, CacheResult<CacheEntry<String>>>
        where
            String: 'a,
        {
            // Deliberately blocking: exercised only on multi-threaded test
            // runtimes.
            Box::pin(futures::future::lazy(move |_| self.get(key)))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_getters_share_one_load() {
        let source = SlowSource::new();
        let flight = SingleFlight::new(Arc::clone(&source));

        let (a, b, c) = futures::join!(
            flight.get_async(&7),
            flight.get_async(&7),
            flight.get_async(&7),
        );
        let expected = Ok(CacheEntry::Present("value-7".into()));
        assert_eq!(a, expected);
        assert_eq!(b, expected);
        assert_eq!(c, expected);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_is_broadcast_and_retried_afresh() {
        let source = SlowSource::new();
        source.fail.store(true, Ordering::SeqCst);
        let flight = SingleFlight::new(Arc::clone(&source));

        let (a, b) = futures::join!(flight.get_async(&1), flight.get_async(&1));
        assert_eq!(a, Err(CacheError::Source("boom".into())));
        assert_eq!(b, Err(CacheError::Source("boom".into())));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // The failed entry left the table: the next call hits the source.
        source.fail.store(false, Ordering::SeqCst);
        assert_eq!(
            flight.get_async(&1).await,
            Ok(CacheEntry::Present("value-1".into()))
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn producer_panic_does_not_poison_the_table() {
        let source = SlowSource::new();
        source.panic.store(true, Ordering::SeqCst);
        let flight = SingleFlight::new(Arc::clone(&source));

        let (a, b) = futures::join!(flight.get_async(&1), flight.get_async(&1));
        assert_eq!(a, Err(CacheError::Interrupted));
        assert_eq!(b, Err(CacheError::Interrupted));

        source.panic.store(false, Ordering::SeqCst);
        assert_eq!(
            flight.get_async(&1).await,
            Ok(CacheEntry::Present("value-1".into()))
        );
    }

    #[test]
    fn sync_batch_is_aligned_and_single_call() {
        struct BatchSource {
            batch_calls: AtomicUsize,
        }

        impl DataSource<u32, String> for BatchSource {
            fn get(&self, _key: &u32) -> CacheResult<CacheEntry<String>> {
                unreachable!("batch test must not fall back to single gets");
            }

            fn get_batch(&self, keys: &[u32]) -> CacheResult<Vec<CacheEntry<String>>> {
                self.batch_calls.fetch_add(1, Ordering::SeqCst);
                Ok(keys
                    .iter()
                    .map(|key| match key {
                        42 => CacheEntry::Absent,
                        key => CacheEntry::Present(key.to_string()),
                    })
                    .collect())
            }
        }

        let source = Arc::new(BatchSource {
            batch_calls: AtomicUsize::new(0),
        });
        let flight = SingleFlight::new(Arc::clone(&source));

        // The duplicate key joins the slot its first occurrence claimed.
        let results = flight.get_batch(&[1, 42, 2, 1]);
        assert_eq!(
            results,
            vec![
                Ok(CacheEntry::Present("1".into())),
                Ok(CacheEntry::Absent),
                Ok(CacheEntry::Present("2".into())),
                Ok(CacheEntry::Present("1".into())),
            ]
        );
        assert_eq!(source.batch_calls.load(Ordering::SeqCst), 1);
    }
}
