use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::future;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::events::EventHandler;
use crate::read_through::ReadThroughGenerational;
use crate::source::DataSource;
use crate::store::GenerationState;

/// Hash-partitioned read-through cache.
///
/// `N` independent [`ReadThroughGenerational`] shards over one shared
/// source, each with its own lock and a `gen0_limit / N` share of the entry
/// bound, so lookups for different keys rarely contend. Shard selection is
/// a stable hash of the key: equal keys land on the same shard for the
/// process lifetime. Per-shard events fan up through
/// [`subscribe`](Self::subscribe).
pub struct PartitionedCache<K, V, S> {
    shards: Vec<Arc<ReadThroughGenerational<K, V, S>>>,
    /// `Some(n - 1)` when the shard count is a power of two; the mask is
    /// cheaper than the general modulus.
    mask: Option<usize>,
}

impl<K, V, S> PartitionedCache<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: DataSource<K, V> + 'static,
{
    /// Creates `config.partitions` shards (default: one per hardware
    /// thread) over the shared `source`. Fails on an invalid configuration.
    pub fn new(config: CacheConfig, source: Arc<S>) -> CacheResult<Self> {
        config.validate()?;
        let count = config.partition_count();
        let mut shards = Vec::with_capacity(count);
        for index in 0..count {
            shards.push(ReadThroughGenerational::new(
                config.for_partition(index, count),
                Arc::clone(&source),
            )?);
        }
        let mask = count.is_power_of_two().then(|| count - 1);
        Ok(Self { shards, mask })
    }

    /// Number of partitions.
    pub fn partitions(&self) -> usize {
        self.shards.len()
    }

    pub(crate) fn shard_index(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let hash = hasher.finish() as usize;
        match self.mask {
            Some(mask) => hash & mask,
            None => hash % self.shards.len(),
        }
    }

    fn shard(&self, key: &K) -> &ReadThroughGenerational<K, V, S> {
        &self.shards[self.shard_index(key)]
    }

    /// Looks up `key` on its shard, loading from the source on a miss.
    pub fn get(&self, key: &K) -> CacheResult<Option<V>> {
        self.shard(key).get(key)
    }

    /// Asynchronous [`get`](Self::get).
    pub async fn get_async(&self, key: &K) -> CacheResult<Option<V>> {
        self.shard(key).get_async(key).await
    }

    /// [`get`](Self::get), substituting `V::default()` for absence.
    pub fn get_or_default(&self, key: &K) -> CacheResult<V>
    where
        V: Default,
    {
        self.shard(key).get_or_default(key)
    }

    /// [`get_async`](Self::get_async), substituting `V::default()` for
    /// absence.
    pub async fn get_or_default_async(&self, key: &K) -> CacheResult<V>
    where
        V: Default,
    {
        self.shard(key).get_or_default_async(key).await
    }

    /// Batch lookup: keys are grouped per shard (one batch lookup per
    /// touched shard) and the results scattered back into input order.
    pub fn get_batch(&self, keys: &[K]) -> CacheResult<Vec<Option<V>>> {
        let mut results: Vec<Option<V>> = vec![None; keys.len()];
        for (shard_index, (slots, shard_keys)) in self.group_by_shard(keys) {
            let shard_results = self.shards[shard_index].get_batch(&shard_keys)?;
            for (slot, value) in slots.into_iter().zip(shard_results) {
                results[slot] = value;
            }
        }
        Ok(results)
    }

    /// Asynchronous [`get_batch`](Self::get_batch); the per-shard batches
    /// run concurrently.
    pub async fn get_batch_async(&self, keys: &[K]) -> CacheResult<Vec<Option<V>>> {
        let shard_lookups: Vec<_> = self
            .group_by_shard(keys)
            .into_iter()
            .map(|(shard_index, (slots, shard_keys))| {
                let shard = Arc::clone(&self.shards[shard_index]);
                async move {
                    let shard_results = shard.get_batch_async(&shard_keys).await?;
                    Ok::<_, CacheError>((slots, shard_results))
                }
            })
            .collect();

        let mut results: Vec<Option<V>> = vec![None; keys.len()];
        for outcome in future::join_all(shard_lookups).await {
            let (slots, shard_results) = outcome?;
            for (slot, value) in slots.into_iter().zip(shard_results) {
                results[slot] = value;
            }
        }
        Ok(results)
    }

    /// Invalidates `key` on its shard.
    pub fn invalidate(&self, key: &K) -> bool {
        self.shard(key).invalidate(key)
    }

    /// Invalidates every key, grouped so each touched shard is locked once.
    pub fn invalidate_many(&self, keys: &[K]) -> usize {
        self.group_by_shard(keys)
            .into_iter()
            .map(|(shard_index, (_, shard_keys))| {
                self.shards[shard_index].invalidate_many(&shard_keys)
            })
            .sum()
    }

    /// Empties every shard; each emits its own `Evicted` event.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.clear();
        }
    }

    /// Runs a collection on every shard.
    pub fn force_collect(&self) {
        for shard in &self.shards {
            shard.force_collect();
        }
    }

    /// Entries summed over all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.len()).sum()
    }

    /// Whether no shard holds an entry.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.is_empty())
    }

    /// Coarse occupancy of every partition, in partition order. Partitions
    /// move independently: `Empty` → `Warming` on first insert → `Full`
    /// once a collection has demoted entries → back to `Warming` after the
    /// next collection.
    pub fn states(&self) -> Vec<GenerationState> {
        self.shards.iter().map(|shard| shard.state()).collect()
    }

    /// Subscribes to the events of every shard.
    pub fn subscribe(&self, handler: EventHandler<K, V>) {
        for shard in &self.shards {
            shard.subscribe(Arc::clone(&handler));
        }
    }

    fn group_by_shard(&self, keys: &[K]) -> HashMap<usize, (Vec<usize>, Vec<K>)> {
        let mut groups: HashMap<usize, (Vec<usize>, Vec<K>)> = HashMap::new();
        for (slot, key) in keys.iter().enumerate() {
            let group = groups.entry(self.shard_index(key)).or_default();
            group.0.push(slot);
            group.1.push(key.clone());
        }
        groups
    }
}
