use std::time::Duration;

use serde::Deserialize;

use crate::error::{CacheError, CacheResult};

/// Configuration for a generational cache.
///
/// At least one of [`gen0_limit`](Self::gen0_limit) and
/// [`time_to_live`](Self::time_to_live) must be set; a cache with neither
/// would never evict anything. Validation happens once, at construction.
///
/// ```
/// use gencache::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::new()
///     .name("sessions")
///     .gen0_limit(10_000)
///     .time_to_live(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name used to tag logs and metrics for this cache.
    pub name: String,

    /// Upper bound on the young generation's entry count.
    ///
    /// A collection runs before an insert would reach the bound, so the
    /// total cache size stays at most `2 * gen0_limit`. Must be at least 1
    /// when set.
    pub gen0_limit: Option<usize>,

    /// Enables a periodic collector waking every `time_to_live / 2`.
    ///
    /// An entry untouched for one full wake interval is demoted to the old
    /// generation; untouched for a second, it is dropped. Must be non-zero
    /// when set.
    #[serde(with = "humantime_serde")]
    pub time_to_live: Option<Duration>,

    /// Partition count for [`PartitionedCache`](crate::PartitionedCache).
    ///
    /// Defaults to the number of hardware threads. Must be at least 1 when
    /// set. Ignored by unpartitioned caches.
    pub partitions: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "cache".into(),
            gen0_limit: None,
            time_to_live: None,
            partitions: None,
        }
    }
}

impl CacheConfig {
    /// Creates a config with no eviction policy set; set at least one of
    /// [`gen0_limit`](Self::gen0_limit) / [`time_to_live`](Self::time_to_live)
    /// before constructing a cache from it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache name used in logs and metrics.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the young-generation entry bound.
    pub fn gen0_limit(mut self, limit: usize) -> Self {
        self.gen0_limit = Some(limit);
        self
    }

    /// Sets the time-to-live driving the periodic collector.
    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Sets the partition count.
    pub fn partitions(mut self, partitions: usize) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub(crate) fn validate(&self) -> CacheResult<()> {
        if self.gen0_limit == Some(0) {
            return Err(CacheError::Configuration(
                "gen0_limit must be at least 1".into(),
            ));
        }
        if self.time_to_live.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheError::Configuration(
                "time_to_live must be non-zero".into(),
            ));
        }
        if self.gen0_limit.is_none() && self.time_to_live.is_none() {
            return Err(CacheError::Configuration(
                "at least one of gen0_limit and time_to_live must be set".into(),
            ));
        }
        if self.partitions == Some(0) {
            return Err(CacheError::Configuration(
                "partitions must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn partition_count(&self) -> usize {
        self.partitions.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Derives the per-partition config: the entry bound is split evenly
    /// (floored, but never below 1) and the name gains the partition index.
    pub(crate) fn for_partition(&self, index: usize, count: usize) -> Self {
        Self {
            name: format!("{}-{index}", self.name),
            gen0_limit: self.gen0_limit.map(|limit| (limit / count).max(1)),
            time_to_live: self.time_to_live,
            partitions: None,
        }
    }
}
