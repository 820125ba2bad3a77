//! Telemetry metric name constants.
//!
//! Centralised metric names for gencache operations. Consumers install their
//! own `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Common labels
//!
//! - `cache` — the configured cache name (partitions append their index)
//! - `trigger` — what provoked a collection: "size" | "time" | "forced"
//! - `status` — source load outcome: "ok" | "error"

/// Total cache probes, hits and misses alike.
///
/// Labels: `cache`.
pub const ACCESSES_TOTAL: &str = "gencache_accesses_total";

/// Total probes answered from either generation.
///
/// Labels: `cache`.
pub const HITS_TOTAL: &str = "gencache_hits_total";

/// Total probes that found neither generation holding the key.
///
/// Labels: `cache`.
pub const MISSES_TOTAL: &str = "gencache_misses_total";

/// Total source calls actually issued (coalesced waiters excluded). Batch
/// calls count once.
///
/// Labels: `status` ("ok" | "error").
pub const LOADS_TOTAL: &str = "gencache_loads_total";

/// Total lookups that joined an already in-flight load instead of issuing
/// their own source call.
pub const COALESCED_LOADS_TOTAL: &str = "gencache_coalesced_loads_total";

/// Total generation collections.
///
/// Labels: `cache`, `trigger` ("size" | "time" | "forced").
pub const COLLECTIONS_TOTAL: &str = "gencache_collections_total";

/// Total entries dropped by collections and clears.
///
/// Labels: `cache`.
pub const EVICTED_ENTRIES_TOTAL: &str = "gencache_evicted_entries_total";

/// Total explicit invalidations that actually removed an entry.
///
/// Labels: `cache`.
pub const INVALIDATIONS_TOTAL: &str = "gencache_invalidations_total";
