//! Two-generation in-memory caching primitives.
//!
//! gencache is a read-through front for an arbitrary backing source — a
//! database, a remote service, another cache — built around a storage
//! scheme borrowed from generational garbage collection. It trades strict
//! recency ordering for per-entry overhead of exactly one hash-map slot:
//! there is no LRU list, no per-entry clock, no per-entry TTL.
//!
//! ## The generational scheme
//!
//! Every store owns two hash maps: gen0 (young) and gen1 (old). New and
//! freshly promoted entries live in gen0; a *collection* drops gen1
//! wholesale, demotes gen0 into its place by a pointer swap, and starts an
//! empty gen0. A lookup that hits gen1 *promotes* the entry back into gen0,
//! so anything touched within a collection cycle survives the next one.
//! Collections run when gen0 would outgrow its configured bound
//! ([`CacheConfig::gen0_limit`]), and periodically when
//! [`CacheConfig::time_to_live`] is set — giving "evicted after at most two
//! idle intervals, never before one" semantics without tracking individual
//! entries.
//!
//! ## Layers
//!
//! - [`GenerationalStore`] — the storage primitive with explicit
//!   [`set`](GenerationalStore::set); it never calls a source.
//! - [`SingleFlight`] — coalesces concurrent loads so at most one source
//!   call per key is in flight ("thundering herd" protection).
//! - [`ReadThroughGenerational`] — store + single-flight + source:
//!   load-on-miss outside the store lock, negative caching via
//!   [`CacheEntry::Absent`], version-checked reconciliation of racing
//!   inserts.
//! - [`PartitionedCache`] — hash-routed independent shards of the above for
//!   lock-contention-free scaling across cores.
//!
//! ## Events and errors
//!
//! Caches announce explicit removals (`Invalidated`) and collection drops
//! (`Evicted`) through subscribed [`EventHandler`]s; see [`CacheEvent`] for
//! the exact firing rules. Source failures propagate to the triggering
//! caller and are never cached. Configuration problems surface once, at
//! construction, as [`CacheError::Configuration`].
//!
//! ## Metrics
//!
//! Every cache operation counts into the `metrics` facade under the names
//! listed in [`telemetry`]; install a recorder to collect them, or don't —
//! without one they are no-ops.

#![warn(missing_docs)]

mod config;
mod entry;
mod error;
mod events;
mod partitioned;
mod read_through;
mod single_flight;
mod source;
mod store;
pub mod telemetry;
mod utils;


pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult};
pub use events::{CacheEvent, EventHandler};
pub use partitioned::PartitionedCache;
pub use read_through::ReadThroughGenerational;
pub use single_flight::SingleFlight;
pub use source::{DataSource, InvalidationHandler};
pub use store::{GenerationalStore, GenerationState};
