use thiserror::Error;

/// An error surfaced by the cache.
///
/// The enum is `Clone` so that a single outcome can be broadcast to every
/// waiter of a coalesced load, and `PartialEq` so tests can assert on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The cache was constructed with an unusable configuration.
    ///
    /// Reported at construction only; a successfully constructed cache never
    /// raises this again.
    #[error("invalid cache configuration: {0}")]
    Configuration(String),

    /// The backing data source failed.
    ///
    /// Propagated unchanged to the caller of the triggering lookup. Nothing
    /// is cached on a source failure, not even absence.
    #[error("data source failed: {0}")]
    Source(String),

    /// An in-flight load went away before publishing a result.
    ///
    /// Waiters of a coalesced load receive this when the producer panicked
    /// or its runtime shut down; they are never left blocked on a handle
    /// that can no longer complete.
    #[error("in-flight load dropped before completing")]
    Interrupted,
}

impl CacheError {
    /// Converts an arbitrary source-side error, recording it on the way.
    #[track_caller]
    pub fn source<E: std::fmt::Display>(err: E) -> Self {
        let message = err.to_string();
        tracing::debug!(error = %message, "data source failure");
        Self::Source(message)
    }
}

/// Shorthand for results carrying a [`CacheError`].
pub type CacheResult<T> = Result<T, CacheError>;
