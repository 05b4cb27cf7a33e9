//! Freshness contracts for market reads.
//!
//! Callers pick how much staleness they accept via [`Freshness`], and every
//! tier read carries whether it came from cache in a [`CacheRead`].

use chrono::{DateTime, Utc};
use std::time::Duration;

/// How a consumer wants a market read served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Only what is already cached. Never triggers a fetch.
    ///
    /// Use this for instant rendering before an authoritative read resolves.
    CachedOnly,

    /// Serve valid cached tiers and fetch the rest.
    #[default]
    ReadThrough,

    /// Drop the market's expiring tiers first, then read through.
    ///
    /// Static metadata is kept; it cannot change once a market exists.
    ForceRefresh,
}

impl Freshness {
    /// Returns true if this read may contact the remote source.
    pub fn may_fetch(&self) -> bool {
        !matches!(self, Self::CachedOnly)
    }
}

/// Result of reading one tier, carrying provenance metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    /// The tier value.
    value: T,
    /// When this value was cached (or fetched).
    cached_at: DateTime<Utc>,
    /// Whether this was a cache hit or a fetch.
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// Create a read served from a valid cache entry.
    pub fn from_cache(value: T, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: true,
        }
    }

    /// Create a read served by a remote fetch at `fetched_at`.
    pub fn from_fetch(value: T, fetched_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at: fetched_at,
            was_cache_hit: false,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// How old the value is as of `now`.
    pub fn staleness(&self, now: DateTime<Utc>) -> Duration {
        (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Get when this value was cached.
    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Check if this was a cache hit.
    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// Check if this was a cache miss (fetched from remote).
    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
