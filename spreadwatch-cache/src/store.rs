//! The five-tier cache store.
//!
//! Each tier is an independent key → entry table with its own TTL policy:
//!
//! | Tier | Key | TTL |
//! |---|---|---|
//! | Static | market | never |
//! | Timing | market | `timing_ttl` (minutes) |
//! | Dynamic | market | `dynamic_ttl` (seconds) |
//! | User | user + market | `user_ttl`, shorter than dynamic |
//! | Error | market | `error_ttl`, shortest of all |
//!
//! Reads re-check validity against the clock every time and treat expired
//! entries as absent without evicting them. [`CacheStore::cleanup_expired`]
//! bounds memory; it is never needed for correctness. No operation here
//! fails: a missing key is a miss and a poisoned lock is recovered.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spreadwatch_core::{
    CacheConfig, Clock, DynamicMarketInfo, MarketId, SpreadwatchError, StaticMarketInfo,
    SystemClock, TierKind, TimingInfo, UserPositionData,
};

use crate::entry::CacheEntry;
use crate::freshness::CacheRead;
use crate::key::UserMarketKey;

// ============================================================================
// STATISTICS
// ============================================================================

/// Entry counts for one tier, computed against "now" at call time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
}

/// Entry counts for every tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStoreStats {
    pub static_tier: TierStats,
    pub timing: TierStats,
    pub dynamic: TierStats,
    pub user: TierStats,
    pub error: TierStats,
}

impl CacheStoreStats {
    pub fn for_tier(&self, tier: TierKind) -> TierStats {
        match tier {
            TierKind::Static => self.static_tier,
            TierKind::Timing => self.timing,
            TierKind::Dynamic => self.dynamic,
            TierKind::User => self.user,
            TierKind::Error => self.error,
        }
    }

    fn tiers(&self) -> [TierStats; 5] {
        TierKind::ALL.map(|tier| self.for_tier(tier))
    }

    pub fn total_entries(&self) -> usize {
        self.tiers().iter().map(|t| t.total).sum()
    }

    pub fn valid_entries(&self) -> usize {
        self.tiers().iter().map(|t| t.valid).sum()
    }

    pub fn expired_entries(&self) -> usize {
        self.tiers().iter().map(|t| t.expired).sum()
    }

    /// Fraction of stored entries that have expired (0.0 when empty).
    pub fn expired_ratio(&self) -> f64 {
        let total = self.total_entries();
        if total == 0 {
            0.0
        } else {
            self.expired_entries() as f64 / total as f64
        }
    }
}

// ============================================================================
// TIER TABLE
// ============================================================================

/// One key → entry table with a fixed TTL policy.
pub struct TierTable<K, V> {
    kind: TierKind,
    /// `None` means entries never expire.
    ttl: Option<Duration>,
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<K, V> TierTable<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(kind: TierKind, ttl: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kind,
            ttl,
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> TierKind {
        self.kind
    }

    /// The entry for `key` if it exists and is still valid.
    pub fn entry(&self, key: &K) -> Option<CacheEntry<V>> {
        let now = self.clock.now();
        self.read()
            .get(key)
            .filter(|entry| entry.is_valid(now))
            .cloned()
    }

    /// The value for `key` if it exists and is still valid.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entry(key).map(CacheEntry::into_data)
    }

    /// Like [`get`](Self::get) but with the write time attached.
    pub fn get_read(&self, key: &K) -> Option<CacheRead<V>> {
        self.entry(key).map(|entry| {
            let cached_at = entry.created_at();
            CacheRead::from_cache(entry.into_data(), cached_at)
        })
    }

    /// True if a valid entry exists, without cloning it.
    pub fn contains(&self, key: &K) -> bool {
        let now = self.clock.now();
        self.read().get(key).is_some_and(|entry| entry.is_valid(now))
    }

    /// Insert or overwrite, stamping the entry with the tier TTL.
    pub fn set(&self, key: K, data: V) {
        let entry = CacheEntry::new(data, self.kind, self.clock.now(), self.ttl);
        self.write().insert(key, entry);
    }

    /// Remove one key. Returns true if something was stored under it.
    pub fn remove(&self, key: &K) -> bool {
        self.write().remove(key).is_some()
    }

    /// Remove every key matching the predicate. Returns how many were removed.
    pub fn remove_where<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&K) -> bool,
    {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(now));
        before - entries.len()
    }

    /// Drop everything. Returns how many entries were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.write();
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// Number of stored entries, valid or not.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn stats(&self) -> TierStats {
        let now = self.clock.now();
        let entries = self.read();
        let valid = entries.values().filter(|e| e.is_valid(now)).count();
        TierStats {
            total: entries.len(),
            valid,
            expired: entries.len() - valid,
        }
    }
}

// ============================================================================
// CACHE STORE
// ============================================================================

/// All five tiers behind one handle.
///
/// Construct once at start-up and share through an `Arc`.
pub struct CacheStore {
    static_info: TierTable<MarketId, StaticMarketInfo>,
    timing: TierTable<MarketId, TimingInfo>,
    dynamic: TierTable<MarketId, DynamicMarketInfo>,
    user: TierTable<UserMarketKey, UserPositionData>,
    errors: TierTable<MarketId, SpreadwatchError>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Create a store on the wall clock.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store on an explicit clock.
    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            static_info: TierTable::new(TierKind::Static, None, Arc::clone(&clock)),
            timing: TierTable::new(
                TierKind::Timing,
                Some(config.timing_ttl),
                Arc::clone(&clock),
            ),
            dynamic: TierTable::new(
                TierKind::Dynamic,
                Some(config.dynamic_ttl),
                Arc::clone(&clock),
            ),
            user: TierTable::new(TierKind::User, Some(config.user_ttl), Arc::clone(&clock)),
            errors: TierTable::new(
                TierKind::Error,
                Some(config.error_ttl),
                Arc::clone(&clock),
            ),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn static_tier(&self) -> &TierTable<MarketId, StaticMarketInfo> {
        &self.static_info
    }

    pub fn timing_tier(&self) -> &TierTable<MarketId, TimingInfo> {
        &self.timing
    }

    pub fn dynamic_tier(&self) -> &TierTable<MarketId, DynamicMarketInfo> {
        &self.dynamic
    }

    pub fn user_tier(&self) -> &TierTable<UserMarketKey, UserPositionData> {
        &self.user
    }

    pub fn error_tier(&self) -> &TierTable<MarketId, SpreadwatchError> {
        &self.errors
    }

    /// True while a failure for this market is inside its suppression window.
    pub fn has_recent_error(&self, market_id: &MarketId) -> bool {
        self.errors.contains(market_id)
    }

    /// Remember a failure for this market.
    pub fn set_error(&self, market_id: &MarketId, error: SpreadwatchError) {
        self.errors.set(market_id.clone(), error);
    }

    /// The remembered failure and how long it keeps suppressing retries.
    pub fn recent_error(&self, market_id: &MarketId) -> Option<(SpreadwatchError, Duration)> {
        let now = self.clock.now();
        self.errors.entry(market_id).map(|entry| {
            let remaining = entry.remaining(now).unwrap_or(Duration::ZERO);
            (entry.into_data(), remaining)
        })
    }

    /// Drop everything about one market that can go stale: timing, dynamic,
    /// error and every user's positions in it. Static metadata stays.
    pub fn invalidate_market(&self, market_id: &MarketId) -> usize {
        let mut removed = 0;
        removed += usize::from(self.timing.remove(market_id));
        removed += usize::from(self.dynamic.remove(market_id));
        removed += usize::from(self.errors.remove(market_id));
        removed += self.user.remove_where(|key| key.is_for_market(market_id));

        tracing::debug!(market_id = %market_id, removed, "Invalidated market");
        removed
    }

    /// Sweep expired entries from every tier. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let removed = self.static_info.cleanup_expired()
            + self.timing.cleanup_expired()
            + self.dynamic.cleanup_expired()
            + self.user.cleanup_expired()
            + self.errors.cleanup_expired();

        if removed > 0 {
            tracing::debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    /// Empty every tier unconditionally.
    pub fn clear_all(&self) {
        let removed = self.static_info.clear()
            + self.timing.clear()
            + self.dynamic.clear()
            + self.user.clear()
            + self.errors.clear();

        tracing::info!(removed, "Cleared all cache tiers");
    }

    pub fn stats(&self) -> CacheStoreStats {
        CacheStoreStats {
            static_tier: self.static_info.stats(),
            timing: self.timing.stats(),
            dynamic: self.dynamic.stats(),
            user: self.user.stats(),
            error: self.errors.stats(),
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("stats", &self.stats())
            .finish()
    }
}
