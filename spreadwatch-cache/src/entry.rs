//! Cache entry wrapper with expiry metadata.

use chrono::{DateTime, Utc};
use spreadwatch_core::TierKind;
use std::time::Duration;

/// A cached value together with when it was written and when it stops being valid.
///
/// Validity is a function of "now" and is evaluated on every read; it is
/// never stored as a flag.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    data: T,
    created_at: DateTime<Utc>,
    /// `None` means the entry never expires.
    expires_at: Option<DateTime<Utc>>,
    tier: TierKind,
}

impl<T> CacheEntry<T> {
    /// Stamp a new entry written at `now`. A `ttl` of `None` never expires.
    pub fn new(data: T, tier: TierKind, now: DateTime<Utc>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });

        Self {
            data,
            created_at: now,
            expires_at,
            tier,
        }
    }

    /// Valid iff `now < expires_at`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_valid(now)
    }

    /// Time left before expiry; `None` for entries that never expire.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| (expires_at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// How long ago the entry was written.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn tier(&self) -> TierKind {
        self.tier
    }
}
