//! Spreadwatch Cache - Tiered read-through cache for prediction market state
//!
//! Market reads are expensive remote calls, and different parts of a market
//! change at very different rates. This crate splits each market into tiers
//! with their own time-to-live and serves every tier from memory while it is
//! still valid:
//!
//! | Tier    | Contents                                   | TTL      |
//! |---------|--------------------------------------------|----------|
//! | Static  | question, criteria, tag, spread labels     | never    |
//! | Timing  | bidding deadline, resolution time          | 300 s    |
//! | Dynamic | state, liquidity, shares, spread prices    | 30 s     |
//! | User    | one user's positions in one market         | 15 s     |
//! | Error   | last fetch failure, for retry suppression  | 5 s      |
//!
//! Reads return provenance with them: every [`CompositeMarketRecord`] says
//! which tiers were served from cache, and [`CacheRead`] carries when a tier
//! value was stored.
//!
//! # Example
//!
//! ```ignore
//! let service = Arc::new(MarketDataService::new(Arc::new(fetcher), CacheConfig::from_env())?);
//!
//! // Warm the cache for a list page, then render from it
//! let records = service.get_multiple_markets_info(&market_ids).await?;
//!
//! // After a trade, bypass the dynamic TTL for one market
//! let refresher = MarketRefresher::new(service.clone());
//! let record = refresher.force_refresh(&market_id).await?;
//!
//! // Operators
//! let report = service.perform_health_check();
//! ```
//!
//! [`CompositeMarketRecord`]: spreadwatch_core::CompositeMarketRecord

pub mod entry;
pub mod fetcher;
pub mod freshness;
pub mod health;
pub mod key;
pub mod maintenance;
pub mod monitor;
pub mod refresh;
pub mod service;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use entry::CacheEntry;
pub use fetcher::MarketFetcher;
pub use freshness::{CacheRead, Freshness};
pub use health::perform_health_check;
pub use key::UserMarketKey;
pub use maintenance::{cleanup_task, spawn_cleanup_task, CleanupMetrics, CleanupSnapshot};
pub use monitor::{PerformanceMetrics, PerformanceMonitor};
pub use refresh::{MarketRead, MarketRefresher, MarketSubscription, SubscriptionUpdate};
pub use service::MarketDataService;
pub use store::{CacheStore, CacheStoreStats, TierStats, TierTable};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
