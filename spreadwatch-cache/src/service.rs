//! Optimized read service.
//!
//! Cache-aside reads over the tier store: each market tier is served from
//! cache while valid and fetched from the [`MarketFetcher`] otherwise, then
//! merged into a [`CompositeMarketRecord`]. A failure while assembling any
//! tier fails the whole read and is remembered in the error tier, so that
//! callers asking for the same market inside the suppression window fail
//! fast instead of repeating the round trip.
//!
//! Concurrent misses on the same market are not collapsed: both callers
//! fetch and the last write wins. Batch reads avoid this for their own keys
//! by planning the fetch set up front.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use spreadwatch_core::{
    AssemblyContext, CacheConfig, Clock, CompositeMarketRecord, DynamicMarketInfo,
    HealthReport, HealthThresholds, MarketId, MarketSnapshot, Provenance, RawMarketObject,
    SpreadwatchError, SpreadwatchResult, StaticMarketInfo, SystemClock, TierKind, TimingInfo,
    UserAddress, UserPositionData,
};
use tracing::{debug, info, warn};

use crate::fetcher::MarketFetcher;
use crate::freshness::CacheRead;
use crate::health::perform_health_check;
use crate::key::UserMarketKey;
use crate::monitor::{PerformanceMetrics, PerformanceMonitor};
use crate::store::{CacheStore, CacheStoreStats, TierTable};

/// Read-through service for market state.
///
/// Construct once at start-up and share it (it is cheap to clone; clones
/// share the same store, monitor and fetcher).
///
/// # Example
///
/// ```ignore
/// let service = MarketDataService::new(Arc::new(rpc_fetcher), CacheConfig::from_env())?;
///
/// let record = service.get_market_info(&market_id).await?;
/// if record.provenance.dynamic_from_cache {
///     // prices are at most `dynamic_ttl` old
/// }
/// ```
pub struct MarketDataService<F>
where
    F: MarketFetcher,
{
    fetcher: Arc<F>,
    store: Arc<CacheStore>,
    monitor: Arc<PerformanceMonitor>,
    config: CacheConfig,
    thresholds: HealthThresholds,
}

impl<F> MarketDataService<F>
where
    F: MarketFetcher,
{
    /// Create a service on the wall clock.
    pub fn new(fetcher: Arc<F>, config: CacheConfig) -> SpreadwatchResult<Self> {
        Self::with_clock(fetcher, config, Arc::new(SystemClock))
    }

    /// Create a service whose cache reads time from `clock`.
    pub fn with_clock(
        fetcher: Arc<F>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> SpreadwatchResult<Self> {
        config.validate()?;
        let store = Arc::new(CacheStore::with_clock(&config, clock));
        let monitor = Arc::new(PerformanceMonitor::new(config.latency_window));
        Self::from_parts(fetcher, store, monitor, config)
    }

    /// Assemble a service around an existing store and monitor.
    pub fn from_parts(
        fetcher: Arc<F>,
        store: Arc<CacheStore>,
        monitor: Arc<PerformanceMonitor>,
        config: CacheConfig,
    ) -> SpreadwatchResult<Self> {
        config.validate()?;
        let thresholds = HealthThresholds::for_config(&config);
        Ok(Self {
            fetcher,
            store,
            monitor,
            config,
            thresholds,
        })
    }

    /// Replace the health threshold policy.
    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn fetcher(&self) -> &Arc<F> {
        &self.fetcher
    }

    // ========================================================================
    // SINGLE MARKET
    // ========================================================================

    /// Read one market, fetching only the tiers that are missing or expired.
    ///
    /// Fails fast with [`SpreadwatchError::SuppressedRetry`] while a recent
    /// failure for this market is remembered.
    pub async fn get_market_info(
        &self,
        market_id: &MarketId,
    ) -> SpreadwatchResult<CompositeMarketRecord> {
        self.check_suppressed(market_id)?;

        let started = Instant::now();
        match self.assemble(market_id, started).await {
            Ok(record) => {
                debug!(
                    market_id = %market_id,
                    fully_cached = record.provenance.fully_cached(),
                    latency_ms = record.fetch_latency.as_millis() as u64,
                    "Market read complete"
                );
                Ok(record)
            }
            Err(err) => {
                self.remember_failure(market_id, &err);
                Err(err)
            }
        }
    }

    async fn assemble(
        &self,
        market_id: &MarketId,
        started: Instant,
    ) -> SpreadwatchResult<CompositeMarketRecord> {
        let mut loader = ObjectLoader::new(self.fetcher.as_ref(), market_id);

        let static_read = self.resolve_static(market_id, &mut loader).await?;
        let timing_read = self.resolve_timing(market_id, &mut loader).await?;
        let dynamic_read = self.resolve_dynamic(market_id, &mut loader).await?;

        let provenance = Provenance {
            static_from_cache: static_read.was_cache_hit(),
            timing_from_cache: timing_read.was_cache_hit(),
            dynamic_from_cache: dynamic_read.was_cache_hit(),
        };
        let ctx = self.assembly_context(provenance, started.elapsed());

        Ok(CompositeMarketRecord::assemble(
            market_id.clone(),
            static_read.into_value(),
            timing_read.value(),
            dynamic_read.value(),
            &ctx,
        ))
    }

    async fn resolve_static(
        &self,
        market_id: &MarketId,
        loader: &mut ObjectLoader<'_, F>,
    ) -> SpreadwatchResult<CacheRead<StaticMarketInfo>> {
        let started = Instant::now();
        let tier = self.store.static_tier();
        if let Some(read) = self.cached(tier, market_id, started) {
            return Ok(read);
        }

        let fetched = loader.object().await.map(StaticMarketInfo::from_raw);
        self.record_fetch(TierKind::Static, market_id, started);
        Ok(self.store_fetched(tier, market_id, fetched?))
    }

    async fn resolve_timing(
        &self,
        market_id: &MarketId,
        loader: &mut ObjectLoader<'_, F>,
    ) -> SpreadwatchResult<CacheRead<TimingInfo>> {
        let started = Instant::now();
        let tier = self.store.timing_tier();
        if let Some(read) = self.cached(tier, market_id, started) {
            return Ok(read);
        }

        let fetched = loader.object().await.map(TimingInfo::from_raw);
        self.record_fetch(TierKind::Timing, market_id, started);
        Ok(self.store_fetched(tier, market_id, fetched?))
    }

    async fn resolve_dynamic(
        &self,
        market_id: &MarketId,
        loader: &mut ObjectLoader<'_, F>,
    ) -> SpreadwatchResult<CacheRead<DynamicMarketInfo>> {
        let started = Instant::now();
        let tier = self.store.dynamic_tier();
        if let Some(read) = self.cached(tier, market_id, started) {
            return Ok(read);
        }

        let fetched = async {
            let raw = loader.object().await?;
            let prices = self.fetcher.fetch_spread_prices(market_id).await?;
            Ok::<_, SpreadwatchError>(DynamicMarketInfo::from_raw(raw, &prices)?)
        }
        .await;
        self.record_fetch(TierKind::Dynamic, market_id, started);
        Ok(self.store_fetched(tier, market_id, fetched?))
    }

    /// Serve a tier from cache, counting the hit.
    fn cached<V: Clone>(
        &self,
        tier: &TierTable<MarketId, V>,
        market_id: &MarketId,
        started: Instant,
    ) -> Option<CacheRead<V>> {
        let read = tier.get_read(market_id)?;
        self.monitor.record_cache_hit(started.elapsed());
        debug!(market_id = %market_id, tier = %tier.kind(), "Cache hit");
        Some(read)
    }

    /// Count a miss that went to the remote source, whatever its outcome.
    fn record_fetch(&self, tier: TierKind, market_id: &MarketId, started: Instant) {
        let latency = started.elapsed();
        self.monitor.record_cache_miss(latency);
        debug!(
            market_id = %market_id,
            tier = %tier,
            latency_ms = latency.as_millis() as u64,
            "Cache miss"
        );
    }

    fn store_fetched<V: Clone>(
        &self,
        tier: &TierTable<MarketId, V>,
        market_id: &MarketId,
        value: V,
    ) -> CacheRead<V> {
        tier.set(market_id.clone(), value.clone());
        CacheRead::from_fetch(value, self.store.clock().now())
    }

    fn check_suppressed(&self, market_id: &MarketId) -> SpreadwatchResult<()> {
        match self.store.recent_error(market_id) {
            Some((last_error, retry_after)) => {
                debug!(
                    market_id = %market_id,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Suppressing retry of recently failed market"
                );
                Err(SpreadwatchError::SuppressedRetry {
                    market_id: market_id.to_string(),
                    retry_after,
                    last_error: last_error.to_string(),
                })
            }
            None => Ok(()),
        }
    }

    fn remember_failure(&self, market_id: &MarketId, err: &SpreadwatchError) {
        self.monitor.record_error();
        self.store.set_error(market_id, err.clone());
        warn!(
            market_id = %market_id,
            error = %err,
            suppress_for_ms = self.config.error_ttl.as_millis() as u64,
            "Market fetch failed"
        );
    }

    fn assembly_context(
        &self,
        provenance: Provenance,
        fetch_latency: Duration,
    ) -> AssemblyContext {
        AssemblyContext {
            provenance,
            fetch_latency,
            now: self.store.clock().now(),
            sell_discount_bps: self.config.sell_discount_bps,
        }
    }

    // ========================================================================
    // BATCH
    // ========================================================================

    /// Read many markets, prefetching every missing tier in bounded batches
    /// first. The output is in input order.
    ///
    /// Fails on the first market (in input order) that cannot be assembled.
    pub async fn get_multiple_markets_info(
        &self,
        market_ids: &[MarketId],
    ) -> SpreadwatchResult<Vec<CompositeMarketRecord>> {
        let plans = self.plan_prefetch(market_ids);
        let failures = self.prefetch(&plans).await;

        let mut records = Vec::with_capacity(market_ids.len());
        for market_id in market_ids {
            if let Some(err) = failures.get(market_id) {
                return Err(err.clone());
            }
            records.push(self.get_market_info(market_id).await?);
        }
        Ok(records)
    }

    /// Split the requested markets into disjoint per-market fetch plans.
    fn plan_prefetch(&self, market_ids: &[MarketId]) -> Vec<PrefetchPlan> {
        let mut seen = HashSet::new();
        market_ids
            .iter()
            .filter(|id| seen.insert(*id))
            .filter(|id| !self.store.has_recent_error(id))
            .map(|id| PrefetchPlan {
                market_id: id.clone(),
                static_info: !self.store.static_tier().contains(id),
                timing: !self.store.timing_tier().contains(id),
                dynamic: !self.store.dynamic_tier().contains(id),
            })
            .filter(PrefetchPlan::needs_fetch)
            .collect()
    }

    async fn prefetch(&self, plans: &[PrefetchPlan]) -> HashMap<MarketId, SpreadwatchError> {
        let mut failures = HashMap::new();
        if plans.is_empty() {
            return failures;
        }

        let started = Instant::now();
        let batch_size = self.config.batch_size.max(1);
        let batch_count = plans.len().div_ceil(batch_size);

        for (batch, chunk) in plans.chunks(batch_size).enumerate() {
            if batch > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }

            let outcomes = join_all(chunk.iter().map(|plan| self.prefetch_one(plan))).await;
            for (plan, outcome) in chunk.iter().zip(outcomes) {
                if let Err(err) = outcome {
                    failures.insert(plan.market_id.clone(), err);
                }
            }
            debug!(batch = batch + 1, batch_count, size = chunk.len(), "Prefetch batch done");
        }

        info!(
            markets = plans.len(),
            batches = batch_count,
            failed = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch prefetch finished"
        );
        failures
    }

    async fn prefetch_one(&self, plan: &PrefetchPlan) -> SpreadwatchResult<()> {
        let started = Instant::now();
        let result = self.fetch_planned(plan).await;
        let latency = started.elapsed();
        for _ in 0..plan.tier_count() {
            self.monitor.record_cache_miss(latency);
        }
        if let Err(err) = &result {
            self.remember_failure(&plan.market_id, err);
        }
        result
    }

    async fn fetch_planned(&self, plan: &PrefetchPlan) -> SpreadwatchResult<()> {
        let id = &plan.market_id;
        let raw = self.fetcher.fetch_market_object(id).await?;

        if plan.static_info {
            self.store
                .static_tier()
                .set(id.clone(), StaticMarketInfo::from_raw(&raw));
        }
        if plan.timing {
            self.store
                .timing_tier()
                .set(id.clone(), TimingInfo::from_raw(&raw));
        }
        if plan.dynamic {
            let prices = self.fetcher.fetch_spread_prices(id).await?;
            let dynamic = DynamicMarketInfo::from_raw(&raw, &prices)?;
            self.store.dynamic_tier().set(id.clone(), dynamic);
        }
        Ok(())
    }

    // ========================================================================
    // USER POSITIONS
    // ========================================================================

    /// A user's positions in one market, cached per (user, market).
    pub async fn get_user_positions(
        &self,
        market_id: &MarketId,
        user: &UserAddress,
    ) -> SpreadwatchResult<UserPositionData> {
        let started = Instant::now();
        let key = UserMarketKey::new(user.clone(), market_id.clone());
        if let Some(positions) = self.store.user_tier().get(&key) {
            self.monitor.record_cache_hit(started.elapsed());
            debug!(key = %key, "User position cache hit");
            return Ok(positions);
        }

        let fetched = self.fetcher.fetch_user_position(market_id, user).await;
        self.monitor.record_cache_miss(started.elapsed());

        match fetched {
            Ok(raw) => {
                let data = UserPositionData::from_raw(market_id.clone(), user.clone(), &raw);
                self.store.user_tier().set(key, data.clone());
                Ok(data)
            }
            Err(err) => {
                self.monitor.record_error();
                warn!(key = %key, error = %err, "User position fetch failed");
                Err(err)
            }
        }
    }

    // ========================================================================
    // CACHED-ONLY READS AND OPERATOR TOOLING
    // ========================================================================

    /// Whatever is cached for a market right now. Never fetches and is not
    /// counted in the metrics.
    pub fn peek_market(&self, market_id: &MarketId) -> MarketSnapshot {
        MarketSnapshot {
            market_id: market_id.clone(),
            static_info: self.store.static_tier().get(market_id).into(),
            timing: self.store.timing_tier().get(market_id).into(),
            dynamic: self.store.dynamic_tier().get(market_id).into(),
        }
    }

    /// A full record from cache alone, if every tier is cached.
    pub fn peek_record(&self, market_id: &MarketId) -> Option<CompositeMarketRecord> {
        let provenance = Provenance {
            static_from_cache: true,
            timing_from_cache: true,
            dynamic_from_cache: true,
        };
        let ctx = self.assembly_context(provenance, Duration::ZERO);
        self.peek_market(market_id).complete(&ctx).ok()
    }

    /// Drop a market's expiring tiers so the next read refetches them.
    pub fn invalidate_market(&self, market_id: &MarketId) -> usize {
        self.store.invalidate_market(market_id)
    }

    pub fn clear_cache(&self) {
        self.store.clear_all();
    }

    pub fn cache_stats(&self) -> CacheStoreStats {
        self.store.stats()
    }

    pub fn cleanup_expired(&self) -> usize {
        self.store.cleanup_expired()
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.monitor.metrics()
    }

    /// Zero the performance counters. The cache is untouched.
    pub fn reset_metrics(&self) {
        self.monitor.reset();
    }

    pub fn is_performance_degraded(&self) -> bool {
        self.monitor.is_performance_degraded()
    }

    pub fn perform_health_check(&self) -> HealthReport {
        perform_health_check(&self.monitor.metrics(), &self.store.stats(), &self.thresholds)
    }
}

impl<F> Clone for MarketDataService<F>
where
    F: MarketFetcher,
{
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            monitor: Arc::clone(&self.monitor),
            config: self.config.clone(),
            thresholds: self.thresholds.clone(),
        }
    }
}

/// Fetches the market object at most once per read, however many tiers miss.
struct ObjectLoader<'a, F: ?Sized> {
    fetcher: &'a F,
    market_id: &'a MarketId,
    object: Option<RawMarketObject>,
}

impl<'a, F> ObjectLoader<'a, F>
where
    F: MarketFetcher + ?Sized,
{
    fn new(fetcher: &'a F, market_id: &'a MarketId) -> Self {
        Self {
            fetcher,
            market_id,
            object: None,
        }
    }

    async fn object(&mut self) -> SpreadwatchResult<&RawMarketObject> {
        let raw = match self.object.take() {
            Some(raw) => raw,
            None => self.fetcher.fetch_market_object(self.market_id).await?,
        };
        let raw: &RawMarketObject = self.object.insert(raw);
        Ok(raw)
    }
}

/// Which tiers of one market a batch prefetch must fetch.
#[derive(Debug, Clone)]
struct PrefetchPlan {
    market_id: MarketId,
    static_info: bool,
    timing: bool,
    dynamic: bool,
}

impl PrefetchPlan {
    fn needs_fetch(&self) -> bool {
        self.static_info || self.timing || self.dynamic
    }

    fn tier_count(&self) -> usize {
        usize::from(self.static_info) + usize::from(self.timing) + usize::from(self.dynamic)
    }
}
