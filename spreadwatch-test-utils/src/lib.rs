//! Spreadwatch Test Utilities
//!
//! Shared test infrastructure for the spreadwatch workspace:
//! - A scriptable [`MockMarketFetcher`] with call counters and failure injection
//! - Proptest generators for market payloads and configuration
//! - Fixtures for common market shapes
//! - Assertions for read provenance and retry suppression

pub use spreadwatch_cache::{MarketDataService, MarketFetcher};
pub use spreadwatch_core::{
    CacheConfig, CompositeMarketRecord, FetchError, ManualClock, MarketId, RawMarketObject,
    RawSpread, RawUserPosition, SpreadPrice, SpreadwatchError, SpreadwatchResult, UserAddress,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use spreadwatch_core::encode_u64_vector;

// ============================================================================
// MOCK FETCHER
// ============================================================================

/// Encoded return values of one simulated call, as the ledger hands them back.
type ReturnValues = (Vec<u8>, Vec<u8>);

/// In-memory [`MarketFetcher`].
///
/// Price and position responses are stored as encoded return values and
/// decoded on every call, the same way a real client decodes a simulated
/// transaction.
#[derive(Debug, Default)]
pub struct MockMarketFetcher {
    markets: RwLock<HashMap<MarketId, RawMarketObject>>,
    prices: RwLock<HashMap<MarketId, ReturnValues>>,
    positions: RwLock<HashMap<(MarketId, UserAddress), ReturnValues>>,
    failures: RwLock<HashMap<MarketId, FetchError>>,
    latency: RwLock<Duration>,
    object_calls: AtomicUsize,
    price_calls: AtomicUsize,
    position_calls: AtomicUsize,
}

impl MockMarketFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MockMarketFetcher::insert_market`].
    pub fn with_market(self, market_id: &MarketId, raw: RawMarketObject) -> Self {
        self.insert_market(market_id, raw);
        self
    }

    /// Register a market. Every spread is quoted at an equal price until
    /// [`MockMarketFetcher::set_prices`] says otherwise.
    pub fn insert_market(&self, market_id: &MarketId, raw: RawMarketObject) {
        let spread_count = raw.spreads.len();
        let price = if spread_count == 0 {
            0
        } else {
            1_000_000 / spread_count as u64
        };
        self.set_prices(market_id, &vec![price; spread_count]);
        write(&self.markets).insert(market_id.clone(), raw);
    }

    /// Quote spread `i` at `prices[i]`.
    pub fn set_prices(&self, market_id: &MarketId, prices: &[u64]) {
        let indices: Vec<u64> = (0..prices.len() as u64).collect();
        self.set_price_response(
            market_id,
            encode_u64_vector(&indices),
            encode_u64_vector(prices),
        );
    }

    /// Store raw return bytes for the price call, malformed ones included.
    pub fn set_price_response(&self, market_id: &MarketId, indices: Vec<u8>, prices: Vec<u8>) {
        write(&self.prices).insert(market_id.clone(), (indices, prices));
    }

    pub fn set_position(
        &self,
        market_id: &MarketId,
        user: &UserAddress,
        shares: &[u64],
        values: &[u64],
    ) {
        write(&self.positions).insert(
            (market_id.clone(), user.clone()),
            (encode_u64_vector(shares), encode_u64_vector(values)),
        );
    }

    /// Mutate a registered market in place. Returns false if unknown.
    pub fn update_market<F>(&self, market_id: &MarketId, update: F) -> bool
    where
        F: FnOnce(&mut RawMarketObject),
    {
        match write(&self.markets).get_mut(market_id) {
            Some(raw) => {
                update(raw);
                true
            }
            None => false,
        }
    }

    pub fn set_liquidity(&self, market_id: &MarketId, liquidity: u64) -> bool {
        self.update_market(market_id, |raw| raw.total_liquidity = liquidity)
    }

    /// Make every call for this market fail with `error` until cleared.
    pub fn fail_market(&self, market_id: &MarketId, error: FetchError) {
        write(&self.failures).insert(market_id.clone(), error);
    }

    pub fn clear_failure(&self, market_id: &MarketId) {
        write(&self.failures).remove(market_id);
    }

    /// Delay every call by `latency` (honours `tokio::time::pause`).
    pub fn set_latency(&self, latency: Duration) {
        *write(&self.latency) = latency;
    }

    pub fn object_calls(&self) -> usize {
        self.object_calls.load(Ordering::SeqCst)
    }

    pub fn price_calls(&self) -> usize {
        self.price_calls.load(Ordering::SeqCst)
    }

    pub fn position_calls(&self) -> usize {
        self.position_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.object_calls() + self.price_calls() + self.position_calls()
    }

    pub fn reset_counts(&self) {
        self.object_calls.store(0, Ordering::SeqCst);
        self.price_calls.store(0, Ordering::SeqCst);
        self.position_calls.store(0, Ordering::SeqCst);
    }

    async fn simulate_call(&self, market_id: &MarketId) -> SpreadwatchResult<()> {
        let latency = *read(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match read(&self.failures).get(market_id) {
            Some(error) => Err(error.clone().into()),
            None => Ok(()),
        }
    }

    fn market(&self, market_id: &MarketId) -> SpreadwatchResult<RawMarketObject> {
        read(&self.markets)
            .get(market_id)
            .cloned()
            .ok_or_else(|| not_found(market_id))
    }
}

#[async_trait]
impl MarketFetcher for MockMarketFetcher {
    async fn fetch_market_object(&self, market_id: &MarketId) -> SpreadwatchResult<RawMarketObject> {
        self.object_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_call(market_id).await?;
        self.market(market_id)
    }

    async fn fetch_spread_prices(&self, market_id: &MarketId) -> SpreadwatchResult<Vec<SpreadPrice>> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_call(market_id).await?;
        let (indices, prices) = read(&self.prices)
            .get(market_id)
            .cloned()
            .ok_or_else(|| not_found(market_id))?;
        Ok(SpreadPrice::from_return_values(&indices, &prices)?)
    }

    async fn fetch_user_position(
        &self,
        market_id: &MarketId,
        user: &UserAddress,
    ) -> SpreadwatchResult<RawUserPosition> {
        self.position_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_call(market_id).await?;
        let spread_count = self.market(market_id)?.spreads.len();

        let stored = read(&self.positions)
            .get(&(market_id.clone(), user.clone()))
            .cloned();
        match stored {
            Some((shares, values)) => Ok(RawUserPosition::from_return_values(&shares, &values)?),
            None => Ok(RawUserPosition {
                shares: vec![0; spread_count],
                values: vec![0; spread_count],
            }),
        }
    }
}

fn not_found(market_id: &MarketId) -> SpreadwatchError {
    FetchError::NotFound {
        market_id: market_id.to_string(),
    }
    .into()
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for market payloads.

    use super::*;
    use proptest::prelude::*;

    /// Generate a syntactically valid market id.
    pub fn arb_market_id() -> impl Strategy<Value = MarketId> {
        "0x[0-9a-f]{4,16}".prop_map(|s| MarketId::new(s).expect("pattern is non-empty"))
    }

    /// Generate a spread with `lower_bound < upper_bound`.
    pub fn arb_raw_spread() -> impl Strategy<Value = RawSpread> {
        (0u64..1_000, 1u64..1_000, 0u64..1_000_000).prop_map(|(lower, width, shares)| RawSpread {
            lower_bound: lower,
            upper_bound: lower + width,
            outstanding_shares: shares,
        })
    }

    /// Generate an active market with 1 to 8 spreads.
    pub fn arb_raw_market() -> impl Strategy<Value = RawMarketObject> {
        (
            "[A-Za-z ]{1,40}",
            prop::collection::vec(arb_raw_spread(), 1..8),
            0u64..u64::MAX / 2,
            0u64..1_000_000_000,
        )
            .prop_map(|(question, spreads, liquidity, sold)| RawMarketObject {
                total_liquidity: liquidity,
                cumulative_shares_sold: sold,
                spreads,
                ..fixtures::sample_market(&question)
            })
    }

    /// Generate `n` spread prices.
    pub fn arb_prices(n: usize) -> impl Strategy<Value = Vec<u64>> {
        prop::collection::vec(0u64..10_000_000, n)
    }

    /// Generate a configuration that passes validation.
    pub fn arb_valid_config() -> impl Strategy<Value = CacheConfig> {
        (1u64..5, 1u64..5, 1u64..5, 1u64..5, 1usize..20, 1usize..500, 0u32..=10_000).prop_map(
            |(error, user_gap, dynamic_gap, timing_gap, batch, window, bps)| {
                let error_ttl = Duration::from_secs(error);
                let user_ttl = error_ttl + Duration::from_secs(user_gap);
                let dynamic_ttl = user_ttl + Duration::from_secs(dynamic_gap);
                let timing_ttl = dynamic_ttl + Duration::from_secs(timing_gap);
                CacheConfig::default()
                    .with_error_ttl(error_ttl)
                    .with_user_ttl(user_ttl)
                    .with_dynamic_ttl(dynamic_ttl)
                    .with_timing_ttl(timing_ttl)
                    .with_batch_size(batch)
                    .with_batch_delay(Duration::ZERO)
                    .with_latency_window(window)
                    .with_sell_discount_bps(bps)
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built market shapes.

    use super::*;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;

    /// Fixed start instant for manual clocks: 2023-11-14T22:13:20Z.
    pub const START_SECS: i64 = 1_700_000_000;

    /// Bidding closes one day after [`START_SECS`].
    pub const DEADLINE_MS: u64 = (START_SECS as u64 + 86_400) * 1000;

    /// Resolution one hour after the deadline.
    pub const RESOLUTION_MS: u64 = DEADLINE_MS + 3_600_000;

    pub fn market_id(n: u32) -> MarketId {
        MarketId::new(format!("0x{:08x}", n)).expect("fixture market id is non-empty")
    }

    pub fn user(name: &str) -> UserAddress {
        UserAddress::new(format!("0x{}", name)).expect("fixture address is non-empty")
    }

    pub fn start_time() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(START_SECS, 0).unwrap_or_default()
    }

    pub fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(start_time()))
    }

    /// Defaults without the inter-batch pause.
    pub fn test_config() -> CacheConfig {
        CacheConfig::default().with_batch_delay(Duration::ZERO)
    }

    /// Active market with four spreads over 0..100 and 1,000,000 liquidity.
    pub fn sample_market(question: &str) -> RawMarketObject {
        RawMarketObject {
            question: question.to_string(),
            resolution_criteria: "Official closing figure".to_string(),
            display_tag: "markets".to_string(),
            bidding_deadline_ms: DEADLINE_MS,
            resolution_time_ms: RESOLUTION_MS,
            state: 0,
            total_liquidity: 1_000_000,
            cumulative_shares_sold: 1_000,
            resolved_value: None,
            spreads: [(0, 25, 100), (25, 50, 300), (50, 75, 600), (75, 100, 0)]
                .into_iter()
                .map(|(lower_bound, upper_bound, outstanding_shares)| RawSpread {
                    lower_bound,
                    upper_bound,
                    outstanding_shares,
                })
                .collect(),
        }
    }

    /// Market nobody has traded yet.
    pub fn fresh_market(question: &str) -> RawMarketObject {
        let mut raw = sample_market(question);
        raw.cumulative_shares_sold = 0;
        for spread in &mut raw.spreads {
            spread.outstanding_shares = 0;
        }
        raw
    }

    pub fn resolved_market(question: &str, value: u64) -> RawMarketObject {
        RawMarketObject {
            state: 1,
            resolved_value: Some(value),
            ..sample_market(question)
        }
    }

    /// A fetcher holding `count` sample markets with ids `market_id(0..count)`.
    pub fn populated_fetcher(count: u32) -> MockMarketFetcher {
        let fetcher = MockMarketFetcher::new();
        for n in 0..count {
            fetcher.insert_market(&market_id(n), sample_market(&format!("Market {}", n)));
        }
        fetcher
    }

    /// Service on a manual clock over `fetcher`.
    pub fn service_with_clock(
        fetcher: Arc<MockMarketFetcher>,
        config: CacheConfig,
    ) -> (MarketDataService<MockMarketFetcher>, Arc<ManualClock>) {
        let clock = manual_clock();
        let service = MarketDataService::with_clock(fetcher, config, clock.clone())
            .unwrap_or_else(|e| panic!("fixture config must be valid: {}", e));
        (service, clock)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for read results.

    use super::*;

    pub fn assert_fully_cached(record: &CompositeMarketRecord) {
        assert!(
            record.provenance.fully_cached(),
            "expected every tier from cache, got {:?}",
            record.provenance
        );
    }

    pub fn assert_fully_fetched(record: &CompositeMarketRecord) {
        let p = record.provenance;
        assert!(
            !p.static_from_cache && !p.timing_from_cache && !p.dynamic_from_cache,
            "expected every tier fetched, got {:?}",
            p
        );
    }

    /// Percentages sum to 100 within float tolerance.
    pub fn assert_percentages_normalised(record: &CompositeMarketRecord) {
        if record.dynamic.spreads.is_empty() {
            return;
        }
        let sum: f64 = record.dynamic.spreads.iter().map(|s| s.percentage).sum();
        assert!((sum - 100.0).abs() < 1e-6, "percentages sum to {}", sum);
    }

    pub fn assert_suppressed<T: std::fmt::Debug>(result: &SpreadwatchResult<T>) {
        match result {
            Err(err) => assert!(err.is_suppressed_retry(), "expected suppressed retry, got {}", err),
            Ok(value) => panic!("expected suppressed retry, got Ok({:?})", value),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
