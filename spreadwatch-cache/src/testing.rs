//! Stub collaborators for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spreadwatch_core::{
    FetchError, ManualClock, MarketId, RawMarketObject, RawSpread, RawUserPosition, SpreadPrice,
    SpreadwatchResult, UserAddress,
};

use crate::fetcher::MarketFetcher;

pub(crate) fn market(id: &str) -> MarketId {
    MarketId::new(id).unwrap()
}

pub(crate) fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
    ))
}

/// Minimal fetcher: one market layout, adjustable liquidity, call counters.
pub(crate) struct StubFetcher {
    pub(crate) liquidity: Mutex<u64>,
    pub(crate) failing: AtomicBool,
    pub(crate) object_calls: AtomicUsize,
    pub(crate) price_calls: AtomicUsize,
    pub(crate) position_calls: AtomicUsize,
}

impl StubFetcher {
    pub(crate) fn new() -> Self {
        Self {
            liquidity: Mutex::new(1_000_000),
            failing: AtomicBool::new(false),
            object_calls: AtomicUsize::new(0),
            price_calls: AtomicUsize::new(0),
            position_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MarketFetcher for StubFetcher {
    async fn fetch_market_object(
        &self,
        market_id: &MarketId,
    ) -> SpreadwatchResult<RawMarketObject> {
        self.object_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Rpc {
                market_id: market_id.to_string(),
                reason: "rate limited".to_string(),
            }
            .into());
        }
        Ok(RawMarketObject {
            question: format!("Q {}", market_id),
            resolution_criteria: "criteria".to_string(),
            display_tag: "tag".to_string(),
            bidding_deadline_ms: 4_000_000_000_000,
            resolution_time_ms: 4_000_000_600_000,
            state: 0,
            total_liquidity: *self.liquidity.lock().unwrap(),
            cumulative_shares_sold: 0,
            resolved_value: None,
            spreads: vec![
                RawSpread {
                    lower_bound: 0,
                    upper_bound: 50,
                    outstanding_shares: 0,
                },
                RawSpread {
                    lower_bound: 50,
                    upper_bound: 100,
                    outstanding_shares: 0,
                },
            ],
        })
    }

    async fn fetch_spread_prices(
        &self,
        _market_id: &MarketId,
    ) -> SpreadwatchResult<Vec<SpreadPrice>> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            SpreadPrice {
                spread_index: 0,
                price: 500,
            },
            SpreadPrice {
                spread_index: 1,
                price: 500,
            },
        ])
    }

    async fn fetch_user_position(
        &self,
        _market_id: &MarketId,
        _user: &UserAddress,
    ) -> SpreadwatchResult<RawUserPosition> {
        self.position_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawUserPosition {
            shares: vec![3, 0],
            values: vec![1500, 0],
        })
    }
}
