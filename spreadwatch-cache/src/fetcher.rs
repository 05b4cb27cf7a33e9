//! Remote ledger collaborator.
//!
//! The cache never talks to the network itself. Whatever client performs
//! object reads and simulated calls implements [`MarketFetcher`] and hands
//! back already-decoded values; timeouts are that client's business.

use async_trait::async_trait;
use spreadwatch_core::{
    MarketId, RawMarketObject, RawUserPosition, SpreadPrice, SpreadwatchResult, UserAddress,
};

/// Source of market data on cache miss.
///
/// Implementations should be cheap to call concurrently; the read service
/// issues several fetches at once during batch prefetch.
#[async_trait]
pub trait MarketFetcher: Send + Sync {
    /// Read the market object's fields.
    async fn fetch_market_object(&self, market_id: &MarketId) -> SpreadwatchResult<RawMarketObject>;

    /// Current price of every spread, via a simulated call.
    async fn fetch_spread_prices(&self, market_id: &MarketId) -> SpreadwatchResult<Vec<SpreadPrice>>;

    /// A user's shares and their value in one market, via a simulated call.
    async fn fetch_user_position(
        &self,
        market_id: &MarketId,
        user: &UserAddress,
    ) -> SpreadwatchResult<RawUserPosition>;
}
