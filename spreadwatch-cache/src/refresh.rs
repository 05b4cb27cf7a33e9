//! Consumer-facing refresh layer.
//!
//! UI code does not talk to the read service directly. It asks for a market
//! at a chosen [`Freshness`], forces a refresh after a trade, or subscribes
//! to periodic refresh and renders whatever the subscription last published.

use std::sync::Arc;
use std::time::Duration;

use spreadwatch_core::{
    CompositeMarketRecord, MarketId, MarketSnapshot, SpreadwatchError, SpreadwatchResult,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::fetcher::MarketFetcher;
use crate::freshness::Freshness;
use crate::service::MarketDataService;

/// Outcome of [`MarketRefresher::read`].
#[derive(Debug, Clone, PartialEq)]
pub enum MarketRead {
    /// Every tier was available.
    Record(Box<CompositeMarketRecord>),
    /// Cached-only read with at least one tier missing or expired.
    Partial(MarketSnapshot),
}

impl MarketRead {
    pub fn record(&self) -> Option<&CompositeMarketRecord> {
        match self {
            Self::Record(record) => Some(record.as_ref()),
            Self::Partial(_) => None,
        }
    }

    pub fn into_record(self) -> Option<CompositeMarketRecord> {
        match self {
            Self::Record(record) => Some(*record),
            Self::Partial(_) => None,
        }
    }
}

/// Value published by a [`MarketSubscription`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionUpdate {
    /// Nothing published yet.
    Pending,
    Record(Box<CompositeMarketRecord>),
    Failed(SpreadwatchError),
}

impl SubscriptionUpdate {
    pub fn record(&self) -> Option<&CompositeMarketRecord> {
        match self {
            Self::Record(record) => Some(record.as_ref()),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl From<SpreadwatchResult<CompositeMarketRecord>> for SubscriptionUpdate {
    fn from(result: SpreadwatchResult<CompositeMarketRecord>) -> Self {
        match result {
            Ok(record) => Self::Record(Box::new(record)),
            Err(err) => Self::Failed(err),
        }
    }
}

/// Read, refresh and subscribe entry points over a shared service.
pub struct MarketRefresher<F>
where
    F: MarketFetcher,
{
    service: Arc<MarketDataService<F>>,
}

impl<F> MarketRefresher<F>
where
    F: MarketFetcher + 'static,
{
    pub fn new(service: Arc<MarketDataService<F>>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<MarketDataService<F>> {
        &self.service
    }

    /// Read a market at the requested freshness.
    ///
    /// `CachedOnly` never fails and never fetches.
    pub async fn read(
        &self,
        market_id: &MarketId,
        freshness: Freshness,
    ) -> SpreadwatchResult<MarketRead> {
        match freshness {
            Freshness::CachedOnly => Ok(match self.service.peek_record(market_id) {
                Some(record) => MarketRead::Record(Box::new(record)),
                None => MarketRead::Partial(self.service.peek_market(market_id)),
            }),
            Freshness::ReadThrough => self
                .service
                .get_market_info(market_id)
                .await
                .map(|record| MarketRead::Record(Box::new(record))),
            Freshness::ForceRefresh => self
                .force_refresh(market_id)
                .await
                .map(|record| MarketRead::Record(Box::new(record))),
        }
    }

    /// Drop the market's expiring tiers and any remembered failure, then read
    /// it again. Static metadata stays cached.
    pub async fn force_refresh(
        &self,
        market_id: &MarketId,
    ) -> SpreadwatchResult<CompositeMarketRecord> {
        let dropped = self.service.invalidate_market(market_id);
        debug!(market_id = %market_id, dropped, "Forcing market refresh");
        self.service.get_market_info(market_id).await
    }

    /// Re-read a market every `period` on a background task.
    ///
    /// The first read starts immediately. Reads go through the cache, so a
    /// period shorter than the dynamic TTL mostly republishes cached values.
    pub fn subscribe(&self, market_id: MarketId, period: Duration) -> MarketSubscription {
        let (tx, rx) = watch::channel(SubscriptionUpdate::Pending);
        let service = Arc::clone(&self.service);
        let task_market = market_id.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let update = SubscriptionUpdate::from(service.get_market_info(&task_market).await);
                if tx.send(update).is_err() {
                    debug!(market_id = %task_market, "Subscription has no receivers, stopping");
                    break;
                }
            }
        });

        debug!(
            market_id = %market_id,
            period_ms = period.as_millis() as u64,
            "Market subscription started"
        );
        MarketSubscription {
            market_id,
            receiver: rx,
            handle,
        }
    }
}

impl<F> Clone for MarketRefresher<F>
where
    F: MarketFetcher,
{
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

/// Handle to a periodic refresh. Dropping it stops the refresh task.
#[derive(Debug)]
pub struct MarketSubscription {
    market_id: MarketId,
    receiver: watch::Receiver<SubscriptionUpdate>,
    handle: JoinHandle<()>,
}

impl MarketSubscription {
    pub fn market_id(&self) -> &MarketId {
        &self.market_id
    }

    /// The most recently published update.
    pub fn latest(&self) -> SubscriptionUpdate {
        self.receiver.borrow().clone()
    }

    /// Wait for the next update. `None` once the refresh task has stopped.
    pub async fn changed(&mut self) -> Option<SubscriptionUpdate> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Stop refreshing.
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for MarketSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{manual_clock, market, StubFetcher};
    use spreadwatch_core::{CacheConfig, ManualClock};
    use std::sync::atomic::Ordering;

    fn setup() -> (MarketRefresher<StubFetcher>, Arc<StubFetcher>, Arc<ManualClock>) {
        let fetcher = Arc::new(StubFetcher::new());
        let clock = manual_clock();
        let service =
            MarketDataService::with_clock(fetcher.clone(), CacheConfig::default(), clock.clone())
                .unwrap();
        (MarketRefresher::new(Arc::new(service)), fetcher, clock)
    }

    #[tokio::test]
    async fn test_cached_only_never_fetches() {
        let (refresher, fetcher, _clock) = setup();
        let m = market("0xa");

        let read = refresher.read(&m, Freshness::CachedOnly).await.unwrap();
        assert!(matches!(read, MarketRead::Partial(ref s) if s.is_empty()));
        assert_eq!(fetcher.object_calls.load(Ordering::SeqCst), 0);

        refresher.read(&m, Freshness::ReadThrough).await.unwrap();
        let read = refresher.read(&m, Freshness::CachedOnly).await.unwrap();
        assert!(read.record().unwrap().provenance.fully_cached());
    }

    #[tokio::test]
    async fn test_force_refresh_keeps_static() {
        let (refresher, fetcher, _clock) = setup();
        let m = market("0xa");
        refresher.read(&m, Freshness::ReadThrough).await.unwrap();

        *fetcher.liquidity.lock().unwrap() = 7;
        let read = refresher.read(&m, Freshness::ForceRefresh).await.unwrap();
        let record = read.into_record().unwrap();

        assert!(record.provenance.static_from_cache);
        assert!(!record.provenance.timing_from_cache);
        assert!(!record.provenance.dynamic_from_cache);
        assert_eq!(record.dynamic.total_liquidity, 7);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_suppression() {
        let (refresher, fetcher, _clock) = setup();
        let m = market("0xa");

        fetcher.failing.store(true, Ordering::SeqCst);
        assert!(refresher.read(&m, Freshness::ReadThrough).await.is_err());
        fetcher.failing.store(false, Ordering::SeqCst);

        let err = refresher.read(&m, Freshness::ReadThrough).await.unwrap_err();
        assert!(err.is_suppressed_retry());
        assert!(refresher.force_refresh(&m).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_publishes_refreshes() {
        let (refresher, fetcher, clock) = setup();
        let mut subscription = refresher.subscribe(market("0xa"), Duration::from_secs(30));

        let first = subscription.changed().await.unwrap();
        assert_eq!(first.record().unwrap().dynamic.total_liquidity, 1_000_000);

        *fetcher.liquidity.lock().unwrap() = 2_000_000;
        clock.advance(Duration::from_secs(30));

        let second = subscription.changed().await.unwrap();
        let record = second.record().unwrap();
        assert_eq!(record.dynamic.total_liquidity, 2_000_000);
        assert!(!record.provenance.dynamic_from_cache);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_publishes_failures() {
        let (refresher, fetcher, _clock) = setup();
        fetcher.failing.store(true, Ordering::SeqCst);

        let mut subscription = refresher.subscribe(market("0xa"), Duration::from_secs(1));
        let update = subscription.changed().await.unwrap();
        assert!(matches!(update, SubscriptionUpdate::Failed(SpreadwatchError::Fetch(_))));

        let update = subscription.changed().await.unwrap();
        assert!(matches!(update, SubscriptionUpdate::Failed(ref e) if e.is_suppressed_retry()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_subscription_stops_refresh() {
        let (refresher, fetcher, _clock) = setup();
        let mut subscription = refresher.subscribe(market("0xa"), Duration::from_secs(1));
        subscription.changed().await.unwrap();
        drop(subscription);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fetcher.object_calls.load(Ordering::SeqCst), 1);
    }
}
