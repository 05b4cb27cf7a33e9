//! Composite market view assembled from the cache tiers.
//!
//! A [`MarketSnapshot`] starts with every tier pending and is enriched one
//! tier at a time. Once all three market tiers are known it can be promoted
//! to a [`CompositeMarketRecord`], the view-model handed to consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::market::{DynamicMarketInfo, MarketId, MarketState, StaticMarketInfo, TimingInfo};

/// Basis-point denominator.
const BPS: u128 = 10_000;

// ============================================================================
// TIER STATE
// ============================================================================

/// Whether a tier's contribution to a snapshot is known yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum TierState<T> {
    Known(T),
    #[default]
    Pending,
}

impl<T> TierState<T> {
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    pub fn as_known(&self) -> Option<&T> {
        match self {
            Self::Known(value) => Some(value),
            Self::Pending => None,
        }
    }

}

impl<T> From<Option<T>> for TierState<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Pending, Self::Known)
    }
}

// ============================================================================
// DERIVED VIEWS
// ============================================================================

/// Deadlines plus flags evaluated against a specific "now".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingView {
    pub bidding_deadline: DateTime<Utc>,
    pub resolution_time: DateTime<Utc>,
    pub bidding_open: bool,
    pub resolved: bool,
    /// Zero once the deadline has passed.
    pub time_until_deadline: Duration,
}

impl TimingView {
    /// Derive the flags. `state` is the market state when known; without it
    /// the deadlines alone decide.
    pub fn derive(timing: &TimingInfo, state: Option<MarketState>, now: DateTime<Utc>) -> Self {
        let before_deadline = now < timing.bidding_deadline;
        let bidding_open = before_deadline && matches!(state, None | Some(MarketState::Active));
        let resolved =
            matches!(state, Some(MarketState::Resolved)) || now >= timing.resolution_time;
        let time_until_deadline = (timing.bidding_deadline - now)
            .to_std()
            .unwrap_or(Duration::ZERO);

        Self {
            bidding_deadline: timing.bidding_deadline,
            resolution_time: timing.resolution_time,
            bidding_open,
            resolved,
            time_until_deadline,
        }
    }
}

/// One spread as displayed: bounds, shares, buy/sell quotes and share of the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadView {
    pub index: usize,
    pub label: String,
    pub lower_bound: u64,
    pub upper_bound: u64,
    pub outstanding_shares: u64,
    pub buy_price: u64,
    /// Absent when nobody holds shares to sell back.
    pub sell_price: Option<u64>,
    pub percentage: f64,
}

/// Dynamic figures with display derivations applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicView {
    pub state: MarketState,
    pub state_label: String,
    pub total_liquidity: u64,
    pub cumulative_shares_sold: u64,
    pub total_outstanding_shares: u64,
    pub resolved_value: Option<u64>,
    pub spreads: Vec<SpreadView>,
}

impl DynamicView {
    /// Apply pricing and distribution derivations.
    ///
    /// `labels` come from the static tier when available; missing labels are
    /// rebuilt from the spread bounds.
    pub fn derive(dynamic: &DynamicMarketInfo, labels: &[String], sell_discount_bps: u32) -> Self {
        let total_outstanding = dynamic.total_outstanding_shares();
        let shares: Vec<u64> = dynamic
            .spreads
            .iter()
            .map(|s| s.outstanding_shares)
            .collect();
        let percentages = spread_percentages(&shares);

        let spreads = dynamic
            .spreads
            .iter()
            .zip(percentages)
            .enumerate()
            .map(|(index, (spread, percentage))| SpreadView {
                index,
                label: labels
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| format!("{}-{}", spread.lower_bound, spread.upper_bound)),
                lower_bound: spread.lower_bound,
                upper_bound: spread.upper_bound,
                outstanding_shares: spread.outstanding_shares,
                buy_price: spread.price,
                sell_price: sell_price(spread.price, spread.outstanding_shares, sell_discount_bps),
                percentage,
            })
            .collect();

        Self {
            state: dynamic.state,
            state_label: dynamic.state.label().to_string(),
            total_liquidity: dynamic.total_liquidity,
            cumulative_shares_sold: dynamic.cumulative_shares_sold,
            total_outstanding_shares: total_outstanding,
            resolved_value: dynamic.resolved_value,
            spreads,
        }
    }
}

/// Sell quote: the buy price minus the discount, only when shares are outstanding.
pub fn sell_price(buy_price: u64, outstanding_shares: u64, discount_bps: u32) -> Option<u64> {
    if outstanding_shares == 0 {
        return None;
    }
    let keep = BPS.saturating_sub(u128::from(discount_bps));
    let discounted = u128::from(buy_price) * keep / BPS;
    Some(discounted as u64)
}

/// Share of total outstanding per spread, in percent.
///
/// With nothing outstanding every spread gets an equal share, so the result
/// always sums to 100 for a non-empty input.
pub fn spread_percentages(outstanding: &[u64]) -> Vec<f64> {
    if outstanding.is_empty() {
        return Vec::new();
    }

    let total: u128 = outstanding.iter().map(|s| u128::from(*s)).sum();
    if total == 0 {
        let equal = 100.0 / outstanding.len() as f64;
        return vec![equal; outstanding.len()];
    }

    outstanding
        .iter()
        .map(|s| (*s as f64 / total as f64) * 100.0)
        .collect()
}

// ============================================================================
// SNAPSHOT AND RECORD
// ============================================================================

/// Which tiers were served from cache rather than fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub static_from_cache: bool,
    pub timing_from_cache: bool,
    pub dynamic_from_cache: bool,
}

impl Provenance {
    pub fn fully_cached(&self) -> bool {
        self.static_from_cache && self.timing_from_cache && self.dynamic_from_cache
    }
}

/// Partially known view of a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub market_id: MarketId,
    pub static_info: TierState<StaticMarketInfo>,
    pub timing: TierState<TimingInfo>,
    pub dynamic: TierState<DynamicMarketInfo>,
}

impl MarketSnapshot {
    pub fn empty(market_id: MarketId) -> Self {
        Self {
            market_id,
            static_info: TierState::Pending,
            timing: TierState::Pending,
            dynamic: TierState::Pending,
        }
    }

    pub fn with_static(mut self, info: StaticMarketInfo) -> Self {
        self.static_info = TierState::Known(info);
        self
    }

    pub fn with_timing(mut self, timing: TimingInfo) -> Self {
        self.timing = TierState::Known(timing);
        self
    }

    pub fn with_dynamic(mut self, dynamic: DynamicMarketInfo) -> Self {
        self.dynamic = TierState::Known(dynamic);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.static_info.is_known() && self.timing.is_known() && self.dynamic.is_known()
    }

    pub fn is_empty(&self) -> bool {
        !self.static_info.is_known() && !self.timing.is_known() && !self.dynamic.is_known()
    }

    /// Timing flags for whatever is known right now.
    pub fn timing_view(&self, now: DateTime<Utc>) -> Option<TimingView> {
        let state = self.dynamic.as_known().map(|d| d.state);
        self.timing
            .as_known()
            .map(|timing| TimingView::derive(timing, state, now))
    }

    /// Promote to a full record, or hand the snapshot back if a tier is pending.
    pub fn complete(self, ctx: &AssemblyContext) -> Result<CompositeMarketRecord, MarketSnapshot> {
        match (self.static_info, self.timing, self.dynamic) {
            (TierState::Known(static_info), TierState::Known(timing), TierState::Known(dynamic)) => {
                Ok(CompositeMarketRecord::assemble(
                    self.market_id,
                    static_info,
                    &timing,
                    &dynamic,
                    ctx,
                ))
            }
            (static_info, timing, dynamic) => Err(MarketSnapshot {
                market_id: self.market_id,
                static_info,
                timing,
                dynamic,
            }),
        }
    }
}

/// Per-read inputs to record assembly that do not come from the tiers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssemblyContext {
    pub provenance: Provenance,
    pub fetch_latency: Duration,
    pub now: DateTime<Utc>,
    pub sell_discount_bps: u32,
}

/// Fully assembled market view. Rebuilt on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeMarketRecord {
    pub market_id: MarketId,
    pub static_info: StaticMarketInfo,
    pub timing: TimingView,
    pub dynamic: DynamicView,
    pub provenance: Provenance,
    pub fetch_latency: Duration,
}

impl CompositeMarketRecord {
    /// Merge the three market tiers into a view-model.
    pub fn assemble(
        market_id: MarketId,
        static_info: StaticMarketInfo,
        timing: &TimingInfo,
        dynamic: &DynamicMarketInfo,
        ctx: &AssemblyContext,
    ) -> Self {
        let timing_view = TimingView::derive(timing, Some(dynamic.state), ctx.now);
        let dynamic_view =
            DynamicView::derive(dynamic, &static_info.spread_labels, ctx.sell_discount_bps);
        Self {
            market_id,
            static_info,
            timing: timing_view,
            dynamic: dynamic_view,
            provenance: ctx.provenance,
            fetch_latency: ctx.fetch_latency,
        }
    }

    pub fn question(&self) -> &str {
        &self.static_info.question
    }

    pub fn state_label(&self) -> &str {
        &self.dynamic.state_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::SpreadFigures;
    use proptest::prelude::*;

    fn timing(deadline_secs: i64, resolution_secs: i64) -> TimingInfo {
        TimingInfo {
            bidding_deadline: DateTime::<Utc>::from_timestamp(deadline_secs, 0).unwrap(),
            resolution_time: DateTime::<Utc>::from_timestamp(resolution_secs, 0).unwrap(),
        }
    }

    fn dynamic(shares: &[u64], prices: &[u64]) -> DynamicMarketInfo {
        DynamicMarketInfo {
            state: MarketState::Active,
            total_liquidity: 1_000_000,
            cumulative_shares_sold: shares.iter().sum(),
            resolved_value: None,
            spreads: shares
                .iter()
                .zip(prices)
                .enumerate()
                .map(|(i, (s, p))| SpreadFigures {
                    lower_bound: i as u64 * 10,
                    upper_bound: (i as u64 + 1) * 10,
                    outstanding_shares: *s,
                    price: *p,
                })
                .collect(),
        }
    }

    fn static_info() -> StaticMarketInfo {
        StaticMarketInfo {
            question: "Q".to_string(),
            resolution_criteria: "C".to_string(),
            display_tag: "tag".to_string(),
            spread_labels: vec!["0-10".to_string(), "10-20".to_string()],
        }
    }

    #[test]
    fn test_equal_split_when_nothing_outstanding() {
        let p = spread_percentages(&[0, 0, 0, 0]);
        assert_eq!(p, vec![25.0; 4]);
    }

    #[test]
    fn test_proportional_split() {
        let p = spread_percentages(&[30, 10]);
        assert!((p[0] - 75.0).abs() < 1e-9);
        assert!((p[1] - 25.0).abs() < 1e-9);
        assert!(spread_percentages(&[]).is_empty());
    }

    #[test]
    fn test_sell_price_requires_outstanding_shares() {
        assert_eq!(sell_price(1000, 0, 500), None);
        assert_eq!(sell_price(1000, 3, 500), Some(950));
        assert_eq!(sell_price(1000, 3, 0), Some(1000));
        assert_eq!(sell_price(u64::MAX, 1, 0), Some(u64::MAX));
    }

    #[test]
    fn test_timing_flags_follow_now() {
        let t = timing(1_000, 2_000);
        let before = DateTime::<Utc>::from_timestamp(500, 0).unwrap();
        let between = DateTime::<Utc>::from_timestamp(1_500, 0).unwrap();
        let after = DateTime::<Utc>::from_timestamp(2_000, 0).unwrap();

        let view = TimingView::derive(&t, Some(MarketState::Active), before);
        assert!(view.bidding_open);
        assert!(!view.resolved);
        assert_eq!(view.time_until_deadline, Duration::from_secs(500));

        let view = TimingView::derive(&t, Some(MarketState::Active), between);
        assert!(!view.bidding_open);
        assert!(!view.resolved);
        assert_eq!(view.time_until_deadline, Duration::ZERO);

        let view = TimingView::derive(&t, None, after);
        assert!(view.resolved);
    }

    #[test]
    fn test_resolved_state_closes_bidding_early() {
        let t = timing(1_000, 2_000);
        let before = DateTime::<Utc>::from_timestamp(500, 0).unwrap();
        let view = TimingView::derive(&t, Some(MarketState::Resolved), before);
        assert!(!view.bidding_open);
        assert!(view.resolved);
    }

    #[test]
    fn test_snapshot_completes_only_with_all_tiers() {
        let id = MarketId::new("0xm").unwrap();
        let now = DateTime::<Utc>::from_timestamp(0, 0).unwrap();

        let partial = MarketSnapshot::empty(id.clone())
            .with_static(static_info())
            .with_timing(timing(10, 20));
        assert!(!partial.is_complete());
        let ctx = AssemblyContext {
            provenance: Provenance::default(),
            fetch_latency: Duration::from_millis(5),
            now,
            sell_discount_bps: 500,
        };
        let partial = partial.complete(&ctx).unwrap_err();
        assert!(partial.static_info.is_known());
        assert!(!partial.dynamic.is_known());

        let record = partial
            .with_dynamic(dynamic(&[30, 10], &[700, 300]))
            .complete(&ctx)
            .unwrap();
        assert_eq!(record.question(), "Q");
        assert_eq!(record.state_label(), "Active");
        assert_eq!(record.dynamic.spreads[0].label, "0-10");
        assert_eq!(record.dynamic.spreads[0].sell_price, Some(665));
        assert!(record.timing.bidding_open);
        assert_eq!(record.fetch_latency, Duration::from_millis(5));
    }

    #[test]
    fn test_snapshot_timing_view_uses_known_state() {
        let id = MarketId::new("0xm").unwrap();
        let now = DateTime::<Utc>::from_timestamp(500, 0).unwrap();

        assert_eq!(MarketSnapshot::empty(id.clone()).timing_view(now), None);

        // Deadlines alone while the dynamic tier is pending
        let snapshot = MarketSnapshot::empty(id).with_timing(timing(1_000, 2_000));
        let view = snapshot.timing_view(now).unwrap();
        assert!(view.bidding_open);
        assert_eq!(view.time_until_deadline, Duration::from_secs(500));

        let mut resolved = dynamic(&[1, 1], &[1, 1]);
        resolved.state = MarketState::Resolved;
        let view = snapshot.with_dynamic(resolved).timing_view(now).unwrap();
        assert!(!view.bidding_open);
        assert!(view.resolved);
    }

    #[test]
    fn test_missing_labels_fall_back_to_bounds() {
        let view = DynamicView::derive(&dynamic(&[0, 0, 0], &[1, 2, 3]), &[], 500);
        assert_eq!(view.spreads[2].label, "20-30");
        assert!(view.spreads.iter().all(|s| s.sell_price.is_none()));
    }

    #[test]
    fn test_tier_state_from_option() {
        let known: TierState<u8> = Some(3).into();
        let pending: TierState<u8> = None.into();
        assert_eq!(known.as_known(), Some(&3));
        assert!(!pending.is_known());
        assert_eq!(TierState::<u8>::default(), TierState::Pending);
    }

    proptest! {
        #[test]
        fn prop_percentages_sum_to_100(shares in proptest::collection::vec(0u64..1_000_000_000, 1..32)) {
            let total: f64 = spread_percentages(&shares).iter().sum();
            prop_assert!((total - 100.0).abs() < 1e-6);
        }

        #[test]
        fn prop_sell_never_exceeds_buy(buy in any::<u64>(), shares in 1u64..u64::MAX, bps in 0u32..=10_000) {
            let sell = sell_price(buy, shares, bps).unwrap();
            prop_assert!(sell <= buy);
        }
    }
}
