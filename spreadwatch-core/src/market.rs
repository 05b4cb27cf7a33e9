//! Market identity, raw remote shapes, and per-tier payloads.
//!
//! Raw types mirror what the ledger collaborator hands back. Tier payloads
//! are what each cache tier stores; they are cut from the raw object so that
//! each tier can expire independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decode::decode_u64_vector;
use crate::error::{DecodeError, ValidationError};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Identifier of a market object on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketId(String);

impl MarketId {
    /// Create a market id, rejecting blank input.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyMarketId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MarketId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Wallet address of a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserAddress(String);

impl UserAddress {
    pub fn new(address: impl Into<String>) -> Result<Self, ValidationError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(ValidationError::EmptyUserAddress);
        }
        Ok(Self(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// ENUMS
// ============================================================================

/// Lifecycle state of a market as stored on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketState {
    Active,
    Resolved,
    Canceled,
    Unknown(u8),
}

impl MarketState {
    /// Map the on-ledger numeric state.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Active,
            1 => Self::Resolved,
            2 => Self::Canceled,
            other => Self::Unknown(other),
        }
    }

    /// Label shown to users.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Resolved => "Resolved",
            Self::Canceled => "Canceled",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The five independent cache tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Static,
    Timing,
    Dynamic,
    User,
    Error,
}

impl TierKind {
    pub const ALL: [TierKind; 5] = [
        TierKind::Static,
        TierKind::Timing,
        TierKind::Dynamic,
        TierKind::User,
        TierKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Timing => "timing",
            Self::Dynamic => "dynamic",
            Self::User => "user",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RAW REMOTE SHAPES
// ============================================================================

/// One spread as stored on the market object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSpread {
    pub lower_bound: u64,
    pub upper_bound: u64,
    pub outstanding_shares: u64,
}

/// Market object fields as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMarketObject {
    pub question: String,
    pub resolution_criteria: String,
    pub display_tag: String,
    /// Milliseconds since the Unix epoch.
    pub bidding_deadline_ms: u64,
    /// Milliseconds since the Unix epoch.
    pub resolution_time_ms: u64,
    pub state: u8,
    pub total_liquidity: u64,
    pub cumulative_shares_sold: u64,
    pub resolved_value: Option<u64>,
    pub spreads: Vec<RawSpread>,
}

/// Price quote for one spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadPrice {
    pub spread_index: usize,
    pub price: u64,
}

impl SpreadPrice {
    /// Build quotes from the two decoded return values of the price call:
    /// spread indices and prices, position-aligned.
    pub fn from_return_values(
        indices: &[u8],
        prices: &[u8],
    ) -> Result<Vec<SpreadPrice>, DecodeError> {
        let indices = decode_u64_vector(indices)?;
        let prices = decode_u64_vector(prices)?;
        if indices.len() != prices.len() {
            return Err(DecodeError::LengthMismatch {
                field: "spread_prices".to_string(),
                expected: indices.len(),
                got: prices.len(),
            });
        }

        indices
            .into_iter()
            .zip(prices)
            .map(|(index, price)| {
                let spread_index =
                    usize::try_from(index).map_err(|_| DecodeError::UnknownSpread { index })?;
                Ok(SpreadPrice {
                    spread_index,
                    price,
                })
            })
            .collect()
    }
}

/// A user's holdings in one market as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUserPosition {
    /// Shares held, one entry per spread.
    pub shares: Vec<u64>,
    /// Current value of those shares, one entry per spread.
    pub values: Vec<u64>,
}

impl RawUserPosition {
    /// Build from the two decoded return values of the position call.
    pub fn from_return_values(shares: &[u8], values: &[u8]) -> Result<Self, DecodeError> {
        let shares = decode_u64_vector(shares)?;
        let values = decode_u64_vector(values)?;
        if shares.len() != values.len() {
            return Err(DecodeError::LengthMismatch {
                field: "user_position".to_string(),
                expected: shares.len(),
                got: values.len(),
            });
        }
        Ok(Self { shares, values })
    }
}

// ============================================================================
// TIER PAYLOADS
// ============================================================================

/// Immutable market metadata (Static tier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticMarketInfo {
    pub question: String,
    pub resolution_criteria: String,
    pub display_tag: String,
    /// One label per spread, "lower-upper".
    pub spread_labels: Vec<String>,
}

impl StaticMarketInfo {
    pub fn from_raw(raw: &RawMarketObject) -> Self {
        Self {
            question: raw.question.clone(),
            resolution_criteria: raw.resolution_criteria.clone(),
            display_tag: raw.display_tag.clone(),
            spread_labels: raw
                .spreads
                .iter()
                .map(|s| format!("{}-{}", s.lower_bound, s.upper_bound))
                .collect(),
        }
    }
}

/// Deadlines (Timing tier).
///
/// Only the raw instants are cached. Flags that compare against "now" are
/// derived on every read by [`crate::composite::TimingView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingInfo {
    pub bidding_deadline: DateTime<Utc>,
    pub resolution_time: DateTime<Utc>,
}

impl TimingInfo {
    pub fn from_raw(raw: &RawMarketObject) -> Self {
        Self {
            bidding_deadline: millis_to_datetime(raw.bidding_deadline_ms),
            resolution_time: millis_to_datetime(raw.resolution_time_ms),
        }
    }
}

/// Per-spread trading figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadFigures {
    pub lower_bound: u64,
    pub upper_bound: u64,
    pub outstanding_shares: u64,
    pub price: u64,
}

/// Trading state (Dynamic tier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicMarketInfo {
    pub state: MarketState,
    pub total_liquidity: u64,
    pub cumulative_shares_sold: u64,
    pub resolved_value: Option<u64>,
    pub spreads: Vec<SpreadFigures>,
}

impl DynamicMarketInfo {
    /// Join the object's spreads with their quoted prices.
    ///
    /// Every spread must be quoted exactly once.
    pub fn from_raw(raw: &RawMarketObject, prices: &[SpreadPrice]) -> Result<Self, DecodeError> {
        let mut quoted: Vec<Option<u64>> = vec![None; raw.spreads.len()];
        for quote in prices {
            let index = quote.spread_index as u64;
            let slot = quoted
                .get_mut(quote.spread_index)
                .ok_or(DecodeError::UnknownSpread { index })?;
            if slot.replace(quote.price).is_some() {
                return Err(DecodeError::DuplicateSpread { index });
            }
        }

        let spreads = raw
            .spreads
            .iter()
            .zip(quoted)
            .map(|(s, price)| {
                price
                    .map(|price| SpreadFigures {
                        lower_bound: s.lower_bound,
                        upper_bound: s.upper_bound,
                        outstanding_shares: s.outstanding_shares,
                        price,
                    })
                    .ok_or_else(|| DecodeError::LengthMismatch {
                        field: "spread_prices".to_string(),
                        expected: raw.spreads.len(),
                        got: prices.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            state: MarketState::from_code(raw.state),
            total_liquidity: raw.total_liquidity,
            cumulative_shares_sold: raw.cumulative_shares_sold,
            resolved_value: raw.resolved_value,
            spreads,
        })
    }

    pub fn total_outstanding_shares(&self) -> u64 {
        self.spreads
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.outstanding_shares))
    }
}

/// A user's holding in one spread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadPosition {
    pub spread_index: usize,
    pub shares: u64,
    pub value: u64,
}

/// A user's positions in one market (User tier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPositionData {
    pub market_id: MarketId,
    pub user: UserAddress,
    /// Spreads with a non-zero share count.
    pub positions: Vec<SpreadPosition>,
    pub total_value: u64,
}

impl UserPositionData {
    pub fn from_raw(market_id: MarketId, user: UserAddress, raw: &RawUserPosition) -> Self {
        let positions: Vec<SpreadPosition> = raw
            .shares
            .iter()
            .zip(&raw.values)
            .enumerate()
            .filter(|(_, (shares, _))| **shares > 0)
            .map(|(spread_index, (shares, value))| SpreadPosition {
                spread_index,
                shares: *shares,
                value: *value,
            })
            .collect();
        let total_value = positions
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(p.value));

        Self {
            market_id,
            user,
            positions,
            total_value,
        }
    }

    pub fn has_positions(&self) -> bool {
        !self.positions.is_empty()
    }
}

fn millis_to_datetime(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
