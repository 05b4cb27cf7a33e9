//! Spreadwatch Core - Market Types
//!
//! Data structures shared by the market data cache and its consumers:
//! identifiers, the raw shapes returned by the ledger, per-tier payloads,
//! the composite view, configuration and the error taxonomy.
//! This crate performs no I/O.

pub mod clock;
pub mod composite;
pub mod config;
pub mod decode;
pub mod error;
pub mod health;
pub mod market;

pub use clock::{Clock, ManualClock, SystemClock};
pub use composite::{
    sell_price, spread_percentages, AssemblyContext, CompositeMarketRecord, DynamicView,
    MarketSnapshot, Provenance, SpreadView, TierState, TimingView,
};
pub use config::{CacheConfig, HealthThresholds};
pub use decode::{
    decode_u64_vector, decode_u64_vector_prefix, decode_u64_vectors, encode_u64_vector,
};
pub use error::{
    ConfigError, DecodeError, FetchError, SpreadwatchError, SpreadwatchResult, ValidationError,
};
pub use health::{HealthReport, HealthStatus, HEALTHY_SCORE, WARNING_SCORE};
pub use market::{
    DynamicMarketInfo, MarketId, MarketState, RawMarketObject, RawSpread, RawUserPosition,
    SpreadFigures, SpreadPosition, SpreadPrice, StaticMarketInfo, TierKind, TimingInfo,
    UserAddress, UserPositionData,
};
