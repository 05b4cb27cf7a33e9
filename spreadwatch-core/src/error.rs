//! Error types for spreadwatch operations

use std::time::Duration;
use thiserror::Error;

/// Failures raised by the remote ledger collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("RPC call for market {market_id} failed: {reason}")]
    Rpc { market_id: String, reason: String },

    #[error("RPC call for market {market_id} timed out")]
    Timeout { market_id: String },

    #[error("Market not found: {market_id}")]
    NotFound { market_id: String },

    #[error("Position lookup for {user} on market {market_id} failed: {reason}")]
    UserPosition {
        market_id: String,
        user: String,
        reason: String,
    },
}

/// Remote payload did not have the expected shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated payload: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("Length prefix overflows a 64-bit length")]
    LengthOverflow,

    #[error("{remaining} trailing bytes after decoded payload")]
    TrailingBytes { remaining: usize },

    #[error("Length mismatch for {field}: expected {expected}, got {got}")]
    LengthMismatch {
        field: String,
        expected: usize,
        got: usize,
    },

    #[error("Spread index {index} does not exist on this market")]
    UnknownSpread { index: u64 },

    #[error("Spread index {index} is quoted more than once")]
    DuplicateSpread { index: u64 },
}

/// Invalid caller input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Market id must not be empty")]
    EmptyMarketId,

    #[error("User address must not be empty")]
    EmptyUserAddress,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all spreadwatch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpreadwatchError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Market {market_id} failed recently, retry after {retry_after:?}: {last_error}")]
    SuppressedRetry {
        market_id: String,
        retry_after: Duration,
        last_error: String,
    },
}

impl SpreadwatchError {
    /// True when the call was rejected by the error tier without a round trip.
    pub fn is_suppressed_retry(&self) -> bool {
        matches!(self, Self::SuppressedRetry { .. })
    }

    /// True when a later attempt could plausibly succeed.
    ///
    /// Caller mistakes and bad configuration never resolve on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(FetchError::NotFound { .. }) => false,
            Self::Fetch(_) | Self::Decode(_) | Self::SuppressedRetry { .. } => true,
            Self::Validation(_) | Self::Config(_) => false,
        }
    }
}

/// Result type alias for spreadwatch operations.
pub type SpreadwatchResult<T> = Result<T, SpreadwatchError>;

// =============================================================================
// TESTS
// =============================================================================
