//! Cache configuration.
//!
//! Every tunable of the market data cache lives in [`CacheConfig`]. Values
//! can be set with the builder methods or loaded from the environment with
//! [`CacheConfig::from_env`], which falls back to the defaults for anything
//! missing or unparseable.

use std::time::Duration;

use crate::error::ConfigError;

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Configuration for the tiered market cache and the read service on top of it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// TTL for deadline/resolution-time entries.
    pub timing_ttl: Duration,
    /// TTL for prices, liquidity and state.
    pub dynamic_ttl: Duration,
    /// TTL for per-user position entries.
    pub user_ttl: Duration,
    /// How long a fetch failure suppresses retries for the same market.
    pub error_ttl: Duration,
    /// Number of markets fetched concurrently during a batch prefetch.
    pub batch_size: usize,
    /// Pause between consecutive prefetch batches.
    pub batch_delay: Duration,
    /// Capacity of the response-time ring buffer.
    pub latency_window: usize,
    /// Discount applied to the buy price to quote a sell price, in basis points.
    pub sell_discount_bps: u32,
    /// Entry count above which the health check flags memory pressure.
    pub max_total_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            timing_ttl: Duration::from_secs(300),
            dynamic_ttl: Duration::from_secs(30),
            user_ttl: Duration::from_secs(15),
            error_ttl: Duration::from_secs(5),
            batch_size: 5,
            batch_delay: Duration::from_millis(100),
            latency_window: 100,
            sell_discount_bps: 500,
            max_total_entries: 1000,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SPREADWATCH_TIMING_TTL_SECS` (default: 300)
    /// - `SPREADWATCH_DYNAMIC_TTL_SECS` (default: 30)
    /// - `SPREADWATCH_USER_TTL_SECS` (default: 15)
    /// - `SPREADWATCH_ERROR_TTL_SECS` (default: 5)
    /// - `SPREADWATCH_BATCH_SIZE` (default: 5)
    /// - `SPREADWATCH_BATCH_DELAY_MS` (default: 100)
    /// - `SPREADWATCH_LATENCY_WINDOW` (default: 100)
    /// - `SPREADWATCH_SELL_DISCOUNT_BPS` (default: 500)
    /// - `SPREADWATCH_MAX_TOTAL_ENTRIES` (default: 1000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    ///
    /// `from_env` is this with `std::env::var`; tests pass a map instead.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            timing_ttl: parse("SPREADWATCH_TIMING_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timing_ttl),
            dynamic_ttl: parse("SPREADWATCH_DYNAMIC_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.dynamic_ttl),
            user_ttl: parse("SPREADWATCH_USER_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.user_ttl),
            error_ttl: parse("SPREADWATCH_ERROR_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.error_ttl),
            batch_size: parse("SPREADWATCH_BATCH_SIZE")
                .map(|v| v as usize)
                .unwrap_or(defaults.batch_size),
            batch_delay: parse("SPREADWATCH_BATCH_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_delay),
            latency_window: parse("SPREADWATCH_LATENCY_WINDOW")
                .map(|v| v as usize)
                .unwrap_or(defaults.latency_window),
            sell_discount_bps: parse("SPREADWATCH_SELL_DISCOUNT_BPS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.sell_discount_bps),
            max_total_entries: parse("SPREADWATCH_MAX_TOTAL_ENTRIES")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_total_entries),
        }
    }

    /// Set the timing tier TTL.
    pub fn with_timing_ttl(mut self, ttl: Duration) -> Self {
        self.timing_ttl = ttl;
        self
    }

    /// Set the dynamic tier TTL.
    pub fn with_dynamic_ttl(mut self, ttl: Duration) -> Self {
        self.dynamic_ttl = ttl;
        self
    }

    /// Set the user tier TTL.
    pub fn with_user_ttl(mut self, ttl: Duration) -> Self {
        self.user_ttl = ttl;
        self
    }

    /// Set the error tier TTL.
    pub fn with_error_ttl(mut self, ttl: Duration) -> Self {
        self.error_ttl = ttl;
        self
    }

    /// Set the prefetch batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the delay between prefetch batches.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Set the latency ring buffer capacity.
    pub fn with_latency_window(mut self, window: usize) -> Self {
        self.latency_window = window;
        self
    }

    /// Set the sell discount in basis points.
    pub fn with_sell_discount_bps(mut self, bps: u32) -> Self {
        self.sell_discount_bps = bps;
        self
    }

    /// Set the entry ceiling used by the health check.
    pub fn with_max_total_entries(mut self, max: usize) -> Self {
        self.max_total_entries = max;
        self
    }

    /// Check the config for values the cache cannot work with.
    ///
    /// TTLs must be strictly ordered error < user < dynamic < timing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ttls = [
            ("error_ttl", self.error_ttl),
            ("user_ttl", self.user_ttl),
            ("dynamic_ttl", self.dynamic_ttl),
            ("timing_ttl", self.timing_ttl),
        ];

        for (field, ttl) in ttls {
            if ttl.is_zero() {
                return Err(invalid(field, format!("{:?}", ttl), "must be non-zero"));
            }
        }

        for pair in ttls.windows(2) {
            let (shorter, longer) = (pair[0], pair[1]);
            if shorter.1 >= longer.1 {
                return Err(invalid(
                    shorter.0,
                    format!("{:?}", shorter.1),
                    format!("must be shorter than {} ({:?})", longer.0, longer.1),
                ));
            }
        }

        if self.batch_size == 0 {
            return Err(invalid("batch_size", "0", "must be at least 1"));
        }
        if self.latency_window == 0 {
            return Err(invalid("latency_window", "0", "must be at least 1"));
        }
        if self.sell_discount_bps > 10_000 {
            return Err(invalid(
                "sell_discount_bps",
                self.sell_discount_bps.to_string(),
                "must not exceed 10000",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.into(),
        reason: reason.into(),
    }
}

// ============================================================================
// HEALTH THRESHOLDS
// ============================================================================

/// Threshold policy for the health check.
///
/// Each pair is (warning band, critical band); only the more severe band
/// applies for a given metric.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthThresholds {
    pub hit_rate_warning: f64,
    pub hit_rate_critical: f64,
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
    pub error_rate_warning: f64,
    pub error_rate_critical: f64,
    pub max_total_entries: usize,
    pub expired_ratio: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            hit_rate_warning: 0.70,
            hit_rate_critical: 0.50,
            latency_warning_ms: 500.0,
            latency_critical_ms: 1000.0,
            error_rate_warning: 0.05,
            error_rate_critical: 0.10,
            max_total_entries: 1000,
            expired_ratio: 0.30,
        }
    }
}

impl HealthThresholds {
    /// Default thresholds with the entry ceiling taken from a cache config.
    pub fn for_config(config: &CacheConfig) -> Self {
        Self {
            max_total_entries: config.max_total_entries,
            ..Self::default()
        }
    }
}
