//! Request outcome accounting.
//!
//! Counts hits, misses and errors, and keeps the most recent response times
//! in a bounded ring buffer (oldest sample evicted first). Rates are derived
//! from the counters when a snapshot is taken.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Below this hit rate performance counts as degraded.
pub const DEGRADED_HIT_RATE: f64 = 0.5;
/// Above this average latency (ms) performance counts as degraded.
pub const DEGRADED_LATENCY_MS: f64 = 1000.0;
/// Above this error rate performance counts as degraded.
pub const DEGRADED_ERROR_RATE: f64 = 0.1;

/// Point-in-time copy of the monitor's counters and derived rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    /// hits / total, 0.0 with no requests
    pub hit_rate: f64,
    /// Mean of the samples currently in the ring buffer
    pub average_response_time_ms: f64,
    /// errors / total, 0.0 with no requests
    pub error_rate: f64,
    pub sample_count: usize,
}

impl PerformanceMetrics {
    /// Fixed degradation policy: hit rate below 50 %, average latency above
    /// 1000 ms, or error rate above 10 %. Nothing is degraded before the
    /// first request.
    pub fn is_degraded(&self) -> bool {
        if self.total_requests == 0 {
            return false;
        }
        self.hit_rate < DEGRADED_HIT_RATE
            || self.average_response_time_ms > DEGRADED_LATENCY_MS
            || self.error_rate > DEGRADED_ERROR_RATE
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    total_requests: u64,
    cache_hits: u64,
    cache_misses: u64,
    errors: u64,
    samples: VecDeque<f64>,
}

/// Shared accumulator of request outcomes.
#[derive(Debug)]
pub struct PerformanceMonitor {
    state: Mutex<MonitorState>,
    capacity: usize,
}

impl PerformanceMonitor {
    /// Create a monitor keeping at most `capacity` latency samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(MonitorState {
                samples: VecDeque::with_capacity(capacity),
                ..MonitorState::default()
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn push_sample(&self, state: &mut MonitorState, latency: Duration) {
        if state.samples.len() == self.capacity {
            state.samples.pop_front();
        }
        state.samples.push_back(latency.as_secs_f64() * 1000.0);
    }

    /// A request served from cache.
    pub fn record_cache_hit(&self, latency: Duration) {
        let mut state = self.lock();
        state.total_requests += 1;
        state.cache_hits += 1;
        self.push_sample(&mut state, latency);
    }

    /// A request that had to go to the remote source.
    pub fn record_cache_miss(&self, latency: Duration) {
        let mut state = self.lock();
        state.total_requests += 1;
        state.cache_misses += 1;
        self.push_sample(&mut state, latency);
    }

    /// A failed request. The miss that preceded it was already counted.
    pub fn record_error(&self) {
        self.lock().errors += 1;
    }

    /// Snapshot of the counters and derived rates.
    pub fn metrics(&self) -> PerformanceMetrics {
        let state = self.lock();
        let total = state.total_requests;
        let rate = |n: u64| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64
            }
        };
        let average_response_time_ms = if state.samples.is_empty() {
            0.0
        } else {
            state.samples.iter().sum::<f64>() / state.samples.len() as f64
        };

        PerformanceMetrics {
            total_requests: total,
            cache_hits: state.cache_hits,
            cache_misses: state.cache_misses,
            errors: state.errors,
            hit_rate: rate(state.cache_hits),
            average_response_time_ms,
            error_rate: rate(state.errors),
            sample_count: state.samples.len(),
        }
    }

    /// Zero every counter and clear the ring buffer.
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = MonitorState {
            samples: VecDeque::with_capacity(self.capacity),
            ..MonitorState::default()
        };
        tracing::debug!("Performance metrics reset");
    }

    pub fn is_performance_degraded(&self) -> bool {
        self.metrics().is_degraded()
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(100)
    }
}
