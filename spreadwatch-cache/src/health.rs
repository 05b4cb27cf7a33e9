//! Health scoring for the cache.
//!
//! [`perform_health_check`] is a pure function of a metrics snapshot, a
//! store statistics snapshot and a threshold policy. It starts at 100 and
//! subtracts a fixed penalty per crossed threshold; for paired thresholds
//! only the more severe band applies.

use serde_json::json;
use spreadwatch_core::{HealthReport, HealthThresholds};

use crate::monitor::PerformanceMetrics;
use crate::store::CacheStoreStats;

const HIT_RATE_CRITICAL_PENALTY: u32 = 30;
const HIT_RATE_WARNING_PENALTY: u32 = 15;
const LATENCY_CRITICAL_PENALTY: u32 = 25;
const LATENCY_WARNING_PENALTY: u32 = 10;
const ERROR_RATE_CRITICAL_PENALTY: u32 = 30;
const ERROR_RATE_WARNING_PENALTY: u32 = 15;
const ENTRY_CEILING_PENALTY: u32 = 10;
const EXPIRED_RATIO_PENALTY: u32 = 10;

/// Score the cache.
///
/// Rate-based checks are skipped until at least one request was recorded.
pub fn perform_health_check(
    metrics: &PerformanceMetrics,
    stats: &CacheStoreStats,
    thresholds: &HealthThresholds,
) -> HealthReport {
    let mut report = HealthReport::perfect()
        .with_detail("hit_rate", json!(metrics.hit_rate))
        .with_detail(
            "average_response_time_ms",
            json!(metrics.average_response_time_ms),
        )
        .with_detail("error_rate", json!(metrics.error_rate))
        .with_detail("total_requests", json!(metrics.total_requests))
        .with_detail("total_entries", json!(stats.total_entries()))
        .with_detail("expired_entries", json!(stats.expired_entries()));

    if metrics.total_requests > 0 {
        let hit_pct = metrics.hit_rate * 100.0;
        if metrics.hit_rate < thresholds.hit_rate_critical {
            report.penalize(
                HIT_RATE_CRITICAL_PENALTY,
                format!("Cache hit rate is very low ({:.1}%)", hit_pct),
                "Check TTLs and prefetch markets in batches before rendering lists",
            );
        } else if metrics.hit_rate < thresholds.hit_rate_warning {
            report.penalize(
                HIT_RATE_WARNING_PENALTY,
                format!("Cache hit rate is below target ({:.1}%)", hit_pct),
                "Consider longer TTLs for timing data or batch prefetching",
            );
        }

        let latency = metrics.average_response_time_ms;
        if latency > thresholds.latency_critical_ms {
            report.penalize(
                LATENCY_CRITICAL_PENALTY,
                format!("Average response time is very high ({:.0}ms)", latency),
                "Investigate RPC endpoint latency and reduce batch size",
            );
        } else if latency > thresholds.latency_warning_ms {
            report.penalize(
                LATENCY_WARNING_PENALTY,
                format!("Average response time is elevated ({:.0}ms)", latency),
                "Monitor RPC endpoint latency",
            );
        }

        let error_pct = metrics.error_rate * 100.0;
        if metrics.error_rate > thresholds.error_rate_critical {
            report.penalize(
                ERROR_RATE_CRITICAL_PENALTY,
                format!("Error rate is very high ({:.1}%)", error_pct),
                "Check RPC connectivity and market ids; consider a longer error TTL",
            );
        } else if metrics.error_rate > thresholds.error_rate_warning {
            report.penalize(
                ERROR_RATE_WARNING_PENALTY,
                format!("Error rate is elevated ({:.1}%)", error_pct),
                "Review recent fetch failures",
            );
        }
    }

    let total = stats.total_entries();
    if total > thresholds.max_total_entries {
        report.penalize(
            ENTRY_CEILING_PENALTY,
            format!(
                "Cache holds {} entries (limit {})",
                total, thresholds.max_total_entries
            ),
            "Run expired-entry cleanup more often or clear the cache",
        );
    }

    let expired_ratio = stats.expired_ratio();
    if total > 0 && expired_ratio > thresholds.expired_ratio {
        report.penalize(
            EXPIRED_RATIO_PENALTY,
            format!(
                "{:.1}% of cache entries are expired",
                expired_ratio * 100.0
            ),
            "Schedule periodic cleanup of expired entries",
        );
    }

    report
}
