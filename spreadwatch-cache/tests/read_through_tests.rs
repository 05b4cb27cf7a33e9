use std::sync::Arc;
use std::time::Duration;

use spreadwatch_cache::{Freshness, MarketRead, MarketRefresher};
use spreadwatch_core::{encode_u64_vector, DecodeError, HealthStatus, MarketState, TierKind};
use spreadwatch_test_utils::assertions::{
    assert_fully_cached, assert_fully_fetched, assert_percentages_normalised, assert_suppressed,
};
use spreadwatch_test_utils::fixtures::{
    market_id, populated_fetcher, resolved_market, sample_market, service_with_clock, test_config,
    user,
};
use spreadwatch_test_utils::{FetchError, MockMarketFetcher, SpreadwatchError};

#[tokio::test]
async fn dynamic_tier_refreshes_after_its_ttl() {
    let id = market_id(1);
    let fetcher = Arc::new(MockMarketFetcher::new().with_market(&id, sample_market("Will it rain?")));
    let (service, clock) = service_with_clock(fetcher.clone(), test_config());

    let first = service.get_market_info(&id).await.expect("cold read");
    assert_fully_fetched(&first);
    assert_eq!(first.dynamic.total_liquidity, 1_000_000);

    let second = service.get_market_info(&id).await.expect("warm read");
    assert_fully_cached(&second);
    assert_eq!(second.dynamic.total_liquidity, 1_000_000);

    fetcher.set_liquidity(&id, 2_000_000);
    clock.advance(Duration::from_secs(31));

    let third = service.get_market_info(&id).await.expect("read after ttl");
    assert_eq!(third.dynamic.total_liquidity, 2_000_000);
    assert!(third.provenance.static_from_cache);
    assert!(third.provenance.timing_from_cache);
    assert!(!third.provenance.dynamic_from_cache);
}

#[tokio::test]
async fn cold_read_costs_one_object_and_one_price_call() {
    let fetcher = Arc::new(populated_fetcher(1));
    let (service, _clock) = service_with_clock(fetcher.clone(), test_config());

    service.get_market_info(&market_id(0)).await.expect("read");
    assert_eq!(fetcher.object_calls(), 1);
    assert_eq!(fetcher.price_calls(), 1);

    for _ in 0..5 {
        service.get_market_info(&market_id(0)).await.expect("read");
    }
    assert_eq!(fetcher.total_calls(), 2);

    let metrics = service.metrics();
    assert_eq!(metrics.cache_misses, 3);
    assert_eq!(metrics.cache_hits, 15);
}

#[tokio::test]
async fn record_carries_display_derivations() {
    let id = market_id(1);
    let fetcher = Arc::new(MockMarketFetcher::new().with_market(&id, sample_market("q")));
    fetcher.set_prices(&id, &[1_000, 2_000, 3_000, 4_000]);
    let (service, _clock) = service_with_clock(fetcher, test_config());

    let record = service.get_market_info(&id).await.expect("read");
    assert_percentages_normalised(&record);
    assert_eq!(record.state_label(), "Active");
    assert!(record.timing.bidding_open);
    assert!(!record.timing.resolved);

    let labels: Vec<&str> = record.dynamic.spreads.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["0-25", "25-50", "50-75", "75-100"]);

    // 5% discount where shares are outstanding, nothing to sell back otherwise
    assert_eq!(record.dynamic.spreads[0].sell_price, Some(950));
    assert_eq!(record.dynamic.spreads[3].sell_price, None);
    assert_eq!(record.dynamic.spreads[2].percentage, 60.0);
}

#[tokio::test]
async fn resolved_market_is_closed() {
    let id = market_id(2);
    let fetcher = Arc::new(MockMarketFetcher::new().with_market(&id, resolved_market("q", 42)));
    let (service, _clock) = service_with_clock(fetcher, test_config());

    let record = service.get_market_info(&id).await.expect("read");
    assert_eq!(record.dynamic.state, MarketState::Resolved);
    assert_eq!(record.dynamic.resolved_value, Some(42));
    assert!(record.timing.resolved);
    assert!(!record.timing.bidding_open);
}

#[tokio::test]
async fn failures_are_suppressed_for_the_error_ttl() {
    let id = market_id(3);
    let fetcher = Arc::new(MockMarketFetcher::new().with_market(&id, sample_market("q")));
    let (service, clock) = service_with_clock(fetcher.clone(), test_config());

    fetcher.fail_market(
        &id,
        FetchError::Rpc {
            market_id: id.to_string(),
            reason: "429".to_string(),
        },
    );
    let err = service.get_market_info(&id).await.unwrap_err();
    assert!(matches!(err, SpreadwatchError::Fetch(FetchError::Rpc { .. })));
    assert!(err.is_retryable());

    fetcher.clear_failure(&id);
    clock.advance(Duration::from_secs(4));
    let suppressed = service.get_market_info(&id).await;
    assert_suppressed(&suppressed);
    if let Err(SpreadwatchError::SuppressedRetry { retry_after, last_error, .. }) = &suppressed {
        assert_eq!(*retry_after, Duration::from_secs(1));
        assert!(last_error.contains("429"));
    }
    assert_eq!(fetcher.object_calls(), 1);

    clock.advance(Duration::from_secs(1));
    service.get_market_info(&id).await.expect("suppression window over");
    assert_eq!(fetcher.object_calls(), 2);
}

#[tokio::test]
async fn unknown_market_is_not_retryable() {
    let fetcher = Arc::new(MockMarketFetcher::new());
    let (service, _clock) = service_with_clock(fetcher, test_config());

    let err = service.get_market_info(&market_id(99)).await.unwrap_err();
    assert!(matches!(err, SpreadwatchError::Fetch(FetchError::NotFound { .. })));
    assert!(!err.is_retryable());
    assert_eq!(service.metrics().errors, 1);
    assert_eq!(service.cache_stats().for_tier(TierKind::Error).valid, 1);
}

#[tokio::test]
async fn price_for_unknown_spread_fails_the_read() {
    let id = market_id(4);
    let fetcher = Arc::new(MockMarketFetcher::new().with_market(&id, sample_market("q")));
    fetcher.set_prices(&id, &[1, 2, 3, 4, 5]);
    let (service, _clock) = service_with_clock(fetcher, test_config());

    let err = service.get_market_info(&id).await.unwrap_err();
    assert!(matches!(err, SpreadwatchError::Decode(_)));

    // Tiers fetched before the failure stay cached
    let snapshot = service.peek_market(&id);
    assert!(snapshot.static_info.is_known());
    assert!(!snapshot.dynamic.is_known());
}

#[tokio::test]
async fn unquoted_spreads_fail_the_read() {
    let id = market_id(7);
    let fetcher = Arc::new(MockMarketFetcher::new().with_market(&id, sample_market("q")));
    fetcher.set_price_response(&id, encode_u64_vector(&[0, 1]), encode_u64_vector(&[700, 300]));
    let (service, _clock) = service_with_clock(fetcher, test_config());

    let err = service.get_market_info(&id).await.unwrap_err();
    assert!(matches!(
        err,
        SpreadwatchError::Decode(DecodeError::LengthMismatch { expected: 4, got: 2, .. })
    ));
    assert!(!service.peek_market(&id).dynamic.is_known());
    assert!(service.store().has_recent_error(&id));
}

#[tokio::test]
async fn repeated_spread_quote_fails_the_read() {
    let id = market_id(8);
    let fetcher = Arc::new(MockMarketFetcher::new().with_market(&id, sample_market("q")));
    fetcher.set_price_response(&id, encode_u64_vector(&[0, 0, 0, 0]), encode_u64_vector(&[1, 2, 3, 4]));
    let (service, _clock) = service_with_clock(fetcher, test_config());

    let err = service.get_market_info(&id).await.unwrap_err();
    assert!(matches!(
        err,
        SpreadwatchError::Decode(DecodeError::DuplicateSpread { index: 0 })
    ));
    assert!(!service.peek_market(&id).dynamic.is_known());
}

#[tokio::test(start_paused = true)]
async fn concurrent_cold_reads_both_fetch_and_agree() {
    let id = market_id(9);
    let fetcher = Arc::new(MockMarketFetcher::new().with_market(&id, sample_market("q")));
    fetcher.set_latency(Duration::from_millis(50));
    let (service, _clock) = service_with_clock(fetcher.clone(), test_config());

    let (first, second) = tokio::join!(service.get_market_info(&id), service.get_market_info(&id));
    let first = first.expect("first read");
    let second = second.expect("second read");

    // No in-flight de-duplication: both misses go to the source
    assert_eq!(fetcher.object_calls(), 2);
    assert_eq!(fetcher.price_calls(), 2);
    assert_eq!(first.static_info, second.static_info);
    assert_eq!(first.timing, second.timing);
    assert_eq!(first.dynamic, second.dynamic);
    assert_fully_fetched(&first);
    assert_fully_fetched(&second);

    // The later write replaced the earlier one, one entry per tier
    assert_eq!(service.cache_stats().total_entries(), 3);

    let third = service.get_market_info(&id).await.expect("third read");
    assert_fully_cached(&third);
    assert_eq!(third.dynamic, first.dynamic);
    assert_eq!(fetcher.object_calls(), 2);
}

#[tokio::test]
async fn user_positions_are_cached_and_invalidated_with_the_market() {
    let id = market_id(5);
    let alice = user("alice");
    let fetcher = Arc::new(MockMarketFetcher::new().with_market(&id, sample_market("q")));
    fetcher.set_position(&id, &alice, &[0, 5, 0, 0], &[0, 2_500, 0, 0]);
    let (service, clock) = service_with_clock(fetcher.clone(), test_config());

    let positions = service.get_user_positions(&id, &alice).await.expect("positions");
    assert!(positions.has_positions());
    assert_eq!(positions.positions.len(), 1);
    assert_eq!(positions.positions[0].spread_index, 1);
    assert_eq!(positions.total_value, 2_500);

    service.get_user_positions(&id, &alice).await.expect("cached");
    assert_eq!(fetcher.position_calls(), 1);

    clock.advance(Duration::from_secs(14));
    service.get_user_positions(&id, &alice).await.expect("still cached");
    assert_eq!(fetcher.position_calls(), 1);

    service.invalidate_market(&id);
    service.get_user_positions(&id, &alice).await.expect("refetched");
    assert_eq!(fetcher.position_calls(), 2);

    let bob = service.get_user_positions(&id, &user("bob")).await.expect("empty");
    assert!(!bob.has_positions());
    assert_eq!(bob.total_value, 0);
}

#[tokio::test]
async fn force_refresh_after_a_trade() {
    let id = market_id(6);
    let fetcher = Arc::new(MockMarketFetcher::new().with_market(&id, sample_market("q")));
    let (service, _clock) = service_with_clock(fetcher.clone(), test_config());
    let refresher = MarketRefresher::new(Arc::new(service));

    refresher.read(&id, Freshness::ReadThrough).await.expect("read");
    fetcher.update_market(&id, |raw| raw.spreads[3].outstanding_shares = 400);

    let cached = refresher.read(&id, Freshness::CachedOnly).await.expect("cached");
    let cached = cached.record().expect("complete").clone();
    assert_eq!(cached.dynamic.spreads[3].outstanding_shares, 0);

    let fresh = refresher.read(&id, Freshness::ForceRefresh).await.expect("fresh");
    let fresh = fresh.into_record().expect("complete");
    assert_eq!(fresh.dynamic.spreads[3].outstanding_shares, 400);
    assert!(fresh.provenance.static_from_cache);
    assert_eq!(fetcher.object_calls(), 2);
}

#[tokio::test]
async fn cached_only_read_is_partial_when_cold() {
    let fetcher = Arc::new(populated_fetcher(1));
    let (service, _clock) = service_with_clock(fetcher.clone(), test_config());
    let refresher = MarketRefresher::new(Arc::new(service));

    let read = refresher
        .read(&market_id(0), Freshness::CachedOnly)
        .await
        .expect("never fails");
    assert!(matches!(read, MarketRead::Partial(_)));
    assert_eq!(fetcher.total_calls(), 0);
    assert_eq!(refresher.service().metrics().total_requests, 0);
}

#[tokio::test]
async fn health_tracks_cache_behaviour() {
    let fetcher = Arc::new(populated_fetcher(3));
    let (service, clock) = service_with_clock(fetcher, test_config());

    // 3 misses then 27 hits: 90% hit rate
    for _ in 0..10 {
        service.get_market_info(&market_id(0)).await.expect("read");
    }
    let report = service.perform_health_check();
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.score, 100);

    // Every tier of market 0 except static expires
    clock.advance(Duration::from_secs(301));
    let stats = service.cache_stats();
    assert_eq!(stats.expired_entries(), 2);
    let report = service.perform_health_check();
    assert!(report.issues.iter().any(|i| i.contains("expired")));

    assert_eq!(service.cleanup_expired(), 2);
    assert_eq!(service.cache_stats().total_entries(), 1);
}

#[tokio::test]
async fn clearing_the_cache_forces_full_refetch() {
    let fetcher = Arc::new(populated_fetcher(1));
    let (service, _clock) = service_with_clock(fetcher.clone(), test_config());

    service.get_market_info(&market_id(0)).await.expect("read");
    service.clear_cache();
    assert_eq!(service.cache_stats().total_entries(), 0);

    let record = service.get_market_info(&market_id(0)).await.expect("read");
    assert_fully_fetched(&record);
    assert_eq!(fetcher.object_calls(), 2);
}
