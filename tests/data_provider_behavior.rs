//! Behaviour tests for the unified market data provider.
//!
//! These tests verify WHICH source serves a request and WHAT the caller
//! sees when sources fail, time out or return partial history.

use std::sync::Arc;
use std::time::Duration;

use ferrotrade_core::broker::BrokerFuture;
use ferrotrade_core::cache::{CacheClient, CacheFuture};
use ferrotrade_core::{
    source_plan, AccountInfo, ArchiveSource, AttemptOutcome, BarSeries, BarsRequest,
    BrokerClient, BrokerError, BrokerFill, BrokerOrder, BrokerPosition, CacheError, CacheStore,
    CircuitBreakerConfig, CircuitState, Intent, LiveFeedSource, MarketDataProvider,
    ProviderConfig, ProviderError, SourceKind, Timeframe, TieredCache, Warehouse, MAX_PERIOD_DAYS,
};
use rust_decimal::Decimal;
use ferrotrade_tests::{
    bars_ending_at, last_day_h1, now, Behaviour, ScriptedSource,
};

fn tiered(client: Arc<dyn CacheClient>) -> Arc<TieredCache> {
    let config = ProviderConfig::default();
    Arc::new(TieredCache::new(client, config.cache_ttl(), config.cache_window()))
}

struct UnreachableCache;

impl CacheClient for UnreachableCache {
    fn get<'a>(&'a self, _key: &'a str) -> CacheFuture<'a, Option<String>> {
        Box::pin(async { Err(CacheError::Unavailable(String::from("connection refused"))) })
    }

    fn set_with_ttl<'a>(
        &'a self,
        _key: &'a str,
        _value: String,
        _ttl: Duration,
    ) -> CacheFuture<'a, ()> {
        Box::pin(async { Err(CacheError::Unavailable(String::from("connection refused"))) })
    }
}

/// Venue whose bar requests never complete.
struct StalledBroker;

impl BrokerClient for StalledBroker {
    fn get_bars<'a>(&'a self, _req: BarsRequest) -> BrokerFuture<'a, BarSeries> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Err(BrokerError::Transport(String::from("stalled")))
        })
    }

    fn get_positions<'a>(&'a self) -> BrokerFuture<'a, Vec<BrokerPosition>> {
        Box::pin(async { Err(BrokerError::NotConnected) })
    }

    fn get_account_info<'a>(&'a self) -> BrokerFuture<'a, AccountInfo> {
        Box::pin(async { Err(BrokerError::NotConnected) })
    }

    fn send_order<'a>(&'a self, _order: BrokerOrder) -> BrokerFuture<'a, BrokerFill> {
        Box::pin(async { Err(BrokerError::NotConnected) })
    }

    fn close_position<'a>(
        &'a self,
        _ticket: u64,
        _volume: Option<Decimal>,
    ) -> BrokerFuture<'a, BrokerFill> {
        Box::pin(async { Err(BrokerError::NotConnected) })
    }

    fn last_error(&self) -> Option<String> {
        None
    }
}

// =============================================================================
// Source selection
// =============================================================================

#[test]
fn source_priority_table_matches_every_intent_and_lookback() {
    use SourceKind::{Archive, Cache, Fallback, Live};

    let recent = time::Duration::hours(12);
    let historical = time::Duration::days(30);

    assert_eq!(source_plan(Intent::Trading, recent), [Live, Cache, Fallback]);
    assert_eq!(source_plan(Intent::Trading, historical), [Live, Fallback]);
    assert_eq!(source_plan(Intent::Chart, recent), [Cache, Live, Fallback]);
    assert_eq!(source_plan(Intent::Chart, historical), [Cache, Archive, Fallback]);
    assert_eq!(source_plan(Intent::Analysis, recent), [Cache, Archive, Fallback]);
    assert_eq!(source_plan(Intent::Analysis, historical), [Archive, Cache, Fallback]);
}

#[tokio::test]
async fn when_live_feed_is_healthy_trading_request_is_served_live() {
    // Given: A provider whose live feed has the last day of H1 bars
    let live = Arc::new(ScriptedSource::serving(SourceKind::Live, last_day_h1()));
    let fallback = Arc::new(ScriptedSource::failing(SourceKind::Fallback));
    let provider = MarketDataProvider::builder()
        .live(live.clone())
        .cache(tiered(Arc::new(CacheStore::new())))
        .fallback(fallback.clone())
        .clock(now)
        .build();

    // When: A trading request for one day arrives
    let response = provider
        .get_data("EURUSD", "H1", 1, "TRADING", None)
        .await
        .expect("valid request");

    // Then: Live serves it without any fallback
    assert_eq!(response.meta.source, Some(SourceKind::Live));
    assert_eq!(response.meta.fallback_count, 0);
    assert!(!response.meta.cache_hit);
    assert_eq!(response.meta.row_count, 24);
    assert_eq!(live.calls(), 1);
    assert_eq!(fallback.calls(), 0);
}

// =============================================================================
// Fallback chain
// =============================================================================

#[tokio::test]
async fn when_every_source_fails_caller_gets_empty_result_with_error() {
    // Given: Cache, live and web all failing
    let provider = MarketDataProvider::builder()
        .live(Arc::new(ScriptedSource::failing(SourceKind::Live)))
        .cache(tiered(Arc::new(UnreachableCache)))
        .fallback(Arc::new(ScriptedSource::failing(SourceKind::Fallback)))
        .clock(now)
        .build();

    // When: A chart request runs through its plan (cache, live, web)
    let response = provider
        .get_data("EURUSD", "H1", 1, "CHART", None)
        .await
        .expect("no error is raised");

    // Then: No data, error populated, every attempted source counted
    assert!(response.data.is_none());
    assert!(response.meta.error.is_some());
    assert_eq!(response.meta.source, None);
    assert_eq!(response.meta.fallback_count, 3);
    let attempted: Vec<_> = response.meta.attempts.iter().map(|a| a.source).collect();
    assert_eq!(attempted, [SourceKind::Cache, SourceKind::Live, SourceKind::Fallback]);
    assert!(response
        .meta
        .attempts
        .iter()
        .all(|a| a.outcome == AttemptOutcome::Error));
}

#[tokio::test]
async fn when_live_returns_partial_history_provider_falls_back() {
    // Given: Live only has the last two hours of a one-day window
    let live = ScriptedSource::serving(
        SourceKind::Live,
        bars_ending_at(now(), Timeframe::H1, 2),
    );
    let web = ScriptedSource::serving(SourceKind::Fallback, last_day_h1());
    let provider = MarketDataProvider::builder()
        .live(Arc::new(live))
        .fallback(Arc::new(web))
        .clock(now)
        .build();

    // When: A trading request for one day arrives
    let response = provider
        .get_data("EURUSD", "H1", 1, "TRADING", None)
        .await
        .expect("valid request");

    // Then: The partial answer is a miss and the web feed serves
    assert_eq!(response.meta.source, Some(SourceKind::Fallback));
    assert_eq!(response.meta.fallback_count, 1);
    assert_eq!(
        response.meta.attempts[0].outcome,
        AttemptOutcome::InsufficientCoverage
    );
}

#[tokio::test]
async fn when_live_feed_hangs_its_timeout_moves_on() {
    // Given: A live feed slower than its configured deadline
    let mut config = ProviderConfig::default();
    config.timeouts.live_ms = 20;
    let provider = MarketDataProvider::builder()
        .live(Arc::new(ScriptedSource::new(
            SourceKind::Live,
            Behaviour::Hang(Duration::from_millis(500)),
        )))
        .fallback(Arc::new(ScriptedSource::serving(
            SourceKind::Fallback,
            last_day_h1(),
        )))
        .config(config)
        .clock(now)
        .build();

    // When: A trading request arrives
    let response = provider
        .get_data("EURUSD", "H1", 1, "TRADING", None)
        .await
        .expect("valid request");

    // Then: Live is recorded as a timeout and the web feed serves
    assert_eq!(response.meta.attempts[0].outcome, AttemptOutcome::Timeout);
    assert!(response.meta.attempts[0].latency_ms < 500);
    assert_eq!(response.meta.source, Some(SourceKind::Fallback));
}

#[tokio::test]
async fn forced_source_is_the_only_one_attempted() {
    // Given: Healthy live feed, failing web feed
    let live = Arc::new(ScriptedSource::serving(SourceKind::Live, last_day_h1()));
    let provider = MarketDataProvider::builder()
        .live(live.clone())
        .fallback(Arc::new(ScriptedSource::failing(SourceKind::Fallback)))
        .clock(now)
        .build();

    // When: The caller forces the web feed
    let response = provider
        .get_data("EURUSD", "H1", 1, "TRADING", Some("web"))
        .await
        .expect("valid request");

    // Then: Live is never consulted
    assert!(response.data.is_none());
    assert_eq!(response.meta.attempts.len(), 1);
    assert_eq!(live.calls(), 0);
}

// =============================================================================
// Cache write-back
// =============================================================================

#[tokio::test]
async fn non_cache_hit_writes_recent_slice_back_to_cache() {
    // Given: Live serving three days of H1 bars and an empty cache
    let cache = tiered(Arc::new(CacheStore::new()));
    let provider = MarketDataProvider::builder()
        .live(Arc::new(ScriptedSource::serving(
            SourceKind::Live,
            bars_ending_at(now(), Timeframe::H1, 72),
        )))
        .cache(cache)
        .clock(now)
        .build();

    // When: A three-day trading request is served live, then a chart request follows
    let first = provider
        .get_data("EURUSD", "H1", 3, "TRADING", None)
        .await
        .expect("valid request");
    let second = provider
        .get_data("EURUSD", "H1", 1, "CHART", None)
        .await
        .expect("valid request");

    // Then: The chart request is a cache hit holding only the last window
    assert_eq!(first.meta.row_count, 72);
    assert_eq!(second.meta.source, Some(SourceKind::Cache));
    assert!(second.meta.cache_hit);
    let cached = second.data.expect("cached bars");
    assert!(cached.len() < 72);
    let oldest = cached.first_ts().expect("bars");
    assert!(oldest >= now() - time::Duration::hours(24));

    let stats = provider.stats().snapshot(SourceKind::Cache);
    assert_eq!(stats.cache_hits, 1);
}

// =============================================================================
// Cold archive
// =============================================================================

#[tokio::test]
async fn analysis_request_reads_ordered_bars_from_the_archive() {
    // Given: A week of H1 bars stored in the cold archive
    let temp = tempfile::tempdir().expect("tempdir");
    let warehouse = Warehouse::open_in_memory(temp.path().join("archive")).expect("warehouse");
    let archive = Arc::new(ArchiveSource::new(Arc::new(warehouse)));
    let week = ferrotrade_core::BarSeries::new(
        ferrotrade_tests::symbol("EURUSD"),
        Timeframe::H1,
        bars_ending_at(now(), Timeframe::H1, 24 * 7),
    );
    let partitions = archive.store(&week).await.expect("store");
    assert!(partitions.len() >= 7);

    let provider = MarketDataProvider::builder()
        .archive(archive)
        .clock(now)
        .build();

    // When: A seven-day analysis request runs
    let response = provider
        .get_data("EURUSD", "H1", 7, "ANALYSIS", None)
        .await
        .expect("valid request");

    // Then: The archive serves strictly increasing timestamps across partitions
    assert_eq!(response.meta.source, Some(SourceKind::Archive));
    let series = response.data.expect("bars");
    assert!(series
        .bars
        .windows(2)
        .all(|pair| pair[0].ts < pair[1].ts));
}

// =============================================================================
// Invalid arguments
// =============================================================================

#[tokio::test]
async fn invalid_arguments_are_the_only_errors() {
    let provider = MarketDataProvider::builder().clock(now).build();

    for (symbol, timeframe, period, intent) in [
        ("", "H1", 1, "TRADING"),
        ("EURUSD", "H7", 1, "TRADING"),
        ("EURUSD", "H1", 0, "TRADING"),
        ("EURUSD", "H1", 1, "HODL"),
        ("EURUSD", "H1", 5_000_000, "ANALYSIS"),
        ("EURUSD", "D1", i64::from(MAX_PERIOD_DAYS) + 1, "CHART"),
    ] {
        let result = provider
            .get_data(symbol, timeframe, period, intent, None)
            .await;
        assert!(
            matches!(result, Err(ProviderError::InvalidArgument(_))),
            "{symbol}/{timeframe}/{period}/{intent}"
        );
    }
}

#[tokio::test]
async fn longest_accepted_period_is_answered_without_panicking() {
    let provider = MarketDataProvider::builder().clock(now).build();

    let response = provider
        .get_data("EURUSD", "D1", i64::from(MAX_PERIOD_DAYS), "ANALYSIS", None)
        .await
        .expect("valid request");

    assert!(response.data.is_none());
    assert!(response.meta.error.is_some());
}

// =============================================================================
// Circuit breaking
// =============================================================================

#[tokio::test]
async fn when_live_feed_keeps_timing_out_its_breaker_opens() {
    // Given: A live feed over a stalled venue, tripping after two failures
    let live = Arc::new(LiveFeedSource::with_breaker_config(
        Arc::new(StalledBroker),
        CircuitBreakerConfig {
            failure_threshold: 2,
            open_timeout: Duration::from_secs(60),
        },
    ));
    let mut config = ProviderConfig::default();
    config.timeouts.live_ms = 20;
    let provider = MarketDataProvider::builder()
        .live(live.clone())
        .fallback(Arc::new(ScriptedSource::serving(
            SourceKind::Fallback,
            last_day_h1(),
        )))
        .config(config)
        .clock(now)
        .build();

    // When: Trading requests keep hitting the deadline
    let mut outcomes = Vec::new();
    for _ in 0..4 {
        let response = provider
            .get_data("EURUSD", "H1", 1, "TRADING", None)
            .await
            .expect("valid request");
        outcomes.push(response.meta.attempts[0].outcome);
        assert_eq!(response.meta.source, Some(SourceKind::Fallback));
    }

    // Then: Two timeouts open the breaker and later requests fail fast
    assert_eq!(live.circuit_breaker().state(), CircuitState::Open);
    assert_eq!(
        outcomes,
        [
            AttemptOutcome::Timeout,
            AttemptOutcome::Timeout,
            AttemptOutcome::Error,
            AttemptOutcome::Error,
        ]
    );
}

// =============================================================================
// Skipped sources and concurrency
// =============================================================================

#[tokio::test]
async fn unconfigured_source_is_skipped_without_counting_a_fallback() {
    // Given: No archive, and a cache already holding three days of bars
    let cache = Arc::new(TieredCache::new(
        Arc::new(CacheStore::new()),
        Duration::from_secs(3_600),
        time::Duration::days(3),
    ));
    let three_days = BarSeries::new(
        ferrotrade_tests::symbol("EURUSD"),
        Timeframe::H1,
        bars_ending_at(now(), Timeframe::H1, 72),
    );
    cache.write_back(&three_days, now()).await.expect("seed cache");
    let provider = MarketDataProvider::builder().cache(cache).clock(now).build();

    // When: A three-day analysis request runs (plan: archive, cache, web)
    let response = provider
        .get_data("EURUSD", "H1", 3, "ANALYSIS", None)
        .await
        .expect("valid request");

    // Then: The cache serves it and the missing archive is not an attempt
    assert_eq!(response.meta.source, Some(SourceKind::Cache));
    assert_eq!(response.meta.fallback_count, 0);
    let attempted: Vec<_> = response.meta.attempts.iter().map(|a| a.source).collect();
    assert_eq!(attempted, [SourceKind::Cache]);
}

#[tokio::test]
async fn concurrent_requests_share_one_provider_and_its_counters() {
    // Given: One provider shared across tasks
    let provider = Arc::new(
        MarketDataProvider::builder()
            .live(Arc::new(ScriptedSource::serving(SourceKind::Live, last_day_h1())))
            .clock(now)
            .build(),
    );

    // When: Sixteen trading requests run at once
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let provider = Arc::clone(&provider);
        tasks.spawn(async move { provider.get_data("EURUSD", "H1", 1, "TRADING", None).await });
    }
    let mut served = 0;
    while let Some(joined) = tasks.join_next().await {
        let response = joined.expect("task").expect("valid request");
        assert_eq!(response.meta.row_count, 24);
        served += 1;
    }

    // Then: Every call is served and counted exactly once
    assert_eq!(served, 16);
    let stats = provider.stats().snapshot(SourceKind::Live);
    assert_eq!(stats.requests, 16);
    assert_eq!(stats.failures, 0);
}
