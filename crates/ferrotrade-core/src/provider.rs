//! Unified market data provider.
//!
//! Composes the live feed, tiered cache, cold archive and fallback web feed.
//! Every request gets a three-source plan chosen from its intent and lookback;
//! sources are tried in order until one returns data covering the requested
//! range. Source failures never surface as errors: they are recorded in
//! [`DataMeta::attempts`] and the next source is tried.
//!
//! | intent | lookback <= 1 day | lookback > 1 day |
//! |--------|-------------------|------------------|
//! | TRADING | live, cache, web | live, web |
//! | CHART | cache, live, web | cache, archive, web |
//! | ANALYSIS | cache, archive, web | archive, cache, web |

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::TieredCache;
use crate::config::ProviderConfig;
use crate::data_source::{BarsRequest, MarketSource, SourceError};
use crate::error::ProviderError;
use crate::stats::SourceStats;
use crate::{BarSeries, Intent, SourceKind, Symbol, Timeframe, UtcDateTime, ValidationError};

/// Lookbacks up to this age count as "recent".
pub const RECENT_LOOKBACK: time::Duration = time::Duration::days(1);

/// Longest accepted lookback, in days.
pub const MAX_PERIOD_DAYS: u32 = 36_525;

/// Source order for an intent and lookback.
pub fn source_plan(intent: Intent, lookback: time::Duration) -> Vec<SourceKind> {
    use SourceKind::{Archive, Cache, Fallback, Live};

    let recent = lookback <= RECENT_LOOKBACK;
    match (intent, recent) {
        (Intent::Trading, true) => vec![Live, Cache, Fallback],
        (Intent::Trading, false) => vec![Live, Fallback],
        (Intent::Chart, true) => vec![Cache, Live, Fallback],
        (Intent::Chart, false) => vec![Cache, Archive, Fallback],
        (Intent::Analysis, true) => vec![Cache, Archive, Fallback],
        (Intent::Analysis, false) => vec![Archive, Cache, Fallback],
    }
}

/// Validated request for [`MarketDataProvider::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataQuery {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub period_days: u32,
    pub intent: Intent,
    pub force_source: Option<SourceKind>,
}

impl DataQuery {
    /// Parse the loosely typed arguments accepted at the API boundary.
    pub fn parse(
        symbol: &str,
        timeframe: &str,
        period_days: i64,
        intent: &str,
        force_source: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let period_days = u32::try_from(period_days)
            .ok()
            .filter(|days| (1..=MAX_PERIOD_DAYS).contains(days))
            .ok_or(ValidationError::InvalidPeriod { value: period_days })?;

        Ok(Self {
            symbol: Symbol::parse(symbol)?,
            timeframe: timeframe.parse()?,
            period_days,
            intent: intent.parse()?,
            force_source: force_source.map(str::parse::<SourceKind>).transpose()?,
        })
    }

    pub fn lookback(&self) -> time::Duration {
        time::Duration::days(i64::from(self.period_days))
    }
}

/// Result of one source attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Hit,
    Error,
    Timeout,
    Empty,
    InsufficientCoverage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceAttempt {
    pub source: SourceKind,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Response metadata; always populated, whether or not data was found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataMeta {
    /// Source that served the data; `None` when every source failed.
    pub source: Option<SourceKind>,
    /// Sum of the attempted sources' latencies.
    pub elapsed_ms: u64,
    pub row_count: usize,
    pub cache_hit: bool,
    /// Attempted sources that failed before the serving one.
    pub fallback_count: u32,
    pub attempts: Vec<SourceAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataResponse {
    pub data: Option<BarSeries>,
    pub meta: DataMeta,
}

type Clock = Arc<dyn Fn() -> UtcDateTime + Send + Sync>;

/// See the module docs.
pub struct MarketDataProvider {
    live: Option<Arc<dyn MarketSource>>,
    cache: Option<Arc<TieredCache>>,
    archive: Option<Arc<dyn MarketSource>>,
    fallback: Option<Arc<dyn MarketSource>>,
    config: ProviderConfig,
    stats: Arc<SourceStats>,
    clock: Clock,
}

/// Builder for [`MarketDataProvider`]. Every source is optional; absent
/// sources are skipped without counting as a fallback.
#[derive(Default)]
pub struct MarketDataProviderBuilder {
    live: Option<Arc<dyn MarketSource>>,
    cache: Option<Arc<TieredCache>>,
    archive: Option<Arc<dyn MarketSource>>,
    fallback: Option<Arc<dyn MarketSource>>,
    config: Option<ProviderConfig>,
    stats: Option<Arc<SourceStats>>,
    clock: Option<Clock>,
}

impl MarketDataProviderBuilder {
    pub fn live(mut self, source: Arc<dyn MarketSource>) -> Self {
        self.live = Some(source);
        self
    }

    pub fn cache(mut self, cache: Arc<TieredCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn archive(mut self, source: Arc<dyn MarketSource>) -> Self {
        self.archive = Some(source);
        self
    }

    pub fn fallback(mut self, source: Arc<dyn MarketSource>) -> Self {
        self.fallback = Some(source);
        self
    }

    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn stats(mut self, stats: Arc<SourceStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Replace the wall clock used to anchor request windows.
    pub fn clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> UtcDateTime + Send + Sync + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn build(self) -> MarketDataProvider {
        let clock: Clock = match self.clock {
            Some(clock) => clock,
            None => Arc::new(UtcDateTime::now),
        };
        MarketDataProvider {
            live: self.live,
            cache: self.cache,
            archive: self.archive,
            fallback: self.fallback,
            config: self.config.unwrap_or_default(),
            stats: self.stats.unwrap_or_default(),
            clock,
        }
    }
}

enum Attempt {
    Hit(BarSeries),
    Miss(AttemptOutcome, Option<String>),
}

impl MarketDataProvider {
    pub fn builder() -> MarketDataProviderBuilder {
        MarketDataProviderBuilder::default()
    }

    pub fn stats(&self) -> &Arc<SourceStats> {
        &self.stats
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn source(&self, kind: SourceKind) -> Option<Arc<dyn MarketSource>> {
        match kind {
            SourceKind::Live => self.live.clone(),
            SourceKind::Cache => self
                .cache
                .clone()
                .map(|cache| cache as Arc<dyn MarketSource>),
            SourceKind::Archive => self.archive.clone(),
            SourceKind::Fallback => self.fallback.clone(),
        }
    }

    /// Fetch bars for `symbol`/`timeframe` covering the last `period_days`.
    ///
    /// Fails only for invalid arguments; see [`DataMeta`] for the outcome of
    /// each source.
    pub async fn get_data(
        &self,
        symbol: &str,
        timeframe: &str,
        period_days: i64,
        intent: &str,
        force_source: Option<&str>,
    ) -> Result<DataResponse, ProviderError> {
        let query = DataQuery::parse(symbol, timeframe, period_days, intent, force_source)?;
        Ok(self.fetch(&query).await)
    }

    pub async fn fetch(&self, query: &DataQuery) -> DataResponse {
        let end = (self.clock)();
        let Some(start) = end.checked_sub(query.lookback()) else {
            let message = format!("a {}-day window ending {end} is out of range", query.period_days);
            warn!(symbol = %query.symbol, error = %message, "market data unavailable");
            return DataResponse {
                data: None,
                meta: DataMeta {
                    error: Some(message),
                    ..DataMeta::default()
                },
            };
        };
        let request = BarsRequest {
            symbol: query.symbol.clone(),
            timeframe: query.timeframe,
            start,
            end,
        };

        let plan = match query.force_source {
            Some(kind) => vec![kind],
            None => source_plan(query.intent, query.lookback()),
        };
        debug!(
            symbol = %query.symbol,
            timeframe = %query.timeframe,
            intent = %query.intent,
            plan = ?plan,
            "market data request"
        );

        let mut meta = DataMeta::default();
        for kind in plan {
            let Some(source) = self.source(kind) else {
                continue;
            };

            let started = Instant::now();
            let attempt = self.attempt(kind, source.as_ref(), &request).await;
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            meta.elapsed_ms = meta.elapsed_ms.saturating_add(latency_ms);

            match attempt {
                Attempt::Hit(series) => {
                    self.stats.record_success(kind, latency_ms);
                    meta.attempts.push(SourceAttempt {
                        source: kind,
                        outcome: AttemptOutcome::Hit,
                        latency_ms,
                        detail: None,
                    });
                    meta.source = Some(kind);
                    meta.cache_hit = kind == SourceKind::Cache;
                    meta.row_count = series.len();

                    if kind != SourceKind::Cache {
                        self.write_back(&series, end).await;
                    }
                    info!(
                        symbol = %query.symbol,
                        source = %kind,
                        rows = meta.row_count,
                        fallback_count = meta.fallback_count,
                        elapsed_ms = meta.elapsed_ms,
                        "market data served"
                    );
                    return DataResponse {
                        data: Some(series),
                        meta,
                    };
                }
                Attempt::Miss(outcome, detail) => {
                    self.stats.record_failure(kind, latency_ms);
                    warn!(
                        symbol = %query.symbol,
                        source = %kind,
                        outcome = ?outcome,
                        detail = detail.as_deref().unwrap_or(""),
                        "source attempt failed, falling back"
                    );
                    meta.fallback_count += 1;
                    meta.attempts.push(SourceAttempt {
                        source: kind,
                        outcome,
                        latency_ms,
                        detail,
                    });
                }
            }
        }

        let message = if meta.attempts.is_empty() {
            String::from("no configured source for this request")
        } else {
            format!("all {} attempted sources failed", meta.attempts.len())
        };
        warn!(symbol = %query.symbol, error = %message, "market data unavailable");
        meta.error = Some(message);
        DataResponse { data: None, meta }
    }

    async fn attempt(
        &self,
        kind: SourceKind,
        source: &dyn MarketSource,
        request: &BarsRequest,
    ) -> Attempt {
        let timeout = self.config.timeout_for(kind);
        let result = tokio::time::timeout(timeout, source.fetch_bars(request.clone())).await;

        let series = match result {
            Err(_) => {
                source.record_timeout();
                let error = SourceError::timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
                return Attempt::Miss(AttemptOutcome::Timeout, Some(error.to_string()));
            }
            Ok(Err(error)) => return Attempt::Miss(AttemptOutcome::Error, Some(error.to_string())),
            Ok(Ok(series)) => series,
        };

        let series = BarSeries::new(request.symbol.clone(), request.timeframe, series.bars)
            .filter_range(request.start, request.end);
        if series.is_empty() {
            return Attempt::Miss(AttemptOutcome::Empty, None);
        }
        if !self.covers(&series, request) {
            let detail = series
                .first_ts()
                .map(|first| format!("earliest bar {first} for window starting {}", request.start));
            return Attempt::Miss(AttemptOutcome::InsufficientCoverage, detail);
        }
        Attempt::Hit(series)
    }

    /// A result covers the request when its earliest bar is within
    /// `max(2 x timeframe, (1 - min_coverage_ratio) x window)` of the start.
    fn covers(&self, series: &BarSeries, request: &BarsRequest) -> bool {
        let Some(first) = series.first_ts() else {
            return false;
        };
        let ratio = self.config.min_coverage_ratio.clamp(0.0, 1.0);
        let slack_by_ratio = request.window() * (1.0 - ratio);
        let slack_by_timeframe = request.timeframe.duration() * 2;
        first - request.start <= slack_by_ratio.max(slack_by_timeframe)
    }

    async fn write_back(&self, series: &BarSeries, now: UtcDateTime) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(error) = cache.write_back(series, now).await {
            warn!(
                symbol = %series.symbol,
                timeframe = %series.timeframe,
                error = %error,
                "cache write-back failed"
            );
        }
    }
}
