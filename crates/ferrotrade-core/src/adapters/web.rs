use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::ProviderConfig;
use crate::data_source::{BarsRequest, MarketSource, SourceError, SourceFuture};
use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient};
use crate::throttling::{Throttle, ThrottlePolicy};
use crate::{Bar, BarSeries, SourceKind, Symbol, Timeframe, UtcDateTime};

const CHART_ENDPOINT: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Last-resort public chart feed.
pub struct WebFeedSource {
    http_client: Arc<dyn HttpClient>,
    circuit_breaker: CircuitBreaker,
    throttle: Throttle,
    endpoint: String,
    timeout_ms: u64,
}

impl Default for WebFeedSource {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::new()))
    }
}

impl WebFeedSource {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            circuit_breaker: CircuitBreaker::new("web", CircuitBreakerConfig::default()),
            throttle: Throttle::new(&ThrottlePolicy::web_feed_default()),
            endpoint: String::from(CHART_ENDPOINT),
            timeout_ms: ProviderConfig::default().fallback_http_timeout_ms(),
        }
    }

    /// HTTP deadline, normally [`ProviderConfig::fallback_http_timeout_ms`].
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_throttle(mut self, policy: &ThrottlePolicy) -> Self {
        self.throttle = Throttle::new(policy);
        self
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn chart_url(&self, req: &BarsRequest) -> String {
        format!(
            "{}/{}?period1={}&period2={}&interval={}",
            self.endpoint,
            urlencoding::encode(&remote_symbol(&req.symbol)),
            req.start.unix_timestamp(),
            req.end.unix_timestamp() + 1,
            remote_interval(req.timeframe)
        )
    }

    async fn fetch_chart(&self, req: &BarsRequest) -> Result<BarSeries, SourceError> {
        if !self.circuit_breaker.allow_request() {
            return Err(SourceError::unavailable("web feed circuit breaker is open"));
        }
        if !self.throttle.acquire().await {
            return Err(SourceError::rate_limited("web feed request budget exhausted"));
        }

        let url = self.chart_url(req);
        debug!(url = %url, "web feed chart request");
        let request = HttpRequest::get(url)
            .with_header("referer", "https://finance.yahoo.com/")
            .with_timeout_ms(self.timeout_ms);

        let response = self.http_client.execute(request).await.map_err(|e| {
            self.circuit_breaker.record_failure();
            if e.is_timeout() {
                SourceError::timeout(self.timeout_ms)
            } else {
                SourceError::unavailable(format!("web feed transport error: {}", e.message()))
            }
        })?;

        if response.status == 429 {
            self.circuit_breaker.record_failure();
            return Err(SourceError::rate_limited("web feed returned status 429"));
        }
        if !response.is_success() {
            self.circuit_breaker.record_failure();
            return Err(SourceError::unavailable(format!(
                "web feed returned status {}",
                response.status
            )));
        }
        self.circuit_breaker.record_success();

        parse_chart(&response.body, req)
    }
}

impl MarketSource for WebFeedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Fallback
    }

    fn fetch_bars<'a>(&'a self, req: BarsRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move { self.fetch_chart(&req).await })
    }

    fn record_timeout(&self) {
        self.circuit_breaker.record_failure();
    }
}

/// FX pairs are quoted as `EURUSD=X` upstream.
fn remote_symbol(symbol: &Symbol) -> String {
    if symbol.is_fx_pair() {
        format!("{}=X", symbol.as_str())
    } else {
        symbol.as_str().to_owned()
    }
}

fn remote_interval(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1m",
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::M30 => "30m",
        // no 4h interval upstream; H4 is rebuilt from hourly bars
        Timeframe::H1 | Timeframe::H4 => "60m",
        Timeframe::D1 => "1d",
        Timeframe::W1 => "1wk",
    }
}

fn parse_chart(body: &str, req: &BarsRequest) -> Result<BarSeries, SourceError> {
    let chart_response: ChartResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::internal(format!("failed to parse chart response: {e}")))?;

    if let Some(error) = chart_response.chart.error {
        let detail = error.description.or(error.code).unwrap_or_default();
        return Err(SourceError::unavailable(format!("chart API error: {detail}")));
    }

    let Some(result) = chart_response.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(BarSeries::empty(req.symbol.clone(), req.timeframe));
    };
    let (Some(timestamps), Some(quote)) = (result.timestamp, result.indicators.quote.into_iter().next())
    else {
        return Ok(BarSeries::empty(req.symbol.clone(), req.timeframe));
    };

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts_value) in timestamps.iter().enumerate() {
        let ts = UtcDateTime::from_unix_timestamp(ts_value)
            .map_err(|e| SourceError::internal(format!("invalid timestamp: {e}")))?;

        // rows with a missing price are holes in the upstream series
        let (Some(open), Some(high), Some(low), Some(close)) = (
            price(&quote.open, i),
            price(&quote.high, i),
            price(&quote.low, i),
            price(&quote.close, i),
        ) else {
            continue;
        };
        let volume = quote
            .volume
            .get(i)
            .copied()
            .flatten()
            .map(Decimal::from)
            .unwrap_or(Decimal::ZERO);

        if let Ok(bar) = Bar::new(ts, open, high, low, close, volume) {
            bars.push(bar);
        }
    }

    let bars = if req.timeframe == Timeframe::H4 {
        resample(bars, Timeframe::H4)
    } else {
        bars
    };
    Ok(BarSeries::new(req.symbol.clone(), req.timeframe, bars))
}

fn price(values: &[Option<f64>], index: usize) -> Option<Decimal> {
    let value = values.get(index).copied().flatten()?;
    Decimal::try_from(value).ok().map(|d| d.round_dp(6))
}

/// Aggregate ascending bars into `timeframe` buckets aligned to the epoch.
fn resample(bars: Vec<Bar>, timeframe: Timeframe) -> Vec<Bar> {
    let step = timeframe.duration().whole_seconds();
    let mut buckets: BTreeMap<i64, Vec<Bar>> = BTreeMap::new();
    for bar in bars {
        buckets
            .entry(bar.ts.unix_timestamp().div_euclid(step) * step)
            .or_default()
            .push(bar);
    }

    buckets
        .into_iter()
        .filter_map(|(start, group)| {
            let first = group.first()?;
            let last = group.last()?;
            let high = group.iter().map(|b| b.high).max()?;
            let low = group.iter().map(|b| b.low).min()?;
            let volume = group.iter().map(|b| b.volume).sum();
            let ts = UtcDateTime::from_unix_timestamp(start).ok()?;
            Bar::new(ts, first.open, high, low, last.close, volume).ok()
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartData,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::{HttpError, HttpResponse};
    use rust_decimal_macros::dec;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    struct RecordingHttpClient {
        response: Result<HttpResponse, HttpError>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        fn new(response: Result<HttpResponse, HttpError>) -> Self {
            Self {
                response,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for RecordingHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests.lock().expect("lock").push(request);
            let response = self.response.clone();
            Box::pin(async move { response })
        }
    }

    const CHART_BODY: &str = r#"{
        "chart": {
            "result": [{
                "timestamp": [1704067200, 1704070800, 1704074400, 1704078000],
                "indicators": {"quote": [{
                    "open":  [1.1000, 1.1010, null, 1.1030],
                    "high":  [1.1015, 1.1025, 1.1030, 1.1045],
                    "low":   [1.0995, 1.1005, 1.1010, 1.1025],
                    "close": [1.1010, 1.1020, 1.1025, 1.1040],
                    "volume":[0, 0, 0, null]
                }]}
            }],
            "error": null
        }
    }"#;

    fn request(timeframe: Timeframe) -> BarsRequest {
        BarsRequest::new(
            Symbol::parse("EURUSD").expect("symbol"),
            timeframe,
            UtcDateTime::parse("2024-01-01T00:00:00Z").expect("ts"),
            UtcDateTime::parse("2024-01-01T03:00:00Z").expect("ts"),
        )
        .expect("request")
    }

    #[tokio::test]
    async fn maps_fx_symbol_and_skips_holes() {
        let client = Arc::new(RecordingHttpClient::new(Ok(HttpResponse::ok_json(CHART_BODY))));
        let feed = WebFeedSource::new(client.clone());

        let series = feed.fetch_bars(request(Timeframe::H1)).await.expect("bars");
        assert_eq!(series.len(), 3);
        assert_eq!(series.bars[0].open, dec!(1.1));
        assert_eq!(series.bars[2].close, dec!(1.104));

        let requests = client.requests.lock().expect("lock");
        assert!(requests[0].url.contains("/EURUSD%3DX?period1=1704067200"));
        assert!(requests[0].url.ends_with("&interval=60m"));
    }

    #[tokio::test]
    async fn four_hour_bars_are_resampled() {
        let client = Arc::new(RecordingHttpClient::new(Ok(HttpResponse::ok_json(CHART_BODY))));
        let feed = WebFeedSource::new(client);

        let series = feed.fetch_bars(request(Timeframe::H4)).await.expect("bars");
        assert_eq!(series.len(), 1);
        let bar = &series.bars[0];
        assert_eq!(bar.open, dec!(1.1));
        assert_eq!(bar.close, dec!(1.104));
        assert_eq!(bar.high, dec!(1.1045));
        assert_eq!(bar.low, dec!(1.0995));
    }

    #[tokio::test]
    async fn transport_timeout_maps_to_timeout_kind() {
        let client = Arc::new(RecordingHttpClient::new(Err(HttpError::timed_out("slow"))));
        let feed = WebFeedSource::new(client);

        let err = feed.fetch_bars(request(Timeframe::H1)).await.expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::Timeout);
        assert_eq!(feed.circuit_breaker().consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn http_deadline_follows_configured_timeout() {
        let client = Arc::new(RecordingHttpClient::new(Ok(HttpResponse::ok_json(CHART_BODY))));
        let feed = WebFeedSource::new(client.clone()).with_timeout_ms(450);

        feed.fetch_bars(request(Timeframe::H1)).await.expect("bars");

        let requests = client.requests.lock().expect("lock");
        assert_eq!(requests[0].timeout_ms, 450);
    }

    #[test]
    fn deadline_dropped_by_the_provider_counts_against_the_breaker() {
        let client = Arc::new(RecordingHttpClient::new(Ok(HttpResponse::ok_json(CHART_BODY))));
        let feed = WebFeedSource::new(client);

        feed.record_timeout();
        feed.record_timeout();

        assert_eq!(feed.circuit_breaker().consecutive_failures(), 2);
    }

    #[tokio::test]
    async fn api_error_is_unavailable() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        let client = Arc::new(RecordingHttpClient::new(Ok(HttpResponse::ok_json(body))));
        let feed = WebFeedSource::new(client);

        let err = feed.fetch_bars(request(Timeframe::D1)).await.expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::Unavailable);
        assert!(err.message().contains("No data found"));
    }
}
