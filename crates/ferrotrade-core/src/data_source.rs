//! Market-data source contract.
//!
//! Every source the provider composes (live feed, tiered cache, cold archive,
//! fallback web feed) implements [`MarketSource`]: one capability, fetch the
//! bars of a symbol/timeframe over a UTC range.
//!
//! # Example
//!
//! ```rust,ignore
//! use ferrotrade_core::{BarsRequest, MarketSource, Symbol, Timeframe, UtcDateTime};
//!
//! async fn last_day(source: &dyn MarketSource) -> usize {
//!     let end = UtcDateTime::now();
//!     let request = BarsRequest::new(
//!         Symbol::parse("EURUSD").unwrap(),
//!         Timeframe::H1,
//!         end - time::Duration::days(1),
//!         end,
//!     )
//!     .unwrap();
//!     source.fetch_bars(request).await.map(|s| s.len()).unwrap_or(0)
//! }
//! ```

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use crate::{BarSeries, SourceKind, Symbol, Timeframe, UtcDateTime};

/// Source-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// Upstream unreachable, circuit open, or not connected.
    Unavailable,
    /// The per-source deadline elapsed.
    Timeout,
    RateLimited,
    InvalidRequest,
    /// Storage-layer failure other than a missing partition or key.
    Storage,
    Internal,
}

/// Structured source error consumed by the provider's fallback loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self {
            kind: SourceErrorKind::Timeout,
            message: format!("source did not answer within {timeout_ms}ms"),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Storage,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::Storage => "source.storage",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Request payload for bar reads: `start <= ts <= end`, both UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarsRequest {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub start: UtcDateTime,
    pub end: UtcDateTime,
}

impl BarsRequest {
    pub fn new(
        symbol: Symbol,
        timeframe: Timeframe,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<Self, SourceError> {
        if start > end {
            return Err(SourceError::invalid_request(format!(
                "bars request start {start} is after end {end}"
            )));
        }
        Ok(Self {
            symbol,
            timeframe,
            start,
            end,
        })
    }

    /// Length of the requested window.
    pub fn window(&self) -> time::Duration {
        self.end - self.start
    }
}

/// Boxed future returned by source reads.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Market-data source contract.
///
/// Implementations must be `Send + Sync`; the provider shares them across
/// tasks behind `Arc`. An empty series is a valid answer and is treated by
/// the provider as a miss.
pub trait MarketSource: Send + Sync {
    /// Which slot of the provider this source fills.
    fn kind(&self) -> SourceKind;

    /// Fetch bars for `req`. Implementations may return bars outside the
    /// range; the provider filters.
    fn fetch_bars<'a>(&'a self, req: BarsRequest) -> SourceFuture<'a, BarSeries>;

    /// Called when the caller's deadline dropped a `fetch_bars` future before
    /// it resolved. Sources gated by a circuit breaker count it as a failure.
    fn record_timeout(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_range() {
        let start = UtcDateTime::parse("2024-01-02T00:00:00Z").expect("ts");
        let end = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("ts");
        let err = BarsRequest::new(Symbol::parse("EURUSD").expect("symbol"), Timeframe::H1, start, end)
            .expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::InvalidRequest);
        assert_eq!(err.code(), "source.invalid_request");
    }

    #[test]
    fn timeout_errors_are_retryable() {
        let err = SourceError::timeout(250);
        assert!(err.retryable());
        assert!(err.to_string().contains("250ms"));
    }
}
