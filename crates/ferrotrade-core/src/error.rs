use thiserror::Error;

/// Validation and contract errors exposed by `ferrotrade-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter or digit: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid timeframe '{value}', expected one of M1, M5, M15, M30, H1, H4, D1, W1")]
    InvalidTimeframe { value: String },
    #[error("invalid intent '{value}', expected one of TRADING, CHART, ANALYSIS")]
    InvalidIntent { value: String },
    #[error("invalid source '{value}', expected one of live, cache, archive, web")]
    InvalidSource { value: String },
    #[error("period must be between 1 and 36525 days, got {value}")]
    InvalidPeriod { value: i64 },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("unix timestamp {seconds} is out of range")]
    TimestampOutOfRange { seconds: i64 },

    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },

    #[error("bar high must be >= low")]
    InvalidBarRange,
    #[error("bar open/close must be within high/low range")]
    InvalidBarBounds,
}

/// Errors returned by [`MarketDataProvider::get_data`](crate::MarketDataProvider::get_data).
///
/// Source failures never appear here; they are absorbed by the fallback chain
/// and reported in the response metadata.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
