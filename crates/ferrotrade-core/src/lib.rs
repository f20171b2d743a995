//! # Ferrotrade Core
//!
//! Market-data side of the ferrotrade platform.
//!
//! - **Domain types**: [`Symbol`], [`Timeframe`], [`UtcDateTime`], [`Bar`], [`BarSeries`]
//! - **Sources**: the [`MarketSource`] contract and its four implementations
//! - **Provider**: [`MarketDataProvider`], intent-driven source selection with fallback
//!   and cache write-back
//! - **Broker contract**: [`BrokerClient`], shared with the order pipeline
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Paper broker and public web feed |
//! | [`archive`] | Cold archive client and source |
//! | [`broker`] | Broker contract and live-feed source |
//! | [`cache`] | Tiered cache client and source |
//! | [`circuit_breaker`] | Circuit breaker for upstream feeds |
//! | [`config`] | TOML + environment configuration |
//! | [`data_source`] | Source trait, request and error types |
//! | [`domain`] | Domain models |
//! | [`provider`] | Unified market data provider |
//! | [`stats`] | Per-source counters |
//! | [`throttling`] | Rate limiting for the web feed |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  MarketDataProvider  │──▶ SourceStats
//! └──────────┬───────────┘
//!            │ plan = f(intent, lookback)
//!   ┌────────┼──────────┬─────────────┐
//!   ▼        ▼          ▼             ▼
//! live     cache     archive        web
//! (broker) (KV+TTL)  (parquet)      (HTTP, breaker, throttle)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ferrotrade_core::{LiveFeedSource, MarketDataProvider, PaperBroker};
//!
//! # async fn run() -> Result<(), ferrotrade_core::ProviderError> {
//! let provider = MarketDataProvider::builder()
//!     .live(Arc::new(LiveFeedSource::new(Arc::new(PaperBroker::new()))))
//!     .build();
//!
//! let response = provider.get_data("EURUSD", "H1", 1, "TRADING", None).await?;
//! assert_eq!(response.meta.fallback_count, 0);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod archive;
pub mod broker;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod provider;
pub mod source;
pub mod stats;
pub mod throttling;

pub use adapters::{PaperBroker, WebFeedSource};

pub use archive::{ArchiveClient, ArchiveError, ArchiveSource, PartitionKey};

pub use broker::{
    AccountInfo, BrokerClient, BrokerError, BrokerFill, BrokerOrder, BrokerPosition,
    LiveFeedSource, OrderSide,
};

pub use cache::{CacheClient, CacheError, CacheStore, TieredCache};

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use config::{AppConfig, LoggingConfig, ProviderConfig, SourceTimeouts, TradingConfig};

pub use data_source::{BarsRequest, MarketSource, SourceError, SourceErrorKind};

pub use domain::{Bar, BarSeries, Symbol, Timeframe, UtcDateTime};

pub use error::{ConfigError, ProviderError, ValidationError};

pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

pub use provider::{
    source_plan, AttemptOutcome, DataMeta, DataQuery, DataResponse, MarketDataProvider,
    MarketDataProviderBuilder, SourceAttempt, MAX_PERIOD_DAYS,
};

pub use source::{Intent, SourceKind};

pub use stats::{SourceStats, SourceStatsSnapshot};

pub use throttling::{BackoffPolicy, Throttle, ThrottlePolicy};

// Warehouse types that appear in this crate's public API.
pub use ferrotrade_warehouse::{PartitionInfo, Warehouse, WarehouseConfig, WarehouseError};
