//! Tiered cache: short-lived copies of the most recent bars.
//!
//! The provider talks to the cache through [`TieredCache`], which stores one
//! JSON-encoded [`BarSeries`] per `(symbol, timeframe)` under the key
//! `bars:{symbol}:{timeframe}`. The backing key-value store is behind the
//! [`CacheClient`] seam; [`CacheStore`] is the in-process implementation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::data_source::{BarsRequest, MarketSource, SourceError, SourceFuture};
use crate::{BarSeries, SourceKind, Symbol, Timeframe, UtcDateTime};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache payload could not be encoded: {0}")]
    Encode(String),
}

pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Key-value store with per-entry expiry.
pub trait CacheClient: Send + Sync {
    /// Returns `None` for missing or expired keys.
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>>;

    fn set_with_ttl<'a>(&'a self, key: &'a str, value: String, ttl: Duration)
        -> CacheFuture<'a, ()>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    body: String,
    expires_at: Instant,
}

/// In-process [`CacheClient`] guarded by an async `RwLock`; last write wins.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    inner: Arc<tokio::sync::RwLock<HashMap<String, CacheEntry>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired entries.
    pub async fn clear_expired(&self) {
        let now = Instant::now();
        self.inner.write().await.retain(|_, entry| entry.expires_at > now);
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Number of entries, including expired ones not yet cleared.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl CacheClient for CacheStore {
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>> {
        Box::pin(async move {
            let store = self.inner.read().await;
            Ok(store
                .get(key)
                .filter(|entry| Instant::now() <= entry.expires_at)
                .map(|entry| entry.body.clone()))
        })
    }

    fn set_with_ttl<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            if ttl.is_zero() {
                return Ok(());
            }
            let entry = CacheEntry {
                body: value,
                expires_at: Instant::now() + ttl,
            };
            self.inner.write().await.insert(key.to_owned(), entry);
            Ok(())
        })
    }
}

/// [`MarketSource`] view over a [`CacheClient`].
#[derive(Clone)]
pub struct TieredCache {
    client: Arc<dyn CacheClient>,
    ttl: Duration,
    window: time::Duration,
}

impl TieredCache {
    /// `window` bounds what [`TieredCache::write_back`] keeps, `ttl` is the
    /// expiry given to every write.
    pub fn new(client: Arc<dyn CacheClient>, ttl: Duration, window: time::Duration) -> Self {
        Self {
            client,
            ttl,
            window,
        }
    }

    pub fn key(symbol: &Symbol, timeframe: Timeframe) -> String {
        format!("bars:{symbol}:{timeframe}")
    }

    pub const fn window(&self) -> time::Duration {
        self.window
    }

    /// Stores the slice of `series` newer than `now - window`. Returns the
    /// number of bars written.
    pub async fn write_back(&self, series: &BarSeries, now: UtcDateTime) -> Result<usize, CacheError> {
        let slice = match now.checked_sub(self.window) {
            Some(since) => series.tail_since(since),
            None => series.clone(),
        };
        if slice.is_empty() {
            return Ok(0);
        }

        let body =
            serde_json::to_string(&slice).map_err(|error| CacheError::Encode(error.to_string()))?;
        let key = Self::key(&slice.symbol, slice.timeframe);
        self.client.set_with_ttl(&key, body, self.ttl).await?;
        debug!(key = %key, rows = slice.len(), "cache write-back");
        Ok(slice.len())
    }
}

impl MarketSource for TieredCache {
    fn kind(&self) -> SourceKind {
        SourceKind::Cache
    }

    fn fetch_bars<'a>(&'a self, req: BarsRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move {
            let key = Self::key(&req.symbol, req.timeframe);
            let cached = self
                .client
                .get(&key)
                .await
                .map_err(|error| SourceError::unavailable(error.to_string()))?;

            let Some(body) = cached else {
                return Ok(BarSeries::empty(req.symbol, req.timeframe));
            };

            let series: BarSeries = serde_json::from_str(&body).map_err(|error| {
                SourceError::storage(format!("corrupt cache entry '{key}': {error}"))
            })?;
            Ok(series.filter_range(req.start, req.end))
        })
    }
}
