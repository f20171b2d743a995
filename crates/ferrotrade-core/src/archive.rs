//! Cold archive: full bar history, one partition per symbol, timeframe and
//! UTC day.
//!
//! Partitions are addressed by [`PartitionKey`]
//! (`{symbol}/{timeframe}/{yyyy}/{mm}/{dd}`). A range read walks the daily
//! keys from the start date to the end date inclusive; missing partitions are
//! skipped, any other storage error aborts the read.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use ferrotrade_warehouse::{ArchivedBar, PartitionInfo, Warehouse, WarehouseError};
use thiserror::Error;
use time::Date;
use tracing::debug;

use crate::data_source::{BarsRequest, MarketSource, SourceError, SourceFuture};
use crate::{Bar, BarSeries, SourceKind, Symbol, Timeframe, UtcDateTime};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive storage error: {0}")]
    Storage(#[from] WarehouseError),
    #[error("corrupt archive partition {key}: {message}")]
    Corrupt { key: String, message: String },
    #[error("archive worker failed: {0}")]
    Worker(String),
}

/// Address of one daily partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub date: Date,
}

impl PartitionKey {
    pub fn new(symbol: Symbol, timeframe: Timeframe, date: Date) -> Self {
        Self {
            symbol,
            timeframe,
            date,
        }
    }

    /// Inclusive list of daily keys covering `start..=end`.
    pub fn covering(
        symbol: &Symbol,
        timeframe: Timeframe,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Vec<Self> {
        let mut keys = Vec::new();
        let mut date = start.date();
        let last = end.date();
        while date <= last {
            keys.push(Self::new(symbol.clone(), timeframe, date));
            match date.next_day() {
                Some(next) => date = next,
                None => break,
            }
        }
        keys
    }
}

impl Display for PartitionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{:04}/{:02}/{:02}",
            self.symbol,
            self.timeframe,
            self.date.year(),
            u8::from(self.date.month()),
            self.date.day()
        )
    }
}

pub type ArchiveFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ArchiveError>> + Send + 'a>>;

/// Partitioned, append-only bar store.
pub trait ArchiveClient: Send + Sync {
    /// `Ok(None)` when the partition does not exist.
    fn read_partition<'a>(&'a self, key: PartitionKey) -> ArchiveFuture<'a, Option<Vec<Bar>>>;

    /// Merge `bars` into the partition; stored rows win on duplicate timestamps.
    fn write_partition<'a>(&'a self, key: PartitionKey, bars: Vec<Bar>)
        -> ArchiveFuture<'a, PartitionInfo>;

    fn list_partitions<'a>(
        &'a self,
        symbol: Symbol,
        timeframe: Timeframe,
    ) -> ArchiveFuture<'a, Vec<PartitionInfo>>;
}

async fn blocking<T, F>(work: F) -> Result<T, ArchiveError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ArchiveError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| ArchiveError::Worker(error.to_string()))?
}

impl ArchiveClient for Warehouse {
    fn read_partition<'a>(&'a self, key: PartitionKey) -> ArchiveFuture<'a, Option<Vec<Bar>>> {
        let warehouse = self.clone();
        Box::pin(blocking(move || {
            let Some(rows) =
                warehouse.read_partition(key.symbol.as_str(), key.timeframe.as_str(), key.date)?
            else {
                return Ok(None);
            };
            rows.into_iter()
                .map(|row| bar_from_archive(&key, row))
                .collect::<Result<Vec<_>, _>>()
                .map(Some)
        }))
    }

    fn write_partition<'a>(
        &'a self,
        key: PartitionKey,
        bars: Vec<Bar>,
    ) -> ArchiveFuture<'a, PartitionInfo> {
        let warehouse = self.clone();
        Box::pin(blocking(move || {
            let rows: Vec<ArchivedBar> = bars.iter().map(bar_to_archive).collect();
            Ok(warehouse.write_partition(
                key.symbol.as_str(),
                key.timeframe.as_str(),
                key.date,
                &rows,
            )?)
        }))
    }

    fn list_partitions<'a>(
        &'a self,
        symbol: Symbol,
        timeframe: Timeframe,
    ) -> ArchiveFuture<'a, Vec<PartitionInfo>> {
        let warehouse = self.clone();
        Box::pin(blocking(move || {
            Ok(warehouse.list_partitions(symbol.as_str(), timeframe.as_str())?)
        }))
    }
}

fn bar_from_archive(key: &PartitionKey, row: ArchivedBar) -> Result<Bar, ArchiveError> {
    let corrupt = |message: String| ArchiveError::Corrupt {
        key: key.to_string(),
        message,
    };
    let ts = UtcDateTime::from_unix_timestamp(row.ts_unix).map_err(|e| corrupt(e.to_string()))?;
    Bar::new(ts, row.open, row.high, row.low, row.close, row.volume)
        .map_err(|e| corrupt(format!("bar at {ts}: {e}")))
}

fn bar_to_archive(bar: &Bar) -> ArchivedBar {
    ArchivedBar {
        ts_unix: bar.ts.unix_timestamp(),
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        volume: bar.volume,
    }
}

/// [`MarketSource`] over an [`ArchiveClient`].
#[derive(Clone)]
pub struct ArchiveSource {
    client: Arc<dyn ArchiveClient>,
}

impl ArchiveSource {
    pub fn new(client: Arc<dyn ArchiveClient>) -> Self {
        Self { client }
    }

    /// Read every partition overlapping the range, concatenated, sorted and
    /// de-duplicated, filtered to `start..=end`.
    pub async fn read_range(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<BarSeries, ArchiveError> {
        let mut bars = Vec::new();
        let mut missing = 0_usize;
        for key in PartitionKey::covering(symbol, timeframe, start, end) {
            match self.client.read_partition(key).await? {
                Some(rows) => bars.extend(rows),
                None => missing += 1,
            }
        }
        debug!(symbol = %symbol, timeframe = %timeframe, rows = bars.len(), missing, "archive range read");

        Ok(BarSeries::new(symbol.clone(), timeframe, bars).filter_range(start, end))
    }

    /// Append `series` to the archive, one partition per UTC day.
    pub async fn store(&self, series: &BarSeries) -> Result<Vec<PartitionInfo>, ArchiveError> {
        let mut by_date: BTreeMap<Date, Vec<Bar>> = BTreeMap::new();
        for bar in &series.bars {
            by_date.entry(bar.ts.date()).or_default().push(bar.clone());
        }

        let mut written = Vec::with_capacity(by_date.len());
        for (date, bars) in by_date {
            let key = PartitionKey::new(series.symbol.clone(), series.timeframe, date);
            written.push(self.client.write_partition(key, bars).await?);
        }
        Ok(written)
    }

    pub async fn list_partitions(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Vec<PartitionInfo>, ArchiveError> {
        self.client.list_partitions(symbol.clone(), timeframe).await
    }
}

impl MarketSource for ArchiveSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Archive
    }

    fn fetch_bars<'a>(&'a self, req: BarsRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move {
            self.read_range(&req.symbol, req.timeframe, req.start, req.end)
                .await
                .map_err(|error| SourceError::storage(error.to_string()))
        })
    }
}
