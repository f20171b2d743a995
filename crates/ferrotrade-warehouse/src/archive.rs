//! Cold archive of bar history as daily parquet partitions.
//!
//! Layout: `{archive_root}/{symbol}/{timeframe}/{yyyy}/{mm}/{dd}.parquet`.
//! Prices and volume are stored as decimal strings, timestamps as unix
//! seconds. Partitions are append-only: rewriting a partition merges the new
//! bars into the existing file and the stored bar wins on a timestamp clash.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{Connection, ToSql};
use serde::Serialize;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime};
use tracing::{debug, warn};

use crate::models::{parse_decimal, ArchivedBar, PartitionInfo};
use crate::{escape_sql_string, path_to_sql, Warehouse, WarehouseError};

/// Report from rebuilding the manifest out of the files on disk.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveSyncReport {
    pub archive_root: PathBuf,
    pub scanned_partitions: usize,
    pub synced_partitions: usize,
    /// Files whose path does not follow the partition layout.
    pub skipped_partitions: usize,
    pub failed_partitions: usize,
}

impl Warehouse {
    /// File location of one daily partition.
    pub fn partition_path(
        &self,
        symbol: &str,
        timeframe: &str,
        date: Date,
    ) -> Result<PathBuf, WarehouseError> {
        validate_component("symbol", symbol)?;
        validate_component("timeframe", timeframe)?;
        Ok(self
            .archive_root()
            .join(symbol)
            .join(timeframe)
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", u8::from(date.month())))
            .join(format!("{:02}.parquet", date.day())))
    }

    /// Read one partition, sorted by timestamp. `Ok(None)` when the partition
    /// does not exist.
    pub fn read_partition(
        &self,
        symbol: &str,
        timeframe: &str,
        date: Date,
    ) -> Result<Option<Vec<ArchivedBar>>, WarehouseError> {
        let path = self.partition_path(symbol, timeframe, date)?;
        if !path.exists() {
            return Ok(None);
        }

        let connection = self.connection()?;
        read_parquet_bars(&connection, &path).map(Some)
    }

    /// Merge `bars` into the partition for `date` and refresh its manifest row.
    ///
    /// Every bar must fall on `date` (UTC).
    pub fn write_partition(
        &self,
        symbol: &str,
        timeframe: &str,
        date: Date,
        bars: &[ArchivedBar],
    ) -> Result<PartitionInfo, WarehouseError> {
        for bar in bars {
            let bar_date = date_of(bar.ts_unix)?;
            if bar_date != date {
                return Err(WarehouseError::invalid_data(format!(
                    "bar at {} belongs to {bar_date}, not partition {date}",
                    bar.ts_unix
                )));
            }
        }

        let path = self.partition_path(symbol, timeframe, date)?;
        let connection = self.connection()?;

        let mut merged = BTreeMap::new();
        if path.exists() {
            for bar in read_parquet_bars(&connection, &path)? {
                merged.insert(bar.ts_unix, bar);
            }
        }
        let existing = merged.len();
        for bar in bars {
            merged.entry(bar.ts_unix).or_insert_with(|| bar.clone());
        }
        debug!(
            symbol,
            timeframe,
            %date,
            existing,
            added = merged.len() - existing,
            "writing archive partition"
        );

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let rows: Vec<ArchivedBar> = merged.into_values().collect();
        write_parquet_bars(&connection, &path, &rows)?;

        let info = PartitionInfo {
            symbol: symbol.to_owned(),
            timeframe: timeframe.to_owned(),
            partition_date: date,
            path,
            row_count: rows.len() as u64,
            min_ts_unix: rows.first().map(|bar| bar.ts_unix),
            max_ts_unix: rows.last().map(|bar| bar.ts_unix),
        };
        register_partition(&connection, &info)?;
        Ok(info)
    }

    /// Split `bars` by UTC date and merge each group into its partition.
    pub fn write_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        bars: &[ArchivedBar],
    ) -> Result<Vec<PartitionInfo>, WarehouseError> {
        let mut by_date: BTreeMap<Date, Vec<ArchivedBar>> = BTreeMap::new();
        for bar in bars {
            by_date.entry(date_of(bar.ts_unix)?).or_default().push(bar.clone());
        }

        by_date
            .into_iter()
            .map(|(date, rows)| self.write_partition(symbol, timeframe, date, &rows))
            .collect()
    }

    /// Manifest entries for one symbol and timeframe, oldest first.
    pub fn list_partitions(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<Vec<PartitionInfo>, WarehouseError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(
            "SELECT symbol, timeframe, CAST(partition_date AS VARCHAR), path, row_count, \
             min_ts_unix, max_ts_unix \
             FROM archive_manifest WHERE symbol = ? AND timeframe = ? \
             ORDER BY partition_date",
        )?;
        let rows = statement.query_map([symbol, timeframe], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<i64>>(6)?,
            ))
        })?;

        let date_format = format_description!("[year]-[month]-[day]");
        let mut partitions = Vec::new();
        for row in rows {
            let (symbol, timeframe, date, path, row_count, min_ts_unix, max_ts_unix) = row?;
            let partition_date = Date::parse(&date, &date_format).map_err(|error| {
                WarehouseError::invalid_data(format!("partition_date '{date}': {error}"))
            })?;
            partitions.push(PartitionInfo {
                symbol,
                timeframe,
                partition_date,
                path: PathBuf::from(path),
                row_count: u64::try_from(row_count).unwrap_or_default(),
                min_ts_unix,
                max_ts_unix,
            });
        }
        Ok(partitions)
    }

    /// Rebuild manifest rows from the parquet files under the archive root.
    /// Idempotent.
    pub fn sync_archive_manifest(&self) -> Result<ArchiveSyncReport, WarehouseError> {
        let archive_root = self.archive_root().to_path_buf();
        let mut report = ArchiveSyncReport {
            archive_root: archive_root.clone(),
            ..ArchiveSyncReport::default()
        };

        if !archive_root.exists() {
            return Ok(report);
        }

        let mut files = Vec::new();
        collect_parquet_files(archive_root.as_path(), &mut files)?;

        let connection = self.connection()?;
        for path in files {
            report.scanned_partitions += 1;
            let Some((symbol, timeframe, date)) = parse_partition(&archive_root, &path) else {
                report.skipped_partitions += 1;
                continue;
            };

            let registered = read_parquet_bars(&connection, &path).and_then(|rows| {
                register_partition(
                    &connection,
                    &PartitionInfo {
                        symbol,
                        timeframe,
                        partition_date: date,
                        row_count: rows.len() as u64,
                        min_ts_unix: rows.first().map(|bar| bar.ts_unix),
                        max_ts_unix: rows.last().map(|bar| bar.ts_unix),
                        path: path.clone(),
                    },
                )
            });
            match registered {
                Ok(()) => report.synced_partitions += 1,
                Err(error) => {
                    warn!(path = %path.display(), %error, "failed to register archive partition");
                    report.failed_partitions += 1;
                }
            }
        }

        Ok(report)
    }
}

fn read_parquet_bars(connection: &Connection, path: &Path) -> Result<Vec<ArchivedBar>, WarehouseError> {
    let sql = format!(
        "SELECT ts_unix, open, high, low, close, volume FROM read_parquet('{}') ORDER BY ts_unix",
        escape_sql_string(path_to_sql(path).as_str())
    );
    let mut statement = connection.prepare(sql.as_str())?;
    let rows = statement.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut bars = Vec::new();
    for row in rows {
        let (ts_unix, open, high, low, close, volume) = row?;
        bars.push(ArchivedBar {
            ts_unix,
            open: parse_decimal("open", &open)?,
            high: parse_decimal("high", &high)?,
            low: parse_decimal("low", &low)?,
            close: parse_decimal("close", &close)?,
            volume: parse_decimal("volume", &volume)?,
        });
    }
    Ok(bars)
}

fn write_parquet_bars(
    connection: &Connection,
    path: &Path,
    rows: &[ArchivedBar],
) -> Result<(), WarehouseError> {
    connection.execute_batch(
        "CREATE OR REPLACE TEMP TABLE archive_staging ( \
             ts_unix BIGINT, open VARCHAR, high VARCHAR, low VARCHAR, close VARCHAR, volume VARCHAR)",
    )?;

    let result = (|| -> Result<(), WarehouseError> {
        let mut insert = connection.prepare("INSERT INTO archive_staging VALUES (?, ?, ?, ?, ?, ?)")?;
        for bar in rows {
            let open = bar.open.to_string();
            let high = bar.high.to_string();
            let low = bar.low.to_string();
            let close = bar.close.to_string();
            let volume = bar.volume.to_string();
            let params: [&dyn ToSql; 6] = [&bar.ts_unix, &open, &high, &low, &close, &volume];
            insert.execute(params.as_slice())?;
        }

        let staging_path = path.with_extension("parquet.tmp");
        let copy = format!(
            "COPY (SELECT * FROM archive_staging ORDER BY ts_unix) TO '{}' (FORMAT PARQUET)",
            escape_sql_string(path_to_sql(&staging_path).as_str())
        );
        connection.execute_batch(copy.as_str())?;
        fs::rename(&staging_path, path)?;
        Ok(())
    })();

    let _ = connection.execute_batch("DROP TABLE IF EXISTS archive_staging");
    result
}

fn register_partition(connection: &Connection, info: &PartitionInfo) -> Result<(), WarehouseError> {
    let date = info.partition_date.to_string();
    let path = path_to_sql(&info.path);
    let row_count = i64::try_from(info.row_count).unwrap_or(i64::MAX);
    let params: [&dyn ToSql; 7] = [
        &info.symbol,
        &info.timeframe,
        &date,
        &path,
        &row_count,
        &info.min_ts_unix,
        &info.max_ts_unix,
    ];
    connection.execute(
        "INSERT OR REPLACE INTO archive_manifest \
         (symbol, timeframe, partition_date, path, row_count, min_ts_unix, max_ts_unix, updated_at) \
         VALUES (?, ?, CAST(? AS DATE), ?, ?, ?, ?, CURRENT_TIMESTAMP)",
        params.as_slice(),
    )?;
    Ok(())
}

fn date_of(ts_unix: i64) -> Result<Date, WarehouseError> {
    OffsetDateTime::from_unix_timestamp(ts_unix)
        .map(OffsetDateTime::date)
        .map_err(|error| WarehouseError::invalid_data(format!("timestamp {ts_unix}: {error}")))
}

fn validate_component(name: &str, value: &str) -> Result<(), WarehouseError> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(WarehouseError::invalid_data(format!(
            "{name} '{value}' is not a valid partition path component"
        )))
    }
}

/// Recursively collect parquet files from a directory.
fn collect_parquet_files(root: &Path, files: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_parquet_files(path.as_path(), files)?;
            continue;
        }
        if path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| extension.eq_ignore_ascii_case("parquet"))
        {
            files.push(path);
        }
    }

    Ok(())
}

/// Split `{symbol}/{timeframe}/{yyyy}/{mm}/{dd}.parquet` relative to `root`.
fn parse_partition(root: &Path, path: &Path) -> Option<(String, String, Date)> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    let [symbol, timeframe, year, month, day_file] = parts.as_slice() else {
        return None;
    };

    let year = year.parse::<i32>().ok()?;
    let month = Month::try_from(month.parse::<u8>().ok()?).ok()?;
    let day = day_file.strip_suffix(".parquet")?.parse::<u8>().ok()?;
    let date = Date::from_calendar_date(year, month, day).ok()?;
    Some((symbol.clone(), timeframe.clone(), date))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;
    use time::macros::date;

    // 2024-03-04T00:00:00Z
    const DAY_START: i64 = 1_709_510_400;

    fn bar(ts_unix: i64, close: Decimal) -> ArchivedBar {
        ArchivedBar {
            ts_unix,
            open: dec!(1.0800),
            high: dec!(1.0900),
            low: dec!(1.0700),
            close,
            volume: dec!(125.5),
        }
    }

    #[test]
    fn partition_path_follows_layout() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");
        let path = warehouse
            .partition_path("EURUSD", "H1", date!(2024 - 03 - 04))
            .expect("path");
        assert!(path.ends_with("EURUSD/H1/2024/03/04.parquet"));
        assert!(warehouse.partition_path("../etc", "H1", date!(2024 - 03 - 04)).is_err());
    }

    #[test]
    fn missing_partition_reads_as_none() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");
        let read = warehouse
            .read_partition("EURUSD", "H1", date!(2024 - 03 - 04))
            .expect("read");
        assert!(read.is_none());
    }

    #[test]
    fn rewrite_merges_and_keeps_stored_bars() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");
        let day = date!(2024 - 03 - 04);

        warehouse
            .write_partition("EURUSD", "H1", day, &[bar(DAY_START + 3600, dec!(1.0810))])
            .expect("first write");
        let info = warehouse
            .write_partition(
                "EURUSD",
                "H1",
                day,
                &[bar(DAY_START + 3600, dec!(9.9999)), bar(DAY_START, dec!(1.0805))],
            )
            .expect("second write");
        assert_eq!(info.row_count, 2);
        assert_eq!(info.min_ts_unix, Some(DAY_START));

        let bars = warehouse
            .read_partition("EURUSD", "H1", day)
            .expect("read")
            .expect("present");
        let stamps: Vec<_> = bars.iter().map(|b| b.ts_unix).collect();
        assert_eq!(stamps, [DAY_START, DAY_START + 3600]);
        assert_eq!(bars[1].close, dec!(1.0810));
        assert_eq!(bars[1].volume, dec!(125.5));
    }

    #[test]
    fn rejects_bar_outside_partition_day() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");
        let error = warehouse
            .write_partition("EURUSD", "H1", date!(2024 - 03 - 05), &[bar(DAY_START, dec!(1))])
            .expect_err("must fail");
        assert!(matches!(error, WarehouseError::InvalidData(_)));
    }

    #[test]
    fn write_bars_splits_by_day_and_lists_manifest() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");
        let bars = [
            bar(DAY_START - 3600, dec!(1.0801)),
            bar(DAY_START, dec!(1.0802)),
            bar(DAY_START + 7200, dec!(1.0803)),
        ];
        let written = warehouse.write_bars("EURUSD", "H1", &bars).expect("write");
        assert_eq!(written.len(), 2);

        let listed = warehouse.list_partitions("EURUSD", "H1").expect("list");
        let dates: Vec<_> = listed.iter().map(|p| p.partition_date).collect();
        assert_eq!(dates, [date!(2024 - 03 - 03), date!(2024 - 03 - 04)]);
        assert_eq!(listed[1].row_count, 2);
    }

    #[test]
    fn manifest_sync_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");
        warehouse
            .write_bars("EURUSD", "H1", &[bar(DAY_START, dec!(1.08))])
            .expect("write");
        fs::write(temp.path().join("stray.parquet"), b"not a partition").expect("stray");

        let first = warehouse.sync_archive_manifest().expect("first sync");
        let second = warehouse.sync_archive_manifest().expect("second sync");
        assert_eq!(first.synced_partitions, 1);
        assert_eq!(first.skipped_partitions, 1);
        assert_eq!(second.synced_partitions, 1);
        assert_eq!(warehouse.list_partitions("EURUSD", "H1").expect("list").len(), 1);
    }
}
