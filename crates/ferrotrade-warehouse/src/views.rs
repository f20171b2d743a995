//! Database views over the ledger and archive manifest.

use ::duckdb::Connection;

use crate::{Warehouse, WarehouseError};

/// Create database views used by listings and operator reports.
///
/// Creates the following views:
/// - `vw_open_positions`: positions that are still open or partially closed
/// - `vw_order_status_counts`: number of orders per status
/// - `vw_archive_coverage`: partition count and bar range per symbol/timeframe
///
/// # Errors
/// Returns an error if the view creation SQL fails to execute.
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r"
CREATE OR REPLACE VIEW vw_open_positions AS
SELECT *
FROM positions
WHERE status IN ('OPEN', 'PARTIALLY_CLOSED');

CREATE OR REPLACE VIEW vw_order_status_counts AS
SELECT
    status,
    COUNT(*) AS order_count
FROM order_records
GROUP BY status;

CREATE OR REPLACE VIEW vw_archive_coverage AS
SELECT
    symbol,
    timeframe,
    COUNT(*) AS partitions,
    SUM(row_count) AS bars,
    MIN(min_ts_unix) AS first_ts_unix,
    MAX(max_ts_unix) AS last_ts_unix
FROM archive_manifest
GROUP BY symbol, timeframe;
",
    )?;

    Ok(())
}

impl Warehouse {
    /// Order counts keyed by status, sorted by status.
    pub fn order_status_counts(&self) -> Result<Vec<(String, u64)>, WarehouseError> {
        let connection = self.connection()?;
        let mut statement = connection
            .prepare("SELECT status, order_count FROM vw_order_status_counts ORDER BY status")?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row?;
            counts.push((status, u64::try_from(count).unwrap_or_default()));
        }
        Ok(counts)
    }
}
