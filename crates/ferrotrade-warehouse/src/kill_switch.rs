//! Durable kill switch row.
//!
//! The table holds at most one row (`id = 1`). Writers pass the version they
//! last observed; a write only lands when it still matches.

use ::duckdb::{OptionalExt, ToSql};

use crate::models::{format_timestamp, parse_timestamp, KillSwitchRecord};
use crate::{Warehouse, WarehouseError};

const SINGLETON_ID: i32 = 1;

impl Warehouse {
    /// Read the kill switch row, `None` when it was never written.
    pub fn load_kill_switch(&self) -> Result<Option<KillSwitchRecord>, WarehouseError> {
        let connection = self.connection()?;
        let raw = connection
            .query_row(
                "SELECT status, reason, updated_by, last_updated_utc, version \
                 FROM kill_switch WHERE id = ?",
                [SINGLETON_ID],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u64>(4)?,
                    ))
                },
            )
            .optional()?;

        raw.map(|(status, reason, updated_by, last_updated_utc, version)| {
            Ok(KillSwitchRecord {
                status,
                reason,
                updated_by,
                last_updated_utc: parse_timestamp("last_updated_utc", &last_updated_utc)?,
                version,
            })
        })
        .transpose()
    }

    /// Conditionally write the kill switch row.
    ///
    /// With `expected_version = None` the row must not exist yet; otherwise the
    /// stored version must equal it. Returns `false` when the condition fails.
    pub fn put_kill_switch_if_version(
        &self,
        expected_version: Option<u64>,
        record: &KillSwitchRecord,
    ) -> Result<bool, WarehouseError> {
        let connection = self.connection()?;
        let last_updated = format_timestamp(record.last_updated_utc)?;

        let written = match expected_version {
            None => {
                let params: [&dyn ToSql; 6] = [
                    &SINGLETON_ID,
                    &record.status,
                    &record.reason,
                    &record.updated_by,
                    &last_updated,
                    &record.version,
                ];
                connection.execute(
                    "INSERT INTO kill_switch \
                     (id, status, reason, updated_by, last_updated_utc, version) \
                     VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
                    params.as_slice(),
                )?
            }
            Some(expected) => {
                let params: [&dyn ToSql; 7] = [
                    &record.status,
                    &record.reason,
                    &record.updated_by,
                    &last_updated,
                    &record.version,
                    &SINGLETON_ID,
                    &expected,
                ];
                connection.execute(
                    "UPDATE kill_switch SET status = ?, reason = ?, updated_by = ?, \
                     last_updated_utc = ?, version = ? WHERE id = ? AND version = ?",
                    params.as_slice(),
                )?
            }
        };

        Ok(written == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use time::macros::datetime;

    fn record(status: &str, version: u64) -> KillSwitchRecord {
        KillSwitchRecord {
            status: status.to_owned(),
            reason: Some("maintenance".to_owned()),
            updated_by: Some("ops".to_owned()),
            last_updated_utc: datetime!(2024-05-01 08:00 UTC),
            version,
        }
    }

    #[test]
    fn missing_row_loads_as_none() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");
        assert!(warehouse.load_kill_switch().expect("load").is_none());
    }

    #[test]
    fn first_write_requires_absent_row() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");

        assert!(warehouse
            .put_kill_switch_if_version(None, &record("ON", 1))
            .expect("create"));
        assert!(!warehouse
            .put_kill_switch_if_version(None, &record("OFF", 1))
            .expect("second create"));

        let stored = warehouse.load_kill_switch().expect("load").expect("present");
        assert_eq!(stored, record("ON", 1));
    }

    #[test]
    fn conditional_update_checks_version() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");
        warehouse
            .put_kill_switch_if_version(None, &record("ON", 1))
            .expect("create");

        assert!(warehouse
            .put_kill_switch_if_version(Some(1), &record("OFF", 2))
            .expect("update"));
        assert!(!warehouse
            .put_kill_switch_if_version(Some(1), &record("ON", 2))
            .expect("stale update"));

        let stored = warehouse.load_kill_switch().expect("load").expect("present");
        assert_eq!(stored.status, "OFF");
        assert_eq!(stored.version, 2);
    }
}
