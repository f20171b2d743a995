//! Position and order ledger.
//!
//! The order processor is the only writer. Order rows are keyed by
//! idempotency key and every status change appends an `order_events` row in
//! the same transaction. Position updates are conditional on the stored
//! version.

use ::duckdb::{Connection, OptionalExt, Row, ToSql};

use crate::models::{
    format_timestamp, optional_decimal_text, parse_decimal, parse_optional_decimal,
    parse_timestamp, OrderEventRecord, OrderRecord, PositionRecord,
};
use crate::{in_transaction, Warehouse, WarehouseError};

const POSITION_COLUMNS: &str = "position_id, symbol, side, size, entry_price, current_price, \
     stop_loss, take_profit, status, unrealized_pnl, realized_pnl, broker_ticket, \
     last_request_id, created_at, updated_at, version";

const ORDER_COLUMNS: &str = "idempotency_key, request_id, symbol, action, size, status, reason, \
     broker_ticket, fill_price, fill_size, position_applied, payload, created_at, updated_at";

impl Warehouse {
    /// Load a position by id.
    pub fn load_position(&self, position_id: &str) -> Result<Option<PositionRecord>, WarehouseError> {
        let connection = self.connection()?;
        let sql = format!("SELECT {POSITION_COLUMNS} FROM positions WHERE position_id = ?");
        let raw = connection
            .query_row(sql.as_str(), [position_id], RawPosition::from_row)
            .optional()?;
        raw.map(RawPosition::into_record).transpose()
    }

    /// Find the most recent position opened under a broker ticket.
    pub fn find_position_by_ticket(
        &self,
        broker_ticket: &str,
    ) -> Result<Option<PositionRecord>, WarehouseError> {
        let connection = self.connection()?;
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE broker_ticket = ? \
             ORDER BY created_at DESC LIMIT 1"
        );
        let raw = connection
            .query_row(sql.as_str(), [broker_ticket], RawPosition::from_row)
            .optional()?;
        raw.map(RawPosition::into_record).transpose()
    }

    /// List positions, optionally only those still open (fully or partially).
    pub fn list_positions(&self, open_only: bool) -> Result<Vec<PositionRecord>, WarehouseError> {
        let connection = self.connection()?;
        let source = if open_only { "vw_open_positions" } else { "positions" };
        let sql = format!("SELECT {POSITION_COLUMNS} FROM {source} ORDER BY created_at, position_id");
        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map([], RawPosition::from_row)?;

        let mut positions = Vec::new();
        for raw in rows {
            positions.push(raw?.into_record()?);
        }
        Ok(positions)
    }

    /// Insert a new position. Returns `false` when the id already exists.
    pub fn insert_position(&self, record: &PositionRecord) -> Result<bool, WarehouseError> {
        let connection = self.connection()?;
        let created_at = format_timestamp(record.created_at)?;
        let updated_at = format_timestamp(record.updated_at)?;
        let size = record.size.to_string();
        let entry_price = record.entry_price.to_string();
        let current_price = optional_decimal_text(record.current_price);
        let stop_loss = optional_decimal_text(record.stop_loss);
        let take_profit = optional_decimal_text(record.take_profit);
        let unrealized = record.unrealized_pnl.to_string();
        let realized = record.realized_pnl.to_string();

        let params: [&dyn ToSql; 16] = [
            &record.position_id,
            &record.symbol,
            &record.side,
            &size,
            &entry_price,
            &current_price,
            &stop_loss,
            &take_profit,
            &record.status,
            &unrealized,
            &realized,
            &record.broker_ticket,
            &record.last_request_id,
            &created_at,
            &updated_at,
            &record.version,
        ];
        let sql = format!(
            "INSERT INTO positions ({POSITION_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT DO NOTHING"
        );
        let inserted = connection.execute(sql.as_str(), params.as_slice())?;
        Ok(inserted == 1)
    }

    /// Overwrite a position when its stored version still equals
    /// `expected_version`. The stored version becomes `record.version`.
    ///
    /// Returns `false` on a version mismatch or a missing row.
    pub fn update_position(
        &self,
        record: &PositionRecord,
        expected_version: u64,
    ) -> Result<bool, WarehouseError> {
        let connection = self.connection()?;
        let updated_at = format_timestamp(record.updated_at)?;
        let size = record.size.to_string();
        let current_price = optional_decimal_text(record.current_price);
        let stop_loss = optional_decimal_text(record.stop_loss);
        let take_profit = optional_decimal_text(record.take_profit);
        let unrealized = record.unrealized_pnl.to_string();
        let realized = record.realized_pnl.to_string();

        let params: [&dyn ToSql; 12] = [
            &size,
            &current_price,
            &stop_loss,
            &take_profit,
            &record.status,
            &unrealized,
            &realized,
            &record.last_request_id,
            &updated_at,
            &record.version,
            &record.position_id,
            &expected_version,
        ];
        let updated = connection.execute(
            "UPDATE positions SET size = ?, current_price = ?, stop_loss = ?, take_profit = ?, \
             status = ?, unrealized_pnl = ?, realized_pnl = ?, last_request_id = ?, \
             updated_at = ?, version = ? \
             WHERE position_id = ? AND version = ?",
            params.as_slice(),
        )?;
        Ok(updated == 1)
    }

    /// Load the order row for an idempotency key.
    pub fn load_order(&self, idempotency_key: &str) -> Result<Option<OrderRecord>, WarehouseError> {
        let connection = self.connection()?;
        let sql = format!("SELECT {ORDER_COLUMNS} FROM order_records WHERE idempotency_key = ?");
        let raw = connection
            .query_row(sql.as_str(), [idempotency_key], RawOrder::from_row)
            .optional()?;
        raw.map(RawOrder::into_record).transpose()
    }

    /// Load the order row carrying `request_id`.
    pub fn find_order_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<OrderRecord>, WarehouseError> {
        let connection = self.connection()?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM order_records WHERE request_id = ? \
             ORDER BY created_at LIMIT 1"
        );
        let raw = connection
            .query_row(sql.as_str(), [request_id], RawOrder::from_row)
            .optional()?;
        raw.map(RawOrder::into_record).transpose()
    }

    /// Insert a new order row together with its first audit event.
    ///
    /// Returns `false` (and writes nothing) when the key is already present.
    pub fn insert_order(
        &self,
        record: &OrderRecord,
        event: &OrderEventRecord,
    ) -> Result<bool, WarehouseError> {
        let connection = self.connection()?;
        in_transaction(&connection, |tx| {
            let created_at = format_timestamp(record.created_at)?;
            let updated_at = format_timestamp(record.updated_at)?;
            let size = record.size.to_string();
            let fill_price = optional_decimal_text(record.fill_price);
            let fill_size = optional_decimal_text(record.fill_size);

            let params: [&dyn ToSql; 14] = [
                &record.idempotency_key,
                &record.request_id,
                &record.symbol,
                &record.action,
                &size,
                &record.status,
                &record.reason,
                &record.broker_ticket,
                &fill_price,
                &fill_size,
                &record.position_applied,
                &record.payload,
                &created_at,
                &updated_at,
            ];
            let sql = format!(
                "INSERT INTO order_records ({ORDER_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT DO NOTHING"
            );
            let inserted = tx.execute(sql.as_str(), params.as_slice())?;
            if inserted == 0 {
                return Ok(false);
            }

            insert_event(tx, event)?;
            Ok(true)
        })
    }

    /// Persist the mutable fields of an existing order row and append `event`.
    pub fn update_order(
        &self,
        record: &OrderRecord,
        event: Option<&OrderEventRecord>,
    ) -> Result<(), WarehouseError> {
        let connection = self.connection()?;
        in_transaction(&connection, |tx| {
            let updated_at = format_timestamp(record.updated_at)?;
            let fill_price = optional_decimal_text(record.fill_price);
            let fill_size = optional_decimal_text(record.fill_size);

            let params: [&dyn ToSql; 8] = [
                &record.status,
                &record.reason,
                &record.broker_ticket,
                &fill_price,
                &fill_size,
                &record.position_applied,
                &updated_at,
                &record.idempotency_key,
            ];
            let updated = tx.execute(
                "UPDATE order_records SET status = ?, reason = ?, broker_ticket = ?, \
                 fill_price = ?, fill_size = ?, position_applied = ?, updated_at = ? \
                 WHERE idempotency_key = ?",
                params.as_slice(),
            )?;
            if updated != 1 {
                return Err(WarehouseError::invalid_data(format!(
                    "order '{}' does not exist",
                    record.idempotency_key
                )));
            }

            if let Some(event) = event {
                insert_event(tx, event)?;
            }
            Ok(())
        })
    }

    /// Audit events for one order, oldest first.
    pub fn order_events(
        &self,
        idempotency_key: &str,
    ) -> Result<Vec<OrderEventRecord>, WarehouseError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(
            "SELECT idempotency_key, request_id, from_status, to_status, reason, recorded_at \
             FROM order_events WHERE idempotency_key = ? ORDER BY event_id",
        )?;
        let rows = statement.query_map([idempotency_key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (idempotency_key, request_id, from_status, to_status, reason, recorded_at) = row?;
            events.push(OrderEventRecord {
                idempotency_key,
                request_id,
                from_status,
                to_status,
                reason,
                recorded_at: parse_timestamp("recorded_at", &recorded_at)?,
            });
        }
        Ok(events)
    }
}

fn insert_event(connection: &Connection, event: &OrderEventRecord) -> Result<(), WarehouseError> {
    let recorded_at = format_timestamp(event.recorded_at)?;
    let params: [&dyn ToSql; 6] = [
        &event.idempotency_key,
        &event.request_id,
        &event.from_status,
        &event.to_status,
        &event.reason,
        &recorded_at,
    ];
    connection.execute(
        "INSERT INTO order_events \
         (idempotency_key, request_id, from_status, to_status, reason, recorded_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
        params.as_slice(),
    )?;
    Ok(())
}

/// Position row as read from DuckDB, before decimal/timestamp parsing.
struct RawPosition {
    position_id: String,
    symbol: String,
    side: String,
    size: String,
    entry_price: String,
    current_price: Option<String>,
    stop_loss: Option<String>,
    take_profit: Option<String>,
    status: String,
    unrealized_pnl: String,
    realized_pnl: String,
    broker_ticket: String,
    last_request_id: Option<String>,
    created_at: String,
    updated_at: String,
    version: u64,
}

impl RawPosition {
    fn from_row(row: &Row<'_>) -> Result<Self, ::duckdb::Error> {
        Ok(Self {
            position_id: row.get(0)?,
            symbol: row.get(1)?,
            side: row.get(2)?,
            size: row.get(3)?,
            entry_price: row.get(4)?,
            current_price: row.get(5)?,
            stop_loss: row.get(6)?,
            take_profit: row.get(7)?,
            status: row.get(8)?,
            unrealized_pnl: row.get(9)?,
            realized_pnl: row.get(10)?,
            broker_ticket: row.get(11)?,
            last_request_id: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
            version: row.get(15)?,
        })
    }

    fn into_record(self) -> Result<PositionRecord, WarehouseError> {
        Ok(PositionRecord {
            position_id: self.position_id,
            symbol: self.symbol,
            side: self.side,
            size: parse_decimal("size", &self.size)?,
            entry_price: parse_decimal("entry_price", &self.entry_price)?,
            current_price: parse_optional_decimal("current_price", self.current_price)?,
            stop_loss: parse_optional_decimal("stop_loss", self.stop_loss)?,
            take_profit: parse_optional_decimal("take_profit", self.take_profit)?,
            status: self.status,
            unrealized_pnl: parse_decimal("unrealized_pnl", &self.unrealized_pnl)?,
            realized_pnl: parse_decimal("realized_pnl", &self.realized_pnl)?,
            broker_ticket: self.broker_ticket,
            last_request_id: self.last_request_id,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            version: self.version,
        })
    }
}

struct RawOrder {
    idempotency_key: String,
    request_id: String,
    symbol: String,
    action: String,
    size: String,
    status: String,
    reason: Option<String>,
    broker_ticket: Option<String>,
    fill_price: Option<String>,
    fill_size: Option<String>,
    position_applied: bool,
    payload: String,
    created_at: String,
    updated_at: String,
}

impl RawOrder {
    fn from_row(row: &Row<'_>) -> Result<Self, ::duckdb::Error> {
        Ok(Self {
            idempotency_key: row.get(0)?,
            request_id: row.get(1)?,
            symbol: row.get(2)?,
            action: row.get(3)?,
            size: row.get(4)?,
            status: row.get(5)?,
            reason: row.get(6)?,
            broker_ticket: row.get(7)?,
            fill_price: row.get(8)?,
            fill_size: row.get(9)?,
            position_applied: row.get(10)?,
            payload: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_record(self) -> Result<OrderRecord, WarehouseError> {
        Ok(OrderRecord {
            idempotency_key: self.idempotency_key,
            request_id: self.request_id,
            symbol: self.symbol,
            action: self.action,
            size: parse_decimal("size", &self.size)?,
            status: self.status,
            reason: self.reason,
            broker_ticket: self.broker_ticket,
            fill_price: parse_optional_decimal("fill_price", self.fill_price)?,
            fill_size: parse_optional_decimal("fill_size", self.fill_size)?,
            position_applied: self.position_applied,
            payload: self.payload,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}
