//! Row types stored by the warehouse.
//!
//! Records are plain storage shapes: enums from the trading domain are kept as
//! their wire strings, decimals as [`Decimal`] and timestamps as UTC
//! [`OffsetDateTime`]. Conversion into domain types happens in the callers.

use std::path::PathBuf;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};

use crate::WarehouseError;

/// One row of the `positions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub position_id: String,
    pub symbol: String,
    /// `LONG` or `SHORT`.
    pub side: String,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// `OPEN`, `PARTIALLY_CLOSED` or `CLOSED`.
    pub status: String,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub broker_ticket: String,
    /// Request id of the last order applied to this position.
    pub last_request_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Optimistic-lock counter, bumped on every successful update.
    pub version: u64,
}

/// One row of the `order_records` table, keyed by idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub idempotency_key: String,
    pub request_id: String,
    pub symbol: String,
    pub action: String,
    pub size: Decimal,
    pub status: String,
    pub reason: Option<String>,
    pub broker_ticket: Option<String>,
    pub fill_price: Option<Decimal>,
    pub fill_size: Option<Decimal>,
    pub position_applied: bool,
    /// Original JSON message body.
    pub payload: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One audit-trail row of the `order_events` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEventRecord {
    pub idempotency_key: String,
    pub request_id: String,
    pub from_status: Option<String>,
    pub to_status: String,
    pub reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// The singleton kill switch row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchRecord {
    /// `ON` or `OFF`.
    pub status: String,
    pub reason: Option<String>,
    pub updated_by: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated_utc: OffsetDateTime,
    pub version: u64,
}

/// A message handed out by the durable order queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub message_id: String,
    pub group_key: String,
    pub body: String,
    /// Opaque handle for `delete_message` / `release_message`.
    pub receipt: String,
    pub receive_count: u32,
    pub enqueued_at: OffsetDateTime,
}

/// One bar as stored in an archive partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedBar {
    pub ts_unix: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Manifest entry describing one archive partition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionInfo {
    pub symbol: String,
    pub timeframe: String,
    pub partition_date: Date,
    pub path: PathBuf,
    pub row_count: u64,
    pub min_ts_unix: Option<i64>,
    pub max_ts_unix: Option<i64>,
}

pub(crate) fn format_timestamp(value: OffsetDateTime) -> Result<String, WarehouseError> {
    value
        .format(&Rfc3339)
        .map_err(|error| WarehouseError::invalid_data(format!("unformattable timestamp: {error}")))
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<OffsetDateTime, WarehouseError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|error| {
        WarehouseError::invalid_data(format!("column '{column}' holds '{value}': {error}"))
    })
}

pub(crate) fn parse_decimal(column: &str, value: &str) -> Result<Decimal, WarehouseError> {
    Decimal::from_str(value).map_err(|error| {
        WarehouseError::invalid_data(format!("column '{column}' holds '{value}': {error}"))
    })
}

pub(crate) fn parse_optional_decimal(
    column: &str,
    value: Option<String>,
) -> Result<Option<Decimal>, WarehouseError> {
    value
        .map(|value| parse_decimal(column, value.as_str()))
        .transpose()
}

pub(crate) fn optional_decimal_text(value: Option<Decimal>) -> Option<String> {
    value.map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decimal_text_round_trips_exactly() {
        let stored = optional_decimal_text(Some(dec!(1.10000)));
        let parsed = parse_optional_decimal("price", stored).expect("parse");
        assert_eq!(parsed, Some(dec!(1.10000)));
    }

    #[test]
    fn rejects_garbage_decimal() {
        let error = parse_decimal("size", "ten").expect_err("must fail");
        assert!(matches!(error, WarehouseError::InvalidData(message) if message.contains("size")));
    }

    #[test]
    fn timestamps_use_rfc3339() {
        let ts = parse_timestamp("at", "2024-03-01T12:30:00Z").expect("parse");
        assert_eq!(format_timestamp(ts).expect("format"), "2024-03-01T12:30:00Z");
    }
}
