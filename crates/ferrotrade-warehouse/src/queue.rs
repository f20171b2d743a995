//! Durable order queue.
//!
//! Messages are ordered by a global sequence and partitioned into groups.
//! Only the oldest message of a group is ever delivered, so a group with a
//! message in flight is blocked until that message is deleted or its
//! visibility timeout expires. Delivery is at-least-once.

use std::time::Duration;

use ::duckdb::ToSql;
use time::OffsetDateTime;

use crate::models::{format_timestamp, parse_timestamp, QueuedMessage};
use crate::{in_transaction, Warehouse, WarehouseError};

impl Warehouse {
    /// Append a message to the tail of `group_key`.
    pub fn enqueue_message(
        &self,
        message_id: &str,
        group_key: &str,
        body: &str,
    ) -> Result<(), WarehouseError> {
        let connection = self.connection()?;
        let enqueued_at = format_timestamp(OffsetDateTime::now_utc())?;
        let params: [&dyn ToSql; 4] = [&message_id, &group_key, &body, &enqueued_at];
        connection.execute(
            "INSERT INTO order_queue (message_id, group_key, body, enqueued_at) \
             VALUES (?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Receive up to `max_messages` group heads that are currently visible and
    /// hide them for `visibility_timeout`.
    pub fn receive_messages(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage>, WarehouseError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let now_ms = unix_millis(OffsetDateTime::now_utc());
        let invisible_until = now_ms.saturating_add(duration_millis(visibility_timeout));
        let limit = i64::try_from(max_messages).unwrap_or(i64::MAX);

        let connection = self.connection()?;
        in_transaction(&connection, |tx| {
            let mut statement = tx.prepare(
                "SELECT q.seq, q.message_id, q.group_key, q.body, q.enqueued_at, q.receive_count \
                 FROM order_queue q \
                 WHERE q.invisible_until_ms <= ? \
                   AND NOT EXISTS ( \
                       SELECT 1 FROM order_queue e \
                       WHERE e.group_key = q.group_key AND e.seq < q.seq) \
                 ORDER BY q.seq \
                 LIMIT ?",
            )?;
            let params: [&dyn ToSql; 2] = [&now_ms, &limit];
            let rows = statement.query_map(params.as_slice(), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                ))
            })?;

            let mut candidates = Vec::new();
            for row in rows {
                candidates.push(row?);
            }

            let mut delivered = Vec::with_capacity(candidates.len());
            for (seq, message_id, group_key, body, enqueued_at, receive_count) in candidates {
                let receive_count = receive_count.saturating_add(1);
                let params: [&dyn ToSql; 3] = [&receive_count, &invisible_until, &seq];
                tx.execute(
                    "UPDATE order_queue SET receive_count = ?, invisible_until_ms = ? \
                     WHERE seq = ?",
                    params.as_slice(),
                )?;

                delivered.push(QueuedMessage {
                    message_id,
                    group_key,
                    body,
                    receipt: format!("{seq}:{receive_count}"),
                    receive_count,
                    enqueued_at: parse_timestamp("enqueued_at", &enqueued_at)?,
                });
            }

            Ok(delivered)
        })
    }

    /// Remove a delivered message. Returns `false` when the receipt is stale
    /// (the message was redelivered or already deleted).
    pub fn delete_message(&self, receipt: &str) -> Result<bool, WarehouseError> {
        let (seq, receive_count) = parse_receipt(receipt)?;
        let connection = self.connection()?;
        let params: [&dyn ToSql; 2] = [&seq, &receive_count];
        let deleted = connection.execute(
            "DELETE FROM order_queue WHERE seq = ? AND receive_count = ?",
            params.as_slice(),
        )?;
        Ok(deleted == 1)
    }

    /// Make a delivered message visible again immediately.
    pub fn release_message(&self, receipt: &str) -> Result<bool, WarehouseError> {
        let (seq, receive_count) = parse_receipt(receipt)?;
        let connection = self.connection()?;
        let params: [&dyn ToSql; 2] = [&seq, &receive_count];
        let released = connection.execute(
            "UPDATE order_queue SET invisible_until_ms = 0 WHERE seq = ? AND receive_count = ?",
            params.as_slice(),
        )?;
        Ok(released == 1)
    }

    /// Number of messages not yet deleted, in flight or not.
    pub fn queue_depth(&self) -> Result<u64, WarehouseError> {
        let connection = self.connection()?;
        let depth: i64 =
            connection.query_row("SELECT COUNT(*) FROM order_queue", [], |row| row.get(0))?;
        Ok(u64::try_from(depth).unwrap_or_default())
    }
}

fn parse_receipt(receipt: &str) -> Result<(i64, u32), WarehouseError> {
    let invalid = || WarehouseError::InvalidReceipt(receipt.to_owned());
    let (seq, count) = receipt.split_once(':').ok_or_else(invalid)?;
    let seq = seq.parse::<i64>().map_err(|_| invalid())?;
    let count = count.parse::<u32>().map_err(|_| invalid())?;
    Ok((seq, count))
}

fn unix_millis(value: OffsetDateTime) -> i64 {
    i64::try_from(value.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

fn duration_millis(value: Duration) -> i64 {
    i64::try_from(value.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HIDE: Duration = Duration::from_secs(300);

    fn bodies(messages: &[QueuedMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.body.as_str()).collect()
    }

    #[test]
    fn delivers_only_group_heads_in_order() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");
        warehouse.enqueue_message("m1", "EURUSD", "a1").expect("enqueue");
        warehouse.enqueue_message("m2", "EURUSD", "a2").expect("enqueue");
        warehouse.enqueue_message("m3", "GBPUSD", "b1").expect("enqueue");

        let first = warehouse.receive_messages(10, HIDE).expect("receive");
        assert_eq!(bodies(&first), ["a1", "b1"]);

        // both groups are blocked while their heads are in flight
        assert!(warehouse.receive_messages(10, HIDE).expect("receive").is_empty());

        assert!(warehouse.delete_message(&first[0].receipt).expect("delete"));
        let second = warehouse.receive_messages(10, HIDE).expect("receive");
        assert_eq!(bodies(&second), ["a2"]);
        assert_eq!(warehouse.queue_depth().expect("depth"), 2);
    }

    #[test]
    fn released_message_is_redelivered_with_new_receipt() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");
        warehouse.enqueue_message("m1", "EURUSD", "a1").expect("enqueue");

        let first = warehouse.receive_messages(1, HIDE).expect("receive");
        assert!(warehouse.release_message(&first[0].receipt).expect("release"));

        let again = warehouse.receive_messages(1, HIDE).expect("receive");
        assert_eq!(again[0].message_id, "m1");
        assert_eq!(again[0].receive_count, 2);
        assert_ne!(again[0].receipt, first[0].receipt);

        assert!(!warehouse.delete_message(&first[0].receipt).expect("stale delete"));
        assert!(warehouse.delete_message(&again[0].receipt).expect("delete"));
        assert_eq!(warehouse.queue_depth().expect("depth"), 0);
    }

    #[test]
    fn expired_visibility_redelivers() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");
        warehouse.enqueue_message("m1", "EURUSD", "a1").expect("enqueue");

        warehouse.receive_messages(1, Duration::ZERO).expect("receive");
        let again = warehouse.receive_messages(1, HIDE).expect("receive");
        assert_eq!(bodies(&again), ["a1"]);
    }

    #[test]
    fn rejects_foreign_receipts() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open_in_memory(temp.path()).expect("warehouse");
        let error = warehouse.delete_message("not-a-receipt").expect_err("must fail");
        assert!(matches!(error, WarehouseError::InvalidReceipt(_)));
    }
}
