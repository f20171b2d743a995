//! Warehouse-backed implementations of the trading store traits.
//!
//! DuckDB calls are blocking, so each one runs on the blocking pool. Domain
//! types are mapped onto the warehouse's string-typed rows here.

use std::time::Duration;

use async_trait::async_trait;
use ferrotrade_core::{Symbol, UtcDateTime};
use ferrotrade_warehouse::{
    KillSwitchRecord, OrderEventRecord, OrderRecord, PositionRecord, Warehouse,
};

use crate::error::StoreError;
use crate::kill_switch::{KillSwitchRepository, KillSwitchState};
use crate::ledger::OrderLedger;
use crate::order::{OrderEntry, OrderEvent, OrderStatus};
use crate::position::Position;
use crate::queue::{OrderQueue, QueueMessage};

/// Kill switch, ledger and queue on one [`Warehouse`].
#[derive(Clone)]
pub struct WarehouseStore {
    warehouse: Warehouse,
}

impl WarehouseStore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    async fn run<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Warehouse) -> Result<T, StoreError> + Send + 'static,
    {
        let warehouse = self.warehouse.clone();
        tokio::task::spawn_blocking(move || work(&warehouse))
            .await
            .map_err(|error| StoreError::Worker(error.to_string()))?
    }
}

#[async_trait]
impl KillSwitchRepository for WarehouseStore {
    async fn load(&self) -> Result<Option<KillSwitchState>, StoreError> {
        self.run(|warehouse| {
            warehouse
                .load_kill_switch()?
                .map(kill_switch_from_record)
                .transpose()
        })
        .await
    }

    async fn put_if_version(
        &self,
        expected_version: Option<u64>,
        state: &KillSwitchState,
    ) -> Result<bool, StoreError> {
        let record = KillSwitchRecord {
            status: state.status().to_owned(),
            reason: state.reason.clone(),
            updated_by: state.updated_by.clone(),
            last_updated_utc: state.last_updated.into_inner(),
            version: state.version,
        };
        self.run(move |warehouse| Ok(warehouse.put_kill_switch_if_version(expected_version, &record)?))
            .await
    }
}

#[async_trait]
impl OrderLedger for WarehouseStore {
    async fn load_order(&self, idempotency_key: &str) -> Result<Option<OrderEntry>, StoreError> {
        let key = idempotency_key.to_owned();
        self.run(move |warehouse| warehouse.load_order(&key)?.map(order_from_record).transpose())
            .await
    }

    async fn find_order_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<OrderEntry>, StoreError> {
        let request_id = request_id.to_owned();
        self.run(move |warehouse| {
            warehouse
                .find_order_by_request_id(&request_id)?
                .map(order_from_record)
                .transpose()
        })
        .await
    }

    async fn insert_order(
        &self,
        entry: &OrderEntry,
        event: &OrderEvent,
    ) -> Result<bool, StoreError> {
        let record = order_to_record(entry);
        let event = event_to_record(event);
        self.run(move |warehouse| Ok(warehouse.insert_order(&record, &event)?))
            .await
    }

    async fn update_order(
        &self,
        entry: &OrderEntry,
        event: Option<&OrderEvent>,
    ) -> Result<(), StoreError> {
        let record = order_to_record(entry);
        let event = event.map(event_to_record);
        self.run(move |warehouse| Ok(warehouse.update_order(&record, event.as_ref())?))
            .await
    }

    async fn order_events(&self, idempotency_key: &str) -> Result<Vec<OrderEvent>, StoreError> {
        let key = idempotency_key.to_owned();
        self.run(move |warehouse| {
            warehouse
                .order_events(&key)?
                .into_iter()
                .map(event_from_record)
                .collect()
        })
        .await
    }

    async fn find_position_by_ticket(&self, ticket: u64) -> Result<Option<Position>, StoreError> {
        self.run(move |warehouse| {
            warehouse
                .find_position_by_ticket(&ticket.to_string())?
                .map(position_from_record)
                .transpose()
        })
        .await
    }

    async fn list_positions(&self, open_only: bool) -> Result<Vec<Position>, StoreError> {
        self.run(move |warehouse| {
            warehouse
                .list_positions(open_only)?
                .into_iter()
                .map(position_from_record)
                .collect()
        })
        .await
    }

    async fn insert_position(&self, position: &Position) -> Result<bool, StoreError> {
        let record = position_to_record(position);
        self.run(move |warehouse| Ok(warehouse.insert_position(&record)?))
            .await
    }

    async fn update_position(
        &self,
        position: &Position,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        let record = position_to_record(position);
        self.run(move |warehouse| Ok(warehouse.update_position(&record, expected_version)?))
            .await
    }
}

#[async_trait]
impl OrderQueue for WarehouseStore {
    async fn send(&self, group_key: &str, body: &str) -> Result<String, StoreError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let group_key = group_key.to_owned();
        let body = body.to_owned();
        let id = message_id.clone();
        self.run(move |warehouse| Ok(warehouse.enqueue_message(&id, &group_key, &body)?))
            .await?;
        Ok(message_id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, StoreError> {
        self.run(move |warehouse| {
            Ok(warehouse
                .receive_messages(max_messages, visibility_timeout)?
                .into_iter()
                .map(|message| QueueMessage {
                    message_id: message.message_id,
                    group_key: message.group_key,
                    body: message.body,
                    receipt: message.receipt,
                    receive_count: message.receive_count,
                })
                .collect())
        })
        .await
    }

    async fn delete(&self, receipt: &str) -> Result<bool, StoreError> {
        let receipt = receipt.to_owned();
        self.run(move |warehouse| Ok(warehouse.delete_message(&receipt)?))
            .await
    }

    async fn release(&self, receipt: &str) -> Result<bool, StoreError> {
        let receipt = receipt.to_owned();
        self.run(move |warehouse| Ok(warehouse.release_message(&receipt)?))
            .await
    }

    async fn depth(&self) -> Result<u64, StoreError> {
        self.run(|warehouse| Ok(warehouse.queue_depth()?)).await
    }
}

fn utc(column: &str, value: time::OffsetDateTime) -> Result<UtcDateTime, StoreError> {
    UtcDateTime::from_offset_datetime(value.to_offset(time::UtcOffset::UTC))
        .map_err(|error| StoreError::corrupt(format!("{column}: {error}")))
}

fn status(value: &str) -> Result<OrderStatus, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

fn ticket(column: &str, value: &str) -> Result<u64, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::corrupt(format!("{column} holds non-numeric ticket '{value}'")))
}

fn kill_switch_from_record(record: KillSwitchRecord) -> Result<KillSwitchState, StoreError> {
    let active = match record.status.as_str() {
        "ON" => true,
        "OFF" => false,
        other => {
            return Err(StoreError::corrupt(format!(
                "kill switch status '{other}' is neither ON nor OFF"
            )))
        }
    };
    Ok(KillSwitchState {
        active,
        reason: record.reason,
        updated_by: record.updated_by,
        last_updated: utc("last_updated_utc", record.last_updated_utc)?,
        version: record.version,
    })
}

fn order_to_record(entry: &OrderEntry) -> OrderRecord {
    OrderRecord {
        idempotency_key: entry.idempotency_key.clone(),
        request_id: entry.request_id.clone(),
        symbol: entry.symbol.clone(),
        action: entry.action.clone(),
        size: entry.size,
        status: entry.status.as_str().to_owned(),
        reason: entry.reason.clone(),
        broker_ticket: entry.broker_ticket.map(|ticket| ticket.to_string()),
        fill_price: entry.fill_price,
        fill_size: entry.fill_size,
        position_applied: entry.position_applied,
        payload: entry.payload.clone(),
        created_at: entry.created_at.into_inner(),
        updated_at: entry.updated_at.into_inner(),
    }
}

fn order_from_record(record: OrderRecord) -> Result<OrderEntry, StoreError> {
    Ok(OrderEntry {
        status: status(&record.status)?,
        broker_ticket: record
            .broker_ticket
            .as_deref()
            .map(|value| ticket("broker_ticket", value))
            .transpose()?,
        created_at: utc("created_at", record.created_at)?,
        updated_at: utc("updated_at", record.updated_at)?,
        idempotency_key: record.idempotency_key,
        request_id: record.request_id,
        symbol: record.symbol,
        action: record.action,
        size: record.size,
        reason: record.reason,
        fill_price: record.fill_price,
        fill_size: record.fill_size,
        position_applied: record.position_applied,
        payload: record.payload,
    })
}

fn event_to_record(event: &OrderEvent) -> OrderEventRecord {
    OrderEventRecord {
        idempotency_key: event.idempotency_key.clone(),
        request_id: event.request_id.clone(),
        from_status: event.from_status.map(|status| status.as_str().to_owned()),
        to_status: event.to_status.as_str().to_owned(),
        reason: event.reason.clone(),
        recorded_at: event.recorded_at.into_inner(),
    }
}

fn event_from_record(record: OrderEventRecord) -> Result<OrderEvent, StoreError> {
    Ok(OrderEvent {
        from_status: record.from_status.as_deref().map(status).transpose()?,
        to_status: status(&record.to_status)?,
        recorded_at: utc("recorded_at", record.recorded_at)?,
        idempotency_key: record.idempotency_key,
        request_id: record.request_id,
        reason: record.reason,
    })
}

fn position_to_record(position: &Position) -> PositionRecord {
    PositionRecord {
        position_id: position.position_id.clone(),
        symbol: position.symbol.to_string(),
        side: position.side.as_str().to_owned(),
        size: position.size,
        entry_price: position.entry_price,
        current_price: position.current_price,
        stop_loss: position.stop_loss,
        take_profit: position.take_profit,
        status: position.status.as_str().to_owned(),
        unrealized_pnl: position.unrealized_pnl,
        realized_pnl: position.realized_pnl,
        broker_ticket: position.broker_ticket.to_string(),
        last_request_id: position.last_request_id.clone(),
        created_at: position.created_at.into_inner(),
        updated_at: position.updated_at.into_inner(),
        version: position.version,
    }
}

fn position_from_record(record: PositionRecord) -> Result<Position, StoreError> {
    Ok(Position {
        symbol: Symbol::parse(&record.symbol)
            .map_err(|error| StoreError::corrupt(format!("symbol: {error}")))?,
        side: record.side.parse().map_err(StoreError::Corrupt)?,
        status: record.status.parse().map_err(StoreError::Corrupt)?,
        broker_ticket: ticket("broker_ticket", &record.broker_ticket)?,
        created_at: utc("created_at", record.created_at)?,
        updated_at: utc("updated_at", record.updated_at)?,
        position_id: record.position_id,
        size: record.size,
        entry_price: record.entry_price,
        current_price: record.current_price,
        stop_loss: record.stop_loss,
        take_profit: record.take_profit,
        unrealized_pnl: record.unrealized_pnl,
        realized_pnl: record.realized_pnl,
        last_request_id: record.last_request_id,
        version: record.version,
    })
}
