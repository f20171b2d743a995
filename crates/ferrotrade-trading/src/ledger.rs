//! Order and position ledger.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::order::{OrderEntry, OrderEvent};
use crate::position::{Position, PositionStatus};

/// Durable record of orders, their audit trail, and tracked positions.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn load_order(&self, idempotency_key: &str) -> Result<Option<OrderEntry>, StoreError>;

    async fn find_order_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<OrderEntry>, StoreError>;

    /// Insert a new entry with its first event. `false` when the key exists.
    async fn insert_order(&self, entry: &OrderEntry, event: &OrderEvent)
        -> Result<bool, StoreError>;

    async fn update_order(
        &self,
        entry: &OrderEntry,
        event: Option<&OrderEvent>,
    ) -> Result<(), StoreError>;

    async fn order_events(&self, idempotency_key: &str) -> Result<Vec<OrderEvent>, StoreError>;

    /// Most recently created position under a broker ticket.
    async fn find_position_by_ticket(&self, ticket: u64) -> Result<Option<Position>, StoreError>;

    async fn list_positions(&self, open_only: bool) -> Result<Vec<Position>, StoreError>;

    /// `false` when a position with the same id is already stored.
    async fn insert_position(&self, position: &Position) -> Result<bool, StoreError>;

    /// Overwrite when the stored version equals `expected_version`.
    async fn update_position(
        &self,
        position: &Position,
        expected_version: u64,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
struct LedgerState {
    orders: BTreeMap<String, OrderEntry>,
    events: Vec<OrderEvent>,
    positions: Vec<Position>,
    fail_order_writes: bool,
    fail_position_writes: u32,
}

/// Process-local ledger with failure injection for tests.
#[derive(Debug, Default)]
pub struct InMemoryOrderLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryOrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make order inserts and updates fail until reset.
    pub fn fail_order_writes(&self, fail: bool) {
        self.lock().fail_order_writes = fail;
    }

    /// Make the next `count` position writes fail.
    pub fn fail_position_writes(&self, count: u32) {
        self.lock().fail_position_writes = count;
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {what} failure"))
}

impl LedgerState {
    fn check_order_write(&self) -> Result<(), StoreError> {
        if self.fail_order_writes {
            return Err(injected("order write"));
        }
        Ok(())
    }

    fn check_position_write(&mut self) -> Result<(), StoreError> {
        if self.fail_position_writes > 0 {
            self.fail_position_writes -= 1;
            return Err(injected("position write"));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderLedger for InMemoryOrderLedger {
    async fn load_order(&self, idempotency_key: &str) -> Result<Option<OrderEntry>, StoreError> {
        Ok(self.lock().orders.get(idempotency_key).cloned())
    }

    async fn find_order_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<OrderEntry>, StoreError> {
        Ok(self
            .lock()
            .orders
            .values()
            .filter(|entry| entry.request_id == request_id)
            .min_by_key(|entry| entry.created_at)
            .cloned())
    }

    async fn insert_order(
        &self,
        entry: &OrderEntry,
        event: &OrderEvent,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        state.check_order_write()?;
        if state.orders.contains_key(&entry.idempotency_key) {
            return Ok(false);
        }
        state
            .orders
            .insert(entry.idempotency_key.clone(), entry.clone());
        state.events.push(event.clone());
        Ok(true)
    }

    async fn update_order(
        &self,
        entry: &OrderEntry,
        event: Option<&OrderEvent>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_order_write()?;
        let Some(stored) = state.orders.get_mut(&entry.idempotency_key) else {
            return Err(StoreError::corrupt(format!(
                "order '{}' does not exist",
                entry.idempotency_key
            )));
        };
        *stored = entry.clone();
        if let Some(event) = event {
            state.events.push(event.clone());
        }
        Ok(())
    }

    async fn order_events(&self, idempotency_key: &str) -> Result<Vec<OrderEvent>, StoreError> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|event| event.idempotency_key == idempotency_key)
            .cloned()
            .collect())
    }

    async fn find_position_by_ticket(&self, ticket: u64) -> Result<Option<Position>, StoreError> {
        Ok(self
            .lock()
            .positions
            .iter()
            .rev()
            .find(|position| position.broker_ticket == ticket)
            .cloned())
    }

    async fn list_positions(&self, open_only: bool) -> Result<Vec<Position>, StoreError> {
        Ok(self
            .lock()
            .positions
            .iter()
            .filter(|position| {
                !open_only || position.status != PositionStatus::Closed
            })
            .cloned()
            .collect())
    }

    async fn insert_position(&self, position: &Position) -> Result<bool, StoreError> {
        let mut state = self.lock();
        state.check_position_write()?;
        if state
            .positions
            .iter()
            .any(|stored| stored.position_id == position.position_id)
        {
            return Ok(false);
        }
        state.positions.push(position.clone());
        Ok(true)
    }

    async fn update_position(
        &self,
        position: &Position,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        state.check_position_write()?;
        match state
            .positions
            .iter_mut()
            .find(|stored| stored.position_id == position.position_id)
        {
            Some(stored) if stored.version == expected_version => {
                *stored = position.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
