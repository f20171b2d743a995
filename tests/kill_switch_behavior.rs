//! Behaviour tests for the global kill switch.
//!
//! The switch must fail safe: whenever its state cannot be read, trading
//! is treated as blocked.

use std::sync::Arc;

use ferrotrade_core::{PaperBroker, Warehouse};
use ferrotrade_trading::{
    InMemoryKillSwitchRepository, InMemoryOrderLedger, InMemoryOrderQueue, KillSwitchError,
    KillSwitchRepository, KillSwitchStore, OrderAction, OrderLedger, OrderProcessor, OrderQueue,
    OrderRequest, OrderStatus, WarehouseStore, KILL_SWITCH_REASON,
};
use rust_decimal_macros::dec;

// =============================================================================
// Fail-safe reads
// =============================================================================

#[tokio::test]
async fn when_store_is_unreachable_trading_is_blocked() {
    // Given: A kill switch that was turned off, then lost its backing store
    let repository = Arc::new(InMemoryKillSwitchRepository::new());
    let switch = KillSwitchStore::new(repository.clone());
    switch.deactivate("ops").await.expect("deactivate");
    assert!(!switch.is_active().await);

    // When: The store becomes unreachable
    repository.set_unreachable(true);

    // Then: The switch reads as active
    assert!(switch.is_active().await);
}

#[tokio::test]
async fn when_record_was_never_written_trading_is_blocked() {
    let switch = KillSwitchStore::new(Arc::new(InMemoryKillSwitchRepository::new()));

    assert!(switch.is_active().await);
    assert!(switch.status_detail().await.expect("readable").is_none());
}

#[tokio::test]
async fn when_store_is_not_configured_trading_is_blocked() {
    let switch = KillSwitchStore::unconfigured();

    assert!(switch.is_active().await);
    assert!(matches!(
        switch.deactivate("ops").await,
        Err(KillSwitchError::Store(_))
    ));
}

#[tokio::test]
async fn when_store_is_unreachable_processor_rejects_orders() {
    // Given: A processor whose kill switch store is down
    let repository = Arc::new(InMemoryKillSwitchRepository::new());
    let switch = KillSwitchStore::new(repository.clone());
    switch.deactivate("ops").await.expect("deactivate");
    repository.set_unreachable(true);

    let queue = Arc::new(InMemoryOrderQueue::new());
    let ledger = Arc::new(InMemoryOrderLedger::new());
    let broker = Arc::new(PaperBroker::new());
    let processor = OrderProcessor::new(queue.clone(), ledger.clone(), broker.clone(), switch);
    let buy = OrderRequest::new("blind-1", "EURUSD", OrderAction::Buy, dec!(1));
    queue
        .send("EURUSD", &buy.to_json().expect("json"))
        .await
        .expect("send");

    // When: The order is processed
    let report = processor.process_batch().await.expect("batch");

    // Then: Rejected without reaching the broker
    assert_eq!(report.rejected, 1);
    assert_eq!(broker.submissions(), 0);
    let entry = ledger
        .load_order("blind-1")
        .await
        .expect("load")
        .expect("recorded");
    assert_eq!(entry.status, OrderStatus::Rejected);
    assert_eq!(entry.reason.as_deref(), Some(KILL_SWITCH_REASON));
}

// =============================================================================
// Conditional writes
// =============================================================================

#[tokio::test]
async fn stale_version_write_is_refused() {
    // Given: A switch written twice (version 2)
    let repository = Arc::new(InMemoryKillSwitchRepository::new());
    let switch = KillSwitchStore::new(repository.clone());
    switch.activate("maintenance", "ops").await.expect("activate");
    let current = switch.deactivate("ops").await.expect("deactivate");
    assert_eq!(current.version, 2);

    // When: A writer that last saw version 1 tries to write
    let mut stale = current.clone();
    stale.active = true;
    stale.version = 2;
    let written = repository
        .put_if_version(Some(1), &stale)
        .await
        .expect("reachable");

    // Then: The write is refused and the stored state is unchanged
    assert!(!written);
    let stored = switch.status_detail().await.expect("read").expect("record");
    assert!(!stored.active);
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn every_change_records_actor_and_bumps_version() {
    let switch = KillSwitchStore::new(Arc::new(InMemoryKillSwitchRepository::new()));

    let on = switch.activate("news spike", "risk-desk").await.expect("on");
    let off = switch.deactivate("ops").await.expect("off");

    assert_eq!(on.status(), "ON");
    assert_eq!(on.reason.as_deref(), Some("news spike"));
    assert_eq!(on.updated_by.as_deref(), Some("risk-desk"));
    assert_eq!(off.status(), "OFF");
    assert_eq!(off.reason, None);
    assert_eq!(off.version, on.version + 1);
}

// =============================================================================
// Durable store
// =============================================================================

#[tokio::test]
async fn warehouse_store_persists_switch_state() {
    // Given: A warehouse-backed switch
    let temp = tempfile::tempdir().expect("tempdir");
    let warehouse = Warehouse::open_in_memory(temp.path().join("archive")).expect("warehouse");
    let store = Arc::new(WarehouseStore::new(warehouse));
    let switch = KillSwitchStore::new(store.clone());
    assert!(switch.is_active().await);

    // When: It is activated then deactivated
    switch.activate("drill", "ops").await.expect("on");
    assert!(switch.is_active().await);
    switch.deactivate("ops").await.expect("off");

    // Then: A second handle on the same store reads the latest state
    let reader = KillSwitchStore::new(store);
    assert!(!reader.is_active().await);
    let state = reader.status_detail().await.expect("read").expect("record");
    assert_eq!(state.version, 2);
    assert_eq!(state.updated_by.as_deref(), Some("ops"));
}

#[tokio::test]
async fn when_stored_record_is_unreadable_trading_is_blocked() {
    // Given: A kill switch row whose status is neither ON nor OFF
    let temp = tempfile::tempdir().expect("tempdir");
    let warehouse = Warehouse::open_in_memory(temp.path().join("archive")).expect("warehouse");
    let record = ferrotrade_warehouse::KillSwitchRecord {
        status: String::new(),
        reason: None,
        updated_by: Some(String::from("migration")),
        last_updated_utc: time::OffsetDateTime::now_utc(),
        version: 1,
    };
    assert!(warehouse
        .put_kill_switch_if_version(None, &record)
        .expect("write"));

    // When: The switch is read through the store
    let switch = KillSwitchStore::new(Arc::new(WarehouseStore::new(warehouse)));

    // Then: It fails safe and reports the corruption on detailed reads
    assert!(switch.is_active().await);
    assert!(switch.status_detail().await.is_err());
}
