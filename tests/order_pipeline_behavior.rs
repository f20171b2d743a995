//! Behaviour tests for the order pipeline: producer, queue, processor and ledger.

use std::sync::Arc;

use ferrotrade_core::{PaperBroker, Warehouse};
use ferrotrade_trading::{
    Disposition, InMemoryKillSwitchRepository, InMemoryOrderLedger, InMemoryOrderQueue,
    KillSwitchStore, OrderAction, OrderLedger, OrderLimits, OrderProcessor, OrderProducer,
    OrderQueue, OrderRequest, OrderStatus, PositionStatus, TradingError, WarehouseStore,
};
use rust_decimal_macros::dec;

struct Pipeline {
    producer: OrderProducer,
    queue: Arc<dyn OrderQueue>,
    ledger: Arc<dyn OrderLedger>,
    broker: Arc<PaperBroker>,
    switch: KillSwitchStore,
    processor: OrderProcessor,
}

async fn pipeline_over(
    queue: Arc<dyn OrderQueue>,
    ledger: Arc<dyn OrderLedger>,
    switch: KillSwitchStore,
) -> Pipeline {
    switch.deactivate("ops").await.expect("switch off");
    let broker = Arc::new(PaperBroker::new());
    let processor = OrderProcessor::new(
        queue.clone(),
        ledger.clone(),
        broker.clone(),
        switch.clone(),
    );
    Pipeline {
        producer: OrderProducer::new(queue.clone(), OrderLimits::default()),
        queue,
        ledger,
        broker,
        switch,
        processor,
    }
}

async fn in_memory_pipeline() -> Pipeline {
    pipeline_over(
        Arc::new(InMemoryOrderQueue::new()),
        Arc::new(InMemoryOrderLedger::new()),
        KillSwitchStore::new(Arc::new(InMemoryKillSwitchRepository::new())),
    )
    .await
}

fn buy(request_id: &str) -> OrderRequest {
    OrderRequest::new(request_id, "EURUSD", OrderAction::Buy, dec!(1))
}

// =============================================================================
// Submission
// =============================================================================

#[tokio::test]
async fn when_close_has_no_ticket_it_is_rejected_before_the_queue() {
    // Given: A CLOSE request without a broker ticket
    let pipeline = in_memory_pipeline().await;
    let close = OrderRequest::new("close-1", "EURUSD", OrderAction::Close, dec!(1));

    // When: It is submitted
    let result = pipeline.producer.submit(&close).await;

    // Then: Validation fails, nothing is queued, and the broker is untouched
    assert!(matches!(result, Err(TradingError::ValidationFailed(_))));
    assert_eq!(pipeline.queue.depth().await.expect("depth"), 0);
    assert_eq!(pipeline.broker.submissions(), 0);
}

#[tokio::test]
async fn when_close_without_ticket_reaches_the_processor_it_is_rejected() {
    // Given: A CLOSE without ticket enqueued directly, bypassing the producer
    let pipeline = in_memory_pipeline().await;
    let close = OrderRequest::new("close-raw", "EURUSD", OrderAction::Close, dec!(1));
    pipeline
        .queue
        .send("EURUSD", &close.to_json().expect("json"))
        .await
        .expect("send");

    // When: The processor drains the queue
    let report = pipeline.processor.process_batch().await.expect("batch");

    // Then: The order is rejected with zero broker calls and the message is gone
    assert_eq!(report.rejected, 1);
    assert_eq!(pipeline.broker.submissions(), 0);
    let entry = pipeline
        .ledger
        .load_order("close-raw")
        .await
        .expect("load")
        .expect("recorded");
    assert_eq!(entry.status, OrderStatus::Rejected);
    assert_eq!(pipeline.queue.depth().await.expect("depth"), 0);
}

// =============================================================================
// Idempotency
// =============================================================================

#[tokio::test]
async fn when_the_same_request_is_delivered_twice_broker_sees_it_once() {
    // Given: The same BUY published twice
    let pipeline = in_memory_pipeline().await;
    pipeline.producer.submit(&buy("dup-1")).await.expect("submit");
    pipeline.producer.submit(&buy("dup-1")).await.expect("submit");

    // When: Both deliveries are processed
    let first = pipeline.processor.process_batch().await.expect("batch");
    let second = pipeline.processor.process_batch().await.expect("batch");

    // Then: One execution, one duplicate, one broker submission
    assert_eq!(first.executed, 1);
    assert_eq!(second.duplicates, 1);
    assert_eq!(pipeline.broker.submissions(), 1);
    let positions = pipeline.ledger.list_positions(true).await.expect("positions");
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].size, dec!(1));
}

#[tokio::test]
async fn when_processing_fails_midway_redelivery_completes_without_resubmitting() {
    // Given: A ledger whose next position write fails
    let ledger = Arc::new(InMemoryOrderLedger::new());
    let pipeline = pipeline_over(
        Arc::new(InMemoryOrderQueue::new()),
        ledger.clone(),
        KillSwitchStore::new(Arc::new(InMemoryKillSwitchRepository::new())),
    )
    .await;
    pipeline.producer.submit(&buy("retry-1")).await.expect("submit");
    ledger.fail_position_writes(1);

    // When: The first delivery fails after the fill and the message is redelivered
    let first = pipeline.processor.process_batch().await.expect("batch");
    let second = pipeline.processor.process_batch().await.expect("batch");

    // Then: The position is applied on redelivery and the broker was called once
    assert_eq!(first.released, 1);
    assert_eq!(second.duplicates + second.executed, 1);
    assert_eq!(pipeline.broker.submissions(), 1);
    let entry = pipeline
        .ledger
        .load_order("retry-1")
        .await
        .expect("load")
        .expect("recorded");
    assert_eq!(entry.status, OrderStatus::Executed);
    assert!(entry.position_applied);
    assert_eq!(pipeline.queue.depth().await.expect("depth"), 0);
}

// =============================================================================
// Kill switch
// =============================================================================

#[tokio::test]
async fn when_kill_switch_is_on_orders_are_rejected_and_removed() {
    // Given: An active kill switch
    let pipeline = in_memory_pipeline().await;
    pipeline
        .switch
        .activate("drawdown limit", "risk-desk")
        .await
        .expect("activate");
    pipeline.producer.submit(&buy("halted-1")).await.expect("submit");

    // When: The processor handles the BUY
    let report = pipeline.processor.process_batch().await.expect("batch");

    // Then: Rejected with a kill switch reason, never sent, not redelivered
    assert_eq!(report.rejected, 1);
    assert_eq!(pipeline.broker.submissions(), 0);
    let entry = pipeline
        .ledger
        .load_order("halted-1")
        .await
        .expect("load")
        .expect("recorded");
    assert_eq!(entry.status, OrderStatus::Rejected);
    assert!(entry.reason.unwrap_or_default().contains("kill switch"));
    assert_eq!(pipeline.queue.depth().await.expect("depth"), 0);
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn orders_for_one_symbol_are_processed_in_publish_order() {
    // Given: BUY then CLOSE for the same symbol, published back to back
    let pipeline = in_memory_pipeline().await;
    pipeline.producer.submit(&buy("open-1")).await.expect("submit");
    let first_ticket = 100_001;
    let close = OrderRequest::new("close-1", "EURUSD", OrderAction::Close, dec!(1))
        .with_ticket(first_ticket);
    pipeline.producer.submit(&close).await.expect("submit");

    // When: The processor drains the queue batch by batch
    let first = pipeline.processor.process_batch().await.expect("batch");
    let second = pipeline.processor.process_batch().await.expect("batch");

    // Then: The BUY executes before the CLOSE that depends on it
    assert_eq!(first.received, 1);
    assert_eq!(first.executed, 1);
    assert_eq!(second.executed, 1);
    let position = pipeline
        .ledger
        .find_position_by_ticket(first_ticket)
        .await
        .expect("lookup")
        .expect("position");
    assert_eq!(position.status, PositionStatus::Closed);
    assert_eq!(position.size, dec!(0));
}

#[tokio::test]
async fn different_symbols_share_a_batch() {
    let pipeline = in_memory_pipeline().await;
    pipeline.producer.submit(&buy("eur-1")).await.expect("submit");
    let gbp = OrderRequest::new("gbp-1", "gbpusd", OrderAction::Sell, dec!(0.5));
    pipeline.producer.submit(&gbp).await.expect("submit");

    let report = pipeline.processor.process_batch().await.expect("batch");

    assert_eq!(report.received, 2);
    assert_eq!(report.executed, 2);
}

// =============================================================================
// Durable pipeline
// =============================================================================

#[tokio::test]
async fn warehouse_backed_pipeline_records_full_history() {
    // Given: Queue, ledger and kill switch all backed by one warehouse
    let temp = tempfile::tempdir().expect("tempdir");
    let warehouse = Warehouse::open_in_memory(temp.path().join("archive")).expect("warehouse");
    let store = Arc::new(WarehouseStore::new(warehouse));
    let pipeline = pipeline_over(
        store.clone(),
        store.clone(),
        KillSwitchStore::new(store.clone()),
    )
    .await;
    pipeline.producer.submit(&buy("durable-1")).await.expect("submit");

    // When: The message is processed
    let message = pipeline
        .queue
        .receive(1, std::time::Duration::from_secs(30))
        .await
        .expect("receive")
        .pop()
        .expect("message");
    let disposition = pipeline.processor.process_message(&message).await;

    // Then: Executed, every transition persisted, queue empty
    assert_eq!(disposition, Disposition::Completed(OrderStatus::Executed));
    let events = pipeline.ledger.order_events("durable-1").await.expect("events");
    let statuses: Vec<_> = events.iter().map(|event| event.to_status).collect();
    assert_eq!(
        statuses,
        [
            OrderStatus::Received,
            OrderStatus::Validated,
            OrderStatus::Submitted,
            OrderStatus::Executed,
        ]
    );
    assert_eq!(pipeline.queue.depth().await.expect("depth"), 0);
    assert_eq!(
        pipeline.ledger.list_positions(true).await.expect("positions").len(),
        1
    );
}
