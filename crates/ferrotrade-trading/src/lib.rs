//! # Ferrotrade Trading
//!
//! Order pipeline for ferrotrade: a producer validates order requests and
//! puts them on a durable queue, a single processor per account drains the
//! queue, gates each order on the global kill switch, submits it to the
//! broker exactly once and keeps the order ledger and tracked positions
//! current.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`kill_switch`] | Fail-safe global trading gate with versioned writes |
//! | [`ledger`] | Orders, audit events and positions |
//! | [`order`] | Wire format and lifecycle |
//! | [`position`] | Position fill arithmetic |
//! | [`processor`] | Queue consumer and order state machine |
//! | [`producer`] | Validating enqueue |
//! | [`queue`] | FIFO-per-group queue contract |
//! | [`validation`] | Lot-size and field rules |
//! | [`warehouse_store`] | DuckDB-backed store implementations |
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ferrotrade_core::PaperBroker;
//! use ferrotrade_trading::{KillSwitchStore, OrderProcessor, WarehouseStore};
//!
//! let store = Arc::new(WarehouseStore::new(warehouse));
//! let processor = OrderProcessor::new(
//!     store.clone(),
//!     store.clone(),
//!     Arc::new(PaperBroker::new()),
//!     KillSwitchStore::new(store),
//! );
//! let report = processor.process_batch().await?;
//! ```

pub mod error;
pub mod kill_switch;
pub mod ledger;
pub mod order;
pub mod position;
pub mod processor;
pub mod producer;
pub mod queue;
pub mod validation;
pub mod warehouse_store;

pub use error::{KillSwitchError, OrderValidationError, StoreError, TradingError};
pub use kill_switch::{InMemoryKillSwitchRepository, KillSwitchRepository, KillSwitchState, KillSwitchStore};
pub use ledger::{InMemoryOrderLedger, OrderLedger};
pub use order::{OrderAction, OrderEntry, OrderEvent, OrderRequest, OrderStatus};
pub use position::{Position, PositionError, PositionSide, PositionStatus};
pub use processor::{
    BatchReport, Disposition, OrderProcessor, ProcessorSettings, AMBIGUOUS_SUBMISSION_REASON,
    KILL_SWITCH_REASON,
};
pub use producer::OrderProducer;
pub use queue::{InMemoryOrderQueue, OrderQueue, QueueMessage};
pub use validation::{OrderLimits, ValidatedOrder};
pub use warehouse_store::WarehouseStore;
