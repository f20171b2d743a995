use ferrotrade_core::ValidationError;
use ferrotrade_warehouse::WarehouseError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Reasons an order request fails validation.
///
/// The `Display` text is stored verbatim as the rejection reason on the
/// ledger record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderValidationError {
    #[error("request_id cannot be empty")]
    EmptyRequestId,
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[from] ValidationError),
    #[error("invalid order_action '{value}', expected one of BUY, SELL, CLOSE")]
    InvalidAction { value: String },
    #[error("lot_size {lot_size} is outside [{min}, {max}]")]
    LotSizeOutOfRange {
        lot_size: Decimal,
        min: Decimal,
        max: Decimal,
    },
    #[error("{field} must be positive, got {value}")]
    NonPositivePrice { field: &'static str, value: Decimal },
    #[error("CLOSE requires mt5_ticket")]
    MissingTicket,
}

/// Failures of the durable stores behind the trading traits.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    /// A stored value could not be mapped back onto the trading domain.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The blocking worker running a warehouse call panicked or was cancelled.
    #[error("store worker failed: {0}")]
    Worker(String),
}

impl StoreError {
    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }
}

/// Errors surfaced by the kill switch store.
#[derive(Debug, Error)]
pub enum KillSwitchError {
    /// Someone else changed the record between our read and our write.
    #[error("kill switch was modified concurrently (expected version {expected:?})")]
    Conflict { expected: Option<u64> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by the order producer and processor.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] OrderValidationError),

    #[error("kill switch active")]
    KillSwitchActive,

    #[error("broker submission failed: {0}")]
    BrokerSubmissionFailed(String),

    /// The message stays on the queue and is redelivered.
    #[error("ledger write failed: {0}")]
    LedgerWriteFailed(#[source] StoreError),

    #[error("ledger read failed: {0}")]
    LedgerReadFailed(#[source] StoreError),

    #[error("position {ticket} was modified concurrently {attempts} times")]
    Conflict { ticket: u64, attempts: u32 },

    #[error("order queue failed: {0}")]
    Queue(#[source] StoreError),

    #[error("failed to encode order request: {0}")]
    Encode(#[from] serde_json::Error),
}
