use ferrotrade_core::{ArchiveError, ConfigError, ProviderError, ValidationError, WarehouseError};
use ferrotrade_trading::{KillSwitchError, OrderValidationError, StoreError, TradingError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    OrderValidation(#[from] OrderValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no data: {0}")]
    EmptyResult(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}; re-read the current state and retry")]
    Conflict(String),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::OrderValidation(_) | Self::Config(_) | Self::NotFound(_) => 2,
            Self::EmptyResult(_) => 3,
            Self::Conflict(_) => 4,
            Self::Warehouse(_) | Self::Store(_) | Self::Archive(_) => 5,
            Self::Serialization(_) | Self::Io(_) => 10,
        }
    }
}

impl From<ProviderError> for CliError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::InvalidArgument(inner) => Self::Validation(inner),
        }
    }
}

impl From<KillSwitchError> for CliError {
    fn from(error: KillSwitchError) -> Self {
        match error {
            conflict @ KillSwitchError::Conflict { .. } => Self::Conflict(conflict.to_string()),
            KillSwitchError::Store(inner) => Self::Store(inner),
        }
    }
}

impl From<TradingError> for CliError {
    fn from(error: TradingError) -> Self {
        match error {
            TradingError::ValidationFailed(inner) => Self::OrderValidation(inner),
            conflict @ TradingError::Conflict { .. } => Self::Conflict(conflict.to_string()),
            TradingError::LedgerWriteFailed(inner)
            | TradingError::LedgerReadFailed(inner)
            | TradingError::Queue(inner) => Self::Store(inner),
            TradingError::Encode(inner) => Self::Serialization(inner),
            other => Self::Store(StoreError::Unavailable(other.to_string())),
        }
    }
}
