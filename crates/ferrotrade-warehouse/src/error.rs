use thiserror::Error;

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (database directory, archive partitions).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A stored value could not be decoded into its typed form.
    #[error("invalid stored data: {0}")]
    InvalidData(String),

    /// A queue receipt handle was not produced by this warehouse.
    #[error("invalid receipt handle '{0}'")]
    InvalidReceipt(String),
}

impl WarehouseError {
    pub(crate) fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }
}
