//! # Ferrotrade Warehouse
//!
//! DuckDB-based durable storage for ferrotrade.
//!
//! ## Overview
//!
//! One DuckDB database file holds everything the trading side must not lose:
//!
//! | Table | Description |
//! |-------|-------------|
//! | `positions` | Tracked broker positions with an optimistic-lock version |
//! | `order_records` | One row per order, keyed by idempotency key |
//! | `order_events` | Append-only audit trail of order state transitions |
//! | `kill_switch` | Singleton global trading gate |
//! | `order_queue` | Durable FIFO-per-group queue between producer and processor |
//! | `archive_manifest` | Index of parquet partitions in the cold archive |
//!
//! Bar history lives outside the database as parquet files under the archive
//! root, one file per `{symbol}/{timeframe}/{yyyy}/{mm}/{dd}.parquet`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferrotrade_warehouse::{Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::default())?;
//!     let switch = warehouse.load_kill_switch()?;
//!     println!("kill switch: {switch:?}");
//!     Ok(())
//! }
//! ```
//!
//! All values supplied by callers are bound as statement parameters. The only
//! interpolated strings are archive file paths, which the warehouse builds
//! itself and escapes.

pub mod archive;
pub mod duckdb;
mod error;
pub mod kill_switch;
pub mod ledger;
pub mod migrations;
pub mod models;
pub mod queue;
pub mod views;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::Connection;

pub use crate::duckdb::{ConnectionPool, PooledConnection};
pub use archive::ArchiveSyncReport;
pub use error::WarehouseError;
pub use models::{
    ArchivedBar, KillSwitchRecord, OrderEventRecord, OrderRecord, PartitionInfo, PositionRecord,
    QueuedMessage,
};

/// Configuration for the warehouse database and archive.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for ferrotrade data.
    pub home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Root directory of the parquet cold archive.
    pub archive_root: PathBuf,
    /// Maximum number of idle connections kept by the pool.
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    /// Lay out the database and archive under `home`.
    pub fn for_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            db_path: home.join("db").join("ferrotrade.duckdb"),
            archive_root: home.join("archive"),
            home,
            max_pool_size: 4,
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::for_home(resolve_ferrotrade_home())
    }
}

/// The main warehouse handle. Cheap to clone; clones share one database.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    pool: ConnectionPool,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open (creating when needed) the database file and archive root.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&config.archive_root)?;

        let pool = ConnectionPool::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { config, pool };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Open a warehouse whose database lives in memory. Archive partitions are
    /// still written as files under `archive_root`.
    pub fn open_in_memory(archive_root: impl Into<PathBuf>) -> Result<Self, WarehouseError> {
        let archive_root = archive_root.into();
        fs::create_dir_all(&archive_root)?;

        let config = WarehouseConfig {
            home: archive_root.clone(),
            db_path: PathBuf::from(":memory:"),
            archive_root,
            max_pool_size: 2,
        };
        let pool = ConnectionPool::open_in_memory(config.max_pool_size)?;
        let warehouse = Self { config, pool };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply pending migrations and (re)create views.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        migrations::apply_migrations(&connection)?;
        views::create_views(&connection)?;
        Ok(())
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    /// Path to the database file.
    pub fn db_path(&self) -> &Path {
        self.pool.db_path().unwrap_or(self.config.db_path.as_path())
    }

    pub fn archive_root(&self) -> &Path {
        self.config.archive_root.as_path()
    }

    pub(crate) fn connection(&self) -> Result<PooledConnection, WarehouseError> {
        Ok(self.pool.acquire()?)
    }
}

/// Run `body` inside a transaction on `connection`.
pub(crate) fn in_transaction<T>(
    connection: &Connection,
    body: impl FnOnce(&Connection) -> Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    connection.execute_batch("BEGIN TRANSACTION")?;
    let result = body(connection);
    finalize_transaction(connection, result)
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Resolve the ferrotrade home directory from environment or default.
/// `FERROTRADE_HOME`, else `$HOME/.ferrotrade`.
pub fn resolve_ferrotrade_home() -> PathBuf {
    if let Some(path) = env::var_os("FERROTRADE_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".ferrotrade");
    }

    PathBuf::from(".ferrotrade")
}

/// Convert a path to a SQL-compatible string (forward slashes).
pub(crate) fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Escape a string for inclusion in a SQL string literal.
///
/// Only used for file paths the warehouse builds itself; caller data is always
/// bound as a parameter.
pub(crate) fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}
