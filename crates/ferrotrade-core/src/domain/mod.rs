//! # Domain Models
//!
//! Canonical market-data types for ferrotrade.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bar`] | OHLCV bar with fixed-point prices |
//! | [`BarSeries`] | Sorted, de-duplicated bars for a symbol/timeframe |
//! | [`Symbol`] | Validated instrument symbol |
//! | [`Timeframe`] | Bar timeframe (M1 ... W1) |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! All types validate their invariants at construction time:
//!
//! ```rust
//! use ferrotrade_core::{Bar, UtcDateTime, ValidationError};
//! use rust_decimal::Decimal;
//!
//! let ts = UtcDateTime::parse("2024-01-01T00:00:00Z").unwrap();
//! let invalid = Bar::new(
//!     ts,
//!     Decimal::new(100, 0),
//!     Decimal::new(95, 0),
//!     Decimal::new(105, 0),
//!     Decimal::new(102, 0),
//!     Decimal::ZERO,
//! );
//! assert!(matches!(invalid, Err(ValidationError::InvalidBarRange)));
//! ```

mod models;
mod symbol;
mod timeframe;
mod timestamp;

pub use models::{Bar, BarSeries};
pub use symbol::Symbol;
pub use timeframe::Timeframe;
pub use timestamp::UtcDateTime;
