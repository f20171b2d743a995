//! Ledger positions and their fill arithmetic.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use ferrotrade_core::{BrokerFill, BrokerPosition, OrderSide, Symbol, UtcDateTime};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }

    fn direction(self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl From<OrderSide> for PositionSide {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Self::Long,
            OrderSide::Sell => Self::Short,
        }
    }
}

impl FromStr for PositionSide {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "LONG" => Ok(Self::Long),
            "SHORT" => Ok(Self::Short),
            other => Err(format!("unknown position side '{other}'")),
        }
    }
}

impl Display for PositionSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    PartiallyClosed,
    Closed,
}

impl PositionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::PartiallyClosed => "PARTIALLY_CLOSED",
            Self::Closed => "CLOSED",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "OPEN" => Ok(Self::Open),
            "PARTIALLY_CLOSED" => Ok(Self::PartiallyClosed),
            "CLOSED" => Ok(Self::Closed),
            other => Err(format!("unknown position status '{other}'")),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("position {ticket} is already closed")]
    AlreadyClosed { ticket: u64 },
    #[error("close size {requested} must be positive")]
    NonPositiveClose { requested: Decimal },
}

/// A broker position as tracked by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub position_id: String,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub status: PositionStatus,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub broker_ticket: u64,
    pub last_request_id: Option<String>,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
    pub version: u64,
}

impl Position {
    /// New position from an opening fill.
    pub fn open(
        request_id: &str,
        symbol: Symbol,
        side: PositionSide,
        fill: &BrokerFill,
        take_profit: Option<Decimal>,
        stop_loss: Option<Decimal>,
    ) -> Self {
        Self {
            position_id: uuid::Uuid::new_v4().to_string(),
            symbol,
            side,
            size: fill.volume,
            entry_price: fill.price,
            current_price: Some(fill.price),
            stop_loss,
            take_profit,
            status: PositionStatus::Open,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            broker_ticket: fill.ticket,
            last_request_id: Some(request_id.to_owned()),
            created_at: fill.executed_at,
            updated_at: fill.executed_at,
            version: 1,
        }
    }

    /// Position discovered at the broker but unknown to the ledger.
    pub fn from_broker(position: &BrokerPosition, now: UtcDateTime) -> Self {
        Self {
            position_id: uuid::Uuid::new_v4().to_string(),
            symbol: position.symbol.clone(),
            side: position.side.into(),
            size: position.volume,
            entry_price: position.open_price,
            current_price: Some(position.current_price),
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            status: PositionStatus::Open,
            unrealized_pnl: position.profit,
            realized_pnl: Decimal::ZERO,
            broker_ticket: position.ticket,
            last_request_id: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Whether the order `request_id` is already reflected in this position.
    pub fn has_applied(&self, request_id: &str) -> bool {
        self.last_request_id.as_deref() == Some(request_id)
    }

    /// Apply a closing fill of `fill.volume` at `fill.price`.
    ///
    /// Volume beyond the remaining size closes the position in full. Bumps
    /// `version`; the caller persists with the previous version as the
    /// expected one.
    pub fn apply_close(&mut self, request_id: &str, fill: &BrokerFill) -> Result<(), PositionError> {
        if self.status == PositionStatus::Closed {
            return Err(PositionError::AlreadyClosed {
                ticket: self.broker_ticket,
            });
        }
        if fill.volume <= Decimal::ZERO {
            return Err(PositionError::NonPositiveClose {
                requested: fill.volume,
            });
        }

        let closed = fill.volume.min(self.size);
        let direction = self.side.direction();
        self.realized_pnl += (fill.price - self.entry_price) * closed * direction;
        self.size -= closed;
        self.current_price = Some(fill.price);

        if self.size.is_zero() {
            self.status = PositionStatus::Closed;
            self.unrealized_pnl = Decimal::ZERO;
        } else {
            self.status = PositionStatus::PartiallyClosed;
            self.unrealized_pnl = (fill.price - self.entry_price) * self.size * direction;
        }

        self.last_request_id = Some(request_id.to_owned());
        self.updated_at = fill.executed_at;
        self.version += 1;
        Ok(())
    }
}
