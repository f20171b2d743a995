//! Order request wire format, order lifecycle and ledger entries.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use ferrotrade_core::{OrderSide, UtcDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::OrderValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    Buy,
    Sell,
    Close,
}

impl OrderAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Close => "CLOSE",
        }
    }

    /// Broker side for opening actions.
    pub const fn open_side(self) -> Option<OrderSide> {
        match self {
            Self::Buy => Some(OrderSide::Buy),
            Self::Sell => Some(OrderSide::Sell),
            Self::Close => None,
        }
    }
}

impl Display for OrderAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderAction {
    type Err = OrderValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            "CLOSE" => Ok(Self::Close),
            _ => Err(OrderValidationError::InvalidAction {
                value: value.to_owned(),
            }),
        }
    }
}

/// Order lifecycle.
///
/// ```text
/// RECEIVED -> VALIDATED -> [POSITION_LOOKUP] -> SUBMITTED -> EXECUTED
///     \            \               \                  \----> FAILED
///      \------------\---------------\-----------------------> REJECTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Received,
    Validated,
    PositionLookup,
    Submitted,
    Executed,
    Rejected,
    Failed,
}

impl OrderStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Validated => "VALIDATED",
            Self::PositionLookup => "POSITION_LOOKUP",
            Self::Submitted => "SUBMITTED",
            Self::Executed => "EXECUTED",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Rejected | Self::Failed)
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "RECEIVED" => Ok(Self::Received),
            "VALIDATED" => Ok(Self::Validated),
            "POSITION_LOOKUP" => Ok(Self::PositionLookup),
            "SUBMITTED" => Ok(Self::Submitted),
            "EXECUTED" => Ok(Self::Executed),
            "REJECTED" => Ok(Self::Rejected),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// Order request as carried on the queue.
///
/// `symbol` and `order_action` stay raw strings so that a bad value is a
/// validation rejection with a ledger record rather than a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub request_id: String,
    pub symbol: String,
    pub order_action: String,
    pub lot_size: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mt5_ticket: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<UtcDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl OrderRequest {
    pub fn new(
        request_id: impl Into<String>,
        symbol: impl Into<String>,
        action: OrderAction,
        lot_size: Decimal,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            symbol: symbol.into(),
            order_action: action.as_str().to_owned(),
            lot_size,
            take_profit: None,
            stop_loss: None,
            mt5_ticket: None,
            comment: None,
            submitted_at: None,
            idempotency_key: None,
        }
    }

    pub fn with_ticket(mut self, ticket: u64) -> Self {
        self.mt5_ticket = Some(ticket);
        self
    }

    pub fn with_targets(mut self, take_profit: Option<Decimal>, stop_loss: Option<Decimal>) -> Self {
        self.take_profit = take_profit;
        self.stop_loss = stop_loss;
        self
    }

    /// Key deduplicating deliveries; falls back to `request_id`.
    pub fn idempotency_key(&self) -> &str {
        self.idempotency_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .unwrap_or(&self.request_id)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Ledger view of one order, keyed by idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderEntry {
    pub idempotency_key: String,
    pub request_id: String,
    pub symbol: String,
    pub action: String,
    pub size: Decimal,
    pub status: OrderStatus,
    pub reason: Option<String>,
    pub broker_ticket: Option<u64>,
    pub fill_price: Option<Decimal>,
    pub fill_size: Option<Decimal>,
    /// Set once the ledger position reflects the execution.
    pub position_applied: bool,
    pub payload: String,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

impl OrderEntry {
    pub fn received(request: &OrderRequest, payload: &str, now: UtcDateTime) -> Self {
        Self {
            idempotency_key: request.idempotency_key().to_owned(),
            request_id: request.request_id.clone(),
            symbol: request.symbol.clone(),
            action: request.order_action.clone(),
            size: request.lot_size,
            status: OrderStatus::Received,
            reason: None,
            broker_ticket: None,
            fill_price: None,
            fill_size: None,
            position_applied: false,
            payload: payload.to_owned(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to`, returning the audit event for the transition.
    pub fn transition(
        &mut self,
        to: OrderStatus,
        reason: Option<String>,
        now: UtcDateTime,
    ) -> OrderEvent {
        let from = self.status;
        self.status = to;
        if reason.is_some() {
            self.reason.clone_from(&reason);
        }
        self.updated_at = now;
        OrderEvent {
            idempotency_key: self.idempotency_key.clone(),
            request_id: self.request_id.clone(),
            from_status: Some(from),
            to_status: to,
            reason,
            recorded_at: now,
        }
    }

    pub fn initial_event(&self) -> OrderEvent {
        OrderEvent {
            idempotency_key: self.idempotency_key.clone(),
            request_id: self.request_id.clone(),
            from_status: None,
            to_status: self.status,
            reason: self.reason.clone(),
            recorded_at: self.created_at,
        }
    }
}

/// One audit-trail row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderEvent {
    pub idempotency_key: String,
    pub request_id: String,
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub reason: Option<String>,
    pub recorded_at: UtcDateTime,
}
