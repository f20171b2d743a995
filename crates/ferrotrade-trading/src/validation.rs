//! Order request validation shared by the producer and the processor.

use ferrotrade_core::{Symbol, TradingConfig};
use rust_decimal::Decimal;

use crate::error::OrderValidationError;
use crate::order::{OrderAction, OrderRequest};

/// Lot size bounds applied to every order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLimits {
    pub min_lot_size: Decimal,
    pub max_lot_size: Decimal,
}

impl Default for OrderLimits {
    fn default() -> Self {
        Self::from(&TradingConfig::default())
    }
}

impl From<&TradingConfig> for OrderLimits {
    fn from(config: &TradingConfig) -> Self {
        Self {
            min_lot_size: config.min_lot_size,
            max_lot_size: config.max_lot_size,
        }
    }
}

/// A request that passed validation, with typed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedOrder {
    pub request_id: String,
    pub symbol: Symbol,
    pub action: OrderAction,
    pub lot_size: Decimal,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    /// Present for every CLOSE.
    pub ticket: Option<u64>,
    pub comment: Option<String>,
}

impl OrderLimits {
    pub fn validate(&self, request: &OrderRequest) -> Result<ValidatedOrder, OrderValidationError> {
        if request.request_id.trim().is_empty() {
            return Err(OrderValidationError::EmptyRequestId);
        }
        let symbol = Symbol::parse(&request.symbol)?;
        let action = request.order_action.parse::<OrderAction>()?;

        if request.lot_size < self.min_lot_size || request.lot_size > self.max_lot_size {
            return Err(OrderValidationError::LotSizeOutOfRange {
                lot_size: request.lot_size,
                min: self.min_lot_size,
                max: self.max_lot_size,
            });
        }
        positive("take_profit", request.take_profit)?;
        positive("stop_loss", request.stop_loss)?;

        if action == OrderAction::Close && request.mt5_ticket.is_none() {
            return Err(OrderValidationError::MissingTicket);
        }

        Ok(ValidatedOrder {
            request_id: request.request_id.clone(),
            symbol,
            action,
            lot_size: request.lot_size,
            take_profit: request.take_profit,
            stop_loss: request.stop_loss,
            ticket: request.mt5_ticket,
            comment: request.comment.clone(),
        })
    }
}

fn positive(field: &'static str, value: Option<Decimal>) -> Result<(), OrderValidationError> {
    match value {
        Some(value) if value <= Decimal::ZERO => {
            Err(OrderValidationError::NonPositivePrice { field, value })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy(lot_size: Decimal) -> OrderRequest {
        OrderRequest::new("r-1", "EURUSD", OrderAction::Buy, lot_size)
    }

    #[test]
    fn accepts_bounds_inclusive() {
        let limits = OrderLimits::default();
        assert!(limits.validate(&buy(dec!(0.01))).is_ok());
        assert!(limits.validate(&buy(dec!(10))).is_ok());
    }

    #[test]
    fn rejects_out_of_range_lot() {
        let err = OrderLimits::default()
            .validate(&buy(dec!(10.5)))
            .expect_err("too large");
        assert!(matches!(err, OrderValidationError::LotSizeOutOfRange { .. }));
        assert!(OrderLimits::default().validate(&buy(dec!(0))).is_err());
    }

    #[test]
    fn rejects_empty_symbol_and_bad_action() {
        let mut request = buy(dec!(1));
        request.symbol = String::new();
        assert!(matches!(
            OrderLimits::default().validate(&request),
            Err(OrderValidationError::InvalidSymbol(_))
        ));

        let mut request = buy(dec!(1));
        request.order_action = String::from("HOLD");
        assert!(matches!(
            OrderLimits::default().validate(&request),
            Err(OrderValidationError::InvalidAction { .. })
        ));
    }

    #[test]
    fn rejects_non_positive_targets() {
        let request = buy(dec!(1)).with_targets(Some(dec!(1.2)), Some(dec!(-1)));
        let err = OrderLimits::default().validate(&request).expect_err("bad sl");
        assert_eq!(
            err,
            OrderValidationError::NonPositivePrice {
                field: "stop_loss",
                value: dec!(-1)
            }
        );
    }

    #[test]
    fn close_requires_ticket() {
        let close = OrderRequest::new("r-2", "EURUSD", OrderAction::Close, dec!(1));
        assert_eq!(
            OrderLimits::default().validate(&close),
            Err(OrderValidationError::MissingTicket)
        );

        let validated = OrderLimits::default()
            .validate(&close.with_ticket(100_001))
            .expect("valid close");
        assert_eq!(validated.ticket, Some(100_001));
    }
}
