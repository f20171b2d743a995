//! Live broker feed: the stateful connection to the trading venue.
//!
//! [`BrokerClient`] is the collaborator contract shared by the market-data
//! provider (bars) and the order processor (positions, account, orders).
//! [`LiveFeedSource`] adapts it to [`MarketSource`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::data_source::{BarsRequest, MarketSource, SourceError, SourceFuture};
use crate::{BarSeries, SourceKind, Symbol, UtcDateTime};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker is not connected")]
    NotConnected,
    #[error("broker rejected the request: {0}")]
    Rejected(String),
    #[error("unknown position ticket {0}")]
    UnknownTicket(u64),
    #[error("broker transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Market order sent to the venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerOrder {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub volume: Decimal,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub comment: Option<String>,
}

/// Execution report for an order or a close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerFill {
    pub ticket: u64,
    pub price: Decimal,
    pub volume: Decimal,
    pub executed_at: UtcDateTime,
}

/// Open position as reported by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerPosition {
    pub ticket: u64,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub volume: Decimal,
    pub open_price: Decimal,
    pub current_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub profit: Decimal,
    pub opened_at: UtcDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountInfo {
    pub login: u64,
    pub currency: String,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
}

pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send + 'a>>;

/// Trading-venue connection.
pub trait BrokerClient: Send + Sync {
    fn get_bars<'a>(&'a self, req: BarsRequest) -> BrokerFuture<'a, BarSeries>;

    fn get_positions<'a>(&'a self) -> BrokerFuture<'a, Vec<BrokerPosition>>;

    fn get_account_info<'a>(&'a self) -> BrokerFuture<'a, AccountInfo>;

    fn send_order<'a>(&'a self, order: BrokerOrder) -> BrokerFuture<'a, BrokerFill>;

    /// Close `volume` of the position, or all of it when `None`.
    fn close_position<'a>(
        &'a self,
        ticket: u64,
        volume: Option<Decimal>,
    ) -> BrokerFuture<'a, BrokerFill>;

    /// Detail of the most recent failure, as reported by the venue.
    fn last_error(&self) -> Option<String>;
}

/// [`MarketSource`] reading bars from the broker, gated by a circuit breaker.
pub struct LiveFeedSource {
    broker: Arc<dyn BrokerClient>,
    breaker: CircuitBreaker,
}

impl LiveFeedSource {
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self::with_breaker_config(broker, CircuitBreakerConfig::default())
    }

    pub fn with_breaker_config(broker: Arc<dyn BrokerClient>, config: CircuitBreakerConfig) -> Self {
        Self {
            broker,
            breaker: CircuitBreaker::new("live", config),
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl MarketSource for LiveFeedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn fetch_bars<'a>(&'a self, req: BarsRequest) -> SourceFuture<'a, BarSeries> {
        Box::pin(async move {
            if !self.breaker.allow_request() {
                return Err(SourceError::unavailable("live feed circuit breaker is open"));
            }

            match self.broker.get_bars(req).await {
                Ok(series) => {
                    self.breaker.record_success();
                    Ok(series)
                }
                Err(error) => {
                    self.breaker.record_failure();
                    Err(match error {
                        BrokerError::Rejected(message) => SourceError::invalid_request(message),
                        other => SourceError::unavailable(other.to_string()),
                    })
                }
            }
        })
    }

    fn record_timeout(&self) {
        self.breaker.record_failure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::PaperBroker;
    use crate::circuit_breaker::CircuitState;
    use crate::data_source::SourceErrorKind;
    use crate::Timeframe;
    use std::time::Duration;

    fn request() -> BarsRequest {
        let end = UtcDateTime::parse("2024-05-01T12:00:00Z").expect("ts");
        BarsRequest::new(
            Symbol::parse("EURUSD").expect("symbol"),
            Timeframe::H1,
            end - time::Duration::hours(6),
            end,
        )
        .expect("request")
    }

    #[tokio::test]
    async fn disconnected_broker_opens_the_circuit() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_connected(false);
        let feed = LiveFeedSource::with_breaker_config(
            broker,
            CircuitBreakerConfig {
                failure_threshold: 2,
                open_timeout: Duration::from_secs(60),
            },
        );

        for _ in 0..2 {
            let err = feed.fetch_bars(request()).await.expect_err("must fail");
            assert_eq!(err.kind(), SourceErrorKind::Unavailable);
        }
        assert_eq!(feed.circuit_breaker().state(), CircuitState::Open);

        let err = feed.fetch_bars(request()).await.expect_err("short-circuited");
        assert!(err.message().contains("circuit breaker"));
    }

    #[tokio::test]
    async fn connected_broker_serves_bars() {
        let feed = LiveFeedSource::new(Arc::new(PaperBroker::new()));
        let series = feed.fetch_bars(request()).await.expect("bars");
        assert_eq!(series.len(), 7);
    }
}
