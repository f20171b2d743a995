use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::broker::{
    AccountInfo, BrokerClient, BrokerError, BrokerFill, BrokerFuture, BrokerOrder, BrokerPosition,
    OrderSide,
};
use crate::data_source::BarsRequest;
use crate::{Bar, BarSeries, Symbol, Timeframe, UtcDateTime};

const MAX_BARS_PER_REQUEST: i64 = 10_000;
const FIRST_TICKET: u64 = 100_001;
const STARTING_BALANCE: i64 = 10_000;

#[derive(Debug)]
struct PaperState {
    next_ticket: u64,
    positions: BTreeMap<u64, BrokerPosition>,
    balance: Decimal,
    fail_next_order: Option<String>,
    last_error: Option<String>,
}

/// Deterministic in-process broker for dry runs and tests.
///
/// Prices are a pure function of symbol and timestamp, so two reads of the
/// same range always agree. Orders fill immediately at the synthetic price
/// of the current minute (or of the pinned clock).
#[derive(Debug)]
pub struct PaperBroker {
    state: Mutex<PaperState>,
    connected: AtomicBool,
    submissions: AtomicU64,
    clock: Option<UtcDateTime>,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PaperState {
                next_ticket: FIRST_TICKET,
                positions: BTreeMap::new(),
                balance: Decimal::from(STARTING_BALANCE),
                fail_next_order: None,
                last_error: None,
            }),
            connected: AtomicBool::new(true),
            submissions: AtomicU64::new(0),
            clock: None,
        }
    }

    /// Pin fills to `now` instead of the wall clock.
    pub fn with_clock(mut self, now: UtcDateTime) -> Self {
        self.clock = Some(now);
        self
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> UtcDateTime {
        self.clock.unwrap_or_else(UtcDateTime::now)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make the next `send_order`/`close_position` fail with `message`.
    pub fn fail_next_order(&self, message: impl Into<String>) {
        self.lock().fail_next_order = Some(message.into());
    }

    /// Register a position the venue already holds.
    pub fn seed_position(&self, position: BrokerPosition) {
        let mut state = self.lock();
        state.next_ticket = state.next_ticket.max(position.ticket.saturating_add(1));
        state.positions.insert(position.ticket, position);
    }

    /// Never issue `ticket` or anything below it, e.g. tickets of closed
    /// positions a previous run already handed out.
    pub fn reserve_tickets_through(&self, ticket: u64) {
        let mut state = self.lock();
        state.next_ticket = state.next_ticket.max(ticket.saturating_add(1));
    }

    /// Number of order submissions (opens and closes) the venue has seen.
    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self, state: &mut PaperState) -> Result<(), BrokerError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        state.last_error = Some(String::from("no connection to trade server"));
        Err(BrokerError::NotConnected)
    }

    fn take_injected_failure(state: &mut PaperState) -> Result<(), BrokerError> {
        match state.fail_next_order.take() {
            Some(message) => {
                state.last_error = Some(message.clone());
                Err(BrokerError::Rejected(message))
            }
            None => Ok(()),
        }
    }

    fn reject(state: &mut PaperState, error: BrokerError) -> BrokerError {
        warn!(error = %error, "paper broker rejected request");
        state.last_error = Some(error.to_string());
        error
    }

    fn open(&self, order: BrokerOrder) -> Result<BrokerFill, BrokerError> {
        let mut state = self.lock();
        self.ensure_connected(&mut state)?;
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Self::take_injected_failure(&mut state)?;

        if order.volume <= Decimal::ZERO {
            return Err(Self::reject(
                &mut state,
                BrokerError::Rejected(format!("invalid volume {}", order.volume)),
            ));
        }

        let now = self.now();
        let price = synthetic_price(&order.symbol, now);
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.positions.insert(
            ticket,
            BrokerPosition {
                ticket,
                symbol: order.symbol.clone(),
                side: order.side,
                volume: order.volume,
                open_price: price,
                current_price: price,
                stop_loss: order.stop_loss,
                take_profit: order.take_profit,
                profit: Decimal::ZERO,
                opened_at: now,
            },
        );
        state.last_error = None;
        debug!(ticket, symbol = %order.symbol, side = ?order.side, volume = %order.volume, %price, "paper order filled");

        Ok(BrokerFill {
            ticket,
            price,
            volume: order.volume,
            executed_at: now,
        })
    }

    fn close(&self, ticket: u64, volume: Option<Decimal>) -> Result<BrokerFill, BrokerError> {
        let mut state = self.lock();
        self.ensure_connected(&mut state)?;
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Self::take_injected_failure(&mut state)?;

        let Some(position) = state.positions.get(&ticket).cloned() else {
            return Err(Self::reject(&mut state, BrokerError::UnknownTicket(ticket)));
        };

        let close_volume = volume.unwrap_or(position.volume);
        if close_volume <= Decimal::ZERO || close_volume > position.volume {
            return Err(Self::reject(
                &mut state,
                BrokerError::Rejected(format!(
                    "close volume {close_volume} outside (0, {}]",
                    position.volume
                )),
            ));
        }

        let now = self.now();
        let price = synthetic_price(&position.symbol, now);
        let realized = position_profit(position.side, position.open_price, price, close_volume);
        state.balance += realized;

        let remaining = position.volume - close_volume;
        if remaining.is_zero() {
            state.positions.remove(&ticket);
        } else if let Some(open) = state.positions.get_mut(&ticket) {
            open.volume = remaining;
        }
        state.last_error = None;

        Ok(BrokerFill {
            ticket,
            price,
            volume: close_volume,
            executed_at: now,
        })
    }

    fn marked_positions(&self, state: &PaperState) -> Vec<BrokerPosition> {
        let now = self.now();
        state
            .positions
            .values()
            .map(|position| {
                let current = synthetic_price(&position.symbol, now);
                BrokerPosition {
                    current_price: current,
                    profit: position_profit(
                        position.side,
                        position.open_price,
                        current,
                        position.volume,
                    ),
                    ..position.clone()
                }
            })
            .collect()
    }
}

impl BrokerClient for PaperBroker {
    fn get_bars<'a>(&'a self, req: BarsRequest) -> BrokerFuture<'a, BarSeries> {
        Box::pin(async move {
            self.ensure_connected(&mut self.lock())?;
            synthetic_series(&req)
        })
    }

    fn get_positions<'a>(&'a self) -> BrokerFuture<'a, Vec<BrokerPosition>> {
        Box::pin(async move {
            let mut state = self.lock();
            self.ensure_connected(&mut state)?;
            Ok(self.marked_positions(&state))
        })
    }

    fn get_account_info<'a>(&'a self) -> BrokerFuture<'a, AccountInfo> {
        Box::pin(async move {
            let mut state = self.lock();
            self.ensure_connected(&mut state)?;
            let floating: Decimal = self
                .marked_positions(&state)
                .iter()
                .map(|position| position.profit)
                .sum();
            Ok(AccountInfo {
                login: 1,
                currency: String::from("USD"),
                balance: state.balance,
                equity: state.balance + floating,
                margin: Decimal::ZERO,
                free_margin: state.balance + floating,
            })
        })
    }

    fn send_order<'a>(&'a self, order: BrokerOrder) -> BrokerFuture<'a, BrokerFill> {
        Box::pin(async move { self.open(order) })
    }

    fn close_position<'a>(
        &'a self,
        ticket: u64,
        volume: Option<Decimal>,
    ) -> BrokerFuture<'a, BrokerFill> {
        Box::pin(async move { self.close(ticket, volume) })
    }

    fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }
}

fn position_profit(side: OrderSide, open: Decimal, current: Decimal, volume: Decimal) -> Decimal {
    let diff = match side {
        OrderSide::Buy => current - open,
        OrderSide::Sell => open - current,
    };
    (diff * volume).round_dp(5)
}

fn symbol_seed(symbol: &Symbol) -> u64 {
    symbol
        .as_str()
        .bytes()
        .fold(0_u64, |acc, byte| acc.wrapping_mul(33).wrapping_add(u64::from(byte)))
}

fn base_price(symbol: &Symbol) -> Decimal {
    let seed = symbol_seed(symbol);
    if symbol.is_fx_pair() {
        // 0.80000 ..= 1.79900
        Decimal::new(80_000 + (seed % 1_000) as i64 * 100, 5)
    } else {
        Decimal::new(100 + (seed % 400) as i64, 0)
    }
}

/// Triangle wave around the symbol's base price, one cycle per 40 steps.
fn price_at_step(symbol: &Symbol, step: i64) -> Decimal {
    let base = base_price(symbol);
    let phase = step.rem_euclid(40);
    let wave = if phase < 20 { phase } else { 40 - phase } - 10;
    (base + base * Decimal::new(wave, 4)).round_dp(5)
}

fn synthetic_price(symbol: &Symbol, at: UtcDateTime) -> Decimal {
    price_at_step(symbol, at.unix_timestamp().div_euclid(60))
}

fn synthetic_bar(symbol: &Symbol, timeframe: Timeframe, ts: UtcDateTime) -> Result<Bar, BrokerError> {
    let step_secs = timeframe.duration().whole_seconds();
    let step = ts.unix_timestamp().div_euclid(step_secs);
    let base = base_price(symbol);
    let open = price_at_step(symbol, step);
    let close = price_at_step(symbol, step + 1);
    let spread = (base * Decimal::new(5, 4)).round_dp(5);
    let high = open.max(close) + spread;
    let low = (open.min(close) - spread).max(Decimal::ZERO);
    let volume = Decimal::from(100 + step.rem_euclid(50));

    Bar::new(ts, open, high, low, close, volume)
        .map_err(|error| BrokerError::Transport(format!("synthetic bar at {ts}: {error}")))
}

fn synthetic_series(req: &BarsRequest) -> Result<BarSeries, BrokerError> {
    let step_secs = req.timeframe.duration().whole_seconds();
    let first_step = (req.start.unix_timestamp() + step_secs - 1).div_euclid(step_secs);
    let last_step = req.end.unix_timestamp().div_euclid(step_secs);
    let first_step = first_step.max(last_step - MAX_BARS_PER_REQUEST + 1);

    let mut bars = Vec::new();
    for step in first_step..=last_step {
        let ts = UtcDateTime::from_unix_timestamp(step * step_secs)
            .map_err(|error| BrokerError::Transport(error.to_string()))?;
        bars.push(synthetic_bar(&req.symbol, req.timeframe, ts)?);
    }
    Ok(BarSeries::new(req.symbol.clone(), req.timeframe, bars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn now() -> UtcDateTime {
        UtcDateTime::parse("2024-05-01T12:00:00Z").expect("ts")
    }

    fn buy(volume: Decimal) -> BrokerOrder {
        BrokerOrder {
            symbol: Symbol::parse("EURUSD").expect("symbol"),
            side: OrderSide::Buy,
            volume,
            take_profit: None,
            stop_loss: None,
            comment: None,
        }
    }

    #[tokio::test]
    async fn bars_are_deterministic_and_aligned() {
        let broker = PaperBroker::new();
        let req = BarsRequest::new(
            Symbol::parse("EURUSD").expect("symbol"),
            Timeframe::M15,
            UtcDateTime::parse("2024-05-01T10:07:00Z").expect("ts"),
            now(),
        )
        .expect("request");

        let first = broker.get_bars(req.clone()).await.expect("bars");
        let second = broker.get_bars(req).await.expect("bars");
        assert_eq!(first, second);
        assert_eq!(first.first_ts(), Some(UtcDateTime::parse("2024-05-01T10:15:00Z").expect("ts")));
        assert_eq!(first.len(), 8);
    }

    #[tokio::test]
    async fn partial_then_full_close() {
        let broker = PaperBroker::new().with_clock(now());
        let fill = broker.send_order(buy(dec!(1.0))).await.expect("fill");

        let partial = broker
            .close_position(fill.ticket, Some(dec!(0.4)))
            .await
            .expect("partial close");
        assert_eq!(partial.volume, dec!(0.4));
        let positions = broker.get_positions().await.expect("positions");
        assert_eq!(positions[0].volume, dec!(0.6));

        broker.close_position(fill.ticket, None).await.expect("full close");
        assert!(broker.get_positions().await.expect("positions").is_empty());
        assert_eq!(broker.submissions(), 3);
    }

    #[tokio::test]
    async fn unknown_ticket_sets_last_error() {
        let broker = PaperBroker::new();
        let err = broker.close_position(42, None).await.expect_err("unknown");
        assert_eq!(err, BrokerError::UnknownTicket(42));
        assert!(broker.last_error().expect("last error").contains("42"));
    }

    #[tokio::test]
    async fn reserved_tickets_are_never_reissued() {
        // given: a previous run handed out 100_007, since closed
        let broker = PaperBroker::new().with_clock(now());
        broker.reserve_tickets_through(100_007);
        broker.reserve_tickets_through(100_002);

        // when
        let fill = broker.send_order(buy(dec!(0.1))).await.expect("fill");

        // then
        assert_eq!(fill.ticket, 100_008);
        assert_eq!(broker.get_positions().await.expect("positions").len(), 1);
    }

    #[tokio::test]
    async fn injected_failure_is_reported_once() {
        let broker = PaperBroker::new();
        broker.fail_next_order("market closed");

        let err = broker.send_order(buy(dec!(0.1))).await.expect_err("rejected");
        assert_eq!(err, BrokerError::Rejected(String::from("market closed")));
        assert_eq!(broker.last_error().as_deref(), Some("market closed"));

        broker.send_order(buy(dec!(0.1))).await.expect("second order fills");
        assert_eq!(broker.last_error(), None);
    }
}
