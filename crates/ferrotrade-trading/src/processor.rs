//! Order processor: drains the order queue and drives each order through
//! its lifecycle.
//!
//! Per message:
//!
//! 1. decode (malformed bodies are logged and dropped)
//! 2. idempotency check on the ledger
//! 3. validation, kill switch, position lookup for CLOSE
//! 4. SUBMITTED record, then exactly one broker call
//! 5. terminal record, position update, delete
//!
//! Only ledger failures leave a message on the queue for redelivery. A
//! SUBMITTED record found on redelivery means the broker outcome is unknown;
//! it is marked FAILED and never submitted again.

use std::sync::Arc;
use std::time::Duration;

use ferrotrade_core::{BrokerClient, BrokerFill, BrokerOrder, Symbol, TradingConfig, UtcDateTime};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{OrderValidationError, StoreError, TradingError};
use crate::kill_switch::KillSwitchStore;
use crate::ledger::OrderLedger;
use crate::order::{OrderAction, OrderEntry, OrderRequest, OrderStatus};
use crate::position::{Position, PositionError, PositionSide, PositionStatus};
use crate::queue::{OrderQueue, QueueMessage};
use crate::validation::{OrderLimits, ValidatedOrder};

pub const KILL_SWITCH_REASON: &str = "kill switch active";
pub const AMBIGUOUS_SUBMISSION_REASON: &str = "ambiguous prior submission";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub batch_size: usize,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    /// Re-read attempts when a position update loses an optimistic lock.
    pub position_retry_limit: u32,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self::from(&TradingConfig::default())
    }
}

impl From<&TradingConfig> for ProcessorSettings {
    fn from(config: &TradingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            visibility_timeout: config.visibility_timeout(),
            poll_interval: config.poll_interval(),
            position_retry_limit: 3,
        }
    }
}

/// What happened to one queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed to a terminal status in this delivery; message deleted.
    Completed(OrderStatus),
    /// Already terminal from an earlier delivery; message deleted.
    Duplicate(OrderStatus),
    /// Body could not be decoded; message deleted.
    Malformed,
    /// Left for redelivery.
    Released,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub received: usize,
    pub executed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub released: usize,
}

impl BatchReport {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Completed(OrderStatus::Executed) => self.executed += 1,
            Disposition::Completed(OrderStatus::Rejected) => self.rejected += 1,
            Disposition::Completed(_) => self.failed += 1,
            Disposition::Duplicate(_) => self.duplicates += 1,
            Disposition::Malformed => self.malformed += 1,
            Disposition::Released => self.released += 1,
        }
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.received += other.received;
        self.executed += other.executed;
        self.rejected += other.rejected;
        self.failed += other.failed;
        self.duplicates += other.duplicates;
        self.malformed += other.malformed;
        self.released += other.released;
    }
}

enum PositionLookup {
    Found(Position),
    NotFound,
    BrokerFailed(String),
}

pub struct OrderProcessor {
    queue: Arc<dyn OrderQueue>,
    ledger: Arc<dyn OrderLedger>,
    broker: Arc<dyn BrokerClient>,
    kill_switch: KillSwitchStore,
    limits: OrderLimits,
    settings: ProcessorSettings,
}

impl OrderProcessor {
    pub fn new(
        queue: Arc<dyn OrderQueue>,
        ledger: Arc<dyn OrderLedger>,
        broker: Arc<dyn BrokerClient>,
        kill_switch: KillSwitchStore,
    ) -> Self {
        Self {
            queue,
            ledger,
            broker,
            kill_switch,
            limits: OrderLimits::default(),
            settings: ProcessorSettings::default(),
        }
    }

    pub fn with_limits(mut self, limits: OrderLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_settings(mut self, settings: ProcessorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Poll the queue until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> BatchReport {
        info!(batch_size = self.settings.batch_size, "order processor started");
        let mut total = BatchReport::default();

        while !*shutdown.borrow() {
            let idle = match self.process_batch().await {
                Ok(report) => {
                    total.merge(report);
                    report.received == 0
                }
                Err(err) => {
                    error!(error = %err, "order queue receive failed");
                    true
                }
            };
            if !idle {
                continue;
            }
            tokio::select! {
                () = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            executed = total.executed,
            rejected = total.rejected,
            failed = total.failed,
            "order processor stopped"
        );
        total
    }

    /// Receive one batch and process its messages in order.
    pub async fn process_batch(&self) -> Result<BatchReport, TradingError> {
        let messages = self
            .queue
            .receive(self.settings.batch_size, self.settings.visibility_timeout)
            .await
            .map_err(TradingError::Queue)?;

        let mut report = BatchReport {
            received: messages.len(),
            ..BatchReport::default()
        };
        for message in &messages {
            report.record(self.process_message(message).await);
        }
        Ok(report)
    }

    pub async fn process_message(&self, message: &QueueMessage) -> Disposition {
        match self.handle(message).await {
            Ok(disposition) => {
                match self.queue.delete(&message.receipt).await {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        message_id = %message.message_id,
                        "receipt expired before delete; message will be redelivered"
                    ),
                    Err(err) => error!(
                        message_id = %message.message_id,
                        error = %err,
                        "failed to delete processed message"
                    ),
                }
                disposition
            }
            Err(err) => {
                warn!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    error = %err,
                    "order processing interrupted; releasing message"
                );
                if let Err(release_err) = self.queue.release(&message.receipt).await {
                    error!(
                        message_id = %message.message_id,
                        error = %release_err,
                        "failed to release message; it reappears after the visibility timeout"
                    );
                }
                Disposition::Released
            }
        }
    }

    async fn handle(&self, message: &QueueMessage) -> Result<Disposition, TradingError> {
        let request = match OrderRequest::from_json(&message.body) {
            Ok(request) => request,
            Err(err) => {
                warn!(message_id = %message.message_id, error = %err, "dropping malformed order message");
                return Ok(Disposition::Malformed);
            }
        };
        let key = request.idempotency_key().to_owned();

        let existing = self
            .ledger
            .load_order(&key)
            .await
            .map_err(TradingError::LedgerReadFailed)?;

        let mut entry = match existing {
            Some(entry) if entry.status == OrderStatus::Executed && !entry.position_applied => {
                info!(idempotency_key = %key, "re-applying position for executed order");
                return self.reapply_position(&request, entry).await;
            }
            Some(entry) if entry.status.is_terminal() => {
                info!(idempotency_key = %key, status = %entry.status, "duplicate delivery");
                return Ok(Disposition::Duplicate(entry.status));
            }
            Some(mut entry) if entry.status == OrderStatus::Submitted => {
                warn!(idempotency_key = %key, "prior submission has no recorded outcome");
                return self
                    .finish(
                        &mut entry,
                        OrderStatus::Failed,
                        AMBIGUOUS_SUBMISSION_REASON.to_owned(),
                    )
                    .await;
            }
            // Broker not yet called; resume.
            Some(entry) => entry,
            None => {
                let entry = OrderEntry::received(&request, &message.body, UtcDateTime::now());
                let inserted = self
                    .ledger
                    .insert_order(&entry, &entry.initial_event())
                    .await
                    .map_err(TradingError::LedgerWriteFailed)?;
                if !inserted {
                    return Err(TradingError::LedgerWriteFailed(StoreError::Unavailable(
                        format!("order '{key}' was recorded concurrently"),
                    )));
                }
                entry
            }
        };

        let order = match self.limits.validate(&request) {
            Ok(order) => order,
            Err(err) => {
                return self
                    .finish(&mut entry, OrderStatus::Rejected, err.to_string())
                    .await
            }
        };
        self.advance(&mut entry, OrderStatus::Validated).await?;

        if self.kill_switch.is_active().await {
            return self
                .finish(&mut entry, OrderStatus::Rejected, KILL_SWITCH_REASON.to_owned())
                .await;
        }

        let submission = match order.action.open_side() {
            Some(side) => {
                self.advance(&mut entry, OrderStatus::Submitted).await?;
                self.broker
                    .send_order(BrokerOrder {
                        symbol: order.symbol.clone(),
                        side,
                        volume: order.lot_size,
                        take_profit: order.take_profit,
                        stop_loss: order.stop_loss,
                        comment: order.comment.clone(),
                    })
                    .await
            }
            None => {
                let Some(ticket) = order.ticket else {
                    return self
                        .finish(
                            &mut entry,
                            OrderStatus::Rejected,
                            OrderValidationError::MissingTicket.to_string(),
                        )
                        .await;
                };
                self.advance(&mut entry, OrderStatus::PositionLookup).await?;
                let position = match self.locate_position(ticket).await? {
                    PositionLookup::Found(position) => position,
                    PositionLookup::NotFound => {
                        return self
                            .finish(
                                &mut entry,
                                OrderStatus::Rejected,
                                format!("position not found: ticket {ticket}"),
                            )
                            .await
                    }
                    PositionLookup::BrokerFailed(detail) => {
                        return self.finish(&mut entry, OrderStatus::Failed, detail).await
                    }
                };
                if position.symbol != order.symbol {
                    return self
                        .finish(
                            &mut entry,
                            OrderStatus::Rejected,
                            format!("ticket {ticket} belongs to {}", position.symbol),
                        )
                        .await;
                }
                self.advance(&mut entry, OrderStatus::Submitted).await?;
                let volume = order.lot_size.min(position.size);
                self.broker.close_position(ticket, Some(volume)).await
            }
        };

        let fill = match submission {
            Ok(fill) => fill,
            Err(err) => {
                let detail = self
                    .broker
                    .last_error()
                    .unwrap_or_else(|| TradingError::BrokerSubmissionFailed(err.to_string()).to_string());
                return self.finish(&mut entry, OrderStatus::Failed, detail).await;
            }
        };

        entry.broker_ticket = Some(fill.ticket);
        entry.fill_price = Some(fill.price);
        entry.fill_size = Some(fill.volume);
        self.advance(&mut entry, OrderStatus::Executed).await?;
        info!(
            request_id = %entry.request_id,
            ticket = fill.ticket,
            price = %fill.price,
            volume = %fill.volume,
            "order executed"
        );

        self.apply_position(&request, &order, &mut entry, &fill).await?;
        Ok(Disposition::Completed(OrderStatus::Executed))
    }

    async fn advance(&self, entry: &mut OrderEntry, to: OrderStatus) -> Result<(), TradingError> {
        if entry.status == to {
            return Ok(());
        }
        let event = entry.transition(to, None, UtcDateTime::now());
        debug!(request_id = %entry.request_id, from = ?event.from_status, to = %to, "order transition");
        self.ledger
            .update_order(entry, Some(&event))
            .await
            .map_err(TradingError::LedgerWriteFailed)
    }

    async fn finish(
        &self,
        entry: &mut OrderEntry,
        status: OrderStatus,
        reason: String,
    ) -> Result<Disposition, TradingError> {
        info!(request_id = %entry.request_id, status = %status, reason = %reason, "order finished");
        let event = entry.transition(status, Some(reason), UtcDateTime::now());
        self.ledger
            .update_order(entry, Some(&event))
            .await
            .map_err(TradingError::LedgerWriteFailed)?;
        Ok(Disposition::Completed(status))
    }

    /// Ledger first, then the broker; a broker-only position is persisted.
    async fn locate_position(&self, ticket: u64) -> Result<PositionLookup, TradingError> {
        let tracked = self
            .ledger
            .find_position_by_ticket(ticket)
            .await
            .map_err(TradingError::LedgerReadFailed)?;
        if let Some(position) = tracked.filter(|p| p.status != PositionStatus::Closed) {
            return Ok(PositionLookup::Found(position));
        }

        let positions = match self.broker.get_positions().await {
            Ok(positions) => positions,
            Err(err) => {
                return Ok(PositionLookup::BrokerFailed(
                    self.broker.last_error().unwrap_or_else(|| err.to_string()),
                ))
            }
        };
        let Some(remote) = positions.iter().find(|p| p.ticket == ticket) else {
            return Ok(PositionLookup::NotFound);
        };

        let position = Position::from_broker(remote, UtcDateTime::now());
        self.ledger
            .insert_position(&position)
            .await
            .map_err(TradingError::LedgerWriteFailed)?;
        info!(ticket, symbol = %position.symbol, "tracked broker position missing from ledger");
        Ok(PositionLookup::Found(position))
    }

    async fn reapply_position(
        &self,
        request: &OrderRequest,
        mut entry: OrderEntry,
    ) -> Result<Disposition, TradingError> {
        let corrupt = |what: &str| {
            TradingError::LedgerReadFailed(StoreError::Corrupt(format!(
                "executed order '{}' has no {what}",
                entry.idempotency_key
            )))
        };
        let fill = BrokerFill {
            ticket: entry.broker_ticket.ok_or_else(|| corrupt("broker ticket"))?,
            price: entry.fill_price.ok_or_else(|| corrupt("fill price"))?,
            volume: entry.fill_size.ok_or_else(|| corrupt("fill size"))?,
            executed_at: entry.updated_at,
        };
        let action = entry
            .action
            .parse::<OrderAction>()
            .map_err(|_| corrupt("valid action"))?;
        let symbol = Symbol::parse(&entry.symbol).map_err(|_| corrupt("valid symbol"))?;
        let order = ValidatedOrder {
            request_id: request.request_id.clone(),
            symbol,
            action,
            lot_size: entry.size,
            take_profit: request.take_profit,
            stop_loss: request.stop_loss,
            ticket: request.mt5_ticket.or(entry.broker_ticket),
            comment: request.comment.clone(),
        };

        self.apply_position(request, &order, &mut entry, &fill).await?;
        Ok(Disposition::Completed(OrderStatus::Executed))
    }

    async fn apply_position(
        &self,
        request: &OrderRequest,
        order: &ValidatedOrder,
        entry: &mut OrderEntry,
        fill: &BrokerFill,
    ) -> Result<(), TradingError> {
        match order.action.open_side() {
            Some(side) => self.open_position(request, order, side.into(), fill).await?,
            None => {
                let ticket = order.ticket.unwrap_or(fill.ticket);
                self.close_position(&request.request_id, ticket, fill).await?;
            }
        }

        entry.position_applied = true;
        entry.updated_at = UtcDateTime::now();
        self.ledger
            .update_order(entry, None)
            .await
            .map_err(TradingError::LedgerWriteFailed)
    }

    async fn open_position(
        &self,
        request: &OrderRequest,
        order: &ValidatedOrder,
        side: PositionSide,
        fill: &BrokerFill,
    ) -> Result<(), TradingError> {
        let existing = self
            .ledger
            .find_position_by_ticket(fill.ticket)
            .await
            .map_err(TradingError::LedgerReadFailed)?;
        if existing.is_some_and(|p| p.has_applied(&request.request_id)) {
            return Ok(());
        }

        let position = Position::open(
            &request.request_id,
            order.symbol.clone(),
            side,
            fill,
            order.take_profit,
            order.stop_loss,
        );
        self.ledger
            .insert_position(&position)
            .await
            .map_err(TradingError::LedgerWriteFailed)?;
        Ok(())
    }

    /// Optimistic read-modify-write with bounded retries.
    async fn close_position(
        &self,
        request_id: &str,
        ticket: u64,
        fill: &BrokerFill,
    ) -> Result<(), TradingError> {
        let attempts = self.settings.position_retry_limit.max(1);
        for attempt in 1..=attempts {
            let Some(mut position) = self
                .ledger
                .find_position_by_ticket(ticket)
                .await
                .map_err(TradingError::LedgerReadFailed)?
            else {
                return Err(TradingError::LedgerReadFailed(StoreError::corrupt(format!(
                    "position for ticket {ticket} disappeared"
                ))));
            };
            if position.has_applied(request_id) {
                return Ok(());
            }

            let expected = position.version;
            match position.apply_close(request_id, fill) {
                Ok(()) => {}
                Err(err @ PositionError::AlreadyClosed { .. }) => {
                    warn!(ticket, error = %err, "close fill arrived for a closed position");
                    return Ok(());
                }
                Err(err) => {
                    return Err(TradingError::LedgerWriteFailed(StoreError::corrupt(
                        err.to_string(),
                    )))
                }
            }

            let written = self
                .ledger
                .update_position(&position, expected)
                .await
                .map_err(TradingError::LedgerWriteFailed)?;
            if written {
                return Ok(());
            }
            debug!(ticket, attempt, "position version moved; re-reading");
        }
        Err(TradingError::Conflict { ticket, attempts })
    }
}
