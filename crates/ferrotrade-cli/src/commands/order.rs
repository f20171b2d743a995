use std::sync::Arc;

use ferrotrade_core::{AppConfig, BrokerPosition, OrderSide, PaperBroker, Warehouse};
use ferrotrade_trading::{
    KillSwitchStore, OrderAction, OrderLedger, OrderLimits, OrderProcessor, OrderProducer,
    OrderQueue, OrderRequest, Position, PositionSide, PositionStatus, ProcessorSettings,
    WarehouseStore,
};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::{ActionArg, OrderArgs, OrderCommand, SubmitArgs};
use crate::error::CliError;

use super::CommandOutput;

pub async fn run(
    args: &OrderArgs,
    config: &AppConfig,
    warehouse: &Warehouse,
) -> Result<CommandOutput, CliError> {
    let store = Arc::new(WarehouseStore::new(warehouse.clone()));
    let limits = OrderLimits::from(&config.trading);

    let data = match &args.command {
        OrderCommand::Submit(submit) => {
            let request = to_request(submit);
            let message_id = OrderProducer::new(store, limits).submit(&request).await?;
            json!({
                "request_id": request.request_id,
                "idempotency_key": request.idempotency_key(),
                "message_id": message_id,
            })
        }
        OrderCommand::Process { once } => process(config, store, limits, *once).await?,
        OrderCommand::Show { request_id } => {
            let Some(order) = store.find_order_by_request_id(request_id).await? else {
                return Err(CliError::NotFound(format!("no order with request_id '{request_id}'")));
            };
            let events = store.order_events(&order.idempotency_key).await?;
            json!({ "order": order, "events": events })
        }
    };
    Ok(CommandOutput::ok(data))
}

fn to_request(args: &SubmitArgs) -> OrderRequest {
    let action = match args.action {
        ActionArg::Buy => OrderAction::Buy,
        ActionArg::Sell => OrderAction::Sell,
        ActionArg::Close => OrderAction::Close,
    };
    let request_id = args
        .request_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut request = OrderRequest::new(request_id, args.symbol.as_str(), action, args.lot_size)
        .with_targets(args.tp, args.sl);
    request.mt5_ticket = args.ticket;
    request.comment.clone_from(&args.comment);
    request.submitted_at = Some(ferrotrade_core::UtcDateTime::now());
    request
}

async fn process(
    config: &AppConfig,
    store: Arc<WarehouseStore>,
    limits: OrderLimits,
    once: bool,
) -> Result<serde_json::Value, CliError> {
    let broker = Arc::new(PaperBroker::new());
    seed_paper_broker(&*store, &broker).await?;

    let processor = OrderProcessor::new(
        store.clone(),
        store.clone(),
        broker,
        KillSwitchStore::new(store.clone()),
    )
    .with_limits(limits)
    .with_settings(ProcessorSettings::from(&config.trading));

    let report = if once {
        processor.process_batch().await?
    } else {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received; stopping after the current batch"),
                Err(err) => warn!(error = %err, "cannot listen for interrupt; stopping"),
            }
            let _ = tx.send(true);
        });
        processor.run(rx).await
    };

    let warehouse = store.warehouse().clone();
    let status_counts = tokio::task::spawn_blocking(move || warehouse.order_status_counts())
        .await
        .map_err(|error| CliError::Io(std::io::Error::other(error.to_string())))??;
    let status_counts: serde_json::Map<String, serde_json::Value> = status_counts
        .into_iter()
        .map(|(status, count)| (status, json!(count)))
        .collect();

    Ok(json!({
        "report": report,
        "queue_depth": store.depth().await?,
        "order_status_counts": status_counts,
    }))
}

/// Open ledger positions become paper-broker positions so closes can be
/// filled; tickets of closed ones stay reserved.
async fn seed_paper_broker<L>(ledger: &L, broker: &PaperBroker) -> Result<(), CliError>
where
    L: OrderLedger + ?Sized,
{
    for position in ledger.list_positions(false).await? {
        if position.status == PositionStatus::Closed {
            broker.reserve_tickets_through(position.broker_ticket);
        } else {
            broker.seed_position(to_broker_position(&position));
        }
    }
    Ok(())
}

fn to_broker_position(position: &Position) -> BrokerPosition {
    let current_price = position.current_price.unwrap_or(position.entry_price);
    BrokerPosition {
        ticket: position.broker_ticket,
        symbol: position.symbol.clone(),
        side: match position.side {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        },
        volume: position.size,
        open_price: position.entry_price,
        current_price,
        stop_loss: position.stop_loss,
        take_profit: position.take_profit,
        profit: position.unrealized_pnl,
        opened_at: position.created_at,
    }
}
