use std::sync::Arc;

use ferrotrade_core::Warehouse;
use ferrotrade_trading::{KillSwitchStore, WarehouseStore};
use serde_json::json;

use crate::cli::{KillSwitchArgs, KillSwitchCommand};
use crate::error::CliError;

use super::CommandOutput;

pub async fn run(args: &KillSwitchArgs, warehouse: &Warehouse) -> Result<CommandOutput, CliError> {
    let store = KillSwitchStore::new(Arc::new(WarehouseStore::new(warehouse.clone())));

    let data = match &args.command {
        KillSwitchCommand::Status => {
            let record = store.status_detail().await?;
            json!({
                "trading_blocked": store.is_active().await,
                "record": record,
            })
        }
        KillSwitchCommand::On { reason, actor } => {
            serde_json::to_value(store.activate(reason, actor).await?)?
        }
        KillSwitchCommand::Off { actor } => serde_json::to_value(store.deactivate(actor).await?)?,
    };
    Ok(CommandOutput::ok(data))
}
