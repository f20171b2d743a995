mod archive;
mod data;
mod kill_switch;
mod order;

use ferrotrade_core::{AppConfig, Warehouse};
use serde_json::Value;
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Printed `data` plus an optional failure that sets the exit code after
/// printing.
pub struct CommandOutput {
    pub data: Value,
    pub failure: Option<CliError>,
}

impl CommandOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            failure: None,
        }
    }

    pub fn with_failure(mut self, failure: Option<CliError>) -> Self {
        self.failure = failure;
        self
    }
}

pub async fn run(cli: &Cli, config: &AppConfig) -> Result<CommandOutput, CliError> {
    match &cli.command {
        Command::Data(args) => data::run(args, config, &open_warehouse(config)?).await,
        Command::KillSwitch(args) => kill_switch::run(args, &open_warehouse(config)?).await,
        Command::Order(args) => order::run(args, config, &open_warehouse(config)?).await,
        Command::Archive(args) => archive::run(args, &open_warehouse(config)?).await,
    }
}

fn open_warehouse(config: &AppConfig) -> Result<Warehouse, CliError> {
    let warehouse_config = config.warehouse_config();
    debug!(db = %warehouse_config.db_path.display(), "opening warehouse");
    Ok(Warehouse::open(warehouse_config)?)
}
