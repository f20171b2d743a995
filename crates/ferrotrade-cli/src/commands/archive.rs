use std::sync::Arc;

use ferrotrade_core::{ArchiveSource, Symbol, Timeframe, Warehouse};

use crate::cli::{ArchiveArgs, ArchiveCommand};
use crate::error::CliError;

use super::CommandOutput;

pub async fn run(args: &ArchiveArgs, warehouse: &Warehouse) -> Result<CommandOutput, CliError> {
    let data = match &args.command {
        ArchiveCommand::List { symbol, timeframe } => {
            let symbol = Symbol::parse(symbol)?;
            let timeframe = timeframe.parse::<Timeframe>()?;
            let source = ArchiveSource::new(Arc::new(warehouse.clone()));
            serde_json::to_value(source.list_partitions(&symbol, timeframe).await?)?
        }
        ArchiveCommand::Sync => {
            let warehouse = warehouse.clone();
            let report = tokio::task::spawn_blocking(move || warehouse.sync_archive_manifest())
                .await
                .map_err(|error| CliError::Io(std::io::Error::other(error.to_string())))??;
            serde_json::to_value(report)?
        }
    };
    Ok(CommandOutput::ok(data))
}
