use std::sync::Arc;

use ferrotrade_core::{
    ArchiveSource, BarSeries, CacheStore, DataMeta, LiveFeedSource, MarketDataProvider,
    PaperBroker, SourceStatsSnapshot, TieredCache, Warehouse, WebFeedSource,
};
use serde::Serialize;

use crate::cli::DataArgs;
use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct DataOutput<'a> {
    meta: &'a DataMeta,
    data: Option<&'a BarSeries>,
    stats: Vec<SourceStatsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archived_partitions: Option<usize>,
}

/// Live is the paper broker, cache is process-local, archive is the
/// warehouse, fallback is the public web feed.
pub async fn run(
    args: &DataArgs,
    config: &ferrotrade_core::AppConfig,
    warehouse: &Warehouse,
) -> Result<CommandOutput, CliError> {
    let provider_config = config.provider.clone();
    let cache = Arc::new(TieredCache::new(
        Arc::new(CacheStore::new()),
        provider_config.cache_ttl(),
        provider_config.cache_window(),
    ));
    let archive = Arc::new(ArchiveSource::new(Arc::new(warehouse.clone())));

    let provider = MarketDataProvider::builder()
        .live(Arc::new(LiveFeedSource::new(Arc::new(PaperBroker::new()))))
        .cache(cache)
        .archive(archive.clone())
        .fallback(Arc::new(
            WebFeedSource::default().with_timeout_ms(provider_config.fallback_http_timeout_ms()),
        ))
        .config(provider_config)
        .build();

    let response = provider
        .get_data(
            &args.symbol,
            &args.timeframe,
            args.period,
            &args.intent,
            args.source.as_deref(),
        )
        .await?;

    let archived_partitions = match (&response.data, args.archive) {
        (Some(series), true) if !series.is_empty() => Some(archive.store(series).await?.len()),
        _ => None,
    };

    let failure = match &response.data {
        Some(series) if !series.is_empty() => None,
        _ => Some(CliError::EmptyResult(
            response
                .meta
                .error
                .clone()
                .unwrap_or_else(|| format!("no bars for {}", args.symbol)),
        )),
    };

    let output = DataOutput {
        meta: &response.meta,
        data: response.data.as_ref(),
        stats: provider.stats().snapshot_all(),
        archived_partitions,
    };
    Ok(CommandOutput::ok(serde_json::to_value(output)?).with_failure(failure))
}
