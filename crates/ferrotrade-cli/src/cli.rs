//! CLI argument definitions for ferrotrade.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `data` | Fetch bars through the unified market data provider |
//! | `kill-switch` | Inspect or flip the global trading gate |
//! | `order` | Submit, process and inspect orders |
//! | `archive` | List or re-index cold archive partitions |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$FERROTRADE_HOME/config.toml` | Configuration file |
//! | `--log-level` | `info` | `EnvFilter` directive for stderr logs |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! ferrotrade data EURUSD --timeframe H1 --period 1 --intent TRADING
//! ferrotrade kill-switch on --reason "news window" --actor ops
//! ferrotrade order submit --symbol EURUSD --action BUY --lot-size 0.1
//! ferrotrade order process --once
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;

/// Ferrotrade - market data routing and order pipeline operator tool
#[derive(Debug, Parser)]
#[command(
    name = "ferrotrade",
    author,
    version,
    about = "Market data routing and order pipeline operator tool"
)]
pub struct Cli {
    /// Configuration file; must exist when given.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `ferrotrade_trading=trace`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch bars for a symbol with intent-driven source selection.
    ///
    /// Prints the bars, the response metadata and per-source counters.
    ///
    /// # Examples
    ///
    ///   ferrotrade data EURUSD --timeframe H1 --period 1 --intent TRADING
    ///   ferrotrade data XAUUSD --timeframe D1 --period 30 --intent ANALYSIS --source archive
    Data(DataArgs),

    /// Global kill switch.
    #[command(name = "kill-switch")]
    KillSwitch(KillSwitchArgs),

    /// Order queue and ledger.
    Order(OrderArgs),

    /// Cold archive.
    Archive(ArchiveArgs),
}

#[derive(Debug, Args)]
pub struct DataArgs {
    /// Instrument symbol, e.g. EURUSD.
    pub symbol: String,

    /// Bar timeframe: M1, M5, M15, M30, H1, H4, D1 or W1.
    #[arg(long, default_value = "H1")]
    pub timeframe: String,

    /// Lookback in whole days.
    #[arg(long, default_value_t = 1)]
    pub period: i64,

    /// TRADING, CHART or ANALYSIS.
    #[arg(long, default_value = "TRADING")]
    pub intent: String,

    /// Bypass the plan and read one source: live, cache, archive or web.
    #[arg(long)]
    pub source: Option<String>,

    /// Persist the served bars into the cold archive.
    #[arg(long, default_value_t = false)]
    pub archive: bool,
}

#[derive(Debug, Args)]
pub struct KillSwitchArgs {
    #[command(subcommand)]
    pub command: KillSwitchCommand,
}

#[derive(Debug, Subcommand)]
pub enum KillSwitchCommand {
    /// Show the stored record and whether trading is blocked.
    Status,

    /// Block all order submissions.
    On {
        #[arg(long)]
        reason: String,
        #[arg(long)]
        actor: String,
    },

    /// Allow order submissions.
    Off {
        #[arg(long)]
        actor: String,
    },
}

#[derive(Debug, Args)]
pub struct OrderArgs {
    #[command(subcommand)]
    pub command: OrderCommand,
}

#[derive(Debug, Subcommand)]
pub enum OrderCommand {
    /// Validate an order and put it on the queue.
    Submit(SubmitArgs),

    /// Drain the queue against the paper broker.
    Process {
        /// Process one batch and exit instead of polling until Ctrl-C.
        #[arg(long, default_value_t = false)]
        once: bool,
    },

    /// Print the ledger record and audit trail of a request.
    Show {
        request_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum ActionArg {
    Buy,
    Sell,
    Close,
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    #[arg(long)]
    pub symbol: String,

    #[arg(long, value_enum, ignore_case = true)]
    pub action: ActionArg,

    #[arg(long)]
    pub lot_size: Decimal,

    #[arg(long)]
    pub tp: Option<Decimal>,

    #[arg(long)]
    pub sl: Option<Decimal>,

    /// Broker ticket of the position to close.
    #[arg(long)]
    pub ticket: Option<u64>,

    #[arg(long)]
    pub comment: Option<String>,

    /// Defaults to a fresh UUID.
    #[arg(long)]
    pub request_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct ArchiveArgs {
    #[command(subcommand)]
    pub command: ArchiveCommand,
}

#[derive(Debug, Subcommand)]
pub enum ArchiveCommand {
    /// List partitions of one symbol and timeframe.
    List { symbol: String, timeframe: String },

    /// Rebuild the partition manifest from the parquet files on disk.
    Sync,
}
