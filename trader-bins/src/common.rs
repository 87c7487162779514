//! Shared CLI plumbing for the `trader-live` and `trader-backtest` binaries.

use clap::Parser;

/// Arguments common to both binaries.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// Path to the runtime TOML config file.
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,

    /// Log level (overridden by `RUST_LOG` if set).
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit structured JSON logs instead of human-readable text.
    #[arg(long)]
    pub json_logs: bool,
}

pub fn init_logging(args: &CommonArgs) {
    trader_core::utils::logger::init_logger(&args.log_level, args.json_logs);
}
