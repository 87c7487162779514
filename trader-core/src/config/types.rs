use crate::broker::BrokeragePolicy;
use crate::machine::MachineConfig;
use crate::registry::MissingPricePolicy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main configuration structure, loaded from a single TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capital: Decimal,
    pub symbols: Vec<SymbolConfig>,
    pub instruments: HashMap<String, InstrumentSpecConfig>,
    #[serde(default)]
    pub missing_price_policy: MissingPricePolicy,
    pub machine: MachineParamsConfig,
    pub market_hours: MarketHoursConfig,
    /// Bypasses the market-hours gate entirely when set; meant for
    /// replaying historical data outside the session window.
    #[serde(default)]
    pub allow_after_hours: bool,
    pub brokerage: BrokeragePolicy,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// One tradeable symbol and the underlying it resolves to for sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub sym: String,
    pub underlying: String,
}

/// Contract parameters for one underlying, as loaded from TOML.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InstrumentSpecConfig {
    pub lot_size: i64,
    pub tick_size: Decimal,
}

/// Window/offset tunables for the Symbol Machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineParamsConfig {
    pub entry_offset: Decimal,
    pub exit_offset: Decimal,
    pub stop_loss_points: Decimal,
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,
    #[serde(default)]
    pub entry_ttl_ms: Option<i64>,
}

fn default_window_ms() -> i64 {
    crate::machine::WINDOW_MS
}

impl From<&MachineParamsConfig> for MachineConfig {
    fn from(cfg: &MachineParamsConfig) -> Self {
        MachineConfig {
            entry_offset: cfg.entry_offset,
            exit_offset: cfg.exit_offset,
            stop_loss_points: cfg.stop_loss_points,
            window_ms: cfg.window_ms,
            entry_ttl_ms: cfg.entry_ttl_ms,
        }
    }
}

/// Session window, as loaded from TOML (`tz` is an IANA name, e.g.
/// `"Asia/Kolkata"`; `open`/`close` are `"HH:MM:SS"`; `market_days` are
/// weekday names, e.g. `"Monday"` or `"mon"`; `market_holidays` are
/// `"YYYY-MM-DD"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketHoursConfig {
    pub tz: String,
    pub open: String,
    pub close: String,
    #[serde(default = "default_market_days")]
    pub market_days: Vec<String>,
    #[serde(default)]
    pub market_holidays: Vec<String>,
    #[serde(default)]
    pub force_open: bool,
    #[serde(default)]
    pub force_closed: bool,
}

fn default_market_days() -> Vec<String> {
    ["monday", "tuesday", "wednesday", "thursday", "friday"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Logging and metrics-export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

