//! Runtime configuration.
//!
//! Everything here is a single TOML file loaded at process startup: traded
//! symbols and their underlyings, per-underlying contract specs, capital,
//! Symbol Machine tunables, the market-hours session window, brokerage
//! model, and ambient logging/metrics settings. There is no compile-time
//! feature-flag tier — every value here is a runtime decision, not a
//! hot-path constant.
//!
//! ```toml
//! capital = "20000"
//!
//! [[symbols]]
//! sym = "NIFTY24JUN18000CE"
//! underlying = "NIFTY"
//!
//! [instruments.NIFTY]
//! lot_size = 75
//! tick_size = "0.05"
//!
//! [missing_price_policy]
//! kind = "fail"
//!
//! [machine]
//! entry_offset = "0.5"
//! exit_offset = "0.5"
//! stop_loss_points = "0.5"
//! window_ms = 60000
//!
//! [market_hours]
//! tz = "Asia/Kolkata"
//! open = "09:15:00"
//! close = "15:30:00"
//! market_days = ["monday", "tuesday", "wednesday", "thursday", "friday"]
//! market_holidays = ["2024-01-26"]
//!
//! [brokerage]
//! kind = "per_trade_rate"
//! rate = "0.001"
//! ```
//!
//! Loading with [`Config::load`] deserializes via `toml` and then runs
//! [`Config::validate`], which accumulates every problem found rather than
//! failing on the first one.

pub mod profiles;
pub mod types;

pub use profiles::{ConfigProfile, ProfileName};
pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate().context("configuration failed validation")?;
        Ok(config)
    }

    pub fn load_default() -> Result<Self> {
        Self::load("config/default.toml")
    }

    /// Validates every field together rather than bailing on the first
    /// problem, so a misconfigured file reports everything wrong with it
    /// in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.capital <= rust_decimal::Decimal::ZERO {
            errors.push("capital must be positive".to_string());
        }

        for symbol in &self.symbols {
            if !self.instruments.contains_key(&symbol.underlying) {
                errors.push(format!(
                    "symbol {} references unknown underlying {}",
                    symbol.sym, symbol.underlying
                ));
            }
        }

        for (underlying, spec) in &self.instruments {
            if spec.lot_size <= 0 {
                errors.push(format!("instrument {underlying}: lot_size must be positive"));
            }
            if spec.tick_size <= rust_decimal::Decimal::ZERO {
                errors.push(format!("instrument {underlying}: tick_size must be positive"));
            }
        }

        if self.machine.entry_offset < rust_decimal::Decimal::ZERO {
            errors.push("machine.entry_offset must not be negative".to_string());
        }
        if self.machine.exit_offset < rust_decimal::Decimal::ZERO {
            errors.push("machine.exit_offset must not be negative".to_string());
        }
        if self.machine.stop_loss_points <= rust_decimal::Decimal::ZERO {
            errors.push("machine.stop_loss_points must be positive".to_string());
        }
        if self.machine.window_ms <= 0 {
            errors.push("machine.window_ms must be positive".to_string());
        }
        if let Some(ttl) = self.machine.entry_ttl_ms {
            if ttl <= 0 {
                errors.push("machine.entry_ttl_ms must be positive when set".to_string());
            }
        }

        if self.market_hours.tz.parse::<chrono_tz::Tz>().is_err() {
            errors.push(format!("market_hours.tz '{}' is not a known timezone", self.market_hours.tz));
        }
        if chrono::NaiveTime::parse_from_str(&self.market_hours.open, "%H:%M:%S").is_err() {
            errors.push(format!("market_hours.open '{}' is not HH:MM:SS", self.market_hours.open));
        }
        if chrono::NaiveTime::parse_from_str(&self.market_hours.close, "%H:%M:%S").is_err() {
            errors.push(format!("market_hours.close '{}' is not HH:MM:SS", self.market_hours.close));
        }
        if self.market_hours.market_days.is_empty() {
            errors.push("market_hours.market_days must not be empty".to_string());
        }
        for day in &self.market_hours.market_days {
            if crate::market_hours::parse_weekday(day).is_none() {
                errors.push(format!("market_hours.market_days entry '{day}' is not a weekday name"));
            }
        }
        for holiday in &self.market_hours.market_holidays {
            if chrono::NaiveDate::parse_from_str(holiday, "%Y-%m-%d").is_err() {
                errors.push(format!("market_hours.market_holidays entry '{holiday}' is not YYYY-MM-DD"));
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.metrics.log_level.as_str()) {
            errors.push(format!(
                "invalid log level '{}', must be one of: {:?}",
                self.metrics.log_level, valid_log_levels
            ));
        }

        if !errors.is_empty() {
            anyhow::bail!(crate::core::ConfigError(errors));
        }
        Ok(())
    }

    /// The gate built from this config's `market_hours` section. Assumes
    /// `validate` already confirmed the timezone and times parse.
    pub fn market_hours_gate(&self) -> crate::market_hours::MarketHoursGate {
        let tz: chrono_tz::Tz = self.market_hours.tz.parse().expect("validated at load time");
        let open = chrono::NaiveTime::parse_from_str(&self.market_hours.open, "%H:%M:%S").expect("validated at load time");
        let close = chrono::NaiveTime::parse_from_str(&self.market_hours.close, "%H:%M:%S").expect("validated at load time");
        let market_days = self
            .market_hours
            .market_days
            .iter()
            .map(|d| crate::market_hours::parse_weekday(d).expect("validated at load time"))
            .collect();
        let holidays = self
            .market_hours
            .market_holidays
            .iter()
            .map(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").expect("validated at load time"))
            .collect();
        crate::market_hours::MarketHoursGate::new(
            tz,
            open,
            close,
            market_days,
            holidays,
            self.market_hours.force_open,
            self.market_hours.force_closed,
        )
    }

    /// Builds the `SizingService` inputs (`Sym -> underlying`, `underlying
    /// -> InstrumentSpec`) from this config's `symbols`/`instruments`
    /// sections.
    pub fn sizing_maps(&self) -> (std::collections::HashMap<crate::core::Sym, String>, std::collections::HashMap<String, crate::sizing::InstrumentSpec>) {
        let underlying_of = self
            .symbols
            .iter()
            .map(|s| (crate::core::Sym::from(s.sym.as_str()), s.underlying.clone()))
            .collect();
        let specs = self
            .instruments
            .iter()
            .map(|(underlying, spec)| {
                (underlying.clone(), crate::sizing::InstrumentSpec { lot_size: spec.lot_size, tick_size: spec.tick_size })
            })
            .collect();
        (underlying_of, specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_profile_round_trips_through_toml() {
        let config = ConfigProfile::development();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.capital, config.capital);
    }

    #[test]
    fn validate_rejects_symbol_with_unknown_underlying() {
        let mut config = ConfigProfile::development();
        config.symbols.push(types::SymbolConfig { sym: "XYZ".to_string(), underlying: "NOPE".to_string() });
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_positive_capital() {
        let mut config = ConfigProfile::development();
        config.capital = rust_decimal::Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_timezone() {
        let mut config = ConfigProfile::development();
        config.market_hours.tz = "Not/AZone".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_market_day_name() {
        let mut config = ConfigProfile::development();
        config.market_hours.market_days.push("someday".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_malformed_holiday_date() {
        let mut config = ConfigProfile::development();
        config.market_hours.market_holidays.push("26-01-2024".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn market_hours_gate_builds_from_valid_config() {
        let config = ConfigProfile::development();
        let gate = config.market_hours_gate();
        // 2024-06-05 10:00 IST, a Wednesday within session.
        let ist_ms = chrono::DateTime::parse_from_rfc3339("2024-06-05T10:00:00+05:30").unwrap().timestamp_millis();
        assert!(gate.is_open(ist_ms));
    }

    #[test]
    fn load_reads_and_validates_a_toml_file_on_disk() {
        let config = ConfigProfile::development();
        let toml_str = toml::to_string(&config).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, toml_str).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.capital, config.capital);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(&missing).is_err());
    }
}
