//! Pre-built configuration profiles for local development, staging
//! rehearsal, and production.

use super::types::*;
use crate::broker::BrokeragePolicy;
use crate::registry::MissingPricePolicy;
use rust_decimal_macros::dec;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileName {
    Development,
    Staging,
    Production,
}

impl ProfileName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Some(Self::Development),
            "staging" | "stage" => Some(Self::Staging),
            "prod" | "production" => Some(Self::Production),
            _ => None,
        }
    }
}

pub struct ConfigProfile;

impl ConfigProfile {
    /// One NIFTY symbol, relaxed capital, verbose logging, no entry TTL.
    pub fn development() -> Config {
        let mut instruments = HashMap::new();
        instruments.insert("NIFTY".to_string(), InstrumentSpecConfig { lot_size: 75, tick_size: dec!(0.05) });

        Config {
            capital: dec!(20000),
            symbols: vec![SymbolConfig { sym: "NIFTY24JUN18000CE".to_string(), underlying: "NIFTY".to_string() }],
            instruments,
            missing_price_policy: MissingPricePolicy::UseSeed,
            machine: MachineParamsConfig {
                entry_offset: dec!(0.5),
                exit_offset: dec!(0.5),
                stop_loss_points: dec!(0.5),
                window_ms: crate::machine::WINDOW_MS,
                entry_ttl_ms: None,
            },
            market_hours: MarketHoursConfig {
                tz: "Asia/Kolkata".to_string(),
                open: "09:15:00".to_string(),
                close: "15:30:00".to_string(),
                market_days: vec![
                    "monday".to_string(),
                    "tuesday".to_string(),
                    "wednesday".to_string(),
                    "thursday".to_string(),
                    "friday".to_string(),
                ],
                market_holidays: Vec::new(),
                force_open: false,
                force_closed: false,
            },
            allow_after_hours: false,
            brokerage: BrokeragePolicy::PerTradeRate(dec!(0.001)),
            metrics: MetricsConfig { log_level: "debug".to_string(), json_logs: false },
        }
    }

    /// Same instruments as development, structured logs, entry TTL armed.
    pub fn staging() -> Config {
        let mut config = Self::development();
        config.missing_price_policy = MissingPricePolicy::Fail;
        config.machine.entry_ttl_ms = Some(30_000);
        config.metrics = MetricsConfig { log_level: "info".to_string(), json_logs: true };
        config
    }

    /// Strict defaults for live trading: fail closed on missing price data,
    /// warn-level structured logging.
    pub fn production() -> Config {
        let mut config = Self::staging();
        config.metrics = MetricsConfig { log_level: "warn".to_string(), json_logs: true };
        config
    }

    pub fn load(profile: ProfileName) -> Config {
        match profile {
            ProfileName::Development => Self::development(),
            ProfileName::Staging => Self::staging(),
            ProfileName::Production => Self::production(),
        }
    }

    /// Picks a profile from the `TRADER_PROFILE` environment variable,
    /// defaulting to development.
    pub fn from_env() -> Config {
        let profile = std::env::var("TRADER_PROFILE")
            .ok()
            .and_then(|s| ProfileName::from_str(&s))
            .unwrap_or(ProfileName::Development);
        Self::load(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_name_from_str() {
        assert_eq!(ProfileName::from_str("dev"), Some(ProfileName::Development));
        assert_eq!(ProfileName::from_str("staging"), Some(ProfileName::Staging));
        assert_eq!(ProfileName::from_str("production"), Some(ProfileName::Production));
        assert_eq!(ProfileName::from_str("invalid"), None);
    }

    #[test]
    fn every_profile_validates() {
        assert!(ConfigProfile::development().validate().is_ok());
        assert!(ConfigProfile::staging().validate().is_ok());
        assert!(ConfigProfile::production().validate().is_ok());
    }

    #[test]
    fn staging_arms_entry_ttl_and_fails_closed() {
        let config = ConfigProfile::staging();
        assert_eq!(config.machine.entry_ttl_ms, Some(30_000));
        assert_eq!(config.missing_price_policy, MissingPricePolicy::Fail);
    }
}
