//! Position / Sizing Service: derives entry quantity from a
//! capital budget, a lot size, and price, reusing the open quantity on
//! no-flip exits and scale-ups.
//!
//! Lot size and tick size are keyed by *underlying*, not by the opaque
//! `Sym` itself — option symbols encode far more than the underlying
//! (strike, expiry, option type), and parsing that out of the string is
//! explicitly out of scope. Both the `Sym → underlying` map and the
//! `underlying → InstrumentSpec` map are supplied as configuration.

use crate::core::{ConfigError, Sym};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Contract parameters for one underlying.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub lot_size: i64,
    pub tick_size: Decimal,
}

/// Resolves entry quantities and per-instrument tick increments from
/// injected configuration; never parses `Sym`.
pub struct SizingService {
    capital: Decimal,
    underlying_of: HashMap<Sym, String>,
    specs: HashMap<String, InstrumentSpec>,
}

impl SizingService {
    pub fn new(
        capital: Decimal,
        underlying_of: HashMap<Sym, String>,
        specs: HashMap<String, InstrumentSpec>,
    ) -> Result<Self, ConfigError> {
        if capital <= Decimal::ZERO {
            return Err(ConfigError::single("capital must be positive"));
        }
        let mut errors = Vec::new();
        for (sym, underlying) in &underlying_of {
            if !specs.contains_key(underlying) {
                errors.push(format!(
                    "no instrument spec for underlying {underlying} (sym {sym})"
                ));
            }
        }
        if !errors.is_empty() {
            return Err(ConfigError(errors));
        }
        Ok(Self {
            capital,
            underlying_of,
            specs,
        })
    }

    pub fn underlying_of(&self, sym: &Sym) -> Option<&str> {
        self.underlying_of.get(sym).map(String::as_str)
    }

    pub fn spec_for(&self, sym: &Sym) -> Result<InstrumentSpec, ConfigError> {
        let underlying = self
            .underlying_of(sym)
            .ok_or_else(|| ConfigError::single(format!("no underlying configured for {sym}")))?;
        self.specs
            .get(underlying)
            .copied()
            .ok_or_else(|| ConfigError::single(format!("no instrument spec for underlying {underlying}")))
    }

    pub fn tick_size(&self, sym: &Sym) -> Result<Decimal, ConfigError> {
        self.spec_for(sym).map(|s| s.tick_size)
    }

    /// `qty_for_entry`: reuse the open quantity on no-flip
    /// exits/scale-ups; otherwise size from capital, lot size, and price.
    pub fn qty_for_entry(&self, sym: &Sym, open_qty: i64, price: Decimal) -> Result<i64, ConfigError> {
        if open_qty != 0 {
            return Ok(open_qty.abs());
        }
        let spec = self.spec_for(sym)?;
        if price <= Decimal::ZERO {
            return Err(ConfigError::single(format!("non-positive price for {sym}")));
        }
        let lots = (self.capital / (price * Decimal::from(spec.lot_size)))
            .floor()
            .max(Decimal::ONE);
        let lots: i64 = lots.try_into().unwrap_or(1);
        Ok(lots.max(1) * spec.lot_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sizing() -> SizingService {
        let mut underlying_of = HashMap::new();
        underlying_of.insert(Sym::from("NIFTY24JUN18000CE"), "NIFTY".to_string());
        let mut specs = HashMap::new();
        specs.insert(
            "NIFTY".to_string(),
            InstrumentSpec {
                lot_size: 75,
                tick_size: dec!(0.05),
            },
        );
        SizingService::new(dec!(100000), underlying_of, specs).unwrap()
    }

    #[test]
    fn reuses_open_quantity_on_no_flip_exit() {
        let svc = sizing();
        let qty = svc
            .qty_for_entry(&Sym::from("NIFTY24JUN18000CE"), 75, dec!(120.00))
            .unwrap();
        assert_eq!(qty, 75);
    }

    #[test]
    fn sizes_from_capital_when_flat() {
        let svc = sizing();
        // 100000 / (120 * 75) = 11.11 lots -> floor 11 lots -> 825 qty
        let qty = svc
            .qty_for_entry(&Sym::from("NIFTY24JUN18000CE"), 0, dec!(120.00))
            .unwrap();
        assert_eq!(qty, 825);
    }

    #[test]
    fn always_at_least_one_lot() {
        let svc = sizing();
        let qty = svc
            .qty_for_entry(&Sym::from("NIFTY24JUN18000CE"), 0, dec!(5000.00))
            .unwrap();
        assert_eq!(qty, 75);
    }

    #[test]
    fn unknown_underlying_is_a_config_error() {
        let svc = sizing();
        let err = svc.qty_for_entry(&Sym::from("BANKNIFTY24JUN45000CE"), 0, dec!(100.00));
        assert!(err.is_err());
    }

    #[test]
    fn construction_rejects_missing_spec_for_mapped_underlying() {
        let mut underlying_of = HashMap::new();
        underlying_of.insert(Sym::from("XYZ"), "XYZ".to_string());
        let err = SizingService::new(dec!(100000), underlying_of, HashMap::new());
        assert!(err.is_err());
    }

    #[test]
    fn construction_rejects_non_positive_capital() {
        let err = SizingService::new(Decimal::ZERO, HashMap::new(), HashMap::new());
        assert!(err.is_err());
    }
}
