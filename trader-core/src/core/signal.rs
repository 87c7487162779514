//! The external alerting system's BUY/SELL signal.

use super::types::{Side, Sym};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A discrete entry/exit instruction from the upstream alerting system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub sym: Sym,
    pub side: Side,
    pub ts_ms: i64,
    pub at_price: Decimal,
    pub reason: Option<String>,
}

impl Signal {
    pub fn new(sym: Sym, side: Side, ts_ms: i64, at_price: Decimal) -> Self {
        Self {
            sym,
            side,
            ts_ms,
            at_price,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn builder_sets_reason() {
        let sig = Signal::new(Sym::from("NIFTY"), Side::Buy, 0, dec!(100.00))
            .with_reason("Accepted Entry");
        assert_eq!(sig.reason.as_deref(), Some("Accepted Entry"));
    }
}
