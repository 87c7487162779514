//! Fundamental domain types shared across every component.
//!
//! `Sym` is an opaque instrument key: the core never parses it, only compares
//! it for byte-equality and uses it as a map key. Money and prices use
//! `rust_decimal::Decimal` throughout; quantities are signed `i64` lots.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque instrument identifier. Cloning is an `Arc` bump, not a string copy.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sym(Arc<str>);

impl Sym {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Sym {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for Sym {
    fn from(s: String) -> Self {
        Self(Arc::from(s.as_str()))
    }
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sym({})", self.0)
    }
}

/// Order side. The core is long-only: `Sell` never opens a short beyond
/// closing an existing long (see `Position::apply_fill`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub const fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Lifecycle of a resting limit order in the paper broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

/// Unique identifier for a placed order. Random 128-bit value, not derived
/// from any externally meaningful sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(u128);

impl OrderId {
    pub fn generate() -> Self {
        use rand::RngCore;
        Self(rand::thread_rng().next_u64() as u128)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Round `price` to the nearest multiple of `tick`, matching the venue's
/// minimum price increment (0.05 for option contracts, 0.01 otherwise).
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    debug_assert!(tick > Decimal::ZERO);
    (price / tick).round() * tick
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sym_equality_is_byte_equal() {
        let a: Sym = "NIFTY24JUN18000CE".into();
        let b: Sym = "NIFTY24JUN18000CE".into();
        assert_eq!(a, b);
        assert_ne!(a, Sym::from("OTHER"));
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn round_to_tick_two_decimals() {
        assert_eq!(round_to_tick(dec!(100.004), dec!(0.01)), dec!(100.00));
        assert_eq!(round_to_tick(dec!(100.50), dec!(0.01)), dec!(100.50));
    }

    #[test]
    fn round_to_tick_option_increment() {
        assert_eq!(round_to_tick(dec!(100.52), dec!(0.05)), dec!(100.50));
        assert_eq!(round_to_tick(dec!(100.53), dec!(0.05)), dec!(100.55));
    }

    #[test]
    fn order_id_is_unique() {
        let a = OrderId::generate();
        let b = OrderId::generate();
        assert_ne!(a, b);
    }
}
