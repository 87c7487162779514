//! Fundamental domain types and errors shared by every component:
//! the opaque instrument key, order/side/status enums, the upstream
//! `Signal`, and the error taxonomy.

pub mod errors;
pub mod signal;
pub mod types;

pub use errors::{BrokerError, ConfigError, SignalError};
pub use signal::Signal;
pub use types::{round_to_tick, OrderId, OrderStatus, Side, Sym};
