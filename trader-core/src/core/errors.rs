//! The error taxonomy from the outer API boundary down to the broker.
//!
//! Each concern gets its own `thiserror`-derived enum; callers that don't
//! need to match on a specific variant propagate with `anyhow::Result` and
//! `?` instead.

use super::types::Sym;
use thiserror::Error;

/// Errors surfaced directly to the signal-intake caller. No state change
/// occurs in the machine when one of these is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("signal payload could not be parsed: {0}")]
    InvalidSignal(String),

    #[error("no lot size configured for underlying of {0}")]
    UnknownUnderlying(Sym),

    #[error("no price available for {sym} and missing_price_policy is fail")]
    NoPriceAvailable { sym: Sym },

    #[error("market is closed for {sym}")]
    MarketClosed { sym: Sym },
}

/// Errors from the paper broker (and, in live mode, the broker adapter).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker request failed transiently, retries exhausted: {0}")]
    Transient(String),

    #[error("broker request failed fatally: {0}")]
    Fatal(String),

    #[error("order {0} was not pending")]
    NotPending(super::types::OrderId),
}

/// Configuration validation failures. Accumulated, not fail-fast: every
/// problem found is reported together.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("configuration is invalid: {}", .0.join("; "))]
pub struct ConfigError(pub Vec<String>);

impl ConfigError {
    pub fn single(msg: impl Into<String>) -> Self {
        Self(vec![msg.into()])
    }
}
