//! Data model for the paper broker: order intents, positions, fills, trade
//! log entries, and the two brokerage rules the source uses.

use crate::core::{OrderId, OrderStatus, Side, Sym};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the Symbol Machine asked the broker to do, with the tag recording
/// which rule produced it (audit trail).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub sym: Sym,
    pub side: Side,
    pub qty: i64,
    pub limit_price: Decimal,
    pub tag: &'static str,
}

pub(super) struct RestingOrder {
    pub intent: OrderIntent,
    pub status: OrderStatus,
}

/// Per-instrument open position. `qty = 0 ⇒ avg_price = 0` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub qty: i64,
    pub avg_price: Decimal,
    pub realized_gross: Decimal,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.qty == 0
    }

    /// Long-only path: extends or opens a long. Covering a short (not
    /// exercised by this state machine, kept for a total implementation)
    /// resets the average to the fill price once the short side is gone.
    pub(super) fn apply_buy(&mut self, fill_qty: i64, price: Decimal) {
        let new_qty = self.qty + fill_qty;
        if new_qty == 0 {
            self.avg_price = Decimal::ZERO;
        } else if self.qty >= 0 {
            self.avg_price = (self.avg_price * Decimal::from(self.qty)
                + price * Decimal::from(fill_qty))
                / Decimal::from(new_qty);
        } else {
            self.avg_price = price;
        }
        self.qty = new_qty;
    }

    /// Closes against the long first; returns `(realized_delta, closed_qty)`.
    /// Any residual beyond the open long opens/extends a short — the
    /// long-only machine never produces a residual, since it never sells
    /// more than `open_qty(sym)`.
    pub(super) fn apply_sell(&mut self, fill_qty: i64, price: Decimal) -> (Decimal, i64) {
        let closed = fill_qty.min(self.qty.max(0));
        let realized = (price - self.avg_price) * Decimal::from(closed);
        self.realized_gross += realized;
        self.qty -= fill_qty;
        if self.qty == 0 {
            self.avg_price = Decimal::ZERO;
        } else if self.qty < 0 {
            self.avg_price = price;
        }
        (realized, closed)
    }
}

/// One completed fill, appended to the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeLogEntry {
    pub ts_ms: i64,
    pub sym: Sym,
    pub side: Side,
    pub qty: i64,
    pub price: Decimal,
    pub realized_delta: Decimal,
    pub brokerage_delta: Decimal,
    pub tag: &'static str,
}

/// Chosen once at configuration time (brokerage rule is decided, not
/// mixed per trade).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rate")]
pub enum BrokeragePolicy {
    /// `-rate * notional_closed`, charged on the closing portion of every
    /// SELL against a long. This is the default: brokerage applies to all
    /// exits, not only profitable ones.
    PerTradeRate(Decimal),
    /// `-rate * max(0, gross_realized_total)`, charged globally against
    /// accumulated gross realized P&L rather than per trade.
    GrossRealizedRate(Decimal),
}

/// Point-in-time P&L summary returned by [`super::PaperBroker::pnl`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PnlSnapshot {
    pub realized_net: Decimal,
    pub unrealized: Decimal,
    pub total: Decimal,
    pub brokerage: Decimal,
    pub gross_realized: Decimal,
    pub by_sym: HashMap<Sym, Decimal>,
}

/// Outcome of [`super::PaperBroker::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotPending,
}
