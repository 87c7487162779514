//! Metrics registry: counters and gauges for operational visibility into
//! signal intake, window activity, order flow, and P&L, independent of any
//! specific exporter. Scraping this over HTTP is out of scope; the registry
//! itself and a [`TradingMetrics::snapshot`] read are the copy-out surface a
//! monitoring task on another thread polls.

use crate::broker::PaperBroker;
use crate::registry::MachineRegistry;
use prometheus::{Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use rust_decimal::Decimal;

/// Central registry for every metric this crate exposes.
pub struct TradingMetrics {
    registry: Registry,
    signals_accepted_total: IntCounter,
    signals_ignored_total: IntCounterVec,
    sell_windows_opened: IntGauge,
    buy_windows_opened: IntGauge,
    orders_placed: IntGauge,
    orders_filled: IntGauge,
    orders_cancelled: IntGauge,
    open_positions: IntGaugeVec,
    realized_pnl: Gauge,
    unrealized_pnl: Gauge,
    total_pnl: Gauge,
    brokerage: Gauge,
}

/// Plain copy-out of the registry's current values, for a caller that wants
/// the numbers without pulling in a Prometheus exposition-format encoder.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsSnapshot {
    pub signals_accepted_total: i64,
    pub sell_windows_opened: i64,
    pub buy_windows_opened: i64,
    pub orders_placed: i64,
    pub orders_filled: i64,
    pub orders_cancelled: i64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_pnl: f64,
}

impl TradingMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let signals_accepted_total = IntCounter::new(
            "trader_signals_accepted_total",
            "Total signals accepted and routed to a machine",
        )
        .expect("static metric descriptor");
        registry.register(Box::new(signals_accepted_total.clone())).expect("unique metric name");

        let signals_ignored_total = IntCounterVec::new(
            Opts::new("trader_signals_ignored_total", "Total signals ignored, by reason"),
            &["reason"],
        )
        .expect("static metric descriptor");
        registry.register(Box::new(signals_ignored_total.clone())).expect("unique metric name");

        let sell_windows_opened =
            IntGauge::new("trader_sell_windows_opened", "Cumulative SELL windows opened across all instruments")
                .expect("static metric descriptor");
        registry.register(Box::new(sell_windows_opened.clone())).expect("unique metric name");

        let buy_windows_opened =
            IntGauge::new("trader_buy_windows_opened", "Cumulative BUY windows opened across all instruments")
                .expect("static metric descriptor");
        registry.register(Box::new(buy_windows_opened.clone())).expect("unique metric name");

        let orders_placed = IntGauge::new("trader_orders_placed", "Total orders placed with the paper broker")
            .expect("static metric descriptor");
        registry.register(Box::new(orders_placed.clone())).expect("unique metric name");

        let orders_filled = IntGauge::new("trader_orders_filled", "Total orders filled")
            .expect("static metric descriptor");
        registry.register(Box::new(orders_filled.clone())).expect("unique metric name");

        let orders_cancelled = IntGauge::new("trader_orders_cancelled", "Total orders cancelled")
            .expect("static metric descriptor");
        registry.register(Box::new(orders_cancelled.clone())).expect("unique metric name");

        let open_positions = IntGaugeVec::new(
            Opts::new("trader_open_position_qty", "Current open quantity, by instrument"),
            &["sym"],
        )
        .expect("static metric descriptor");
        registry.register(Box::new(open_positions.clone())).expect("unique metric name");

        let realized_pnl = Gauge::new("trader_realized_pnl", "Net realized P&L").expect("static metric descriptor");
        registry.register(Box::new(realized_pnl.clone())).expect("unique metric name");

        let unrealized_pnl =
            Gauge::new("trader_unrealized_pnl", "Unrealized P&L on open positions").expect("static metric descriptor");
        registry.register(Box::new(unrealized_pnl.clone())).expect("unique metric name");

        let total_pnl = Gauge::new("trader_total_pnl", "Realized plus unrealized P&L").expect("static metric descriptor");
        registry.register(Box::new(total_pnl.clone())).expect("unique metric name");

        let brokerage = Gauge::new("trader_brokerage", "Cumulative brokerage charged").expect("static metric descriptor");
        registry.register(Box::new(brokerage.clone())).expect("unique metric name");

        Self {
            registry,
            signals_accepted_total,
            signals_ignored_total,
            sell_windows_opened,
            buy_windows_opened,
            orders_placed,
            orders_filled,
            orders_cancelled,
            open_positions,
            realized_pnl,
            unrealized_pnl,
            total_pnl,
            brokerage,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_signal_accepted(&self) {
        self.signals_accepted_total.inc();
    }

    pub fn record_signal_ignored(&self, reason: &str) {
        self.signals_ignored_total.with_label_values(&[reason]).inc();
    }

    /// Pulls the latest window counts, order counts, open positions, and P&L
    /// out of `registry`/`broker` and sets the corresponding gauges. Cheap
    /// enough to call on every timer poll or at the end of a backtest.
    pub fn refresh(&self, registry: &MachineRegistry, broker: &PaperBroker) {
        let (sell_opened, buy_opened) = registry.total_window_counts();
        self.sell_windows_opened.set(sell_opened as i64);
        self.buy_windows_opened.set(buy_opened as i64);

        self.orders_placed.set(broker.orders_placed_count() as i64);
        self.orders_filled.set(broker.orders_filled_count() as i64);
        self.orders_cancelled.set(broker.orders_cancelled_count() as i64);

        for (sym, qty) in broker.open_positions() {
            self.open_positions.with_label_values(&[sym.as_str()]).set(qty);
        }

        let pnl = broker.pnl();
        self.realized_pnl.set(decimal_to_f64(pnl.realized_net));
        self.unrealized_pnl.set(decimal_to_f64(pnl.unrealized));
        self.total_pnl.set(decimal_to_f64(pnl.total));
        self.brokerage.set(decimal_to_f64(pnl.brokerage));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            signals_accepted_total: self.signals_accepted_total.get() as i64,
            sell_windows_opened: self.sell_windows_opened.get(),
            buy_windows_opened: self.buy_windows_opened.get(),
            orders_placed: self.orders_placed.get(),
            orders_filled: self.orders_filled.get(),
            orders_cancelled: self.orders_cancelled.get(),
            realized_pnl: self.realized_pnl.get(),
            unrealized_pnl: self.unrealized_pnl.get(),
            total_pnl: self.total_pnl.get(),
        }
    }
}

impl Default for TradingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_counters_increment() {
        let metrics = TradingMetrics::new();
        metrics.record_signal_accepted();
        metrics.record_signal_accepted();
        metrics.record_signal_ignored("no_price_available");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.signals_accepted_total, 2);
        assert!(metrics.registry().gather().iter().any(|mf| mf.get_name() == "trader_signals_ignored_total"));
    }

    #[test]
    fn decimal_to_f64_is_lossy_but_close() {
        use rust_decimal_macros::dec;
        approx::assert_relative_eq!(decimal_to_f64(dec!(1234.5678)), 1234.5678, epsilon = 1e-9);
    }
}
