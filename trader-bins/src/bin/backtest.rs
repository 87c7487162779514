//! Deterministic offline replay of a recorded tick/signal stream.
//!
//! Reads a newline-delimited JSON file where each line is either a tick or a
//! signal, builds the same components a live process would, and replays
//! them through a `VirtualClock` so repeated runs over the same file produce
//! byte-identical trades and P&L.

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::BufRead;
use std::rc::Rc;
use tracing::info;
use trader_bins::common::{init_logging, CommonArgs};
use trader_core::backtest::{BacktestDriver, BacktestEvent};
use trader_core::clock::{Clock, TimerService, VirtualClock};
use trader_core::core::{Side, Sym};
use trader_core::tick_hub::TickHub;
use trader_core::{Config, MachineConfig, MachineRegistry, PaperBroker};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a recorded tick/signal stream")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Path to a newline-delimited JSON file of tick/signal events.
    events: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum InputEvent {
    Tick { sym: String, price: Decimal, ts_ms: i64 },
    Signal { sym: String, side: Side, ts_ms: i64, at_price: Decimal },
}

fn load_events(path: &str) -> Result<Vec<BacktestEvent>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening events file {path}"))?;
    let reader = std::io::BufReader::new(file);
    let mut events = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {} of {path}", lineno + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: InputEvent = serde_json::from_str(&line)
            .with_context(|| format!("parsing line {} of {path}", lineno + 1))?;
        events.push(match parsed {
            InputEvent::Tick { sym, price, ts_ms } => BacktestEvent::tick(Sym::from(sym), price, ts_ms),
            InputEvent::Signal { sym, side, ts_ms, at_price } => {
                BacktestEvent::signal(Sym::from(sym), side, ts_ms, at_price)
            }
        });
    }
    Ok(events)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.common);

    let config = Config::load(&args.common.config)?;
    let events = load_events(&args.events)?;
    info!(count = events.len(), file = %args.events, "loaded backtest events");

    let tick_hub = Rc::new(TickHub::new());
    let clock = Rc::new(VirtualClock::new(0));
    let broker = PaperBroker::new(tick_hub.clone(), clock.clone() as Rc<dyn Clock>, config.brokerage.clone());
    let (underlying_of, specs) = config.sizing_maps();
    let sizing = trader_core::SizingService::new(config.capital, underlying_of, specs)?;
    let registry = MachineRegistry::new(
        tick_hub.clone(),
        broker.clone(),
        sizing,
        TimerService::new(),
        clock.clone() as Rc<dyn Clock>,
        MachineConfig::from(&config.machine),
        config.missing_price_policy,
        config.market_hours_gate(),
        config.allow_after_hours,
    );

    let driver = BacktestDriver::new(clock, tick_hub, registry.clone());
    driver.run(events);

    let reg = registry.borrow();
    reg.refresh_snapshot();
    let snapshot = reg.snapshot_handle().read().metrics.clone();
    info!(
        signals_accepted = snapshot.signals_accepted_total,
        sell_windows_opened = snapshot.sell_windows_opened,
        buy_windows_opened = snapshot.buy_windows_opened,
        orders_placed = snapshot.orders_placed,
        orders_filled = snapshot.orders_filled,
        "metrics snapshot"
    );

    let broker = broker.borrow();
    let pnl = broker.pnl();
    info!(
        realized_net = %pnl.realized_net,
        unrealized = %pnl.unrealized,
        total = %pnl.total,
        brokerage = %pnl.brokerage,
        trades = broker.trades().len(),
        "backtest complete"
    );
    for trade in broker.trades() {
        println!(
            "{} {} {} {} @ {} (realized {})",
            trade.ts_ms, trade.sym, trade.side, trade.qty, trade.price, trade.realized_delta
        );
    }
    Ok(())
}
