//! Live process: reads ticks and signals as newline-delimited JSON from
//! stdin and drives the same `MachineRegistry` a backtest would, using the
//! real wall clock.
//!
//! Stdin is the thin adapter stand-in for a broker WebSocket feed and a
//! webhook signal intake — external collaborators whose wire shape is not
//! part of the core contract.

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::BufRead;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use trader_bins::common::{init_logging, CommonArgs};
use trader_core::clock::{Clock, TimerService, WallClock};
use trader_core::core::{Side, Sym};
use trader_core::registry::IncomingSignal;
use trader_core::tick_hub::TickHub;
use trader_core::{Config, MachineConfig, MachineRegistry, PaperBroker};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the live trading state machine")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Bypass the market-hours gate and accept signals at any time.
    #[arg(long)]
    allow_after_hours: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum InputEvent {
    Tick { sym: String, price: Decimal, ts_ms: i64 },
    Signal { sym: String, side: Side, ts_ms: i64, at_price: Decimal },
}

/// Forwards stdin lines to the main loop so it can poll timers on a
/// fixed interval even while waiting for the next line.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    });
    rx
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.common);

    let config = Config::load(&args.common.config)?;
    let market_hours = config.market_hours_gate();
    let allow_after_hours = config.allow_after_hours || args.allow_after_hours;

    let running = Arc::new(AtomicBool::new(true));
    let running_ctrlc = running.clone();
    ctrlc::set_handler(move || {
        warn!("received Ctrl+C, shutting down after the current event");
        running_ctrlc.store(false, Ordering::SeqCst);
    })
    .context("installing Ctrl+C handler")?;

    let clock: Rc<dyn Clock> = Rc::new(WallClock);
    let tick_hub = Rc::new(TickHub::new());
    let broker = PaperBroker::new(tick_hub.clone(), clock.clone(), config.brokerage.clone());
    let (underlying_of, specs) = config.sizing_maps();
    let sizing = trader_core::SizingService::new(config.capital, underlying_of, specs)?;
    let registry = MachineRegistry::new(
        tick_hub.clone(),
        broker.clone(),
        sizing,
        TimerService::new(),
        clock.clone(),
        MachineConfig::from(&config.machine),
        config.missing_price_policy,
        market_hours,
        allow_after_hours,
    );

    info!("live trading loop started, reading events from stdin");
    let lines = spawn_stdin_reader();
    while running.load(Ordering::SeqCst) {
        match lines.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                handle_line(&line, &tick_hub, &registry, clock.as_ref());
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                registry.borrow_mut().poll_timers(clock.now_ms());
                registry.borrow().refresh_snapshot();
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!("stdin closed, shutting down");
                break;
            }
        }
    }

    let snapshot = registry.borrow().metrics().snapshot();
    let broker = broker.borrow();
    let pnl = broker.pnl();
    info!(
        realized_net = %pnl.realized_net,
        unrealized = %pnl.unrealized,
        total = %pnl.total,
        trades = broker.trades().len(),
        signals_accepted = snapshot.signals_accepted_total,
        orders_placed = snapshot.orders_placed,
        "live loop stopped"
    );
    Ok(())
}

fn handle_line(line: &str, tick_hub: &Rc<TickHub>, registry: &Rc<std::cell::RefCell<MachineRegistry>>, clock: &dyn Clock) {
    let event: InputEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "dropping unparseable input line");
            return;
        }
    };
    registry.borrow_mut().poll_timers(clock.now_ms());
    match event {
        InputEvent::Tick { sym, price, ts_ms } => {
            tick_hub.ingest(Sym::from(sym), price, ts_ms);
        }
        InputEvent::Signal { sym, side, ts_ms, at_price } => {
            let signal = IncomingSignal { sym: Sym::from(sym), side, ts_ms, at_price };
            if let Err(err) = registry.borrow_mut().submit_signal(signal) {
                warn!(error = %err, "signal rejected");
            }
        }
    }
}
