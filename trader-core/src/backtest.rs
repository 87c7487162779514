//! Backtest Driver: deterministic offline replay of a recorded tick/signal
//! stream through a [`MachineRegistry`], using a [`VirtualClock`] instead of
//! wall-clock time so a given input file always produces the same trades.

use crate::clock::VirtualClock;
use crate::core::{Side, Sym};
use crate::registry::{IncomingSignal, MachineRegistry};
use crate::tick_hub::TickHub;
use rust_decimal::Decimal;
use std::cell::RefCell;
use std::rc::Rc;

/// One recorded input event, carrying its own timestamp.
#[derive(Debug, Clone)]
pub enum BacktestEvent {
    Tick { sym: Sym, price: Decimal, ts_ms: i64 },
    Signal(IncomingSignal),
}

impl BacktestEvent {
    fn ts_ms(&self) -> i64 {
        match self {
            BacktestEvent::Tick { ts_ms, .. } => *ts_ms,
            BacktestEvent::Signal(signal) => signal.ts_ms,
        }
    }

    pub fn tick(sym: Sym, price: Decimal, ts_ms: i64) -> Self {
        BacktestEvent::Tick { sym, price, ts_ms }
    }

    pub fn signal(sym: Sym, side: Side, ts_ms: i64, at_price: Decimal) -> Self {
        BacktestEvent::Signal(IncomingSignal { sym, side, ts_ms, at_price })
    }
}

/// Replays a fixed, pre-sorted event stream against a registry, advancing
/// the clock and draining due timers ahead of every event so ordering
/// matches what a live cooperative executor would have produced.
pub struct BacktestDriver {
    clock: Rc<VirtualClock>,
    tick_hub: Rc<TickHub>,
    registry: Rc<RefCell<MachineRegistry>>,
}

impl BacktestDriver {
    pub fn new(clock: Rc<VirtualClock>, tick_hub: Rc<TickHub>, registry: Rc<RefCell<MachineRegistry>>) -> Self {
        Self { clock, tick_hub, registry }
    }

    /// Sorts `events` by timestamp (stable, so same-timestamp events keep
    /// their input order) and replays them one at a time.
    pub fn run(&self, mut events: Vec<BacktestEvent>) {
        events.sort_by_key(BacktestEvent::ts_ms);
        for event in events {
            self.advance_to(event.ts_ms());
            match event {
                BacktestEvent::Tick { sym, price, ts_ms } => self.tick_hub.ingest(sym, price, ts_ms),
                BacktestEvent::Signal(signal) => {
                    if let Err(err) = self.registry.borrow_mut().submit_signal(signal) {
                        tracing::warn!(error = %err, "signal rejected during backtest replay");
                    }
                }
            }
        }
        let now = self.clock.now_ms();
        self.registry.borrow_mut().poll_timers(now);
    }

    fn advance_to(&self, ts_ms: i64) {
        let now = self.clock.now_ms();
        if ts_ms > now {
            self.clock.advance(ts_ms - now);
        }
        self.registry.borrow_mut().poll_timers(self.clock.now_ms());
    }
}
