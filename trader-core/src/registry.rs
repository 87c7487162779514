//! Machine Registry: owns every live Symbol Machine and is the single point
//! through which ticks, timers, and signals reach them.
//!
//! Follows the same self-referential `Rc<RefCell<_>>` + `Weak` shape as
//! [`crate::broker::PaperBroker`] so the registry can subscribe itself to
//! the Tick Hub per symbol without a true `Rc` cycle.

use crate::broker::PaperBroker;
use crate::clock::{Clock, TimerEvent, TimerService};
use crate::core::{OrderId, SignalError, Sym};
use crate::machine::{Deps, MachineConfig, MachineState, SymbolMachine};
use crate::market_hours::MarketHoursGate;
use crate::sizing::SizingService;
use crate::tick_hub::{Subscription, TickHub};
use crate::utils::metrics::{MetricsSnapshot, TradingMetrics};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// How to treat a signal for a symbol the Tick Hub has never seen a price
/// for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissingPricePolicy {
    /// Accept the signal immediately, seeding it from the signal's own
    /// `at_price` rather than a cached tick.
    UseSeed,
    /// Defer the signal until the first tick arrives for the symbol, or
    /// `timeout_ms` elapses with no tick, whichever comes first; either way
    /// it's then processed as if `UseSeed` had been configured.
    WaitThenSeed { timeout_ms: i64 },
    /// Reject the signal with `SignalError::NoPriceAvailable`.
    Fail,
}

impl Default for MissingPricePolicy {
    fn default() -> Self {
        MissingPricePolicy::Fail
    }
}

/// Minimal upstream signal payload the registry accepts at its boundary,
/// ahead of constructing the core [`crate::core::Signal`].
#[derive(Debug, Clone)]
pub struct IncomingSignal {
    pub sym: Sym,
    pub side: crate::core::Side,
    pub ts_ms: i64,
    pub at_price: Decimal,
}

/// Plain, owned view of one machine's state, safe to hand across threads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolSnapshot {
    pub window_id: u64,
    pub is_idle: bool,
    pub saved_buy_ltp: Option<Decimal>,
    pub saved_sell_ltp: Option<Decimal>,
}

/// Copy-out of everything a monitoring task would want to poll: per-symbol
/// machine state, cumulative window counts, the metrics snapshot, and P&L.
/// Contains only owned, `Send` data so it can live behind an
/// `Arc<RwLock<_>>` independent of the registry itself, which stays
/// `Rc`/`RefCell`-based and single-threaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    pub symbols: HashMap<Sym, SymbolSnapshot>,
    pub sell_windows_opened: u64,
    pub buy_windows_opened: u64,
    pub metrics: MetricsSnapshot,
    pub pnl: crate::broker::PnlSnapshot,
}

pub struct MachineRegistry {
    tick_hub: Rc<TickHub>,
    broker: Rc<RefCell<PaperBroker>>,
    sizing: SizingService,
    timers: TimerService,
    clock: Rc<dyn Clock>,
    config: MachineConfig,
    missing_price_policy: MissingPricePolicy,
    market_hours: MarketHoursGate,
    allow_after_hours: bool,
    machines: HashMap<Sym, SymbolMachine>,
    subscriptions: HashMap<Sym, Subscription>,
    pending_seeded_signals: HashMap<Sym, IncomingSignal>,
    self_ref: Weak<RefCell<MachineRegistry>>,
    metrics: TradingMetrics,
    snapshot: Arc<RwLock<RegistrySnapshot>>,
}

impl MachineRegistry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tick_hub: Rc<TickHub>,
        broker: Rc<RefCell<PaperBroker>>,
        sizing: SizingService,
        timers: TimerService,
        clock: Rc<dyn Clock>,
        config: MachineConfig,
        missing_price_policy: MissingPricePolicy,
        market_hours: MarketHoursGate,
        allow_after_hours: bool,
    ) -> Rc<RefCell<Self>> {
        let registry = Rc::new(RefCell::new(Self {
            tick_hub,
            broker,
            sizing,
            timers,
            clock,
            config,
            missing_price_policy,
            market_hours,
            allow_after_hours,
            machines: HashMap::new(),
            subscriptions: HashMap::new(),
            pending_seeded_signals: HashMap::new(),
            self_ref: Weak::new(),
            metrics: TradingMetrics::new(),
            snapshot: Arc::new(RwLock::new(RegistrySnapshot::default())),
        }));
        registry.borrow_mut().self_ref = Rc::downgrade(&registry);
        registry
    }

    /// The registry's own metrics registry, covering signals accepted/
    /// ignored. Windows-opened and order/position/P&L figures are pulled in
    /// from this registry and the broker via [`TradingMetrics::refresh`].
    pub fn metrics(&self) -> &TradingMetrics {
        &self.metrics
    }

    /// A cloneable handle to the latest snapshot, safe to hand to a
    /// monitoring task on another thread. Readers never block the executor;
    /// they only ever contend with [`Self::refresh_snapshot`]'s write lock.
    pub fn snapshot_handle(&self) -> Arc<RwLock<RegistrySnapshot>> {
        self.snapshot.clone()
    }

    /// Pulls current metric/P&L/per-machine figures and publishes them to
    /// the snapshot handle. Cheap enough to call on every timer poll or at
    /// the end of a backtest.
    pub fn refresh_snapshot(&self) {
        self.metrics.refresh(self, &self.broker.borrow());
        let symbols = self
            .machines
            .iter()
            .map(|(sym, m)| {
                let state = m.state();
                (
                    sym.clone(),
                    SymbolSnapshot {
                        window_id: state.window_id(),
                        is_idle: state.is_idle(),
                        saved_buy_ltp: state.saved_buy_ltp(),
                        saved_sell_ltp: state.saved_sell_ltp(),
                    },
                )
            })
            .collect();
        let (sell_windows_opened, buy_windows_opened) = self.total_window_counts();
        let next = RegistrySnapshot {
            symbols,
            sell_windows_opened,
            buy_windows_opened,
            metrics: self.metrics.snapshot(),
            pnl: self.broker.borrow().pnl(),
        };
        *self.snapshot.write() = next;
    }

    /// Creates an idle Symbol Machine for `sym` and subscribes it to ticks,
    /// unless one already exists.
    pub fn ensure_symbol(&mut self, sym: Sym) {
        if self.machines.contains_key(&sym) {
            return;
        }
        self.machines.insert(sym.clone(), SymbolMachine::new(sym.clone()));
        self.ensure_subscribed(sym);
    }

    pub fn machine_state(&self, sym: &Sym) -> Option<&MachineState> {
        self.machines.get(sym).map(SymbolMachine::state)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Sym> {
        self.machines.keys()
    }

    /// Cumulative `(sell_windows_opened, buy_windows_opened)` across every
    /// machine the registry has ever created.
    pub fn total_window_counts(&self) -> (u64, u64) {
        self.machines.values().map(|m| m.state().window_counts()).fold((0, 0), |(sell, buy), (s, b)| {
            (sell + s, buy + b)
        })
    }

    /// Validates and routes an upstream signal to the owning Symbol Machine,
    /// creating it on first sight of `sym`. Gated on market hours ahead of
    /// the missing-price-policy check, unless `allow_after_hours` is set.
    pub fn submit_signal(&mut self, signal: IncomingSignal) -> Result<(), SignalError> {
        if !self.allow_after_hours && !self.market_hours.is_open(self.clock.now_ms()) {
            tracing::warn!(sym = %signal.sym, "signal rejected: market closed");
            self.metrics.record_signal_ignored("market_closed");
            return Err(SignalError::MarketClosed { sym: signal.sym });
        }

        if self.tick_hub.last_price(&signal.sym).is_none() {
            match self.missing_price_policy {
                MissingPricePolicy::Fail => {
                    self.metrics.record_signal_ignored("no_price_available");
                    return Err(SignalError::NoPriceAvailable { sym: signal.sym });
                }
                MissingPricePolicy::UseSeed => {
                    self.process_signal(signal);
                    return Ok(());
                }
                MissingPricePolicy::WaitThenSeed { timeout_ms } => {
                    self.ensure_symbol(signal.sym.clone());
                    let now = self.clock.now_ms();
                    self.timers.schedule(now, timeout_ms, TimerEvent::SeedTimeout { sym: signal.sym.clone() });
                    self.pending_seeded_signals.insert(signal.sym.clone(), signal);
                    return Ok(());
                }
            }
        }
        self.process_signal(signal);
        Ok(())
    }

    /// Routes an already-cleared signal to its machine, creating it if
    /// needed. Shared by the immediate path and the deferred
    /// `wait_then_seed` paths.
    fn process_signal(&mut self, signal: IncomingSignal) {
        self.metrics.record_signal_accepted();
        self.ensure_symbol(signal.sym.clone());
        let core_signal = crate::core::Signal::new(signal.sym.clone(), signal.side, signal.ts_ms, signal.at_price);

        let deps = Deps {
            broker: &self.broker,
            tick_hub: &self.tick_hub,
            sizing: &self.sizing,
            timers: &self.timers,
            clock: self.clock.as_ref(),
            config: &self.config,
        };
        if let Some(machine) = self.machines.get_mut(&signal.sym) {
            machine.on_signal(&deps, &core_signal);
        }
    }

    /// Drains every timer due at `now_ms` and dispatches it to the owning
    /// Symbol Machine.
    pub fn poll_timers(&mut self, now_ms: i64) {
        let due = self.timers.drain_due(now_ms);
        for event in due {
            match event {
                TimerEvent::WindowExpired { sym, window_id } => self.route_window_timer(&sym, window_id),
                TimerEvent::EntryTtlExpired { sym, order_id } => self.route_entry_ttl(&sym, order_id),
                TimerEvent::SeedTimeout { sym } => self.route_seed_timeout(&sym),
            }
        }
    }

    pub fn next_deadline_ms(&self) -> Option<i64> {
        self.timers.next_deadline_ms()
    }

    fn ensure_subscribed(&mut self, sym: Sym) {
        if self.subscriptions.contains_key(&sym) {
            return;
        }
        let weak = self.self_ref.clone();
        let sym_for_closure = sym.clone();
        let subscription = self.tick_hub.subscribe(
            sym.clone(),
            Box::new(move |tick| {
                if let Some(registry) = weak.upgrade() {
                    if let Ok(mut registry) = registry.try_borrow_mut() {
                        registry.route_tick(&sym_for_closure, tick.price, tick.ts_ms);
                    }
                }
            }),
        );
        self.subscriptions.insert(sym, subscription);
    }

    fn route_tick(&mut self, sym: &Sym, price: Decimal, ts_ms: i64) {
        if let Some(signal) = self.pending_seeded_signals.remove(sym) {
            self.process_signal(signal);
        }
        let deps = Deps {
            broker: &self.broker,
            tick_hub: &self.tick_hub,
            sizing: &self.sizing,
            timers: &self.timers,
            clock: self.clock.as_ref(),
            config: &self.config,
        };
        if let Some(machine) = self.machines.get_mut(sym) {
            machine.on_tick(&deps, price, ts_ms);
        }
    }

    fn route_window_timer(&mut self, sym: &Sym, window_id: u64) {
        let deps = Deps {
            broker: &self.broker,
            tick_hub: &self.tick_hub,
            sizing: &self.sizing,
            timers: &self.timers,
            clock: self.clock.as_ref(),
            config: &self.config,
        };
        if let Some(machine) = self.machines.get_mut(sym) {
            machine.on_window_timer(&deps, window_id);
        }
    }

    fn route_entry_ttl(&mut self, sym: &Sym, order_id: OrderId) {
        let deps = Deps {
            broker: &self.broker,
            tick_hub: &self.tick_hub,
            sizing: &self.sizing,
            timers: &self.timers,
            clock: self.clock.as_ref(),
            config: &self.config,
        };
        if let Some(machine) = self.machines.get_mut(sym) {
            machine.on_entry_ttl(&deps, order_id);
        }
    }

    /// No-op if a tick already arrived and claimed the deferred signal;
    /// otherwise processes it now using its own `at_price`.
    fn route_seed_timeout(&mut self, sym: &Sym) {
        if let Some(signal) = self.pending_seeded_signals.remove(sym) {
            self.process_signal(signal);
        }
    }
}
