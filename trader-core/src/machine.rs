//! Symbol Machine: the per-instrument windowed entry/exit state
//! machine. Three states — `Idle`, `InSellWindow`, `InBuyWindow` — each a
//! typestate wrapper around one shared data block, mirroring
//! `core::order_fsm`'s pattern: transition methods consume `self` and return
//! the next state, and a type-erased [`MachineState`] enum is kept at the
//! registry boundary for storage and dispatch.
//!
//! A BUY signal seeding the machine's entry anchor is deliberately never
//! pushed into the Tick Hub's cache: the anchor is a reference price, not an
//! observed trade, and letting it seed the cache would make entry orders
//! fill against a price nobody actually quoted.

use crate::broker::PaperBroker;
use crate::clock::{Clock, TimerEvent, TimerHandle, TimerService};
use crate::core::{round_to_tick, OrderId, Side, Signal, Sym};
use crate::sizing::SizingService;
use crate::tick_hub::TickHub;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::cell::RefCell;
use std::rc::Rc;

/// Wall-clock duration of every window.
pub const WINDOW_MS: i64 = 60_000;

/// Tunables pulled in from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineConfig {
    pub entry_offset: Decimal,
    pub exit_offset: Decimal,
    pub stop_loss_points: Decimal,
    pub window_ms: i64,
    /// `None` disables the entry TTL cancellation (spec leaves the timeout
    /// itself configurable and optional).
    pub entry_ttl_ms: Option<i64>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            entry_offset: dec!(0.5),
            exit_offset: dec!(0.5),
            stop_loss_points: dec!(0.5),
            window_ms: WINDOW_MS,
            entry_ttl_ms: None,
        }
    }
}

/// Steers re-entry condition in the collapsed-window decomposition's WAIT
/// phase; kept for persisted-state parity with the richer four-state variant
/// even though the three-state transitions below already
/// encode the equivalent behavior directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    AfterBuy,
    AfterSell,
    None,
}

/// Everything the transition methods need beyond the machine's own data:
/// the broker to place/cancel orders against, the tick cache to read the
/// current price, the sizing service, the timer service, the clock, and
/// configuration.
pub struct Deps<'a> {
    pub broker: &'a Rc<RefCell<PaperBroker>>,
    pub tick_hub: &'a TickHub,
    pub sizing: &'a SizingService,
    pub timers: &'a TimerService,
    pub clock: &'a dyn Clock,
    pub config: &'a MachineConfig,
}

/// Which side opened a window; used only for the window-opened counters
/// reported through [`crate::utils::metrics::TradingMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowKind {
    Sell,
    Buy,
}

/// Shared data block behind every window state: window id/deadline and anchors.
#[derive(Debug, Clone)]
struct MachineData {
    sym: Sym,
    window_id: u64,
    window_ends_at_ms: i64,
    timer_handle: Option<TimerHandle>,
    saved_buy_ltp: Option<Decimal>,
    saved_last_buy_ltp: Option<Decimal>,
    saved_sell_ltp: Option<Decimal>,
    sell_start_anchor: Option<Decimal>,
    pending_buy_after_sell: bool,
    wait_mode: WaitMode,
    exited_this_window: bool,
    silenced_until_ms: Option<i64>,
    pending_entry_order_id: Option<OrderId>,
    entry_ttl_handle: Option<TimerHandle>,
    sell_windows_opened: u64,
    buy_windows_opened: u64,
}

impl MachineData {
    fn new(sym: Sym) -> Self {
        Self {
            sym,
            window_id: 0,
            window_ends_at_ms: 0,
            timer_handle: None,
            saved_buy_ltp: None,
            saved_last_buy_ltp: None,
            saved_sell_ltp: None,
            sell_start_anchor: None,
            pending_buy_after_sell: false,
            wait_mode: WaitMode::None,
            exited_this_window: false,
            silenced_until_ms: None,
            pending_entry_order_id: None,
            entry_ttl_handle: None,
            sell_windows_opened: 0,
            buy_windows_opened: 0,
        }
    }

    /// Cancels the outstanding window timer (if any), bumps `window_id`, and
    /// arms a fresh one. Every transition into a non-`Idle` state goes
    /// through this so late callbacks from the superseded window become
    /// no-ops.
    fn arm_window(&mut self, deps: &Deps, kind: WindowKind) {
        if let Some(handle) = self.timer_handle.take() {
            deps.timers.cancel(handle);
        }
        self.window_id += 1;
        self.exited_this_window = false;
        match kind {
            WindowKind::Sell => self.sell_windows_opened += 1,
            WindowKind::Buy => self.buy_windows_opened += 1,
        }
        let now = deps.clock.now_ms();
        self.window_ends_at_ms = now + deps.config.window_ms;
        self.timer_handle = Some(deps.timers.schedule(
            now,
            deps.config.window_ms,
            TimerEvent::WindowExpired {
                sym: self.sym.clone(),
                window_id: self.window_id,
            },
        ));
    }

    fn open_qty(&self, deps: &Deps) -> i64 {
        deps.broker.borrow().open_qty(&self.sym)
    }

    /// Places an exit order. Sizing/tick-size failures are logged and the
    /// intent is dropped; the machine's state is untouched.
    fn try_place(&self, deps: &Deps, side: Side, qty: i64, raw_price: Decimal, tag: &'static str) {
        match deps.sizing.tick_size(&self.sym) {
            Ok(tick) => {
                let limit = round_to_tick(raw_price, tick);
                deps.broker.borrow_mut().place_limit(self.sym.clone(), side, qty, limit, tag);
            }
            Err(err) => {
                tracing::warn!(sym = %self.sym, tag, error = %err, "order placement skipped");
            }
        }
    }

    fn try_qty_for_entry(&self, deps: &Deps, price: Decimal) -> Option<i64> {
        let open_qty = self.open_qty(deps);
        match deps.sizing.qty_for_entry(&self.sym, open_qty, price) {
            Ok(qty) => Some(qty),
            Err(err) => {
                tracing::warn!(sym = %self.sym, error = %err, "sizing failed, entry skipped");
                None
            }
        }
    }

    /// Places a BUY entry and arms (or replaces) its TTL timer. Superseding
    /// a still-pending previous entry cancels it first.
    fn place_entry(&mut self, deps: &Deps, qty: i64, raw_price: Decimal, tag: &'static str) {
        let tick = match deps.sizing.tick_size(&self.sym) {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!(sym = %self.sym, tag, error = %err, "entry placement skipped");
                return;
            }
        };
        let limit = round_to_tick(raw_price, tick);
        let order_id = deps.broker.borrow_mut().place_limit(self.sym.clone(), Side::Buy, qty, limit, tag);

        if let Some(prev) = self.pending_entry_order_id.replace(order_id) {
            deps.broker.borrow_mut().cancel(prev);
        }
        if let Some(old_handle) = self.entry_ttl_handle.take() {
            deps.timers.cancel(old_handle);
        }
        if let Some(ttl_ms) = deps.config.entry_ttl_ms {
            self.entry_ttl_handle = Some(deps.timers.schedule(
                deps.clock.now_ms(),
                ttl_ms,
                TimerEvent::EntryTtlExpired {
                    sym: self.sym.clone(),
                    order_id,
                },
            ));
        }
    }

    /// A still-pending entry's TTL elapsed; cancel it. Stale if the tracked
    /// order has since been superseded or already settled.
    fn on_entry_ttl(&mut self, deps: &Deps, order_id: OrderId) {
        if self.pending_entry_order_id != Some(order_id) {
            return;
        }
        self.pending_entry_order_id = None;
        self.entry_ttl_handle = None;
        let outcome = deps.broker.borrow_mut().cancel(order_id);
        tracing::debug!(sym = %self.sym, %order_id, ?outcome, "entry ttl expired");
    }

    /// Captures anchors for a BUY signal and places the entry. Forced
    /// anchors (SELL-window breakout/discount re-entry) never go through
    /// this path; they're handled directly by `InBuyWindow::enter_forced`
    /// and `rearm_same_anchor`.
    fn apply_buy_signal(&mut self, deps: &Deps, at_price: Decimal) {
        self.saved_buy_ltp = Some(at_price);
        self.saved_last_buy_ltp = Some(at_price);
        if self.pending_buy_after_sell {
            self.sell_start_anchor = Some(at_price);
            self.pending_buy_after_sell = false;
        }
        self.wait_mode = WaitMode::AfterBuy;
        self.silenced_until_ms = None;
        if let Some(qty) = self.try_qty_for_entry(deps, at_price) {
            self.place_entry(deps, qty, at_price + deps.config.entry_offset, "BUY_SIGNAL_PREWINDOW");
        }
    }
}

/// No active window, flat with respect to window bookkeeping. May still
/// carry a pending stop-out silencing deadline.
pub struct Idle {
    data: MachineData,
}

impl Idle {
    fn new(sym: Sym) -> Self {
        Self { data: MachineData::new(sym) }
    }

    fn on_signal(self, deps: &Deps, signal: &Signal) -> MachineState {
        match signal.side {
            Side::Sell => MachineState::InSellWindow(InSellWindow::enter(self.data, deps, signal.at_price)),
            Side::Buy => {
                let mut data = self.data;
                if let Some(until) = data.silenced_until_ms {
                    if deps.clock.now_ms() < until {
                        return MachineState::Idle(Idle { data });
                    }
                }
                data.apply_buy_signal(deps, signal.at_price);
                data.arm_window(deps, WindowKind::Buy);
                MachineState::InBuyWindow(InBuyWindow { data })
            }
        }
    }

    fn on_tick(self, _deps: &Deps, _price: Decimal, _ts_ms: i64) -> MachineState {
        MachineState::Idle(self)
    }

    fn on_timer(self, _deps: &Deps, _window_id: u64) -> MachineState {
        MachineState::Idle(self)
    }
}

/// A 60s window opened by a SELL signal.
pub struct InSellWindow {
    data: MachineData,
    /// Whether the position was open at the moment this window was entered;
    /// fixed for the window's lifetime, determining which of the two tick
    /// watchers is armed.
    had_pos: bool,
}

impl InSellWindow {
    fn enter(mut data: MachineData, deps: &Deps, at_price: Decimal) -> Self {
        let had_pos = data.open_qty(deps) > 0;
        data.saved_sell_ltp = Some(at_price);
        data.pending_buy_after_sell = true;
        data.wait_mode = WaitMode::AfterSell;
        data.arm_window(deps, WindowKind::Sell);
        Self { data, had_pos }
    }

    fn on_signal(self, deps: &Deps, signal: &Signal) -> MachineState {
        match signal.side {
            Side::Sell => MachineState::InSellWindow(InSellWindow::enter(self.data, deps, signal.at_price)),
            Side::Buy => {
                let mut data = self.data;
                data.apply_buy_signal(deps, signal.at_price);
                data.arm_window(deps, WindowKind::Buy);
                MachineState::InBuyWindow(InBuyWindow { data })
            }
        }
    }

    fn on_tick(mut self, deps: &Deps, price: Decimal, _ts_ms: i64) -> MachineState {
        if self.had_pos {
            // "No-flip" rule: exit exactly the open size on the first tick,
            // then ignore every further tick until the window restarts.
            if !self.data.exited_this_window {
                let qty = self.data.open_qty(deps);
                self.data
                    .try_place(deps, Side::Sell, qty, price - deps.config.exit_offset, "SELL_INPOS_IMMEDIATE_EXIT");
                self.data.exited_this_window = true;
            }
            return MachineState::InSellWindow(self);
        }

        let tick_size = deps.sizing.tick_size(&self.data.sym).unwrap_or(dec!(0.01));
        if let Some(saved) = self.data.saved_sell_ltp {
            let breakout_level = round_to_tick(saved + deps.config.entry_offset, tick_size);
            if price > breakout_level {
                // Fixed one-point step off the sell anchor, independent of
                // entry_offset/exit_offset: the two are unrelated tunables
                // and their sum isn't guaranteed to equal this.
                let anchor = round_to_tick(saved + Decimal::ONE, tick_size);
                return MachineState::InBuyWindow(InBuyWindow::enter_forced(
                    self.data,
                    deps,
                    anchor,
                    "SELL_FLAT_BREAKOUT",
                ));
            }
            if let Some(start) = self.data.sell_start_anchor {
                if price < start {
                    return MachineState::InBuyWindow(InBuyWindow::enter_forced(
                        self.data,
                        deps,
                        start,
                        "BUY_SIGNAL_FORCED_ANCHOR",
                    ));
                }
            }
        }
        MachineState::InSellWindow(self)
    }

    fn on_timer(self, deps: &Deps, window_id: u64) -> MachineState {
        if window_id != self.data.window_id {
            return MachineState::InSellWindow(self);
        }
        let anchor = deps
            .tick_hub
            .last_price(&self.data.sym)
            .or(self.data.saved_sell_ltp)
            .unwrap_or(Decimal::ZERO);
        MachineState::InSellWindow(InSellWindow::enter(self.data, deps, anchor))
    }
}

/// A 60s window opened by a BUY signal, or by a SELL-window rollover with a
/// forced anchor.
pub struct InBuyWindow {
    data: MachineData,
}

impl InBuyWindow {
    /// Entry path used when a SELL window's tick rules hand control to a new
    /// BUY window (breakout or discount re-entry); never invoked from a BUY
    /// signal itself.
    fn enter_forced(mut data: MachineData, deps: &Deps, anchor: Decimal, tag: &'static str) -> Self {
        data.saved_buy_ltp = Some(anchor);
        data.saved_last_buy_ltp = Some(anchor);
        data.wait_mode = WaitMode::AfterBuy;
        data.silenced_until_ms = None;
        data.arm_window(deps, WindowKind::Buy);
        if let Some(qty) = data.try_qty_for_entry(deps, anchor) {
            data.place_entry(deps, qty, anchor + deps.config.entry_offset, tag);
        }
        Self { data }
    }

    /// Restarts the window timer keeping the same anchor, used by the
    /// flat-breakout re-entry rule (the BUY itself was already placed by the
    /// caller with its own tag before this runs).
    fn rearm_same_anchor(mut data: MachineData, deps: &Deps, anchor: Decimal) -> Self {
        data.saved_buy_ltp = Some(anchor);
        data.arm_window(deps, WindowKind::Buy);
        Self { data }
    }

    fn on_signal(mut self, deps: &Deps, signal: &Signal) -> MachineState {
        match signal.side {
            Side::Sell => MachineState::InSellWindow(InSellWindow::enter(self.data, deps, signal.at_price)),
            Side::Buy => {
                // Silencing (stop-out) always routes through Idle first, so
                // a BUY signal reaching an active buy window is never
                // silenced; the running window is left intact.
                self.data.apply_buy_signal(deps, signal.at_price);
                MachineState::InBuyWindow(self)
            }
        }
    }

    fn on_tick(mut self, deps: &Deps, price: Decimal, _ts_ms: i64) -> MachineState {
        let anchor = self.data.saved_buy_ltp.unwrap_or(price);
        let tick_size = deps.sizing.tick_size(&self.data.sym).unwrap_or(dec!(0.01));
        let open_qty = self.data.open_qty(deps);

        if open_qty > 0 && price < round_to_tick(anchor - deps.config.stop_loss_points, tick_size) {
            self.data
                .try_place(deps, Side::Sell, open_qty, price - deps.config.exit_offset, "BUY_WINDOW_STOP_OUT");
            self.data.exited_this_window = true;
            let silence_until = self.data.window_ends_at_ms;
            let mut data = self.data;
            if let Some(handle) = data.timer_handle.take() {
                deps.timers.cancel(handle);
            }
            if let Some(handle) = data.entry_ttl_handle.take() {
                deps.timers.cancel(handle);
            }
            data.silenced_until_ms = Some(silence_until);
            return MachineState::Idle(Idle { data });
        }

        if open_qty == 0 && price > anchor {
            let Some(qty) = self.data.try_qty_for_entry(deps, price) else {
                return MachineState::InBuyWindow(self);
            };
            self.data
                .place_entry(deps, qty, price + deps.config.entry_offset, "BUY_WINDOW_BREAKOUT_REENTER");
            return MachineState::InBuyWindow(InBuyWindow::rearm_same_anchor(self.data, deps, anchor));
        }

        MachineState::InBuyWindow(self)
    }

    fn on_timer(self, deps: &Deps, window_id: u64) -> MachineState {
        if window_id != self.data.window_id {
            return MachineState::InBuyWindow(self);
        }
        let anchor = self.data.saved_buy_ltp.unwrap_or(Decimal::ZERO);
        let open_qty = self.data.open_qty(deps);

        if open_qty == 0 {
            if let Some(last) = deps.tick_hub.last_price(&self.data.sym) {
                if last > anchor {
                    let mut data = self.data;
                    if let Some(qty) = data.try_qty_for_entry(deps, last) {
                        data.place_entry(deps, qty, last + deps.config.entry_offset, "BUY_WINDOW_BREAKOUT_REENTER");
                    }
                    return MachineState::InBuyWindow(InBuyWindow::rearm_same_anchor(data, deps, anchor));
                }
            }
        }

        let mut data = self.data;
        if let Some(handle) = data.timer_handle.take() {
            deps.timers.cancel(handle);
        }
        MachineState::Idle(Idle { data })
    }
}

/// Type-erased storage for a Symbol Machine's current state. Gives up
/// compile-time transition guarantees in exchange for something that can
/// live in a registry's map.
pub enum MachineState {
    Idle(Idle),
    InSellWindow(InSellWindow),
    InBuyWindow(InBuyWindow),
}

impl MachineState {
    fn data(&self) -> &MachineData {
        match self {
            MachineState::Idle(s) => &s.data,
            MachineState::InSellWindow(s) => &s.data,
            MachineState::InBuyWindow(s) => &s.data,
        }
    }

    fn data_mut(&mut self) -> &mut MachineData {
        match self {
            MachineState::Idle(s) => &mut s.data,
            MachineState::InSellWindow(s) => &mut s.data,
            MachineState::InBuyWindow(s) => &mut s.data,
        }
    }

    pub fn sym(&self) -> &Sym {
        &self.data().sym
    }

    pub fn window_id(&self) -> u64 {
        self.data().window_id
    }

    pub fn saved_buy_ltp(&self) -> Option<Decimal> {
        self.data().saved_buy_ltp
    }

    pub fn saved_sell_ltp(&self) -> Option<Decimal> {
        self.data().saved_sell_ltp
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, MachineState::Idle(_))
    }

    pub fn is_silenced(&self, now_ms: i64) -> bool {
        self.data().silenced_until_ms.is_some_and(|until| now_ms < until)
    }

    /// Cumulative `(sell_windows_opened, buy_windows_opened)` for this
    /// instrument, for the metrics registry's windows-opened-per-kind
    /// counter.
    pub fn window_counts(&self) -> (u64, u64) {
        (self.data().sell_windows_opened, self.data().buy_windows_opened)
    }
}

/// The per-instrument driving loop: owns the current [`MachineState`] and
/// dispatches each event to it, storing back whatever state the transition
/// returns.
pub struct SymbolMachine {
    state: Option<MachineState>,
}

impl SymbolMachine {
    pub fn new(sym: Sym) -> Self {
        Self { state: Some(MachineState::Idle(Idle::new(sym))) }
    }

    pub fn state(&self) -> &MachineState {
        self.state.as_ref().expect("machine state always present between events")
    }

    pub fn on_signal(&mut self, deps: &Deps, signal: &Signal) {
        self.drive(|state| match state {
            MachineState::Idle(s) => s.on_signal(deps, signal),
            MachineState::InSellWindow(s) => s.on_signal(deps, signal),
            MachineState::InBuyWindow(s) => s.on_signal(deps, signal),
        });
    }

    pub fn on_tick(&mut self, deps: &Deps, price: Decimal, ts_ms: i64) {
        self.drive(|state| match state {
            MachineState::Idle(s) => s.on_tick(deps, price, ts_ms),
            MachineState::InSellWindow(s) => s.on_tick(deps, price, ts_ms),
            MachineState::InBuyWindow(s) => s.on_tick(deps, price, ts_ms),
        });
    }

    pub fn on_window_timer(&mut self, deps: &Deps, window_id: u64) {
        self.drive(|state| match state {
            MachineState::Idle(s) => s.on_timer(deps, window_id),
            MachineState::InSellWindow(s) => s.on_timer(deps, window_id),
            MachineState::InBuyWindow(s) => s.on_timer(deps, window_id),
        });
    }

    pub fn on_entry_ttl(&mut self, deps: &Deps, order_id: OrderId) {
        if let Some(state) = self.state.as_mut() {
            state.data_mut().on_entry_ttl(deps, order_id);
        }
    }

    fn drive(&mut self, transition: impl FnOnce(MachineState) -> MachineState) {
        let state = self.state.take().expect("machine state always present between events");
        self.state = Some(transition(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokeragePolicy, TradeLogEntry};
    use crate::clock::VirtualClock;
    use std::collections::HashMap;

    struct Harness {
        tick_hub: Rc<TickHub>,
        broker: Rc<RefCell<PaperBroker>>,
        sizing: SizingService,
        timers: TimerService,
        clock: Rc<VirtualClock>,
        config: MachineConfig,
    }

    impl Harness {
        fn new() -> Self {
            let tick_hub = Rc::new(TickHub::new());
            let clock = Rc::new(VirtualClock::new(0));
            let broker = PaperBroker::new(tick_hub.clone(), clock.clone(), BrokeragePolicy::PerTradeRate(dec!(0.001)));

            let mut underlying_of = HashMap::new();
            underlying_of.insert(Sym::from("NIFTY"), "NIFTY".to_string());
            let mut specs = HashMap::new();
            specs.insert(
                "NIFTY".to_string(),
                crate::sizing::InstrumentSpec { lot_size: 75, tick_size: dec!(0.01) },
            );
            let sizing = SizingService::new(dec!(20000), underlying_of, specs).unwrap();

            Self {
                tick_hub,
                broker,
                sizing,
                timers: TimerService::new(),
                clock,
                config: MachineConfig::default(),
            }
        }

        fn deps(&self) -> Deps<'_> {
            Deps {
                broker: &self.broker,
                tick_hub: &self.tick_hub,
                sizing: &self.sizing,
                timers: &self.timers,
                clock: &*self.clock,
                config: &self.config,
            }
        }

        fn advance(&self, delta_ms: i64) {
            self.clock.advance(delta_ms);
        }

        fn ingest(&self, price: Decimal, ts_ms: i64) {
            self.tick_hub.ingest(Sym::from("NIFTY"), price, ts_ms);
        }

        fn trades(&self) -> Vec<TradeLogEntry> {
            self.broker.borrow().trades().to_vec()
        }
    }

    fn sym() -> Sym {
        Sym::from("NIFTY")
    }

    fn signal(side: Side, at_price: Decimal, ts_ms: i64) -> Signal {
        Signal::new(sym(), side, ts_ms, at_price)
    }

    #[test]
    fn buy_signal_from_idle_opens_buy_window_and_places_prewindow_entry() {
        let h = Harness::new();
        let mut m = SymbolMachine::new(sym());
        m.on_signal(&h.deps(), &signal(Side::Buy, dec!(100.00), 0));

        let trades = h.trades();
        assert!(trades.is_empty(), "entry is pending, not filled, until a crossing tick arrives");
        assert_eq!(m.state().saved_buy_ltp(), Some(dec!(100.00)));
        assert!(!m.state().is_idle());
    }

    #[test]
    fn buy_window_breakout_reenter_restarts_window_with_same_anchor() {
        let h = Harness::new();
        let mut m = SymbolMachine::new(sym());
        m.on_signal(&h.deps(), &signal(Side::Buy, dec!(100.00), 0));
        let window_id_before = m.state().window_id();

        h.advance(5_000);
        m.on_tick(&h.deps(), dec!(101.00), 5_000);

        assert_ne!(m.state().window_id(), window_id_before);
        assert_eq!(m.state().saved_buy_ltp(), Some(dec!(100.00)));

        let trades = h.trades();
        assert!(trades.is_empty(), "breakout re-entry order is still pending, not yet crossing");

        let due = h.timers.drain_due(65_000);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0], TimerEvent::WindowExpired { sym: sym(), window_id: m.state().window_id() });
    }

    #[test]
    fn buy_window_stop_out_silences_until_original_deadline() {
        let h = Harness::new();
        let mut m = SymbolMachine::new(sym());
        m.on_signal(&h.deps(), &signal(Side::Buy, dec!(100.00), 0));
        h.ingest(dec!(100.00), 0);
        assert_eq!(h.broker.borrow().open_qty(&sym()), 75);

        h.advance(10_000);
        h.ingest(dec!(99.00), 10_000);
        m.on_tick(&h.deps(), dec!(99.00), 10_000);

        assert!(m.state().is_idle());
        assert_eq!(h.broker.borrow().open_qty(&sym()), 0);
        let trades = h.trades();
        assert_eq!(trades.last().unwrap().tag, "BUY_WINDOW_STOP_OUT");
        assert_eq!(trades.last().unwrap().price, dec!(98.50));
        assert!(m.state().is_silenced(30_000));
        assert!(!m.state().is_silenced(60_000));

        h.advance(20_000);
        m.on_signal(&h.deps(), &signal(Side::Buy, dec!(100.00), 30_000));
        assert!(m.state().is_idle(), "buy signal while silenced is ignored");

        h.advance(31_000);
        m.on_signal(&h.deps(), &signal(Side::Buy, dec!(100.00), 61_000));
        assert!(!m.state().is_idle(), "buy signal after the silencing deadline is accepted");
    }

    #[test]
    fn sell_in_position_exits_on_first_tick_and_ignores_rest_of_window() {
        let h = Harness::new();
        h.ingest(dec!(100.00), 0);
        h.broker.borrow_mut().place_limit(sym(), Side::Buy, 75, dec!(100.00), "SEED");
        assert_eq!(h.broker.borrow().open_qty(&sym()), 75);

        let mut m = SymbolMachine::new(sym());
        m.on_signal(&h.deps(), &signal(Side::Sell, dec!(103.00), 0));

        h.advance(2_000);
        h.ingest(dec!(103.20), 2_000);
        m.on_tick(&h.deps(), dec!(103.20), 2_000);

        let trades = h.trades();
        let exit = trades.iter().find(|t| t.tag == "SELL_INPOS_IMMEDIATE_EXIT").unwrap();
        assert_eq!(exit.price, dec!(102.70));
        assert_eq!(h.broker.borrow().open_qty(&sym()), 0);

        let trades_before = h.trades().len();
        h.advance(3_000);
        h.ingest(dec!(200.00), 5_000);
        m.on_tick(&h.deps(), dec!(200.00), 5_000);
        assert_eq!(h.trades().len(), trades_before, "further ticks in-window produce no orders");
    }

    #[test]
    fn sell_flat_breakout_flips_to_buy_window() {
        let h = Harness::new();
        let mut m = SymbolMachine::new(sym());
        m.on_signal(&h.deps(), &signal(Side::Sell, dec!(50.00), 0));

        h.advance(5_000);
        m.on_tick(&h.deps(), dec!(50.60), 5_000);

        assert!(!m.state().is_idle());
        assert_eq!(m.state().saved_buy_ltp(), Some(dec!(51.00)));
    }

    #[test]
    fn sell_flat_discount_reentry_uses_sell_start_anchor() {
        let h = Harness::new();
        let mut m = SymbolMachine::new(sym());

        // Prior cycle: a SELL signal opens a window, a BUY signal arriving
        // inside it captures sell_start_anchor = 100.00 and flips to a buy
        // window; draining that window's timer with no position and no
        // breakout returns the machine to Idle, leaving sell_start_anchor
        // set for the next cycle.
        m.on_signal(&h.deps(), &signal(Side::Sell, dec!(90.00), 0));
        m.on_signal(&h.deps(), &signal(Side::Buy, dec!(100.00), 1_000));
        assert_eq!(m.state().saved_buy_ltp(), Some(dec!(100.00)));

        let window_id = m.state().window_id();
        h.advance(60_000);
        m.on_window_timer(&h.deps(), window_id);
        assert!(m.state().is_idle());

        // New cycle: SELL signal at 99.00, then a tick below the retained
        // sell_start_anchor triggers the discount re-entry.
        m.on_signal(&h.deps(), &signal(Side::Sell, dec!(99.00), 61_000));
        h.advance(3_000);
        m.on_tick(&h.deps(), dec!(98.50), 64_000);

        assert_eq!(m.state().saved_buy_ltp(), Some(dec!(100.00)));
    }

    #[test]
    fn window_superseded_timer_is_a_no_op() {
        let h = Harness::new();
        let mut m = SymbolMachine::new(sym());
        m.on_signal(&h.deps(), &signal(Side::Buy, dec!(100.00), 0));
        let stale_window_id = m.state().window_id();

        h.advance(5_000);
        m.on_tick(&h.deps(), dec!(101.00), 5_000);
        assert_ne!(m.state().window_id(), stale_window_id);

        m.on_window_timer(&h.deps(), stale_window_id);
        assert_ne!(m.state().window_id(), stale_window_id, "stale window_id callback must not re-trigger expiry logic");
    }

    #[test]
    fn entry_ttl_cancels_a_still_pending_entry() {
        let h = Harness::new();
        let mut config = MachineConfig::default();
        config.entry_ttl_ms = Some(3_000);
        let h = Harness { config, ..h };

        let mut m = SymbolMachine::new(sym());
        m.on_signal(&h.deps(), &signal(Side::Buy, dec!(100.00), 0));

        let due = h.timers.drain_due(3_000);
        let order_id = due.iter().find_map(|e| match e {
            TimerEvent::EntryTtlExpired { order_id, .. } => Some(*order_id),
            _ => None,
        });
        let order_id = order_id.expect("entry ttl timer armed");
        m.on_entry_ttl(&h.deps(), order_id);

        assert_eq!(h.broker.borrow().status(order_id), Some(crate::core::OrderStatus::Cancelled));
    }
}
