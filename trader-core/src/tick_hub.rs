//! Tick Hub: caches the latest price per instrument and fans
//! out tick events to subscribers in subscription order.
//!
//! Subscribers are plain closures rather than hidden `windowId`-checking
//! callbacks (see the "closure-based tick subscriptions" redesign note):
//! the caller is expected to capture whatever shared state it needs (broker,
//! timer service, its own window id) and to perform its own `window_id`
//! comparison inside the closure body.

use crate::core::Sym;
use rust_decimal::Decimal;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A single last-traded-price update.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub sym: Sym,
    pub ts_ms: i64,
    pub price: Decimal,
}

pub type TickHandler = Box<dyn FnMut(&Tick)>;

/// Handle returned by [`TickHub::subscribe`]. Unsubscribing is idempotent:
/// calling it twice, or after the hub has already forgotten the symbol, is a
/// no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    sym: Sym,
    id: u64,
}

struct SymbolState {
    last_price: Option<Decimal>,
    last_ts_ms: Option<i64>,
    next_id: u64,
    subscribers: Vec<(u64, Rc<RefCell<TickHandler>>)>,
}

impl SymbolState {
    fn new() -> Self {
        Self {
            last_price: None,
            last_ts_ms: None,
            next_id: 0,
            subscribers: Vec::new(),
        }
    }
}

/// Single-threaded: delivery is serialized by construction (there is no
/// locking between `ingest` and a subscriber's closure), matching the
/// cooperative-executor model.
pub struct TickHub {
    symbols: RefCell<HashMap<Sym, SymbolState>>,
}

impl Default for TickHub {
    fn default() -> Self {
        Self::new()
    }
}

impl TickHub {
    pub fn new() -> Self {
        Self {
            symbols: RefCell::new(HashMap::new()),
        }
    }

    pub fn last_price(&self, sym: &Sym) -> Option<Decimal> {
        self.symbols.borrow().get(sym).and_then(|s| s.last_price)
    }

    /// Subscribe to `sym`. If a cached price already exists it is delivered
    /// synchronously once, before this call returns; every later `ingest`
    /// delivers its new price.
    pub fn subscribe(&self, sym: Sym, handler: TickHandler) -> Subscription {
        let cached = {
            let symbols = self.symbols.borrow();
            symbols.get(&sym).and_then(|s| match (s.last_price, s.last_ts_ms) {
                (Some(price), Some(ts_ms)) => Some(Tick {
                    sym: sym.clone(),
                    ts_ms,
                    price,
                }),
                _ => None,
            })
        };

        let handler = Rc::new(RefCell::new(handler));
        if let Some(tick) = &cached {
            (handler.borrow_mut())(tick);
        }

        let mut symbols = self.symbols.borrow_mut();
        let state = symbols.entry(sym.clone()).or_insert_with(SymbolState::new);
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push((id, handler));
        Subscription { sym, id }
    }

    /// Idempotent.
    pub fn unsubscribe(&self, sub: Subscription) {
        if let Some(state) = self.symbols.borrow_mut().get_mut(&sub.sym) {
            state.subscribers.retain(|(id, _)| *id != sub.id);
        }
    }

    /// Update the cache, then deliver to every subscriber of `sym` in
    /// subscription order. The subscriber list is snapshotted before
    /// delivery starts, so an unsubscribe triggered by one handler does not
    /// skip a later handler in the same delivery.
    pub fn ingest(&self, sym: Sym, price: Decimal, ts_ms: i64) {
        {
            let mut symbols = self.symbols.borrow_mut();
            let state = symbols.entry(sym.clone()).or_insert_with(SymbolState::new);
            debug_assert!(
                state.last_ts_ms.map_or(true, |prev| ts_ms >= prev),
                "tick timestamps must be non-decreasing per instrument"
            );
            state.last_price = Some(price);
            state.last_ts_ms = Some(ts_ms);
        }

        let tick = Tick {
            sym: sym.clone(),
            ts_ms,
            price,
        };
        let snapshot: Vec<Rc<RefCell<TickHandler>>> = {
            let symbols = self.symbols.borrow();
            symbols
                .get(&sym)
                .map(|s| s.subscribers.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in snapshot {
            (handler.borrow_mut())(&tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn ingest_without_subscribers_just_caches() {
        let hub = TickHub::new();
        hub.ingest("NIFTY".into(), dec!(100.00), 0);
        assert_eq!(hub.last_price(&"NIFTY".into()), Some(dec!(100.00)));
    }

    #[test]
    fn subscribe_delivers_cached_value_once_synchronously() {
        let hub = TickHub::new();
        hub.ingest("NIFTY".into(), dec!(100.00), 0);

        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = hub.subscribe(
            "NIFTY".into(),
            Box::new(move |t| seen2.borrow_mut().push(t.price)),
        );
        assert_eq!(*seen.borrow(), vec![dec!(100.00)]);
    }

    #[test]
    fn subscribe_before_any_tick_delivers_nothing_yet() {
        let hub = TickHub::new();
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = hub.subscribe(
            "NIFTY".into(),
            Box::new(move |t| seen2.borrow_mut().push(t.price)),
        );
        assert!(seen.borrow().is_empty());

        hub.ingest("NIFTY".into(), dec!(101.00), 1);
        assert_eq!(*seen.borrow(), vec![dec!(101.00)]);
    }

    #[test]
    fn multiple_subscribers_see_ticks_in_subscription_order() {
        let hub = TickHub::new();
        let order = Rc::new(StdRefCell::new(Vec::new()));

        let order_a = order.clone();
        let _sub_a = hub.subscribe("NIFTY".into(), Box::new(move |_| order_a.borrow_mut().push('A')));
        let order_b = order.clone();
        let _sub_b = hub.subscribe("NIFTY".into(), Box::new(move |_| order_b.borrow_mut().push('B')));

        hub.ingest("NIFTY".into(), dec!(100.00), 0);
        assert_eq!(*order.borrow(), vec!['A', 'B']);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let hub = TickHub::new();
        let sub = hub.subscribe("NIFTY".into(), Box::new(|_| {}));
        hub.unsubscribe(sub.clone());
        hub.unsubscribe(sub);
    }

    #[test]
    fn later_subscriber_still_sees_tick_when_earlier_one_unsubscribes_during_delivery() {
        let hub = Rc::new(TickHub::new());
        let order = Rc::new(StdRefCell::new(Vec::new()));

        let hub_a = hub.clone();
        let order_a = order.clone();
        let sub_a_cell: Rc<StdRefCell<Option<Subscription>>> = Rc::new(StdRefCell::new(None));
        let sub_a_cell2 = sub_a_cell.clone();
        let sub_a = hub.subscribe(
            "NIFTY".into(),
            Box::new(move |_| {
                order_a.borrow_mut().push('A');
                if let Some(sub) = sub_a_cell2.borrow_mut().take() {
                    hub_a.unsubscribe(sub);
                }
            }),
        );
        *sub_a_cell.borrow_mut() = Some(sub_a);

        let order_b = order.clone();
        let _sub_b = hub.subscribe("NIFTY".into(), Box::new(move |_| order_b.borrow_mut().push('B')));

        hub.ingest("NIFTY".into(), dec!(100.00), 0);
        assert_eq!(*order.borrow(), vec!['A', 'B']);

        order.borrow_mut().clear();
        hub.ingest("NIFTY".into(), dec!(101.00), 1);
        assert_eq!(*order.borrow(), vec!['B']);
    }
}
