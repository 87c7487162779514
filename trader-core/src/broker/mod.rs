//! Paper Broker: an in-memory order book, position keeper, and
//! trade log. Subscribes to the Tick Hub only for instruments with a
//! still-pending order, and only while one remains pending.

pub mod types;

pub use types::{
    BrokeragePolicy, CancelOutcome, OrderIntent, PnlSnapshot, Position, TradeLogEntry,
};
use types::RestingOrder;

use crate::clock::Clock;
use crate::core::{OrderId, OrderStatus, Side, Sym};
use crate::tick_hub::{Subscription, TickHub};
use rust_decimal::Decimal;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

fn crosses(side: Side, price: Decimal, limit: Decimal) -> bool {
    match side {
        Side::Buy => price <= limit,
        Side::Sell => price >= limit,
    }
}

pub struct PaperBroker {
    tick_hub: Rc<TickHub>,
    clock: Rc<dyn Clock>,
    brokerage: BrokeragePolicy,
    positions: HashMap<Sym, Position>,
    orders: HashMap<OrderId, RestingOrder>,
    pending_by_sym: HashMap<Sym, Vec<OrderId>>,
    subscriptions: HashMap<Sym, Subscription>,
    trades: Vec<TradeLogEntry>,
    total_brokerage: Decimal,
    self_ref: Weak<RefCell<PaperBroker>>,
}

impl PaperBroker {
    /// The broker needs a weak handle to itself so its tick subscription
    /// closures can call back into it without holding a strong `Rc` that
    /// would cycle against the `Rc<TickHub>` it also holds (see the "cyclic
    /// references between broker and tick hub" redesign note).
    pub fn new(tick_hub: Rc<TickHub>, clock: Rc<dyn Clock>, brokerage: BrokeragePolicy) -> Rc<RefCell<Self>> {
        let broker = Rc::new(RefCell::new(Self {
            tick_hub,
            clock,
            brokerage,
            positions: HashMap::new(),
            orders: HashMap::new(),
            pending_by_sym: HashMap::new(),
            subscriptions: HashMap::new(),
            trades: Vec::new(),
            total_brokerage: Decimal::ZERO,
            self_ref: Weak::new(),
        }));
        broker.borrow_mut().self_ref = Rc::downgrade(&broker);
        broker
    }

    pub fn place_limit(&mut self, sym: Sym, side: Side, qty: i64, limit: Decimal, tag: &'static str) -> OrderId {
        let order_id = OrderId::generate();
        self.orders.insert(
            order_id,
            RestingOrder {
                intent: OrderIntent {
                    sym: sym.clone(),
                    side,
                    qty,
                    limit_price: limit,
                    tag,
                },
                status: OrderStatus::Pending,
            },
        );

        let crosses_now = self
            .tick_hub
            .last_price(&sym)
            .map(|price| crosses(side, price, limit))
            .unwrap_or(false);

        if crosses_now {
            let now_ms = self.clock.now_ms();
            self.fill_at(order_id, limit, now_ms);
        } else {
            self.pending_by_sym.entry(sym.clone()).or_default().push(order_id);
            self.ensure_subscribed(sym);
        }
        order_id
    }

    pub fn cancel(&mut self, order_id: OrderId) -> CancelOutcome {
        match self.orders.get_mut(&order_id) {
            Some(resting) if resting.status == OrderStatus::Pending => {
                resting.status = OrderStatus::Cancelled;
                if let Some(ids) = self.pending_by_sym.get_mut(&resting.intent.sym) {
                    ids.retain(|id| *id != order_id);
                }
                CancelOutcome::Cancelled
            }
            _ => CancelOutcome::NotPending,
        }
    }

    pub fn status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.orders.get(&order_id).map(|o| o.status)
    }

    pub fn open_qty(&self, sym: &Sym) -> i64 {
        self.positions.get(sym).map(|p| p.qty).unwrap_or(0)
    }

    pub fn trades(&self) -> &[TradeLogEntry] {
        &self.trades
    }

    /// Total orders ever placed, regardless of current status.
    pub fn orders_placed_count(&self) -> usize {
        self.orders.len()
    }

    pub fn orders_filled_count(&self) -> usize {
        self.orders.values().filter(|o| o.status == OrderStatus::Filled).count()
    }

    pub fn orders_cancelled_count(&self) -> usize {
        self.orders.values().filter(|o| o.status == OrderStatus::Cancelled).count()
    }

    /// Snapshot of open quantity for every instrument with a non-flat
    /// position.
    pub fn open_positions(&self) -> impl Iterator<Item = (&Sym, i64)> {
        self.positions.iter().filter(|(_, p)| !p.is_flat()).map(|(sym, p)| (sym, p.qty))
    }

    pub fn pnl(&self) -> PnlSnapshot {
        let gross_realized: Decimal = self.positions.values().map(|p| p.realized_gross).sum();
        let unrealized: Decimal = self
            .positions
            .iter()
            .filter(|(_, pos)| !pos.is_flat())
            .map(|(sym, pos)| {
                let last = self.tick_hub.last_price(sym).unwrap_or(pos.avg_price);
                (last - pos.avg_price) * Decimal::from(pos.qty)
            })
            .sum();

        let brokerage = match self.brokerage {
            BrokeragePolicy::PerTradeRate(_) => self.total_brokerage,
            BrokeragePolicy::GrossRealizedRate(rate) => -(rate * gross_realized.max(Decimal::ZERO)),
        };

        let realized_net = gross_realized + brokerage;
        let by_sym = self
            .positions
            .iter()
            .map(|(sym, pos)| (sym.clone(), pos.realized_gross))
            .collect();

        PnlSnapshot {
            realized_net,
            unrealized,
            total: realized_net + unrealized,
            brokerage,
            gross_realized,
            by_sym,
        }
    }

    fn ensure_subscribed(&mut self, sym: Sym) {
        if self.subscriptions.contains_key(&sym) {
            return;
        }
        let weak = self.self_ref.clone();
        let sym_for_closure = sym.clone();
        // `subscribe` replays a cached price synchronously. The first
        // subscription for a sym is always created from inside a
        // `place_limit` call that already holds this broker's RefCell
        // borrow, so that replay would otherwise double-borrow and panic.
        // It is always a price `place_limit` just evaluated as non-crossing,
        // so skipping it here (via `try_borrow_mut`) loses nothing.
        let subscription = self.tick_hub.subscribe(
            sym.clone(),
            Box::new(move |tick| {
                if let Some(broker) = weak.upgrade() {
                    if let Ok(mut broker) = broker.try_borrow_mut() {
                        broker.on_tick(&sym_for_closure, tick.price, tick.ts_ms);
                    }
                }
            }),
        );
        self.subscriptions.insert(sym, subscription);
    }

    fn on_tick(&mut self, sym: &Sym, price: Decimal, ts_ms: i64) {
        let Some(order_ids) = self.pending_by_sym.get(sym).cloned() else {
            return;
        };
        for order_id in order_ids {
            let still_pending = self
                .orders
                .get(&order_id)
                .is_some_and(|o| o.status == OrderStatus::Pending);
            if !still_pending {
                continue;
            }
            let (side, limit) = {
                let intent = &self.orders[&order_id].intent;
                (intent.side, intent.limit_price)
            };
            if crosses(side, price, limit) {
                self.fill_at(order_id, limit, ts_ms);
                if let Some(ids) = self.pending_by_sym.get_mut(sym) {
                    ids.retain(|id| *id != order_id);
                }
            }
        }
    }

    fn fill_at(&mut self, order_id: OrderId, fill_price: Decimal, ts_ms: i64) {
        let Some(resting) = self.orders.get_mut(&order_id) else {
            return;
        };
        resting.status = OrderStatus::Filled;
        let intent = resting.intent.clone();

        let position = self.positions.entry(intent.sym.clone()).or_default();
        let (realized_delta, closed_qty) = match intent.side {
            Side::Buy => {
                position.apply_buy(intent.qty, fill_price);
                (Decimal::ZERO, 0)
            }
            Side::Sell => position.apply_sell(intent.qty, fill_price),
        };

        let brokerage_delta = match (self.brokerage, intent.side) {
            (BrokeragePolicy::PerTradeRate(rate), Side::Sell) if closed_qty > 0 => {
                -(rate * fill_price * Decimal::from(closed_qty))
            }
            _ => Decimal::ZERO,
        };
        self.total_brokerage += brokerage_delta;

        tracing::debug!(
            sym = %intent.sym,
            side = %intent.side,
            qty = intent.qty,
            price = %fill_price,
            tag = intent.tag,
            "order filled"
        );

        self.trades.push(TradeLogEntry {
            ts_ms,
            sym: intent.sym,
            side: intent.side,
            qty: intent.qty,
            price: fill_price,
            realized_delta,
            brokerage_delta,
            tag: intent.tag,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use rust_decimal_macros::dec;

    fn new_broker() -> (Rc<TickHub>, Rc<RefCell<PaperBroker>>) {
        let hub = Rc::new(TickHub::new());
        let clock: Rc<dyn Clock> = Rc::new(VirtualClock::new(0));
        let broker = PaperBroker::new(hub.clone(), clock, BrokeragePolicy::PerTradeRate(dec!(0.001)));
        (hub, broker)
    }

    #[test]
    fn limit_fills_immediately_when_cached_price_crosses() {
        let (hub, broker) = new_broker();
        hub.ingest("NIFTY".into(), dec!(100.00), 0);

        let order_id = broker
            .borrow_mut()
            .place_limit("NIFTY".into(), Side::Buy, 75, dec!(100.00), "TEST");

        assert_eq!(broker.borrow().status(order_id), Some(OrderStatus::Filled));
        assert_eq!(broker.borrow().open_qty(&"NIFTY".into()), 75);
    }

    #[test]
    fn limit_queues_and_fills_on_crossing_tick() {
        let (hub, broker) = new_broker();
        hub.ingest("NIFTY".into(), dec!(100.00), 0);

        let order_id = broker
            .borrow_mut()
            .place_limit("NIFTY".into(), Side::Buy, 75, dec!(95.00), "TEST");
        assert_eq!(broker.borrow().status(order_id), Some(OrderStatus::Pending));

        hub.ingest("NIFTY".into(), dec!(96.00), 1);
        assert_eq!(broker.borrow().status(order_id), Some(OrderStatus::Pending));

        hub.ingest("NIFTY".into(), dec!(95.00), 2);
        assert_eq!(broker.borrow().status(order_id), Some(OrderStatus::Filled));
        assert_eq!(broker.borrow().open_qty(&"NIFTY".into()), 75);
    }

    #[test]
    fn pending_orders_fill_in_fifo_order() {
        let (hub, broker) = new_broker();
        let first = broker
            .borrow_mut()
            .place_limit("NIFTY".into(), Side::Buy, 10, dec!(100.00), "FIRST");
        let second = broker
            .borrow_mut()
            .place_limit("NIFTY".into(), Side::Buy, 10, dec!(101.00), "SECOND");

        hub.ingest("NIFTY".into(), dec!(99.00), 0);

        assert_eq!(broker.borrow().status(first), Some(OrderStatus::Filled));
        assert_eq!(broker.borrow().status(second), Some(OrderStatus::Filled));
        let trades = broker.borrow().trades().to_vec();
        assert_eq!(trades[0].tag, "FIRST");
        assert_eq!(trades[1].tag, "SECOND");
    }

    #[test]
    fn cancel_is_idempotent_and_reports_not_pending_on_filled() {
        let (hub, broker) = new_broker();
        hub.ingest("NIFTY".into(), dec!(100.00), 0);
        let order_id = broker
            .borrow_mut()
            .place_limit("NIFTY".into(), Side::Buy, 75, dec!(100.00), "TEST");

        assert_eq!(broker.borrow_mut().cancel(order_id), CancelOutcome::NotPending);

        let pending_id = broker
            .borrow_mut()
            .place_limit("NIFTY".into(), Side::Buy, 75, dec!(50.00), "TEST2");
        assert_eq!(broker.borrow_mut().cancel(pending_id), CancelOutcome::Cancelled);
        assert_eq!(broker.borrow_mut().cancel(pending_id), CancelOutcome::NotPending);
    }

    #[test]
    fn sell_against_long_realizes_and_charges_brokerage() {
        let (hub, broker) = new_broker();
        hub.ingest("NIFTY".into(), dec!(100.00), 0);
        broker
            .borrow_mut()
            .place_limit("NIFTY".into(), Side::Buy, 75, dec!(100.00), "ENTRY");

        hub.ingest("NIFTY".into(), dec!(110.00), 1);
        broker
            .borrow_mut()
            .place_limit("NIFTY".into(), Side::Sell, 75, dec!(110.00), "EXIT");

        let pnl = broker.borrow().pnl();
        assert_eq!(pnl.gross_realized, dec!(750.00));
        assert_eq!(pnl.brokerage, dec!(-8.250));
        assert_eq!(broker.borrow().open_qty(&"NIFTY".into()), 0);
    }
}
