//! Clock & Timer Service.
//!
//! A monotonic `now()` plus one-shot, cancellable timers. Firing is never
//! delivered directly to a callback; it is handed to the executor as a typed
//! [`TimerEvent`] so ordering against ticks and signals stays explicit (see
//! the "setTimeout callbacks capturing `this`" redesign note).

use crate::core::{OrderId, Sym};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A typed timer firing, replacing closure-based `setTimeout` callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// A Symbol Machine window's 60s deadline elapsed.
    WindowExpired { sym: Sym, window_id: u64 },
    /// `entry_ttl_ms` elapsed on a still-pending entry order.
    EntryTtlExpired { sym: Sym, order_id: OrderId },
    /// A `wait_then_seed` deferred signal's timeout elapsed with no tick
    /// having arrived for its symbol.
    SeedTimeout { sym: Sym },
}

/// Monotonic "now", independent of wall-clock jumps.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Real time, backed by the system clock.
#[derive(Debug, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now_ms(&self) -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the unix epoch")
            .as_millis() as i64
    }
}

/// Advances only when [`VirtualClock::advance`] is called. Used by tests and
/// the Backtest Driver so scenario outputs are byte-identical across runs.
#[derive(Debug)]
pub struct VirtualClock {
    now_ms: AtomicI64,
}

impl VirtualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    /// Advance the clock by `delta_ms` and return the new `now()`.
    pub fn advance(&self, delta_ms: i64) -> i64 {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
    }

    /// Jump directly to an absolute timestamp. Used by the backtest driver
    /// when replaying a merged tick/signal stream with gaps.
    pub fn set(&self, at_ms: i64) {
        self.now_ms.store(at_ms, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Handle to a scheduled, not-yet-fired timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Armed {
    fire_at_ms: i64,
    event: TimerEvent,
}

/// One-shot cancellable timers, delivered on the same single-threaded
/// executor that runs machine transitions.
///
/// Firing never happens before `now() + duration`. Cancellation is
/// idempotent. When multiple timers are due at once, `drain_due` returns
/// them in the order they were scheduled.
#[derive(Clone)]
pub struct TimerService {
    inner: Arc<TimerServiceInner>,
}

struct TimerServiceInner {
    next_seq: AtomicU64,
    armed: Mutex<BTreeMap<u64, Armed>>,
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TimerServiceInner {
                next_seq: AtomicU64::new(0),
                armed: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Arm a timer to fire at `now_ms + after_ms` or later.
    pub fn schedule(&self, now_ms: i64, after_ms: i64, event: TimerEvent) -> TimerHandle {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        self.inner.armed.lock().insert(
            seq,
            Armed {
                fire_at_ms: now_ms + after_ms,
                event,
            },
        );
        TimerHandle(seq)
    }

    /// Cancel a timer. A no-op if it already fired or was already cancelled.
    pub fn cancel(&self, handle: TimerHandle) {
        self.inner.armed.lock().remove(&handle.0);
    }

    /// Remove and return every timer due at or before `now_ms`, in schedule
    /// order (earliest-scheduled first, not earliest-deadline first, so two
    /// timers armed for the same instant fire in arming order).
    pub fn drain_due(&self, now_ms: i64) -> Vec<TimerEvent> {
        let mut armed = self.inner.armed.lock();
        let due: Vec<u64> = armed
            .iter()
            .filter(|(_, a)| a.fire_at_ms <= now_ms)
            .map(|(seq, _)| *seq)
            .collect();
        due.into_iter()
            .map(|seq| armed.remove(&seq).expect("key just observed present").event)
            .collect()
    }

    /// The timestamp of the next still-armed timer, if any. Used by the live
    /// runner to size its sleep between poll iterations.
    pub fn next_deadline_ms(&self) -> Option<i64> {
        self.inner
            .armed
            .lock()
            .values()
            .map(|a| a.fire_at_ms)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_does_not_fire_before_deadline() {
        let svc = TimerService::new();
        svc.schedule(0, 1000, TimerEvent::WindowExpired { sym: "A".into(), window_id: 1 });
        assert!(svc.drain_due(999).is_empty());
        assert_eq!(svc.drain_due(1000).len(), 1);
    }

    #[test]
    fn cancellation_is_idempotent() {
        let svc = TimerService::new();
        let handle = svc.schedule(0, 100, TimerEvent::WindowExpired { sym: "A".into(), window_id: 1 });
        svc.cancel(handle);
        svc.cancel(handle);
        assert!(svc.drain_due(100).is_empty());
    }

    #[test]
    fn due_timers_fire_in_schedule_order() {
        let svc = TimerService::new();
        svc.schedule(0, 50, TimerEvent::WindowExpired { sym: "A".into(), window_id: 1 });
        svc.schedule(0, 10, TimerEvent::WindowExpired { sym: "B".into(), window_id: 1 });
        let due = svc.drain_due(100);
        assert_eq!(
            due,
            vec![
                TimerEvent::WindowExpired { sym: "A".into(), window_id: 1 },
                TimerEvent::WindowExpired { sym: "B".into(), window_id: 1 },
            ]
        );
    }

    #[test]
    fn virtual_clock_advances_only_on_request() {
        let clock = VirtualClock::new(0);
        assert_eq!(clock.now_ms(), 0);
        assert_eq!(clock.advance(5_000), 5_000);
        assert_eq!(clock.now_ms(), 5_000);
    }
}
