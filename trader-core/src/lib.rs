//! A single-threaded, event-driven per-instrument trading state machine.
//!
//! A cooperative executor serializes three kinds of events — price ticks,
//! timer firings, and upstream BUY/SELL signals — and hands each to the
//! Machine Registry, which routes it to the one Symbol Machine that owns
//! that instrument.
//!
//! ## Modules
//! - `core`: fundamental domain types (`Sym`, `Side`, `Signal`, error taxonomy)
//! - `clock`: monotonic clock + one-shot cancellable timers
//! - `tick_hub`: last-price cache and ordered tick fan-out
//! - `broker`: the paper fill simulator
//! - `sizing`: lot-size and entry-quantity resolution
//! - `machine`: the per-instrument Symbol Machine FSM
//! - `registry`: owns every live Symbol Machine, routes events to it
//! - `market_hours`: session-window gating
//! - `backtest`: deterministic offline replay driver
//! - `config`: runtime TOML configuration
//! - `utils`: logging and metrics

pub mod core;
pub mod clock;
pub mod tick_hub;
pub mod broker;
pub mod sizing;
pub mod machine;
pub mod registry;
pub mod market_hours;
pub mod config;
pub mod backtest;
pub mod utils;

pub use core::{BrokerError, ConfigError, Signal, SignalError};
pub use core::{round_to_tick, OrderId, OrderStatus, Side, Sym};
pub use clock::{Clock, TimerEvent, TimerHandle, TimerService, VirtualClock, WallClock};
pub use tick_hub::{Tick, TickHub};
pub use broker::{BrokeragePolicy, PaperBroker};
pub use sizing::{InstrumentSpec, SizingService};
pub use machine::{Deps as MachineDeps, MachineConfig, MachineState, SymbolMachine};
pub use registry::{IncomingSignal, MachineRegistry, MissingPricePolicy};
pub use market_hours::MarketHoursGate;
pub use config::Config;

pub use anyhow::{Error, Result};
