pub mod logger;
pub mod metrics;

pub use logger::init_logger;
pub use metrics::TradingMetrics;
