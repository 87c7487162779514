//! Shared plumbing for the `trader-live` and `trader-backtest` binaries.

pub mod common;
