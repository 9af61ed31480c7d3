//! Core domain types and logic: bars, signals, risk, the position ledger and
//! the two drivers built on it.

pub mod ohlcv;
pub mod signal;
pub mod position;
pub mod risk;
pub mod ledger;
pub mod timeline;
pub mod backtest;
pub mod live;
pub mod metrics;
pub mod config_validation;
pub mod error;
