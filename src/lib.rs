//! riskdesk: signal-to-trade execution and risk engine.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`]. The same position ledger backs a
//! deterministic backtest and a polling paper/live driver.

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
pub mod logging;
