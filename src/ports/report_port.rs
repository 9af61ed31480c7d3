//! Report output port trait.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::DeskError;

/// Port for persisting a run's trades, equity curve and summary.
pub trait ReportPort {
    fn write(&self, result: &BacktestResult) -> Result<(), DeskError>;
}
