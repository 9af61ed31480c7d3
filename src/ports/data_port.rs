//! Data access port trait.

use crate::domain::error::DeskError;
use crate::domain::ohlcv::PriceBar;
use crate::domain::signal::Signal;

pub trait DataPort {
    /// Bars for one instrument, in file order.
    fn fetch_bars(&self, instrument: &str) -> Result<Vec<PriceBar>, DeskError>;

    /// Instruments the source can serve, sorted.
    fn list_instruments(&self) -> Result<Vec<String>, DeskError>;

    fn fetch_signals(&self) -> Result<Vec<Signal>, DeskError>;
}
