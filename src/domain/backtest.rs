//! Deterministic historical replay.
//!
//! No I/O and no clock: the same bars and signals always produce the same
//! trades, equity curve and metrics.

use tracing::{debug, info};

use super::error::DataError;
use super::ledger::{EquityPoint, PositionLedger, Rejection};
use super::metrics::{Metrics, TRADING_DAYS_PER_YEAR};
use super::ohlcv::PriceBar;
use super::position::TradeRecord;
use super::risk::{BracketPolicy, RiskLimits};
use super::signal::Signal;
use super::timeline::build_timeline;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacktestConfig {
    pub limits: RiskLimits,
    pub bracket: BracketPolicy,
    pub annualization_factor: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            limits: RiskLimits::default(),
            bracket: BracketPolicy::default(),
            annualization_factor: TRADING_DAYS_PER_YEAR,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub rejections: Vec<Rejection>,
    pub unmatched_signals: usize,
    pub metrics: Metrics,
}

impl BacktestResult {
    /// Snapshot a ledger's history and compute its metrics.
    pub fn from_ledger(ledger: &PositionLedger, unmatched_signals: usize, annualization_factor: f64) -> Self {
        let metrics = Metrics::compute(
            ledger.trades(),
            ledger.equity_curve(),
            ledger.limits().capital(),
            annualization_factor,
        );
        Self {
            trades: ledger.trades().to_vec(),
            equity_curve: ledger.equity_curve().to_vec(),
            rejections: ledger.rejections().to_vec(),
            unmatched_signals,
            metrics,
        }
    }
}

/// Replay `bars` and `signals` through a fresh ledger.
///
/// Steps:
/// 1. Merge bars into timestamp slices (fails on malformed or out-of-order bars)
/// 2. Apply each slice: exits, then entries, then the equity point
/// 3. Force-close whatever is still open at the final timestamp
/// 4. Compute metrics over the closed trades and the equity curve
pub fn run_backtest(
    bars: &[PriceBar],
    signals: &[Signal],
    config: &BacktestConfig,
) -> Result<BacktestResult, DataError> {
    let timeline = build_timeline(bars, signals)?;
    if timeline.unmatched_signals > 0 {
        info!(
            count = timeline.unmatched_signals,
            "signals without a matching bar were ignored"
        );
    }

    let mut ledger = PositionLedger::new(config.limits, config.bracket);
    for slice in &timeline.slices {
        let report = ledger.apply_slice(slice)?;
        debug!(
            timestamp = %slice.timestamp,
            closed = report.closed,
            opened = report.opened,
            rejected = report.rejected,
            "slice applied"
        );
    }

    if let Some(last) = timeline.slices.last() {
        let closed = ledger.force_close_all(last.timestamp);
        if !closed.is_empty() {
            info!(count = closed.len(), "force-closed open positions at end of data");
        }
    }

    let result = BacktestResult::from_ledger(&ledger, timeline.unmatched_signals, config.annualization_factor);
    info!(
        trades = result.metrics.total_trades,
        final_equity = result.metrics.final_equity,
        total_return = result.metrics.total_return,
        "backtest complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::ExitReason;
    use crate::domain::signal::Direction;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap()
    }

    fn bar(day: u32, close: f64) -> PriceBar {
        PriceBar {
            instrument: "WIPRO".into(),
            timestamp: ts(day),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 500.0,
        }
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let c = BacktestConfig::default();
        assert!((c.limits.capital() - 100_000.0).abs() < f64::EPSILON);
        assert!((c.bracket.stop_loss_pct() - 2.0).abs() < f64::EPSILON);
        assert!((c.annualization_factor - 252.0).abs() < f64::EPSILON);
        assert!(!c.bracket.allow_shorting);
    }

    #[test]
    fn empty_input_yields_empty_result() {
        let result = run_backtest(&[], &[], &BacktestConfig::default()).unwrap();
        assert!(result.trades.is_empty());
        assert!(result.equity_curve.is_empty());
        assert_eq!(result.metrics.sharpe_ratio, None);
    }

    #[test]
    fn open_position_is_forced_closed_at_end() {
        let bars = vec![bar(2, 100.0), bar(3, 101.0), bar(4, 102.0)];
        let signals = vec![Signal {
            instrument: "WIPRO".into(),
            timestamp: ts(2),
            direction: Direction::Buy,
        }];
        let result = run_backtest(&bars, &signals, &BacktestConfig::default()).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::ForcedClose);
        assert_eq!(result.trades[0].exit_time(), ts(4));
        assert_eq!(result.equity_curve.len(), 3);
    }
}
