//! Performance metrics over a closed-trade ledger and an equity curve.
//!
//! Read-only: nothing here mutates the inputs, and no input makes it panic
//! or divide by zero.

use std::collections::BTreeMap;

use super::ledger::EquityPoint;
use super::position::TradeRecord;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub total_return: f64,
    pub final_equity: f64,
    /// `None` when the return series has no dispersion or fewer than two
    /// trades closed.
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown: f64,
    /// Longest run of equity points spent below a prior peak.
    pub max_drawdown_duration: usize,
    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_holding_secs: f64,
    pub total_commission: f64,
    pub per_instrument: Vec<InstrumentSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSummary {
    pub instrument: String,
    pub trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
}

impl Metrics {
    pub fn compute(
        trades: &[TradeRecord],
        equity_curve: &[EquityPoint],
        capital: f64,
        annualization_factor: f64,
    ) -> Self {
        let final_equity = equity_curve.last().map(|p| p.equity).unwrap_or(capital);
        let total_return = if capital > 0.0 {
            (final_equity - capital) / capital
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve, capital);
        let sharpe_ratio = if trades.len() < 2 {
            None
        } else {
            compute_sharpe(equity_curve, annualization_factor)
        };

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_holding_secs = 0i64;
        let mut total_commission = 0.0_f64;

        for trade in trades {
            let pnl = trade.pnl;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            } else {
                trades_breakeven += 1;
            }
            total_holding_secs += trade.holding.num_seconds();
            total_commission += trade.commission;
        }

        let total_trades = trades.len();
        let win_rate = ratio(trades_won as f64, total_trades);
        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Metrics {
            total_return,
            final_equity,
            sharpe_ratio,
            max_drawdown,
            max_drawdown_duration,
            total_trades,
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate,
            profit_factor,
            avg_win: ratio(total_wins, trades_won),
            avg_loss: ratio(total_losses, trades_lost),
            largest_win,
            largest_loss,
            avg_holding_secs: ratio(total_holding_secs as f64, total_trades),
            total_commission,
            per_instrument: per_instrument(trades),
        }
    }
}

fn ratio(numerator: f64, count: usize) -> f64 {
    if count > 0 {
        numerator / count as f64
    } else {
        0.0
    }
}

fn per_instrument(trades: &[TradeRecord]) -> Vec<InstrumentSummary> {
    let mut grouped: BTreeMap<&str, (usize, usize, f64)> = BTreeMap::new();
    for trade in trades {
        let entry = grouped.entry(trade.instrument()).or_default();
        entry.0 += 1;
        if trade.pnl > 0.0 {
            entry.1 += 1;
        }
        entry.2 += trade.pnl;
    }
    grouped
        .into_iter()
        .map(|(instrument, (count, wins, pnl))| InstrumentSummary {
            instrument: instrument.to_string(),
            trades: count,
            win_rate: ratio(wins as f64, count),
            total_pnl: pnl,
        })
        .collect()
}

/// Peak starts at `capital`, so a curve that opens underwater still counts.
fn compute_drawdown(equity_curve: &[EquityPoint], capital: f64) -> (f64, usize) {
    let mut peak = capital;
    let mut max_dd = 0.0_f64;
    let mut current_duration = 0usize;
    let mut max_duration = 0usize;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            current_duration = 0;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
            current_duration += 1;
            max_duration = max_duration.max(current_duration);
        }
    }

    (max_dd, max_duration)
}

fn compute_sharpe(equity_curve: &[EquityPoint], annualization_factor: f64) -> Option<f64> {
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].equity > 0.0)
        .map(|w| (w[1].equity - w[0].equity) / w[0].equity)
        .collect();

    if returns.len() < 2 {
        return None;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stddev = variance.sqrt();

    if stddev > 0.0 && stddev.is_finite() {
        Some(mean / stddev * annualization_factor.sqrt())
    } else {
        None
    }
}
