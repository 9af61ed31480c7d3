//! Writes a backtest result as three CSV files: trades, equity, summary.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::DeskError;
use crate::domain::metrics::Metrics;
use crate::ports::report_port::ReportPort;
use std::fs;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct CsvReportAdapter {
    output_dir: PathBuf,
}

impl CsvReportAdapter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    fn writer(&self, name: &str) -> Result<csv::Writer<fs::File>, DeskError> {
        let path = self.output_dir.join(name);
        csv::Writer::from_path(&path).map_err(|e| csv_error(&path, e))
    }
}

fn csv_error(path: &Path, err: csv::Error) -> DeskError {
    DeskError::Io(std::io::Error::other(format!(
        "failed to write {}: {err}",
        path.display()
    )))
}

fn summary_rows(metrics: &Metrics, result: &BacktestResult) -> Vec<(String, String)> {
    let sharpe = metrics
        .sharpe_ratio
        .map(|s| format!("{s:.4}"))
        .unwrap_or_else(|| "none".to_string());
    let mut rows = vec![
        ("total_return".to_string(), format!("{:.6}", metrics.total_return)),
        ("final_equity".to_string(), format!("{:.2}", metrics.final_equity)),
        ("sharpe_ratio".to_string(), sharpe),
        ("max_drawdown".to_string(), format!("{:.6}", metrics.max_drawdown)),
        (
            "max_drawdown_duration".to_string(),
            metrics.max_drawdown_duration.to_string(),
        ),
        ("total_trades".to_string(), metrics.total_trades.to_string()),
        ("trades_won".to_string(), metrics.trades_won.to_string()),
        ("trades_lost".to_string(), metrics.trades_lost.to_string()),
        ("trades_breakeven".to_string(), metrics.trades_breakeven.to_string()),
        ("win_rate".to_string(), format!("{:.4}", metrics.win_rate)),
        ("profit_factor".to_string(), format!("{:.4}", metrics.profit_factor)),
        ("avg_win".to_string(), format!("{:.2}", metrics.avg_win)),
        ("avg_loss".to_string(), format!("{:.2}", metrics.avg_loss)),
        ("largest_win".to_string(), format!("{:.2}", metrics.largest_win)),
        ("largest_loss".to_string(), format!("{:.2}", metrics.largest_loss)),
        ("avg_holding_secs".to_string(), format!("{:.0}", metrics.avg_holding_secs)),
        ("total_commission".to_string(), format!("{:.2}", metrics.total_commission)),
        ("rejected_entries".to_string(), result.rejections.len().to_string()),
        ("unmatched_signals".to_string(), result.unmatched_signals.to_string()),
    ];
    for summary in &metrics.per_instrument {
        rows.push((
            format!("{}.trades", summary.instrument),
            summary.trades.to_string(),
        ));
        rows.push((
            format!("{}.win_rate", summary.instrument),
            format!("{:.4}", summary.win_rate),
        ));
        rows.push((
            format!("{}.total_pnl", summary.instrument),
            format!("{:.2}", summary.total_pnl),
        ));
    }
    rows
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &BacktestResult) -> Result<(), DeskError> {
        fs::create_dir_all(&self.output_dir)?;

        let path = self.output_dir.join("trades.csv");
        let mut trades = self.writer("trades.csv")?;
        trades
            .write_record([
                "id",
                "instrument",
                "side",
                "quantity",
                "entry_time",
                "entry_price",
                "exit_time",
                "exit_price",
                "stop_loss",
                "take_profit",
                "pnl",
                "pnl_pct",
                "commission",
                "holding_secs",
                "exit_reason",
            ])
            .map_err(|e| csv_error(&path, e))?;
        for trade in &result.trades {
            let position = trade.position();
            trades
                .write_record([
                    position.id.to_string(),
                    trade.instrument().to_string(),
                    trade.side().to_string(),
                    trade.quantity().to_string(),
                    trade.entry_time().format(TIMESTAMP_FORMAT).to_string(),
                    format!("{:.4}", trade.entry_price()),
                    trade.exit_time().format(TIMESTAMP_FORMAT).to_string(),
                    format!("{:.4}", trade.exit_price()),
                    format!("{:.4}", position.stop_loss),
                    format!("{:.4}", position.take_profit),
                    format!("{:.2}", trade.pnl),
                    format!("{:.4}", trade.pnl_pct),
                    format!("{:.2}", trade.commission),
                    trade.holding.num_seconds().to_string(),
                    trade.exit_reason.to_string(),
                ])
                .map_err(|e| csv_error(&path, e))?;
        }
        trades.flush()?;

        let path = self.output_dir.join("equity.csv");
        let mut equity = self.writer("equity.csv")?;
        equity
            .write_record(["timestamp", "equity"])
            .map_err(|e| csv_error(&path, e))?;
        for point in &result.equity_curve {
            equity
                .write_record([
                    point.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    format!("{:.2}", point.equity),
                ])
                .map_err(|e| csv_error(&path, e))?;
        }
        equity.flush()?;

        let path = self.output_dir.join("summary.csv");
        let mut summary = self.writer("summary.csv")?;
        summary
            .write_record(["metric", "value"])
            .map_err(|e| csv_error(&path, e))?;
        for (metric, value) in summary_rows(&result.metrics, result) {
            summary
                .write_record([metric, value])
                .map_err(|e| csv_error(&path, e))?;
        }
        summary.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::{run_backtest, BacktestConfig};
    use crate::domain::ohlcv::PriceBar;
    use crate::domain::signal::{Direction, Signal};
    use chrono::{NaiveDate, NaiveDateTime};
    use tempfile::TempDir;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap()
    }

    fn sample_result() -> BacktestResult {
        let bars: Vec<PriceBar> = [100.0, 101.0, 102.5]
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                instrument: "ITC".into(),
                timestamp: ts(i as u32 + 2),
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 10.0,
            })
            .collect();
        let signals = vec![
            Signal {
                instrument: "ITC".into(),
                timestamp: ts(2),
                direction: Direction::Buy,
            },
            Signal {
                instrument: "ITC".into(),
                timestamp: ts(4),
                direction: Direction::Sell,
            },
        ];
        run_backtest(&bars, &signals, &BacktestConfig::default()).unwrap()
    }

    #[test]
    fn writes_three_files() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("report");
        CsvReportAdapter::new(out.clone())
            .write(&sample_result())
            .unwrap();

        let trades = fs::read_to_string(out.join("trades.csv")).unwrap();
        let lines: Vec<&str> = trades.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("id,instrument,side"));
        assert!(lines[1].contains("ITC,long"));
        assert!(lines[1].ends_with("signal reversal"));

        let equity = fs::read_to_string(out.join("equity.csv")).unwrap();
        assert_eq!(equity.lines().count(), 4);

        let summary = fs::read_to_string(out.join("summary.csv")).unwrap();
        assert!(summary.contains("total_trades,1"));
        assert!(summary.contains("sharpe_ratio,none"));
        assert!(summary.contains("ITC.trades,1"));
        // 1000 @ 100 in, 1000 @ 102.5 out at the default 0.1%
        assert!(summary.contains("total_commission,202.50"));
    }
}
