#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use riskdesk::domain::backtest::BacktestConfig;
use riskdesk::domain::ohlcv::PriceBar;
use riskdesk::domain::position::IntrabarPolicy;
use riskdesk::domain::risk::{BracketPolicy, RiskLimits};
use riskdesk::domain::signal::{Direction, Signal};
use std::fs;
use std::path::Path;

pub fn ts(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

pub fn make_bar(
    instrument: &str,
    timestamp: NaiveDateTime,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
) -> PriceBar {
    PriceBar {
        instrument: instrument.to_string(),
        timestamp,
        open,
        high,
        low,
        close,
        volume: 10_000.0,
    }
}

/// A bar opening and closing at `close` with a one-point range either side.
pub fn quiet_bar(instrument: &str, timestamp: NaiveDateTime, close: f64) -> PriceBar {
    make_bar(instrument, timestamp, close, close + 0.5, close - 0.5, close)
}

pub fn signal(instrument: &str, timestamp: NaiveDateTime, direction: Direction) -> Signal {
    Signal {
        instrument: instrument.to_string(),
        timestamp,
        direction,
    }
}

/// 100k capital, 2% risk, 5% daily loss, 5% stop with a 2:1 target.
/// Each full-size entry commits roughly 40% of capital.
pub fn five_pct_config(max_positions: usize, allow_shorting: bool) -> BacktestConfig {
    BacktestConfig {
        limits: RiskLimits::new(100_000.0, 2.0, 5.0, max_positions).unwrap(),
        bracket: BracketPolicy::new(5.0, 2.0, IntrabarPolicy::StopFirst, allow_shorting).unwrap(),
        annualization_factor: 252.0,
    }
}

pub fn write_bars_csv(dir: &Path, instrument: &str, bars: &[PriceBar]) {
    let mut content = String::from("timestamp,open,high,low,close,volume\n");
    for b in bars {
        content.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.timestamp.format("%Y-%m-%d %H:%M:%S"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    fs::write(dir.join(format!("{instrument}.csv")), content).unwrap();
}

pub fn write_signals_csv(path: &Path, signals: &[Signal]) {
    let mut content = String::from("timestamp,instrument,direction\n");
    for s in signals {
        content.push_str(&format!(
            "{},{},{}\n",
            s.timestamp.format("%Y-%m-%d %H:%M:%S"),
            s.instrument,
            s.direction.as_i8()
        ));
    }
    fs::write(path, content).unwrap();
}
