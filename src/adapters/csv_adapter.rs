//! CSV file data adapter.
//!
//! Bars live in `<dir>/<INSTRUMENT>.csv` (timestamp,open,high,low,close,volume);
//! signals in one or more files (timestamp,instrument,direction). Rows are
//! returned in file order: ordering problems are the timeline's to report.

use crate::domain::error::{DataError, DeskError};
use crate::domain::ohlcv::PriceBar;
use crate::domain::signal::{Direction, Signal};
use crate::ports::data_port::DataPort;
use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

pub struct CsvAdapter {
    base_path: PathBuf,
    signal_paths: Vec<PathBuf>,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            signal_paths: Vec::new(),
        }
    }

    /// Add a signal file. May be called once per signal source.
    pub fn with_signals(mut self, path: PathBuf) -> Self {
        self.signal_paths.push(path);
        self
    }

    /// One signal set per file, in the order the files were added.
    pub fn fetch_signal_sets(&self) -> Result<Vec<Vec<Signal>>, DeskError> {
        self.signal_paths.iter().map(|p| read_signals(p)).collect()
    }

    fn csv_path(&self, instrument: &str) -> PathBuf {
        self.base_path.join(format!("{instrument}.csv"))
    }
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, the `T`-separated form, `HH:MM`, or a bare
/// date (midnight).
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_error(path: &Path, reason: impl Into<String>) -> DeskError {
    DataError::Parse {
        source_name: path.display().to_string(),
        reason: reason.into(),
    }
    .into()
}

fn read_records(path: &Path) -> Result<Vec<csv::StringRecord>, DeskError> {
    let content =
        fs::read_to_string(path).map_err(|e| parse_error(path, format!("cannot read file: {e}")))?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    rdr.records()
        .map(|r| r.map_err(|e| parse_error(path, format!("CSV parse error: {e}"))))
        .collect()
}

fn column<'r>(
    record: &'r csv::StringRecord,
    index: usize,
    name: &str,
    path: &Path,
    row: usize,
) -> Result<&'r str, DeskError> {
    record
        .get(index)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| parse_error(path, format!("row {row}: missing {name} column")))
}

fn number(
    record: &csv::StringRecord,
    index: usize,
    name: &str,
    path: &Path,
    row: usize,
) -> Result<f64, DeskError> {
    column(record, index, name, path, row)?
        .parse()
        .map_err(|e| parse_error(path, format!("row {row}: invalid {name} value: {e}")))
}

fn timestamp(record: &csv::StringRecord, path: &Path, row: usize) -> Result<NaiveDateTime, DeskError> {
    let raw = column(record, 0, "timestamp", path, row)?;
    parse_timestamp(raw).ok_or_else(|| parse_error(path, format!("row {row}: invalid timestamp '{raw}'")))
}

fn read_signals(path: &Path) -> Result<Vec<Signal>, DeskError> {
    let records = read_records(path)?;

    let mut signals = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let row = i + 2;
        let raw = column(record, 2, "direction", path, row)?;
        let value: i64 = raw
            .parse()
            .map_err(|e| parse_error(path, format!("row {row}: invalid direction: {e}")))?;
        signals.push(Signal {
            timestamp: timestamp(record, path, row)?,
            instrument: column(record, 1, "instrument", path, row)?.to_string(),
            direction: Direction::try_from(value)?,
        });
    }
    Ok(signals)
}

impl DataPort for CsvAdapter {
    fn fetch_bars(&self, instrument: &str) -> Result<Vec<PriceBar>, DeskError> {
        let path = self.csv_path(instrument);
        let records = read_records(&path)?;

        let mut bars = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let row = i + 2;
            bars.push(PriceBar {
                instrument: instrument.to_string(),
                timestamp: timestamp(record, &path, row)?,
                open: number(record, 1, "open", &path, row)?,
                high: number(record, 2, "high", &path, row)?,
                low: number(record, 3, "low", &path, row)?,
                close: number(record, 4, "close", &path, row)?,
                volume: number(record, 5, "volume", &path, row)?,
            });
        }
        Ok(bars)
    }

    fn list_instruments(&self) -> Result<Vec<String>, DeskError> {
        let entries = fs::read_dir(&self.base_path)?;
        let signal_names: Vec<_> = self
            .signal_paths
            .iter()
            .filter_map(|p| p.file_name())
            .collect();

        let mut instruments = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if signal_names.contains(&name.as_os_str()) {
                continue;
            }
            let name_str = name.to_string_lossy();
            if let Some(instrument) = name_str.strip_suffix(".csv") {
                instruments.push(instrument.to_string());
            }
        }

        instruments.sort();
        Ok(instruments)
    }

    fn fetch_signals(&self) -> Result<Vec<Signal>, DeskError> {
        Ok(self.fetch_signal_sets()?.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let csv_content = "timestamp,open,high,low,close,volume\n\
            2024-01-15 15:30:00,100.0,110.0,90.0,105.0,50000\n\
            2024-01-16 15:30:00,105.0,115.0,100.0,110.0,60000\n\
            2024-01-17,110.0,120.0,105.0,115.0,55000\n";

        fs::write(path.join("RELIANCE.csv"), csv_content).unwrap();
        fs::write(path.join("TCS.csv"), "timestamp,open,high,low,close,volume\n").unwrap();
        fs::write(
            path.join("signals.csv"),
            "timestamp,instrument,direction\n\
             2024-01-15 15:30:00,RELIANCE,1\n\
             2024-01-16 15:30:00,RELIANCE,0\n\
             2024-01-17 00:00:00,RELIANCE,-1\n",
        )
        .unwrap();

        (dir, path)
    }

    #[test]
    fn fetch_bars_returns_rows_in_file_order() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter.fetch_bars("RELIANCE").unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].instrument, "RELIANCE");
        assert_eq!(bars[0].timestamp, parse_timestamp("2024-01-15 15:30:00").unwrap());
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 110.0);
        assert_eq!(bars[0].low, 90.0);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].volume, 50000.0);
        assert_eq!(bars[2].timestamp, parse_timestamp("2024-01-17 00:00:00").unwrap());
    }

    #[test]
    fn fetch_bars_errors_for_missing_file() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert!(matches!(
            adapter.fetch_bars("XYZ"),
            Err(DeskError::Data(DataError::Parse { .. }))
        ));
    }

    #[test]
    fn fetch_bars_reports_bad_number() {
        let (_dir, path) = setup_test_data();
        fs::write(
            path.join("BAD.csv"),
            "timestamp,open,high,low,close,volume\n2024-01-15,abc,1,1,1,1\n",
        )
        .unwrap();
        let err = CsvAdapter::new(path).fetch_bars("BAD").unwrap_err();
        assert!(err.to_string().contains("invalid open value"));
    }

    #[test]
    fn list_instruments_skips_signal_file() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path.clone()).with_signals(path.join("signals.csv"));
        assert_eq!(adapter.list_instruments().unwrap(), vec!["RELIANCE", "TCS"]);
    }

    #[test]
    fn fetch_signals_parses_directions() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path.clone()).with_signals(path.join("signals.csv"));
        let signals = adapter.fetch_signals().unwrap();
        assert_eq!(signals.len(), 3);
        assert_eq!(signals[0].direction, Direction::Buy);
        assert_eq!(signals[1].direction, Direction::Hold);
        assert_eq!(signals[2].direction, Direction::Sell);
    }

    #[test]
    fn fetch_signals_rejects_unknown_direction() {
        let (_dir, path) = setup_test_data();
        let file = path.join("bad_signals.csv");
        fs::write(&file, "timestamp,instrument,direction\n2024-01-15,TCS,3\n").unwrap();
        let err = CsvAdapter::new(path).with_signals(file).fetch_signals().unwrap_err();
        assert!(matches!(
            err,
            DeskError::Data(DataError::InvalidDirection { value: 3 })
        ));
    }

    #[test]
    fn signal_sets_keep_files_apart() {
        let (_dir, path) = setup_test_data();
        let second = path.join("momentum.csv");
        fs::write(&second, "timestamp,instrument,direction\n2024-01-15 15:30:00,TCS,-1\n").unwrap();
        let adapter = CsvAdapter::new(path.clone())
            .with_signals(path.join("signals.csv"))
            .with_signals(second);

        let sets = adapter.fetch_signal_sets().unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].len(), 3);
        assert_eq!(sets[1][0].instrument, "TCS");
        assert_eq!(adapter.fetch_signals().unwrap().len(), 4);
        assert_eq!(adapter.list_instruments().unwrap(), vec!["RELIANCE", "TCS"]);
    }

    #[test]
    fn no_signal_file_means_no_signals() {
        let (_dir, path) = setup_test_data();
        assert!(CsvAdapter::new(path).fetch_signals().unwrap().is_empty());
    }

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp("2024-01-15T09:15:00").is_some());
        assert!(parse_timestamp("2024-01-15 09:15").is_some());
        assert!(parse_timestamp("15/01/2024").is_none());
    }
}
