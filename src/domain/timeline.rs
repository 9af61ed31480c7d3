//! Merges per-instrument bar streams and a signal stream into one
//! timestamp-ordered sequence of slices.

use chrono::NaiveDateTime;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use super::error::DataError;
use super::ohlcv::PriceBar;
use super::signal::{Direction, Signal};

/// Every bar sharing one timestamp, plus the signals that landed on them.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub timestamp: NaiveDateTime,
    /// Sorted by instrument.
    pub bars: Vec<PriceBar>,
    pub signals: BTreeMap<String, Direction>,
}

impl Slice {
    pub fn signal_for(&self, instrument: &str) -> Option<Direction> {
        self.signals.get(instrument).copied()
    }

    pub fn bar_for(&self, instrument: &str) -> Option<&PriceBar> {
        self.bars.iter().find(|b| b.instrument == instrument)
    }
}

/// One live observation: a bar and the direction produced for it.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketEvent {
    pub bar: PriceBar,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub slices: Vec<Slice>,
    /// Signals whose (instrument, timestamp) matched no bar.
    pub unmatched_signals: usize,
}

/// Build the merged timeline. Bars must be in time order per instrument
/// (instruments may interleave). Duplicate signals are rejected.
pub fn build_timeline(bars: &[PriceBar], signals: &[Signal]) -> Result<Timeline, DataError> {
    let mut last_seen: BTreeMap<&str, NaiveDateTime> = BTreeMap::new();
    let mut by_time: BTreeMap<NaiveDateTime, Vec<PriceBar>> = BTreeMap::new();

    for bar in bars {
        bar.validate()?;
        match last_seen.entry(bar.instrument.as_str()) {
            Entry::Occupied(mut prev) => {
                if bar.timestamp <= *prev.get() {
                    return Err(DataError::NonMonotonic {
                        instrument: bar.instrument.clone(),
                        previous: *prev.get(),
                        current: bar.timestamp,
                    });
                }
                prev.insert(bar.timestamp);
            }
            Entry::Vacant(slot) => {
                slot.insert(bar.timestamp);
            }
        }
        by_time.entry(bar.timestamp).or_default().push(bar.clone());
    }

    let mut keyed: BTreeMap<(&str, NaiveDateTime), Direction> = BTreeMap::new();
    for sig in signals {
        if keyed
            .insert((sig.instrument.as_str(), sig.timestamp), sig.direction)
            .is_some()
        {
            return Err(DataError::DuplicateSignal {
                instrument: sig.instrument.clone(),
                timestamp: sig.timestamp,
            });
        }
    }

    let mut slices: Vec<Slice> = by_time
        .into_iter()
        .map(|(timestamp, mut bars)| {
            bars.sort_by(|a, b| a.instrument.cmp(&b.instrument));
            Slice {
                timestamp,
                bars,
                signals: BTreeMap::new(),
            }
        })
        .collect();

    let mut unmatched_signals = 0;
    for ((instrument, timestamp), direction) in keyed {
        let slot = slices
            .binary_search_by(|s| s.timestamp.cmp(&timestamp))
            .ok()
            .and_then(|i| slices.get_mut(i))
            .filter(|s| s.bar_for(instrument).is_some());
        match slot {
            Some(slice) => {
                slice.signals.insert(instrument.to_string(), direction);
            }
            None => unmatched_signals += 1,
        }
    }

    Ok(Timeline {
        slices,
        unmatched_signals,
    })
}

/// Group one poll's worth of live events into slices.
pub fn slices_from_events(events: &[MarketEvent]) -> Result<Vec<Slice>, DataError> {
    let bars: Vec<PriceBar> = events.iter().map(|e| e.bar.clone()).collect();
    let signals: Vec<Signal> = events
        .iter()
        .filter(|e| e.direction != Direction::Hold)
        .map(|e| Signal {
            instrument: e.bar.instrument.clone(),
            timestamp: e.bar.timestamp,
            direction: e.direction,
        })
        .collect();
    Ok(build_timeline(&bars, &signals)?.slices)
}
