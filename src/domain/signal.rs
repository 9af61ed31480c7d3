//! Trading signals and the signal-source capability.
//!
//! Indicator math lives outside this crate. A [`SignalSource`] only has to
//! turn a bar into a [`Direction`]; [`SignalTape`] replays a precomputed
//! stream and [`Combined`] aggregates several sources under an explicit
//! [`CombinationRule`].

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::error::DataError;
use super::ohlcv::PriceBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

impl Direction {
    pub fn as_i8(self) -> i8 {
        match self {
            Direction::Buy => 1,
            Direction::Sell => -1,
            Direction::Hold => 0,
        }
    }
}

impl TryFrom<i64> for Direction {
    type Error = DataError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Direction::Buy),
            -1 => Ok(Direction::Sell),
            0 => Ok(Direction::Hold),
            _ => Err(DataError::InvalidDirection { value }),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "buy"),
            Direction::Sell => write!(f, "sell"),
            Direction::Hold => write!(f, "hold"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub instrument: String,
    pub timestamp: NaiveDateTime,
    pub direction: Direction,
}

pub trait SignalSource {
    fn name(&self) -> &str;

    fn evaluate(&mut self, bar: &PriceBar) -> Direction;
}

/// A precomputed signal stream keyed by (instrument, timestamp).
#[derive(Debug, Clone, Default)]
pub struct SignalTape {
    name: String,
    signals: HashMap<(String, NaiveDateTime), Direction>,
}

impl SignalTape {
    /// Build a tape, refusing two signals for the same bar.
    pub fn new(name: impl Into<String>, signals: &[Signal]) -> Result<Self, DataError> {
        let mut map = HashMap::with_capacity(signals.len());
        for sig in signals {
            let key = (sig.instrument.clone(), sig.timestamp);
            if map.insert(key, sig.direction).is_some() {
                return Err(DataError::DuplicateSignal {
                    instrument: sig.instrument.clone(),
                    timestamp: sig.timestamp,
                });
            }
        }
        Ok(Self {
            name: name.into(),
            signals: map,
        })
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn contains(&self, instrument: &str, timestamp: NaiveDateTime) -> bool {
        self.signals
            .contains_key(&(instrument.to_string(), timestamp))
    }
}

impl SignalSource for SignalTape {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&mut self, bar: &PriceBar) -> Direction {
        self.signals
            .get(&(bar.instrument.clone(), bar.timestamp))
            .copied()
            .unwrap_or(Direction::Hold)
    }
}

/// How [`Combined`] turns sub-signals into one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CombinationRule {
    /// Every source must agree on Buy (or on Sell); anything else is Hold.
    #[default]
    Unanimous,
    /// Strictly more than half of the sources agree on a direction.
    Majority,
}

impl FromStr for CombinationRule {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "unanimous" | "all" => Ok(CombinationRule::Unanimous),
            "majority" => Ok(CombinationRule::Majority),
            other => Err(format!(
                "unknown combination rule '{other}' (expected unanimous|majority)"
            )),
        }
    }
}

pub struct Combined {
    name: String,
    sources: Vec<Box<dyn SignalSource + Send>>,
    rule: CombinationRule,
}

impl Combined {
    pub fn new(
        name: impl Into<String>,
        sources: Vec<Box<dyn SignalSource + Send>>,
        rule: CombinationRule,
    ) -> Self {
        Self {
            name: name.into(),
            sources,
            rule,
        }
    }

    pub fn rule(&self) -> CombinationRule {
        self.rule
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

/// Aggregate already-evaluated sub-signals under `rule`.
pub fn combine(votes: &[Direction], rule: CombinationRule) -> Direction {
    if votes.is_empty() {
        return Direction::Hold;
    }
    let buys = votes.iter().filter(|d| **d == Direction::Buy).count();
    let sells = votes.iter().filter(|d| **d == Direction::Sell).count();
    match rule {
        CombinationRule::Unanimous => {
            if buys == votes.len() {
                Direction::Buy
            } else if sells == votes.len() {
                Direction::Sell
            } else {
                Direction::Hold
            }
        }
        CombinationRule::Majority => {
            if buys * 2 > votes.len() {
                Direction::Buy
            } else if sells * 2 > votes.len() {
                Direction::Sell
            } else {
                Direction::Hold
            }
        }
    }
}

impl SignalSource for Combined {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&mut self, bar: &PriceBar) -> Direction {
        // Every source sees every bar, even if the outcome is already decided.
        let votes: Vec<Direction> = self.sources.iter_mut().map(|s| s.evaluate(bar)).collect();
        combine(&votes, self.rule)
    }
}

/// Evaluate `source` over time-ordered bars, emitting one signal per non-Hold bar.
pub fn signals_for_bars(bars: &[PriceBar], source: &mut dyn SignalSource) -> Vec<Signal> {
    bars.iter()
        .filter_map(|bar| match source.evaluate(bar) {
            Direction::Hold => None,
            direction => Some(Signal {
                instrument: bar.instrument.clone(),
                timestamp: bar.timestamp,
                direction,
            }),
        })
        .collect()
}
