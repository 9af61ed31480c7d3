//! Replays historical bars and signals as a live feed, one timestamp per poll.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::domain::error::{DataError, DeskError};
use crate::domain::ohlcv::PriceBar;
use crate::domain::signal::{Direction, Signal};
use crate::domain::timeline::{build_timeline, MarketEvent};
use crate::ports::feed_port::FeedPort;

pub struct ReplayFeed {
    batches: Vec<Vec<MarketEvent>>,
    cursor: AtomicUsize,
    unmatched_signals: usize,
}

impl ReplayFeed {
    /// Bars are merged and checked the same way the backtest does it.
    pub fn new(bars: &[PriceBar], signals: &[Signal]) -> Result<Self, DataError> {
        let timeline = build_timeline(bars, signals)?;
        let unmatched_signals = timeline.unmatched_signals;
        let batches = timeline
            .slices
            .into_iter()
            .map(|slice| {
                let signals = slice.signals;
                slice
                    .bars
                    .into_iter()
                    .map(|bar| MarketEvent {
                        direction: signals.get(&bar.instrument).copied().unwrap_or(Direction::Hold),
                        bar,
                    })
                    .collect()
            })
            .collect();
        Ok(Self {
            unmatched_signals,
            ..Self::from_batches(batches)
        })
    }

    pub fn from_batches(batches: Vec<Vec<MarketEvent>>) -> Self {
        Self {
            batches,
            cursor: AtomicUsize::new(0),
            unmatched_signals: 0,
        }
    }

    /// Signals that had no bar to land on.
    pub fn unmatched_signals(&self) -> usize {
        self.unmatched_signals
    }

    pub fn remaining(&self) -> usize {
        self.batches
            .len()
            .saturating_sub(self.cursor.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl FeedPort for ReplayFeed {
    async fn poll(&self) -> Result<Vec<MarketEvent>, DeskError> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        Ok(self.batches.get(index).cloned().unwrap_or_default())
    }

    fn is_exhausted(&self) -> bool {
        self.cursor.load(Ordering::SeqCst) >= self.batches.len()
    }
}
