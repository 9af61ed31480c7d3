//! Account state and the position state machine.
//!
//! Positions move Pending -> Open -> Closed. A closed position leaves the
//! live map and survives only inside its [`TradeRecord`].
//!
//! Per slice, [`PositionLedger::apply_slice`] runs a fixed sequence:
//!
//! 1. mark prices (and roll the trading day)
//! 2. exits: stop/target against the bar range, then opposite signals
//! 3. entries: size, validate, open at the bar close
//! 4. record one equity point
//!
//! The live driver calls the same phases individually so it can put broker
//! round-trips between them.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::error::{DataError, ValidationError};
use super::ohlcv::PriceBar;
use super::position::{ExitReason, Position, PositionStatus, Side, TradeRecord};
use super::risk::{BracketPolicy, EntryCandidate, RiskDecision, RiskLimits, RiskManager, RiskSnapshot};
use super::signal::Direction;
use super::timeline::Slice;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

/// Cash, live positions, marks and history.
///
/// `cash` is capital plus realized P&L; opening a position commits its
/// notional without moving cash.
#[derive(Debug, Clone)]
pub struct AccountState {
    capital: f64,
    realized_pnl: f64,
    positions: BTreeMap<String, Position>,
    last_prices: BTreeMap<String, f64>,
    equity_curve: Vec<EquityPoint>,
    trades: Vec<TradeRecord>,
    trading_day: Option<NaiveDate>,
    day_start_equity: f64,
}

impl AccountState {
    pub fn new(capital: f64) -> Self {
        Self {
            capital,
            realized_pnl: 0.0,
            positions: BTreeMap::new(),
            last_prices: BTreeMap::new(),
            equity_curve: Vec::new(),
            trades: Vec::new(),
            trading_day: None,
            day_start_equity: capital,
        }
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn cash(&self) -> f64 {
        self.capital + self.realized_pnl
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    /// Notional held by Pending and Open positions.
    pub fn committed(&self) -> f64 {
        self.positions.values().map(Position::notional).sum()
    }

    pub fn available_cash(&self) -> f64 {
        self.cash().min(self.capital) - self.committed()
    }

    /// Last known close, falling back to the entry price for positions
    /// whose instrument has not printed since entry.
    pub fn mark_price(&self, position: &Position) -> f64 {
        self.last_prices
            .get(&position.instrument)
            .copied()
            .unwrap_or(position.entry_price)
    }

    pub fn last_price(&self, instrument: &str) -> Option<f64> {
        self.last_prices.get(instrument).copied()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions
            .values()
            .filter(|p| p.is_open())
            .map(|p| p.unrealized_pnl(self.mark_price(p)))
            .sum()
    }

    pub fn equity(&self) -> f64 {
        self.cash() + self.unrealized_pnl()
    }

    /// Realized plus unrealized change since the previous trading day's close.
    pub fn daily_pnl(&self) -> f64 {
        self.equity() - self.day_start_equity
    }

    pub fn trading_day(&self) -> Option<NaiveDate> {
        self.trading_day
    }

    pub fn open_count(&self) -> usize {
        self.positions.values().filter(|p| p.is_open()).count()
    }

    pub fn pending_count(&self) -> usize {
        self.positions
            .values()
            .filter(|p| p.status == PositionStatus::Pending)
            .count()
    }

    pub fn slots_in_use(&self) -> usize {
        self.positions.len()
    }

    pub fn holds(&self, instrument: &str) -> bool {
        self.positions.contains_key(instrument)
    }

    pub fn position(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    /// Returns false (and leaves the map alone) if the instrument is taken.
    pub fn insert_position(&mut self, position: Position) -> bool {
        if self.positions.contains_key(&position.instrument) {
            return false;
        }
        self.positions.insert(position.instrument.clone(), position);
        true
    }

    /// Only ever moves forward; an earlier date leaves the day untouched.
    fn roll_day(&mut self, day: NaiveDate) {
        match self.trading_day {
            Some(current) if day <= current => {}
            Some(_) => {
                self.day_start_equity = self.equity();
                self.trading_day = Some(day);
            }
            None => self.trading_day = Some(day),
        }
    }
}

/// An entry the risk manager refused.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub timestamp: NaiveDateTime,
    pub instrument: String,
    pub direction: Direction,
    pub reason: ValidationError,
}

/// A close the ledger wants executed for the current slice.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitOrder {
    pub instrument: String,
    pub side: Side,
    pub quantity: u64,
    pub price: f64,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceReport {
    pub closed: usize,
    pub opened: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone)]
pub struct PositionLedger {
    limits: RiskLimits,
    bracket: BracketPolicy,
    account: AccountState,
    last_seen: BTreeMap<String, NaiveDateTime>,
    /// Latest slice timestamp applied, across all instruments.
    latest: Option<NaiveDateTime>,
    rejections: Vec<Rejection>,
    next_id: u64,
}

impl PositionLedger {
    pub fn new(limits: RiskLimits, bracket: BracketPolicy) -> Self {
        Self {
            account: AccountState::new(limits.capital()),
            limits,
            bracket,
            last_seen: BTreeMap::new(),
            latest: None,
            rejections: Vec::new(),
            next_id: 1,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn bracket(&self) -> &BracketPolicy {
        &self.bracket
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    pub fn trades(&self) -> &[TradeRecord] {
        self.account.trades()
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        self.account.equity_curve()
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    pub fn risk_snapshot(&self) -> RiskSnapshot {
        RiskManager::risk_snapshot(&self.account, &self.limits)
    }

    /// Run the full per-slice sequence with fills at the bar close.
    pub fn apply_slice(&mut self, slice: &Slice) -> Result<SliceReport, DataError> {
        self.mark_slice(slice)?;
        let mut report = SliceReport::default();

        for exit in self.exit_orders(slice) {
            if self
                .close_position(&exit.instrument, exit.price, slice.timestamp, exit.reason)
                .is_some()
            {
                report.closed += 1;
            }
        }

        for bar in &slice.bars {
            let Some(direction) = slice.signal_for(&bar.instrument) else {
                continue;
            };
            match self.entry_candidate(&bar.instrument, direction, bar.close) {
                Ok(Some(candidate)) => {
                    self.open_at(candidate, slice.timestamp);
                    report.opened += 1;
                }
                Ok(None) => {}
                Err(reason) => {
                    self.reject(slice.timestamp, &bar.instrument, direction, reason);
                    report.rejected += 1;
                }
            }
        }

        self.record_equity(slice.timestamp);
        Ok(report)
    }

    /// Validate the slice's bars, roll the trading day and update marks.
    /// Nothing is mutated if any bar is rejected.
    ///
    /// Slices must arrive in time order across the whole ledger, not just per
    /// instrument: several drivers may share it, and a late slice would roll
    /// the trading day back. An equal timestamp is accepted.
    pub fn mark_slice(&mut self, slice: &Slice) -> Result<(), DataError> {
        if let Some(latest) = self.latest.filter(|latest| slice.timestamp < *latest) {
            return Err(DataError::StaleSlice {
                timestamp: slice.timestamp,
                latest,
            });
        }
        let mut in_slice = BTreeSet::new();
        for bar in &slice.bars {
            bar.validate()?;
            let previous = self.last_seen.get(&bar.instrument).copied();
            let repeated = !in_slice.insert(bar.instrument.as_str());
            if repeated || previous.is_some_and(|prev| bar.timestamp <= prev) {
                return Err(DataError::NonMonotonic {
                    instrument: bar.instrument.clone(),
                    previous: previous.unwrap_or(bar.timestamp),
                    current: bar.timestamp,
                });
            }
        }

        self.latest = Some(slice.timestamp);
        self.account.roll_day(slice.timestamp.date());
        for bar in &slice.bars {
            self.last_seen.insert(bar.instrument.clone(), bar.timestamp);
            self.account
                .last_prices
                .insert(bar.instrument.clone(), bar.close);
        }
        Ok(())
    }

    /// Exits due on this slice: a touched stop or target first, otherwise an
    /// opposite signal closes at the bar close.
    pub fn exit_orders(&self, slice: &Slice) -> Vec<ExitOrder> {
        slice
            .bars
            .iter()
            .filter_map(|bar| {
                let position = self.account.position(&bar.instrument)?;
                if !position.is_open() {
                    return None;
                }
                let (price, reason) = self.exit_for(position, bar, slice.signal_for(&bar.instrument))?;
                Some(ExitOrder {
                    instrument: position.instrument.clone(),
                    side: position.side,
                    quantity: position.quantity,
                    price,
                    reason,
                })
            })
            .collect()
    }

    fn exit_for(
        &self,
        position: &Position,
        bar: &PriceBar,
        signal: Option<Direction>,
    ) -> Option<(f64, ExitReason)> {
        position
            .bracket_exit(bar, self.bracket.intrabar)
            .or_else(|| {
                (signal == Some(position.side.reversal()))
                    .then_some((bar.close, ExitReason::SignalReversal))
            })
    }

    /// Close an Open position. Returns `None` if the instrument has none.
    pub fn close_position(
        &mut self,
        instrument: &str,
        price: f64,
        timestamp: NaiveDateTime,
        reason: ExitReason,
    ) -> Option<TradeRecord> {
        if !self.account.position(instrument).is_some_and(Position::is_open) {
            return None;
        }
        let position = self.account.positions.remove(instrument)?;
        let trade = position.close(price, timestamp, reason, self.bracket.commission_pct());
        self.account.realized_pnl += trade.pnl;
        info!(
            instrument,
            side = %trade.side(),
            qty = trade.quantity(),
            exit = price,
            pnl = trade.pnl,
            commission = trade.commission,
            reason = %reason,
            "position closed"
        );
        self.account.trades.push(trade.clone());
        Some(trade)
    }

    /// Size and validate an entry at `price`. `Ok(None)` means the signal
    /// asks for nothing (Hold, or Sell while shorting is disabled).
    pub fn entry_candidate(
        &self,
        instrument: &str,
        direction: Direction,
        price: f64,
    ) -> Result<Option<EntryCandidate>, ValidationError> {
        let Some(side) = Side::from_direction(direction) else {
            return Ok(None);
        };
        if side == Side::Short && !self.bracket.allow_shorting {
            return Ok(None);
        }

        let stop_loss = self.bracket.stop_for(side, price);
        let take_profit = self.bracket.target_for(side, price, stop_loss);
        let sizing_capital = self.account.cash().min(self.account.capital());
        let quantity = RiskManager::size(
            price,
            stop_loss,
            sizing_capital,
            self.limits.max_risk_per_trade(),
        )?;
        let candidate = EntryCandidate {
            instrument: instrument.to_string(),
            side,
            quantity,
            entry_price: price,
            stop_loss,
            take_profit,
        };

        match RiskManager::validate(&candidate, &self.account, &self.limits) {
            RiskDecision::Allow => Ok(Some(candidate)),
            RiskDecision::Reject(reason) => Err(reason),
        }
    }

    pub fn reject(
        &mut self,
        timestamp: NaiveDateTime,
        instrument: &str,
        direction: Direction,
        reason: ValidationError,
    ) {
        info!(instrument, %direction, %reason, "entry rejected");
        self.rejections.push(Rejection {
            timestamp,
            instrument: instrument.to_string(),
            direction,
            reason,
        });
    }

    /// Hold a slot and the candidate's notional while an order is in flight.
    pub fn reserve(
        &mut self,
        candidate: EntryCandidate,
        timestamp: NaiveDateTime,
        order_id: Option<String>,
    ) -> Option<u64> {
        let id = self.next_id;
        let position = Position {
            id,
            instrument: candidate.instrument,
            side: candidate.side,
            quantity: candidate.quantity,
            entry_price: candidate.entry_price,
            entry_time: timestamp,
            stop_loss: candidate.stop_loss,
            take_profit: candidate.take_profit,
            status: PositionStatus::Pending,
            order_id,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            realized_pnl: None,
        };
        if !self.account.insert_position(position) {
            return None;
        }
        self.next_id += 1;
        Some(id)
    }

    /// Attach a broker order id to a Pending reservation.
    pub fn attach_order(&mut self, instrument: &str, order_id: String) {
        if let Some(position) = self.account.positions.get_mut(instrument) {
            if position.status == PositionStatus::Pending {
                position.order_id = Some(order_id);
            }
        }
    }

    /// Pending -> Open at the actual fill. The bracket is re-derived from the
    /// fill price.
    pub fn activate(&mut self, instrument: &str, fill_price: f64, timestamp: NaiveDateTime) -> Option<u64> {
        let bracket = self.bracket;
        let position = self.account.positions.get_mut(instrument)?;
        if position.status != PositionStatus::Pending {
            return None;
        }
        position.entry_price = fill_price;
        position.entry_time = timestamp;
        position.stop_loss = bracket.stop_for(position.side, fill_price);
        position.take_profit = bracket.target_for(position.side, fill_price, position.stop_loss);
        position.status = PositionStatus::Open;
        position.order_id = None;
        info!(
            instrument,
            id = position.id,
            side = %position.side,
            qty = position.quantity,
            entry = fill_price,
            stop = position.stop_loss,
            target = position.take_profit,
            "position opened"
        );
        Some(position.id)
    }

    /// Drop a Pending reservation, freeing its slot and notional.
    pub fn release_pending(&mut self, instrument: &str) -> Option<Position> {
        if self.account.position(instrument)?.status != PositionStatus::Pending {
            return None;
        }
        let released = self.account.positions.remove(instrument);
        debug!(instrument, "pending reservation released");
        released
    }

    fn open_at(&mut self, candidate: EntryCandidate, timestamp: NaiveDateTime) {
        let instrument = candidate.instrument.clone();
        let price = candidate.entry_price;
        if self.reserve(candidate, timestamp, None).is_some() {
            self.activate(&instrument, price, timestamp);
        }
    }

    /// Append the equity point. A timestamp at or before the last point
    /// updates that point's value and keeps its timestamp, so the curve
    /// stays ordered.
    pub fn record_equity(&mut self, timestamp: NaiveDateTime) -> f64 {
        let equity = self.account.equity();
        match self.account.equity_curve.last_mut() {
            Some(last) if last.timestamp >= timestamp => last.equity = equity,
            _ => self
                .account
                .equity_curve
                .push(EquityPoint { timestamp, equity }),
        }
        equity
    }

    /// Open positions as exit orders at their last known price.
    pub fn forced_exit_orders(&self) -> Vec<ExitOrder> {
        self.account
            .positions()
            .filter(|p| p.is_open())
            .map(|p| ExitOrder {
                instrument: p.instrument.clone(),
                side: p.side,
                quantity: p.quantity,
                price: self.account.mark_price(p),
                reason: ExitReason::ForcedClose,
            })
            .collect()
    }

    /// Close everything at the last known price and drop any reservations.
    pub fn force_close_all(&mut self, timestamp: NaiveDateTime) -> Vec<TradeRecord> {
        let closed: Vec<TradeRecord> = self
            .forced_exit_orders()
            .into_iter()
            .filter_map(|exit| self.close_position(&exit.instrument, exit.price, timestamp, exit.reason))
            .collect();
        let pending: Vec<String> = self.account.positions.keys().cloned().collect();
        for instrument in pending {
            self.release_pending(&instrument);
        }
        if !closed.is_empty() {
            self.record_equity(timestamp);
        }
        closed
    }
}
