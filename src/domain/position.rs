//! Positions, their lifecycle, and closed-trade records.

use chrono::{Duration, NaiveDateTime};
use std::fmt;
use std::str::FromStr;

use super::ohlcv::PriceBar;
use super::signal::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn from_direction(direction: Direction) -> Option<Side> {
        match direction {
            Direction::Buy => Some(Side::Long),
            Direction::Sell => Some(Side::Short),
            Direction::Hold => None,
        }
    }

    /// The signal direction that reverses (closes) a position on this side.
    pub fn reversal(self) -> Direction {
        match self {
            Side::Long => Direction::Sell,
            Side::Short => Direction::Buy,
        }
    }

    /// Side of the order that closes a position on this side.
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Pending,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    SignalReversal,
    ForcedClose,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop-loss",
            ExitReason::TakeProfit => "take-profit",
            ExitReason::SignalReversal => "signal reversal",
            ExitReason::ForcedClose => "forced close",
        };
        f.write_str(s)
    }
}

/// Which level wins when a single bar's range spans both stop and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntrabarPolicy {
    #[default]
    StopFirst,
    TargetFirst,
}

impl FromStr for IntrabarPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stop_first" | "stop-first" | "stop" => Ok(IntrabarPolicy::StopFirst),
            "target_first" | "target-first" | "target" => Ok(IntrabarPolicy::TargetFirst),
            other => Err(format!(
                "unknown intrabar policy '{other}' (expected stop_first|target_first)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: u64,
    pub instrument: String,
    pub side: Side,
    pub quantity: u64,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub status: PositionStatus,
    /// Broker order awaiting acknowledgement while Pending.
    pub order_id: Option<String>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<NaiveDateTime>,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl: Option<f64>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn is_awaiting_ack(&self) -> bool {
        self.status == PositionStatus::Pending && self.order_id.is_some()
    }

    /// Cash committed to the position at entry.
    pub fn notional(&self) -> f64 {
        self.quantity as f64 * self.entry_price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.side.sign() * self.quantity as f64 * (price - self.entry_price)
    }

    pub fn stop_touched(&self, bar: &PriceBar) -> bool {
        match self.side {
            Side::Long => bar.low <= self.stop_loss,
            Side::Short => bar.high >= self.stop_loss,
        }
    }

    pub fn target_touched(&self, bar: &PriceBar) -> bool {
        match self.side {
            Side::Long => bar.high >= self.take_profit,
            Side::Short => bar.low <= self.take_profit,
        }
    }

    /// Stop/target exit for this bar, if any. Fills at the level itself.
    pub fn bracket_exit(&self, bar: &PriceBar, policy: IntrabarPolicy) -> Option<(f64, ExitReason)> {
        let stop = self.stop_touched(bar);
        let target = self.target_touched(bar);
        match (stop, target, policy) {
            (true, true, IntrabarPolicy::StopFirst) | (true, false, _) => {
                Some((self.stop_loss, ExitReason::StopLoss))
            }
            (true, true, IntrabarPolicy::TargetFirst) | (false, true, _) => {
                Some((self.take_profit, ExitReason::TakeProfit))
            }
            (false, false, _) => None,
        }
    }

    /// Transition to Closed and produce the trade record. Consumes the
    /// position so a closed one cannot be mutated afterwards.
    ///
    /// `commission_pct` is charged on both the entry and the exit notional
    /// and comes out of the realized P&L.
    pub fn close(
        mut self,
        exit_price: f64,
        exit_time: NaiveDateTime,
        reason: ExitReason,
        commission_pct: f64,
    ) -> TradeRecord {
        let notional = self.notional();
        let exit_notional = self.quantity as f64 * exit_price;
        let commission = (notional + exit_notional) * commission_pct / 100.0;
        let pnl = self.unrealized_pnl(exit_price) - commission;
        let pnl_pct = if notional > 0.0 {
            pnl / notional * 100.0
        } else {
            0.0
        };
        let holding = exit_time - self.entry_time;

        self.status = PositionStatus::Closed;
        self.order_id = None;
        self.exit_price = Some(exit_price);
        self.exit_time = Some(exit_time);
        self.exit_reason = Some(reason);
        self.realized_pnl = Some(pnl);

        TradeRecord {
            position: self,
            pnl,
            pnl_pct,
            commission,
            holding,
            exit_reason: reason,
        }
    }
}

/// An immutable closed trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    position: Position,
    /// Net of commission.
    pub pnl: f64,
    pub pnl_pct: f64,
    pub commission: f64,
    pub holding: Duration,
    pub exit_reason: ExitReason,
}

impl TradeRecord {
    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn instrument(&self) -> &str {
        &self.position.instrument
    }

    pub fn side(&self) -> Side {
        self.position.side
    }

    pub fn quantity(&self) -> u64 {
        self.position.quantity
    }

    pub fn entry_price(&self) -> f64 {
        self.position.entry_price
    }

    pub fn entry_time(&self) -> NaiveDateTime {
        self.position.entry_time
    }

    pub fn exit_price(&self) -> f64 {
        self.position.exit_price.unwrap_or(self.position.entry_price)
    }

    pub fn exit_time(&self) -> NaiveDateTime {
        self.position.exit_time.unwrap_or(self.position.entry_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn long_position() -> Position {
        Position {
            id: 1,
            instrument: "HDFCBANK".into(),
            side: Side::Long,
            quantity: 100,
            entry_price: 50.0,
            entry_time: at(15, 10),
            stop_loss: 45.0,
            take_profit: 60.0,
            status: PositionStatus::Open,
            order_id: None,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            realized_pnl: None,
        }
    }

    fn short_position() -> Position {
        Position {
            side: Side::Short,
            entry_price: 100.0,
            stop_loss: 110.0,
            take_profit: 80.0,
            ..long_position()
        }
    }

    fn bar(low: f64, high: f64) -> PriceBar {
        PriceBar {
            instrument: "HDFCBANK".into(),
            timestamp: at(16, 10),
            open: (low + high) / 2.0,
            high,
            low,
            close: (low + high) / 2.0,
            volume: 1.0,
        }
    }

    #[test]
    fn unrealized_pnl_by_side() {
        assert!((long_position().unrealized_pnl(55.0) - 500.0).abs() < f64::EPSILON);
        assert!((long_position().unrealized_pnl(45.0) + 500.0).abs() < f64::EPSILON);
        assert!((short_position().unrealized_pnl(90.0) - 1000.0).abs() < f64::EPSILON);
        assert!((short_position().unrealized_pnl(110.0) + 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn notional_is_quantity_times_entry() {
        assert!((long_position().notional() - 5000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn long_stop_uses_low_target_uses_high() {
        let pos = long_position();
        assert_eq!(pos.bracket_exit(&bar(44.0, 50.0), IntrabarPolicy::StopFirst), Some((45.0, ExitReason::StopLoss)));
        assert_eq!(pos.bracket_exit(&bar(50.0, 61.0), IntrabarPolicy::StopFirst), Some((60.0, ExitReason::TakeProfit)));
        assert_eq!(pos.bracket_exit(&bar(46.0, 59.0), IntrabarPolicy::StopFirst), None);
    }

    #[test]
    fn short_stop_uses_high_target_uses_low() {
        let pos = short_position();
        assert_eq!(pos.bracket_exit(&bar(95.0, 111.0), IntrabarPolicy::StopFirst), Some((110.0, ExitReason::StopLoss)));
        assert_eq!(pos.bracket_exit(&bar(79.0, 90.0), IntrabarPolicy::StopFirst), Some((80.0, ExitReason::TakeProfit)));
    }

    #[test]
    fn both_touched_resolves_by_policy() {
        let pos = long_position();
        let wide = bar(40.0, 65.0);
        assert_eq!(pos.bracket_exit(&wide, IntrabarPolicy::StopFirst), Some((45.0, ExitReason::StopLoss)));
        assert_eq!(pos.bracket_exit(&wide, IntrabarPolicy::TargetFirst), Some((60.0, ExitReason::TakeProfit)));
    }

    #[test]
    fn close_produces_immutable_record() {
        let trade = long_position().close(55.0, at(17, 14), ExitReason::SignalReversal, 0.0);
        assert!((trade.pnl - 500.0).abs() < f64::EPSILON);
        assert!(trade.commission.abs() < f64::EPSILON);
        assert!((trade.pnl_pct - 10.0).abs() < 1e-9);
        assert_eq!(trade.holding, Duration::hours(52));
        assert_eq!(trade.position().status, PositionStatus::Closed);
        assert_eq!(trade.position().realized_pnl, Some(trade.pnl));
        assert_eq!(trade.exit_time(), at(17, 14));
        assert_eq!(trade.exit_reason.to_string(), "signal reversal");
    }

    #[test]
    fn commission_comes_out_of_both_legs() {
        // 100 @ 50 in, 100 @ 55 out: 5000 + 5500 notional at 0.1%
        let trade = long_position().close(55.0, at(17, 14), ExitReason::SignalReversal, 0.1);
        assert!((trade.commission - 10.5).abs() < 1e-9);
        assert!((trade.pnl - 489.5).abs() < 1e-9);
        assert!((trade.pnl_pct - 9.79).abs() < 1e-9);
        assert_eq!(trade.position().realized_pnl, Some(trade.pnl));

        let trade = short_position().close(90.0, at(17, 14), ExitReason::TakeProfit, 0.1);
        assert!((trade.pnl - (1000.0 - 19.0)).abs() < 1e-9);
    }

    #[test]
    fn side_helpers() {
        assert_eq!(Side::from_direction(Direction::Buy), Some(Side::Long));
        assert_eq!(Side::from_direction(Direction::Hold), None);
        assert_eq!(Side::Long.reversal(), Direction::Sell);
        assert_eq!(Side::Short.opposite(), Side::Long);
    }

    #[test]
    fn awaiting_ack_only_when_pending_with_order() {
        let mut pos = long_position();
        pos.status = PositionStatus::Pending;
        assert!(!pos.is_awaiting_ack());
        pos.order_id = Some("PAPER-1".into());
        assert!(pos.is_awaiting_ack());
        assert!(!pos.is_open());
    }

    #[test]
    fn intrabar_policy_parses() {
        assert_eq!("stop_first".parse::<IntrabarPolicy>().unwrap(), IntrabarPolicy::StopFirst);
        assert_eq!("Target-First".parse::<IntrabarPolicy>().unwrap(), IntrabarPolicy::TargetFirst);
        assert!("both".parse::<IntrabarPolicy>().is_err());
    }
}
