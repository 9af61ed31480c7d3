//! Position sizing and pre-trade validation.
//!
//! Everything here is a pure function of its inputs. The ledger asks for a
//! quantity and a verdict; it never hands state to the risk manager.

use super::error::{DeskError, ValidationError};
use super::ledger::AccountState;
use super::position::{IntrabarPolicy, Side};

/// Account-level limits. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskLimits {
    capital: f64,
    max_risk_per_trade: f64,
    max_daily_loss: f64,
    max_open_positions: usize,
}

impl RiskLimits {
    pub const DEFAULT_CAPITAL: f64 = 100_000.0;
    pub const DEFAULT_MAX_RISK_PER_TRADE: f64 = 2.0;
    pub const DEFAULT_MAX_DAILY_LOSS: f64 = 5.0;
    pub const DEFAULT_MAX_OPEN_POSITIONS: usize = 5;

    /// Percentages are whole numbers (2.0 means 2%).
    pub fn new(
        capital: f64,
        max_risk_per_trade: f64,
        max_daily_loss: f64,
        max_open_positions: usize,
    ) -> Result<Self, DeskError> {
        if !capital.is_finite() || capital <= 0.0 {
            return Err(DeskError::config_invalid(
                "risk",
                "capital",
                "capital must be positive",
            ));
        }
        if !(max_risk_per_trade > 0.0 && max_risk_per_trade <= 100.0) {
            return Err(DeskError::config_invalid(
                "risk",
                "max_risk_per_trade",
                "max_risk_per_trade must be in (0, 100]",
            ));
        }
        if !(max_daily_loss > 0.0 && max_daily_loss <= 100.0) {
            return Err(DeskError::config_invalid(
                "risk",
                "max_daily_loss",
                "max_daily_loss must be in (0, 100]",
            ));
        }
        if max_open_positions < 1 {
            return Err(DeskError::config_invalid(
                "risk",
                "max_open_positions",
                "max_open_positions must be at least 1",
            ));
        }
        Ok(Self {
            capital,
            max_risk_per_trade,
            max_daily_loss,
            max_open_positions,
        })
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn max_risk_per_trade(&self) -> f64 {
        self.max_risk_per_trade
    }

    pub fn max_daily_loss(&self) -> f64 {
        self.max_daily_loss
    }

    pub fn max_open_positions(&self) -> usize {
        self.max_open_positions
    }

    /// Absolute loss (currency) at which new entries stop for the day.
    pub fn daily_loss_threshold(&self) -> f64 {
        self.capital * self.max_daily_loss / 100.0
    }
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            capital: Self::DEFAULT_CAPITAL,
            max_risk_per_trade: Self::DEFAULT_MAX_RISK_PER_TRADE,
            max_daily_loss: Self::DEFAULT_MAX_DAILY_LOSS,
            max_open_positions: Self::DEFAULT_MAX_OPEN_POSITIONS,
        }
    }
}

/// How stop-loss and take-profit levels are placed around a fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BracketPolicy {
    stop_loss_pct: f64,
    reward_ratio: f64,
    pub intrabar: IntrabarPolicy,
    pub allow_shorting: bool,
    /// Charged on the entry and on the exit notional, in percent.
    commission_pct: f64,
}

impl BracketPolicy {
    pub const DEFAULT_STOP_LOSS_PCT: f64 = 2.0;
    pub const DEFAULT_REWARD_RATIO: f64 = 2.0;
    pub const DEFAULT_COMMISSION_PCT: f64 = 0.1;

    /// A frictionless policy; chain [`BracketPolicy::with_commission`] to
    /// charge fees.
    pub fn new(
        stop_loss_pct: f64,
        reward_ratio: f64,
        intrabar: IntrabarPolicy,
        allow_shorting: bool,
    ) -> Result<Self, DeskError> {
        if !(stop_loss_pct > 0.0 && stop_loss_pct < 100.0) {
            return Err(DeskError::config_invalid(
                "execution",
                "stop_loss_pct",
                "stop_loss_pct must be in (0, 100)",
            ));
        }
        if !reward_ratio.is_finite() || reward_ratio <= 0.0 {
            return Err(DeskError::config_invalid(
                "execution",
                "reward_ratio",
                "reward_ratio must be positive",
            ));
        }
        Ok(Self {
            stop_loss_pct,
            reward_ratio,
            intrabar,
            allow_shorting,
            commission_pct: 0.0,
        })
    }

    pub fn with_commission(self, commission_pct: f64) -> Result<Self, DeskError> {
        if !(commission_pct >= 0.0 && commission_pct < 100.0) {
            return Err(DeskError::config_invalid(
                "execution",
                "commission_pct",
                "commission_pct must be in [0, 100)",
            ));
        }
        Ok(Self {
            commission_pct,
            ..self
        })
    }

    pub fn stop_loss_pct(&self) -> f64 {
        self.stop_loss_pct
    }

    pub fn commission_pct(&self) -> f64 {
        self.commission_pct
    }

    pub fn reward_ratio(&self) -> f64 {
        self.reward_ratio
    }

    pub fn stop_for(&self, side: Side, entry: f64) -> f64 {
        match side {
            Side::Long => entry * (1.0 - self.stop_loss_pct / 100.0),
            Side::Short => entry * (1.0 + self.stop_loss_pct / 100.0),
        }
    }

    pub fn target_for(&self, side: Side, entry: f64, stop: f64) -> f64 {
        let reward = (entry - stop).abs() * self.reward_ratio;
        match side {
            Side::Long => entry + reward,
            Side::Short => entry - reward,
        }
    }
}

impl Default for BracketPolicy {
    fn default() -> Self {
        Self {
            stop_loss_pct: Self::DEFAULT_STOP_LOSS_PCT,
            reward_ratio: Self::DEFAULT_REWARD_RATIO,
            intrabar: IntrabarPolicy::StopFirst,
            allow_shorting: false,
            commission_pct: Self::DEFAULT_COMMISSION_PCT,
        }
    }
}

/// A sized entry awaiting the risk verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryCandidate {
    pub instrument: String,
    pub side: Side,
    pub quantity: u64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl EntryCandidate {
    pub fn notional(&self) -> f64 {
        self.quantity as f64 * self.entry_price
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Allow,
    Reject(ValidationError),
}

/// Point-in-time view of the account against its limits.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSnapshot {
    pub capital: f64,
    pub daily_pnl: f64,
    pub daily_pnl_pct: f64,
    pub open_positions: usize,
    pub max_open_positions: usize,
    pub available_positions: usize,
    pub max_risk_per_trade: f64,
    pub max_daily_loss: f64,
}

pub struct RiskManager;

impl RiskManager {
    /// Quantity such that `quantity * |entry - stop|` never exceeds
    /// `capital * risk_pct / 100`.
    ///
    /// Fails with `InvalidStopDistance` when entry equals stop, and with
    /// `InsufficientCapital` when not even one unit fits the risk budget or
    /// the resulting notional exceeds `capital`.
    pub fn size(entry: f64, stop: f64, capital: f64, risk_pct: f64) -> Result<u64, ValidationError> {
        let distance = (entry - stop).abs();
        if !distance.is_finite() || distance <= 0.0 {
            return Err(ValidationError::InvalidStopDistance { entry, stop });
        }

        let budget = capital * risk_pct / 100.0;
        let raw = (budget / distance).floor();
        if !raw.is_finite() || raw < 1.0 {
            return Err(ValidationError::InsufficientCapital {
                required: entry,
                available: capital,
            });
        }

        let mut quantity = raw as u64;
        // floor() of a quotient can land one unit high after rounding
        while quantity > 0 && quantity as f64 * distance > budget {
            quantity -= 1;
        }
        if quantity < 1 {
            return Err(ValidationError::InsufficientCapital {
                required: entry,
                available: capital,
            });
        }

        let notional = quantity as f64 * entry;
        if notional > capital {
            return Err(ValidationError::InsufficientCapital {
                required: notional,
                available: capital,
            });
        }
        Ok(quantity)
    }

    /// Checks, in order: duplicate instrument, position slots, daily loss,
    /// free cash.
    pub fn validate(candidate: &EntryCandidate, account: &AccountState, limits: &RiskLimits) -> RiskDecision {
        if account.holds(&candidate.instrument) {
            return RiskDecision::Reject(ValidationError::DuplicatePosition {
                instrument: candidate.instrument.clone(),
            });
        }

        let in_use = account.slots_in_use();
        if in_use >= limits.max_open_positions() {
            return RiskDecision::Reject(ValidationError::PositionLimit {
                open: in_use,
                max: limits.max_open_positions(),
            });
        }

        let loss = -account.daily_pnl();
        let threshold = limits.daily_loss_threshold();
        if loss >= threshold {
            return RiskDecision::Reject(ValidationError::DailyLossLimit {
                loss,
                limit: threshold,
            });
        }

        let required = candidate.notional();
        let available = account.available_cash();
        if required > available {
            return RiskDecision::Reject(ValidationError::InsufficientCapital { required, available });
        }

        RiskDecision::Allow
    }

    pub fn risk_snapshot(account: &AccountState, limits: &RiskLimits) -> RiskSnapshot {
        let daily_pnl = account.daily_pnl();
        let open_positions = account.slots_in_use();
        RiskSnapshot {
            capital: account.cash(),
            daily_pnl,
            daily_pnl_pct: daily_pnl / limits.capital() * 100.0,
            open_positions,
            max_open_positions: limits.max_open_positions(),
            available_positions: limits.max_open_positions().saturating_sub(open_positions),
            max_risk_per_trade: limits.max_risk_per_trade(),
            max_daily_loss: limits.max_daily_loss(),
        }
    }
}
