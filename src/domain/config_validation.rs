//! Configuration loading and validation.
//!
//! Reads every section once into immutable values. The first invalid field
//! aborts with a configuration error; absent keys take their defaults.

use std::time::Duration;

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::DeskError;
use crate::domain::live::LiveConfig;
use crate::domain::metrics::TRADING_DAYS_PER_YEAR;
use crate::domain::position::IntrabarPolicy;
use crate::domain::risk::{BracketPolicy, RiskLimits};
use crate::domain::signal::CombinationRule;
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeskConfig {
    pub backtest: BacktestConfig,
    pub combine: CombinationRule,
    pub live: LiveConfig,
}

pub fn load_desk_config(config: &dyn ConfigPort) -> Result<DeskConfig, DeskError> {
    Ok(DeskConfig {
        backtest: BacktestConfig {
            limits: load_risk_limits(config)?,
            bracket: load_bracket_policy(config)?,
            annualization_factor: load_annualization_factor(config)?,
        },
        combine: load_combination_rule(config)?,
        live: load_live_config(config)?,
    })
}

pub fn load_risk_limits(config: &dyn ConfigPort) -> Result<RiskLimits, DeskError> {
    let capital = config
        .get_double("risk", "capital")?
        .unwrap_or(RiskLimits::DEFAULT_CAPITAL);
    let max_risk = config
        .get_double("risk", "max_risk_per_trade")?
        .unwrap_or(RiskLimits::DEFAULT_MAX_RISK_PER_TRADE);
    let max_daily_loss = config
        .get_double("risk", "max_daily_loss")?
        .unwrap_or(RiskLimits::DEFAULT_MAX_DAILY_LOSS);
    let max_positions = config
        .get_int("risk", "max_open_positions")?
        .unwrap_or(RiskLimits::DEFAULT_MAX_OPEN_POSITIONS as i64);
    let max_positions = usize::try_from(max_positions).map_err(|_| {
        DeskError::config_invalid(
            "risk",
            "max_open_positions",
            "max_open_positions must be at least 1",
        )
    })?;
    RiskLimits::new(capital, max_risk, max_daily_loss, max_positions)
}

pub fn load_bracket_policy(config: &dyn ConfigPort) -> Result<BracketPolicy, DeskError> {
    let stop_loss_pct = config
        .get_double("execution", "stop_loss_pct")?
        .unwrap_or(BracketPolicy::DEFAULT_STOP_LOSS_PCT);
    let reward_ratio = config
        .get_double("execution", "reward_ratio")?
        .unwrap_or(BracketPolicy::DEFAULT_REWARD_RATIO);
    let allow_shorting = config
        .get_bool("execution", "allow_shorting")?
        .unwrap_or(false);
    let intrabar = match config.get_string("execution", "intrabar_policy") {
        Some(raw) => raw
            .parse::<IntrabarPolicy>()
            .map_err(|reason| DeskError::config_invalid("execution", "intrabar_policy", reason))?,
        None => IntrabarPolicy::default(),
    };
    let commission_pct = config
        .get_double("execution", "commission_pct")?
        .unwrap_or(BracketPolicy::DEFAULT_COMMISSION_PCT);
    BracketPolicy::new(stop_loss_pct, reward_ratio, intrabar, allow_shorting)?.with_commission(commission_pct)
}

fn load_annualization_factor(config: &dyn ConfigPort) -> Result<f64, DeskError> {
    let value = config
        .get_double("metrics", "annualization_factor")?
        .unwrap_or(TRADING_DAYS_PER_YEAR);
    if !value.is_finite() || value <= 0.0 {
        return Err(DeskError::config_invalid(
            "metrics",
            "annualization_factor",
            "annualization_factor must be positive",
        ));
    }
    Ok(value)
}

fn load_combination_rule(config: &dyn ConfigPort) -> Result<CombinationRule, DeskError> {
    match config.get_string("signals", "combine") {
        Some(raw) => raw
            .parse()
            .map_err(|reason| DeskError::config_invalid("signals", "combine", reason)),
        None => Ok(CombinationRule::default()),
    }
}

fn millis(config: &dyn ConfigPort, key: &str, default: Duration, min: u64) -> Result<Duration, DeskError> {
    let Some(value) = config.get_int("live", key)? else {
        return Ok(default);
    };
    if value < min as i64 {
        return Err(DeskError::config_invalid(
            "live",
            key,
            format!("{key} must be at least {min}"),
        ));
    }
    Ok(Duration::from_millis(value as u64))
}

pub fn load_live_config(config: &dyn ConfigPort) -> Result<LiveConfig, DeskError> {
    let defaults = LiveConfig::default();
    let poll_interval = millis(config, "poll_interval_ms", defaults.poll_interval, 1)?;
    let ack_timeout = millis(config, "ack_timeout_ms", defaults.ack_timeout, 1)?;
    let ack_poll = millis(config, "ack_poll_ms", defaults.ack_poll, 1)?;
    let retry_backoff = millis(config, "retry_backoff_ms", defaults.retry_backoff, 0)?;

    if ack_poll > ack_timeout {
        return Err(DeskError::config_invalid(
            "live",
            "ack_poll_ms",
            "ack_poll_ms must not exceed ack_timeout_ms",
        ));
    }

    let retries = config
        .get_int("live", "max_submit_retries")?
        .unwrap_or(i64::from(defaults.max_submit_retries));
    let max_submit_retries = u32::try_from(retries)
        .ok()
        .filter(|r| *r >= 1)
        .ok_or_else(|| {
            DeskError::config_invalid(
                "live",
                "max_submit_retries",
                "max_submit_retries must be at least 1",
            )
        })?;

    Ok(LiveConfig {
        poll_interval,
        ack_timeout,
        ack_poll,
        max_submit_retries,
        retry_backoff,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn invalid_key(err: DeskError) -> String {
        match err {
            DeskError::ConfigInvalid { key, .. } => key,
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn empty_config_uses_defaults() {
        let desk = load_desk_config(&FileConfigAdapter::empty()).unwrap();
        assert_eq!(desk.backtest, BacktestConfig::default());
        assert_eq!(desk.combine, CombinationRule::Unanimous);
        assert_eq!(desk.live, LiveConfig::default());
    }

    #[test]
    fn full_config_is_read() {
        let config = make_config(
            r#"
[risk]
capital = 250000
max_risk_per_trade = 1.5
max_daily_loss = 3
max_open_positions = 8

[execution]
stop_loss_pct = 1.0
reward_ratio = 3
allow_shorting = true
intrabar_policy = target_first
commission_pct = 0.05

[metrics]
annualization_factor = 365

[signals]
combine = majority

[live]
poll_interval_ms = 250
ack_timeout_ms = 2000
ack_poll_ms = 50
max_submit_retries = 5
retry_backoff_ms = 0
"#,
        );
        let desk = load_desk_config(&config).unwrap();
        let limits = desk.backtest.limits;
        assert!((limits.capital() - 250_000.0).abs() < f64::EPSILON);
        assert!((limits.max_risk_per_trade() - 1.5).abs() < f64::EPSILON);
        assert_eq!(limits.max_open_positions(), 8);
        assert!(desk.backtest.bracket.allow_shorting);
        assert_eq!(desk.backtest.bracket.intrabar, IntrabarPolicy::TargetFirst);
        assert!((desk.backtest.bracket.reward_ratio() - 3.0).abs() < f64::EPSILON);
        assert!((desk.backtest.bracket.commission_pct() - 0.05).abs() < f64::EPSILON);
        assert!((desk.backtest.annualization_factor - 365.0).abs() < f64::EPSILON);
        assert_eq!(desk.combine, CombinationRule::Majority);
        assert_eq!(desk.live.poll_interval, Duration::from_millis(250));
        assert_eq!(desk.live.max_submit_retries, 5);
        assert_eq!(desk.live.retry_backoff, Duration::ZERO);
    }

    #[test]
    fn non_positive_risk_fails() {
        let err = load_desk_config(&make_config("[risk]\nmax_risk_per_trade = 0\n")).unwrap_err();
        assert_eq!(invalid_key(err), "max_risk_per_trade");
    }

    #[test]
    fn non_positive_capital_fails() {
        let err = load_desk_config(&make_config("[risk]\ncapital = -5\n")).unwrap_err();
        assert_eq!(invalid_key(err), "capital");
    }

    #[test]
    fn negative_positions_fail() {
        let err = load_desk_config(&make_config("[risk]\nmax_open_positions = -1\n")).unwrap_err();
        assert_eq!(invalid_key(err), "max_open_positions");
    }

    #[test]
    fn unparsable_number_fails() {
        let err = load_desk_config(&make_config("[risk]\nmax_daily_loss = five\n")).unwrap_err();
        assert_eq!(invalid_key(err), "max_daily_loss");
    }

    #[test]
    fn unknown_intrabar_policy_fails() {
        let err = load_desk_config(&make_config("[execution]\nintrabar_policy = coin_flip\n")).unwrap_err();
        assert_eq!(invalid_key(err), "intrabar_policy");
    }

    #[test]
    fn negative_commission_fails() {
        let err = load_desk_config(&make_config("[execution]\ncommission_pct = -0.1\n")).unwrap_err();
        assert_eq!(invalid_key(err), "commission_pct");
    }

    #[test]
    fn unknown_combination_rule_fails() {
        let err = load_desk_config(&make_config("[signals]\ncombine = vote\n")).unwrap_err();
        assert_eq!(invalid_key(err), "combine");
    }

    #[test]
    fn zero_annualization_fails() {
        let err = load_desk_config(&make_config("[metrics]\nannualization_factor = 0\n")).unwrap_err();
        assert_eq!(invalid_key(err), "annualization_factor");
    }

    #[test]
    fn ack_poll_longer_than_timeout_fails() {
        let err = load_desk_config(&make_config("[live]\nack_timeout_ms = 100\nack_poll_ms = 500\n")).unwrap_err();
        assert_eq!(invalid_key(err), "ack_poll_ms");
    }

    #[test]
    fn zero_retries_fail() {
        let err = load_desk_config(&make_config("[live]\nmax_submit_retries = 0\n")).unwrap_err();
        assert_eq!(invalid_key(err), "max_submit_retries");
    }

    #[test]
    fn blank_value_is_missing() {
        let config = FileConfigAdapter::empty()
            .with_overrides(vec![("RISKDESK_RISK_CAPITAL".to_string(), "  ".to_string())]);
        let err = load_desk_config(&config).unwrap_err();
        assert!(matches!(
            err,
            DeskError::ConfigMissing { ref section, ref key } if section == "risk" && key == "capital"
        ));
    }

    #[test]
    fn environment_override_wins() {
        let config = make_config("[risk]\ncapital = 50000\n")
            .with_overrides(vec![("RISKDESK_RISK_CAPITAL".to_string(), "75000".to_string())]);
        let desk = load_desk_config(&config).unwrap();
        assert!((desk.backtest.limits.capital() - 75_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_poll_interval_fails() {
        let err = load_desk_config(&make_config("[live]\npoll_interval_ms = 0\n")).unwrap_err();
        assert_eq!(invalid_key(err), "poll_interval_ms");
    }
}
