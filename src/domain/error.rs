//! Domain error types.
//!
//! `ValidationError` is expected control flow (a rejected entry); everything
//! else propagates to the caller as a [`DeskError`].

use chrono::NaiveDateTime;

/// Reasons an entry candidate is refused by the risk manager.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid stop distance: entry {entry} equals stop {stop}")]
    InvalidStopDistance { entry: f64, stop: f64 },

    #[error("insufficient capital: need {required:.2}, have {available:.2}")]
    InsufficientCapital { required: f64, available: f64 },

    #[error("daily loss limit reached: {loss:.2} >= {limit:.2}")]
    DailyLossLimit { loss: f64, limit: f64 },

    #[error("position limit reached: {open} of {max} slots in use")]
    PositionLimit { open: usize, max: usize },

    #[error("{instrument} already has a pending or open position")]
    DuplicatePosition { instrument: String },
}

/// Malformed or out-of-order input data. Fatal for the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("malformed bar for {instrument} at {timestamp}: {reason}")]
    MalformedBar {
        instrument: String,
        timestamp: NaiveDateTime,
        reason: String,
    },

    #[error("non-monotonic timestamp for {instrument}: {current} after {previous}")]
    NonMonotonic {
        instrument: String,
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },

    #[error("slice at {timestamp} is older than the ledger's latest {latest}")]
    StaleSlice {
        timestamp: NaiveDateTime,
        latest: NaiveDateTime,
    },

    #[error("duplicate signal for {instrument} at {timestamp}")]
    DuplicateSignal {
        instrument: String,
        timestamp: NaiveDateTime,
    },

    #[error("invalid direction value {value} (expected 1, 0 or -1)")]
    InvalidDirection { value: i64 },

    #[error("failed to read {source_name}: {reason}")]
    Parse { source_name: String, reason: String },
}

/// Failures talking to the broker collaborator. Fatal for the run once
/// retries are exhausted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    #[error("order submission for {instrument} failed after {attempts} attempts: {reason}")]
    Submission {
        instrument: String,
        attempts: u32,
        reason: String,
    },

    #[error("position drift on {instrument}: ledger {ledger}, broker {broker}")]
    ReconciliationMismatch {
        instrument: String,
        ledger: String,
        broker: String,
    },

    #[error("broker transport error: {0}")]
    Transport(String),
}

/// Top-level error type for riskdesk.
#[derive(Debug, thiserror::Error)]
pub enum DeskError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DeskError {
    pub fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        DeskError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DeskError::ConfigParse { .. }
                | DeskError::ConfigMissing { .. }
                | DeskError::ConfigInvalid { .. }
        )
    }
}

impl From<&DeskError> for std::process::ExitCode {
    fn from(err: &DeskError) -> Self {
        let code: u8 = match err {
            DeskError::Io(_) => 1,
            DeskError::ConfigParse { .. }
            | DeskError::ConfigMissing { .. }
            | DeskError::ConfigInvalid { .. } => 2,
            DeskError::Data(_) => 3,
            DeskError::Broker(_) => 4,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap()
    }

    #[test]
    fn validation_error_messages() {
        let err = ValidationError::InvalidStopDistance {
            entry: 100.0,
            stop: 100.0,
        };
        assert_eq!(
            err.to_string(),
            "invalid stop distance: entry 100 equals stop 100"
        );

        let err = ValidationError::PositionLimit { open: 5, max: 5 };
        assert_eq!(err.to_string(), "position limit reached: 5 of 5 slots in use");
    }

    #[test]
    fn data_error_converts_into_desk_error() {
        let err: DeskError = DataError::NonMonotonic {
            instrument: "INFY".into(),
            previous: ts(),
            current: ts(),
        }
        .into();
        assert!(matches!(err, DeskError::Data(_)));
        assert!(!err.is_configuration());
    }

    #[test]
    fn config_helper_builds_invalid_variant() {
        let err = DeskError::config_invalid("risk", "capital", "must be positive");
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "invalid config value [risk] capital: must be positive"
        );
    }
}
