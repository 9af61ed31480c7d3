//! OHLCV price bar representation.

use chrono::{NaiveDate, NaiveDateTime};

use super::error::DataError;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub instrument: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// Calendar date the bar belongs to; the daily-loss window rolls on it.
    pub fn trading_day(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// True when `price` lies inside the bar's low/high range (inclusive).
    pub fn touches(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }

    pub fn validate(&self) -> Result<(), DataError> {
        let malformed = |reason: &str| DataError::MalformedBar {
            instrument: self.instrument.clone(),
            timestamp: self.timestamp,
            reason: reason.to_string(),
        };

        if self.instrument.trim().is_empty() {
            return Err(malformed("empty instrument id"));
        }
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(malformed("prices must be finite and positive"));
        }
        if self.low > self.open.min(self.close) {
            return Err(malformed("low above open/close"));
        }
        if self.high < self.open.max(self.close) {
            return Err(malformed("high below open/close"));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(malformed("volume must be finite and non-negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bar() -> PriceBar {
        PriceBar {
            instrument: "RELIANCE".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(9, 15, 0)
                .unwrap(),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close: 105.0,
            volume: 50_000.0,
        }
    }

    #[test]
    fn valid_bar_passes() {
        assert!(sample_bar().validate().is_ok());
    }

    #[test]
    fn trading_day_is_calendar_date() {
        let bar = sample_bar();
        assert_eq!(bar.trading_day(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn touches_is_inclusive() {
        let bar = sample_bar();
        assert!(bar.touches(90.0));
        assert!(bar.touches(110.0));
        assert!(!bar.touches(89.99));
        assert!(!bar.touches(110.01));
    }

    #[test]
    fn high_below_close_is_malformed() {
        let bar = PriceBar {
            high: 104.0,
            ..sample_bar()
        };
        assert!(matches!(
            bar.validate(),
            Err(DataError::MalformedBar { .. })
        ));
    }

    #[test]
    fn low_above_open_is_malformed() {
        let bar = PriceBar {
            low: 101.0,
            ..sample_bar()
        };
        assert!(bar.validate().is_err());
    }

    #[test]
    fn non_positive_or_nan_price_is_malformed() {
        let bar = PriceBar {
            open: 0.0,
            low: 0.0,
            ..sample_bar()
        };
        assert!(bar.validate().is_err());

        let bar = PriceBar {
            close: f64::NAN,
            ..sample_bar()
        };
        assert!(bar.validate().is_err());
    }

    #[test]
    fn negative_volume_is_malformed() {
        let bar = PriceBar {
            volume: -1.0,
            ..sample_bar()
        };
        assert!(bar.validate().is_err());
    }
}
