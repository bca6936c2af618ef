use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};
use std::sync::Mutex;

use crate::config::MarketHoursConfig;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Weekly forex session boundaries and the trading-day rollover, all UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketHours {
    close_friday_hour: u32,
    open_sunday_hour: u32,
    rollover_hour: u32,
}

impl From<&MarketHoursConfig> for MarketHours {
    fn from(config: &MarketHoursConfig) -> Self {
        Self {
            close_friday_hour: config.close_friday_hour_utc,
            open_sunday_hour: config.open_sunday_hour_utc,
            rollover_hour: config.day_rollover_hour_utc,
        }
    }
}

impl Default for MarketHours {
    fn default() -> Self {
        Self::from(&MarketHoursConfig::default())
    }
}

impl MarketHours {
    /// Closed from Friday's close hour through Sunday's open hour.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let hour = now.hour();
        match now.weekday() {
            Weekday::Fri => hour < self.close_friday_hour,
            Weekday::Sat => false,
            Weekday::Sun => hour >= self.open_sunday_hour,
            _ => true,
        }
    }

    /// Trading day `now` belongs to. A day starting at the rollover hour is
    /// labelled with the calendar date it mostly covers.
    pub fn trading_day(&self, now: DateTime<Utc>) -> NaiveDate {
        let shift = (24 - self.rollover_hour as i64) % 24;
        (now + Duration::hours(shift)).date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        // 2024-03-01 is a Friday
        Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_weekend_window() {
        let hours = MarketHours::default();
        assert!(hours.is_open(at(1, 21, 59)));
        assert!(!hours.is_open(at(1, 22, 0)));
        assert!(!hours.is_open(at(2, 12, 0)));
        assert!(!hours.is_open(at(3, 21, 59)));
        assert!(hours.is_open(at(3, 22, 0)));
        assert!(hours.is_open(at(4, 3, 0)));
    }

    #[test]
    fn test_trading_day_rolls_at_configured_hour() {
        let hours = MarketHours::default();
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(hours.trading_day(at(4, 10, 0)), monday);
        assert_eq!(hours.trading_day(at(4, 21, 59)), monday);
        assert_eq!(hours.trading_day(at(4, 22, 0)), tuesday);

        let midnight = MarketHours::from(&MarketHoursConfig {
            day_rollover_hour_utc: 0,
            ..MarketHoursConfig::default()
        });
        assert_eq!(midnight.trading_day(at(4, 23, 0)), monday);
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::new(at(4, 10, 0));
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), at(4, 10, 5));
        clock.set(at(2, 0, 0));
        assert_eq!(clock.now(), at(2, 0, 0));
    }
}
