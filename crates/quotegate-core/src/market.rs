//! Market-open oracle consulted by the cache when choosing a TTL.
//!
//! Holiday calendars are not modelled: a [`SessionClock`] only knows the
//! trading weekdays and the session hours of a single exchange.

use std::sync::atomic::{AtomicBool, Ordering};

use time::{OffsetDateTime, Time, UtcOffset, Weekday};

pub trait MarketClock: Send + Sync {
    fn is_open(&self) -> bool;
}

/// Weekday session hours in a fixed UTC offset.
#[derive(Debug, Clone)]
pub struct SessionClock {
    offset: UtcOffset,
    open: Time,
    close: Time,
    trading_days: Vec<Weekday>,
}

impl SessionClock {
    pub fn new(offset: UtcOffset, open: Time, close: Time) -> Self {
        Self {
            offset,
            open,
            close,
            trading_days: vec![
                Weekday::Monday,
                Weekday::Tuesday,
                Weekday::Wednesday,
                Weekday::Thursday,
                Weekday::Friday,
            ],
        }
    }

    pub fn with_trading_days(mut self, days: Vec<Weekday>) -> Self {
        self.trading_days = days;
        self
    }

    /// Evaluate the session at an arbitrary instant.
    pub fn is_open_at(&self, at: OffsetDateTime) -> bool {
        let local = at.to_offset(self.offset);
        if !self.trading_days.contains(&local.weekday()) {
            return false;
        }
        let now = local.time();
        now >= self.open && now < self.close
    }
}

impl MarketClock for SessionClock {
    fn is_open(&self) -> bool {
        self.is_open_at(OffsetDateTime::now_utc())
    }
}

/// Clock with an externally controlled answer.
#[derive(Debug, Default)]
pub struct FixedClock(AtomicBool);

impl FixedClock {
    pub fn new(open: bool) -> Self {
        Self(AtomicBool::new(open))
    }

    pub fn set(&self, open: bool) {
        self.0.store(open, Ordering::SeqCst);
    }
}

impl MarketClock for FixedClock {
    fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset, time};

    fn nyse() -> SessionClock {
        SessionClock::new(offset!(-5), time!(9:30), time!(16:00))
    }

    #[test]
    fn open_during_weekday_session() {
        // Wednesday 15:00 UTC = 10:00 New York (EST)
        assert!(nyse().is_open_at(datetime!(2024-01-10 15:00 UTC)));
    }

    #[test]
    fn closed_outside_hours_and_on_weekends() {
        let clock = nyse();
        assert!(!clock.is_open_at(datetime!(2024-01-10 14:29 UTC)));
        assert!(!clock.is_open_at(datetime!(2024-01-10 21:00 UTC)));
        // Saturday
        assert!(!clock.is_open_at(datetime!(2024-01-13 16:00 UTC)));
    }

    #[test]
    fn custom_trading_days() {
        let clock = nyse().with_trading_days(vec![Weekday::Saturday]);
        assert!(clock.is_open_at(datetime!(2024-01-13 16:00 UTC)));
        assert!(!clock.is_open_at(datetime!(2024-01-10 16:00 UTC)));
    }

    #[test]
    fn fixed_clock_toggles() {
        let clock = FixedClock::new(true);
        assert!(clock.is_open());
        clock.set(false);
        assert!(!clock.is_open());
    }
}
