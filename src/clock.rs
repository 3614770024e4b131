use chrono::{DateTime, FixedOffset, Local};
use std::sync::Arc;

/// Source of the current time, in the offset sessions are scheduled in.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

pub type DynClock = Arc<dyn Clock>;

/// The host's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<FixedOffset>,
}

impl FixedClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_keeps_offset() {
        let offset = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let at = offset.with_ymd_and_hms(2026, 10, 12, 9, 30, 0).unwrap();
        let clock = FixedClock::new(at);
        assert_eq!(clock.now(), at);
        assert_eq!(clock.now().offset().local_minus_utc(), 5 * 3600 + 1800);
    }

    #[test]
    fn system_clock_matches_local_offset() {
        let now = SystemClock.now();
        assert_eq!(
            now.offset().local_minus_utc(),
            Local::now().offset().local_minus_utc()
        );
    }
}
