//! Exchange trading session calendar

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};

/// Whether the market is open at a point in time
pub trait MarketSession: Send + Sync {
    fn is_open(&self, at: DateTime<Utc>) -> bool;
}

/// NSE cash and F&O hours: Monday to Friday, 09:15 to 15:30 IST.
///
/// Exchange holidays are not modelled.
#[derive(Debug, Clone, Copy)]
pub struct NseSession {
    /// Seconds after local midnight
    open: u32,
    close: u32,
}

const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

impl NseSession {
    pub fn new() -> Self {
        Self {
            open: 9 * 3600 + 15 * 60,
            close: 15 * 3600 + 30 * 60,
        }
    }
}

impl Default for NseSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketSession for NseSession {
    fn is_open(&self, at: DateTime<Utc>) -> bool {
        let Some(ist) = FixedOffset::east_opt(IST_OFFSET_SECS) else {
            return false;
        };
        let local = at.with_timezone(&ist);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let secs = local.num_seconds_from_midnight();
        secs >= self.open && secs <= self.close
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_weekday_hours() {
        let session = NseSession::new();
        // Wednesday 2024-01-10, 10:00 IST = 04:30 UTC
        assert!(session.is_open(utc(2024, 1, 10, 4, 30)));
        // 09:00 IST
        assert!(!session.is_open(utc(2024, 1, 10, 3, 30)));
        // 15:30 IST is still open, 15:31 is not
        assert!(session.is_open(utc(2024, 1, 10, 10, 0)));
        assert!(!session.is_open(utc(2024, 1, 10, 10, 1)));
    }

    #[test]
    fn test_weekend_closed() {
        // Saturday 2024-01-13, 11:00 IST
        assert!(!NseSession::new().is_open(utc(2024, 1, 13, 5, 30)));
    }
}
