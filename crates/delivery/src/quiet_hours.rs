//! Quiet hours: blocks messaging during a do-not-disturb window in the
//! user's local time.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Largest real-world UTC offset is +14:00, smallest -12:00.
const MAX_OFFSET_MINUTES: i32 = 14 * 60;
const MIN_OFFSET_MINUTES: i32 = -12 * 60;

/// Do-not-disturb window `[start_hour, end_hour)` in local hours.
/// A window with `start_hour > end_hour` wraps midnight (e.g. 22 → 9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietHours {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start_hour < 24 && self.end_hour < 24
    }

    /// Local hour for a UTC instant and offset, or `None` if the offset is
    /// outside the range of real time zones.
    pub fn local_hour(now: DateTime<Utc>, utc_offset_minutes: i32) -> Option<u32> {
        if !(MIN_OFFSET_MINUTES..=MAX_OFFSET_MINUTES).contains(&utc_offset_minutes) {
            return None;
        }
        Some((now + Duration::minutes(i64::from(utc_offset_minutes))).hour())
    }

    /// Whether sending at `now` falls inside the window. An invalid window or
    /// offset counts as quiet.
    pub fn is_quiet(&self, now: DateTime<Utc>, utc_offset_minutes: i32) -> bool {
        if !self.is_valid() {
            return true;
        }
        let Some(hour) = Self::local_hour(now, utc_offset_minutes) else {
            return true;
        };

        if self.start_hour == self.end_hour {
            false
        } else if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_utc(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 30, 0).unwrap()
    }

    #[test]
    fn test_window_wrapping_midnight() {
        let quiet = QuietHours::new(22, 9);
        assert!(quiet.is_quiet(at_utc(23), 0));
        assert!(quiet.is_quiet(at_utc(3), 0));
        assert!(!quiet.is_quiet(at_utc(9), 0));
        assert!(!quiet.is_quiet(at_utc(15), 0));
    }

    #[test]
    fn test_daytime_window() {
        let quiet = QuietHours::new(13, 15);
        assert!(quiet.is_quiet(at_utc(14), 0));
        assert!(!quiet.is_quiet(at_utc(15), 0));
    }

    #[test]
    fn test_offset_shifts_local_time() {
        let quiet = QuietHours::new(22, 9);
        // 20:30 UTC is 23:30 in UTC+3.
        assert!(quiet.is_quiet(at_utc(20), 180));
        assert!(!quiet.is_quiet(at_utc(20), 0));
    }

    #[test]
    fn test_malformed_input_fails_closed() {
        assert!(QuietHours::new(25, 3).is_quiet(at_utc(12), 0));
        assert!(QuietHours::new(22, 9).is_quiet(at_utc(12), 24 * 60));
    }

    #[test]
    fn test_empty_window_never_quiet() {
        assert!(!QuietHours::new(5, 5).is_quiet(at_utc(5), 0));
    }
}
