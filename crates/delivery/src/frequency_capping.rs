//! Commercial push cooldown: at most one commercially framed message per
//! user within the cooldown window, across all scenarios.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

pub const DEFAULT_COOLDOWN_HOURS: i64 = 72;

#[derive(Debug, Clone, Copy)]
pub struct CommercialCooldown {
    window: Duration,
}

impl CommercialCooldown {
    /// A window too large for a `Duration` saturates, blocking every
    /// commercial push after the first.
    pub fn new(hours: i64) -> Self {
        Self {
            window: Duration::try_hours(hours).unwrap_or(Duration::MAX),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn can_send(&self, last_commercial_push_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last_commercial_push_at else {
            return true;
        };
        let elapsed = now - last;
        if elapsed < self.window {
            debug!(
                elapsed_hours = elapsed.num_hours(),
                window_hours = self.window.num_hours(),
                "Commercial push blocked by cooldown"
            );
            return false;
        }
        true
    }
}

impl Default for CommercialCooldown {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_HOURS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window_is_72_hours() {
        let cooldown = CommercialCooldown::default();
        let now = Utc::now();
        assert_eq!(cooldown.window(), Duration::hours(72));

        assert!(cooldown.can_send(None, now));
        assert!(!cooldown.can_send(Some(now - Duration::hours(71)), now));
        assert!(cooldown.can_send(Some(now - Duration::hours(72)), now));
    }

    #[test]
    fn test_custom_window() {
        let cooldown = CommercialCooldown::new(1);
        let now = Utc::now();
        assert!(cooldown.can_send(Some(now - Duration::minutes(61)), now));
        assert!(!cooldown.can_send(Some(now - Duration::minutes(59)), now));
    }

    #[test]
    fn test_oversized_window_saturates() {
        let cooldown = CommercialCooldown::new(i64::MAX);
        let now = Utc::now();

        assert_eq!(cooldown.window(), Duration::MAX);
        assert!(cooldown.can_send(None, now));
        assert!(!cooldown.can_send(Some(now - Duration::days(365 * 100)), now));
    }
}
