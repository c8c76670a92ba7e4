//! Send interval: minimum spacing between two sends of the same scenario
//! to the same user.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendInterval {
    pub min_interval_hours: i64,
}

impl SendInterval {
    pub fn hours(min_interval_hours: i64) -> Self {
        Self { min_interval_hours }
    }

    /// `None` when the interval does not fit a `Duration`.
    pub fn as_duration(&self) -> Option<Duration> {
        Duration::try_hours(self.min_interval_hours)
    }

    /// True when a send at `now` respects the interval. Never sent before
    /// always passes; a non-positive or unrepresentable interval never does.
    pub fn allows(&self, last_sent_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        if self.min_interval_hours <= 0 {
            return false;
        }
        let Some(interval) = self.as_duration() else {
            return false;
        };
        match last_sent_at {
            None => true,
            Some(last) => now - last >= interval,
        }
    }

    /// Earliest send time after `last_sent_at`, or `None` if it lies past
    /// the representable range.
    pub fn next_allowed_at(&self, last_sent_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        last_sent_at.checked_add_signed(self.as_duration()?)
    }
}
