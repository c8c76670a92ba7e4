//! Delivery policies: quiet hours, per-scenario send intervals, and the
//! cross-scenario commercial push cooldown.
//!
//! Everything here is a pure function of timestamps; the caller supplies
//! `now` and the recorded history.

pub mod frequency_capping;
pub mod quiet_hours;
pub mod throttle;

pub use frequency_capping::CommercialCooldown;
pub use quiet_hours::QuietHours;
pub use throttle::SendInterval;
