use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = i64;

/// Bot user as seen by the automation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub telegram_id: i64,
    pub first_name: String,
    #[serde(default)]
    pub locale: Option<String>,
    pub balance: f64,
    #[serde(default)]
    pub bonus_balance: f64,
    /// Offset of the user's local time from UTC, if known.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
    pub registered_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Free-form facts used by scenario conditions (active services, spend, ...).
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Kind of a fired marketing or lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthEventKind {
    Upsell,
    Bundle,
    Fomo,
    Reactivation,
    Trigger,
    Winback,
    Onboarding,
    Feedback,
}

impl GrowthEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsell => "upsell",
            Self::Bundle => "bundle",
            Self::Fomo => "fomo",
            Self::Reactivation => "reactivation",
            Self::Trigger => "trigger",
            Self::Winback => "winback",
            Self::Onboarding => "onboarding",
            Self::Feedback => "feedback",
        }
    }
}

/// Append-only audit record of a fired action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthEvent {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: GrowthEventKind,
    pub scenario_key: Option<String>,
    pub variant: Option<String>,
    pub step: Option<u32>,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
}

impl GrowthEvent {
    pub fn new(user_id: UserId, kind: GrowthEventKind, amount: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            scenario_key: None,
            variant: None,
            step: None,
            amount,
            created_at: Utc::now(),
        }
    }
}

/// A time-boxed offer extended to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferInstance {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: String,
    pub bonus_percent: f64,
    pub required_amount: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl OfferInstance {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Bonus credited when the offer is applied.
    pub fn bonus_amount(&self) -> f64 {
        self.required_amount * self.bonus_percent / 100.0
    }
}

/// Per-user, per-scenario progress and throttle bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserNotificationState {
    pub user_id: UserId,
    pub scenario_key: String,
    /// Index of the last step that was sent.
    pub step: u32,
    pub variant: Option<String>,
    pub last_sent_at: DateTime<Utc>,
    pub next_step_due_at: Option<DateTime<Utc>>,
    pub completed: bool,
}

/// Last commercially framed push, independent of scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommercialPushState {
    pub user_id: UserId,
    pub last_commercial_push_at: DateTime<Utc>,
}

/// Automation-relevant event: `{ "type": ..., "userId": ..., ...fields }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub user_id: UserId,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl AutomationEvent {
    pub fn new(event_type: impl Into<String>, user_id: UserId) -> Self {
        Self {
            event_type: event_type.into(),
            user_id,
            occurred_at: Utc::now(),
            fields: serde_json::Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Scalar event fields rendered as template variables.
    pub fn scalar_fields(&self) -> HashMap<String, String> {
        self.fields
            .iter()
            .filter_map(|(k, v)| {
                let rendered = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((k.clone(), rendered))
            })
            .collect()
    }
}

/// UI action produced for a rendered button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ButtonAction {
    Url { text: String, url: String },
    Callback { text: String, data: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload_shape() {
        let event: AutomationEvent = serde_json::from_value(serde_json::json!({
            "type": "payment_succeeded",
            "userId": 42,
            "amount": 500,
            "service": "vds"
        }))
        .unwrap();

        assert_eq!(event.event_type, "payment_succeeded");
        assert_eq!(event.user_id, 42);
        let vars = event.scalar_fields();
        assert_eq!(vars.get("amount").map(String::as_str), Some("500"));
        assert_eq!(vars.get("service").map(String::as_str), Some("vds"));
    }

    #[test]
    fn test_offer_activity_and_bonus() {
        let now = Utc::now();
        let offer = OfferInstance {
            id: Uuid::new_v4(),
            user_id: 1,
            kind: "topup_bonus".into(),
            bonus_percent: 10.0,
            required_amount: 1000.0,
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            applied_at: None,
        };
        assert!(offer.is_active(now));
        assert!(!offer.is_active(now + chrono::Duration::hours(2)));
        assert!((offer.bonus_amount() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_growth_event_kind_serde() {
        let json = serde_json::to_string(&GrowthEventKind::Winback).unwrap();
        assert_eq!(json, "\"winback\"");
        assert_eq!(GrowthEventKind::Fomo.as_str(), "fomo");
    }
}
