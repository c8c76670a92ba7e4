//! In-memory store backed by DashMap.
//!
//! Production wires the repository traits to the bot's database; this
//! provides the same surface for development and testing.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use growth_core::types::{
    CommercialPushState, GrowthEvent, OfferInstance, User, UserId, UserNotificationState,
};
use growth_core::{GrowthError, GrowthResult};
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::repository::{
    CommercialPushRepository, GrowthEventRepository, NotificationStateRepository,
    OfferRepository, ScenarioConfigRepository, UserRepository,
};
use crate::types::{ConfigStatus, ScenarioVersion};

/// Thread-safe in-memory store for scenarios, users, offers, notification
/// state, growth events and commercial push stamps.
#[derive(Default)]
pub struct InMemoryStore {
    versions: DashMap<String, Vec<ScenarioVersion>>,
    users: DashMap<UserId, User>,
    offers: DashMap<UserId, Vec<OfferInstance>>,
    states: DashMap<(UserId, String), UserNotificationState>,
    growth_events: RwLock<Vec<GrowthEvent>>,
    commercial: DashMap<UserId, CommercialPushState>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("scenarios", &self.versions.len())
            .field("users", &self.users.len())
            .field("states", &self.states.len())
            .finish()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        info!("Automation store initialized (in-memory, development mode)");
        Self::default()
    }

    // ─── Scenarios ─────────────────────────────────────────────────────────

    pub fn insert_version(&self, version: ScenarioVersion) {
        self.versions
            .entry(version.scenario_key.clone())
            .or_default()
            .push(version);
    }

    /// Stores `config` as a published version stamped `published_at`.
    pub fn publish(&self, scenario_key: &str, config: serde_json::Value, published_at: DateTime<Utc>) {
        info!(scenario = %scenario_key, %published_at, "Publishing scenario version");
        self.insert_version(ScenarioVersion {
            scenario_key: scenario_key.to_string(),
            status: ConfigStatus::Published,
            published_at: Some(published_at),
            config,
        });
    }

    // ─── Users ─────────────────────────────────────────────────────────────

    pub fn upsert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn user(&self, user_id: UserId) -> Option<User> {
        self.users.get(&user_id).map(|r| r.value().clone())
    }

    // ─── Inspection ────────────────────────────────────────────────────────

    pub fn state(&self, user_id: UserId, scenario_key: &str) -> Option<UserNotificationState> {
        self.states
            .get(&(user_id, scenario_key.to_string()))
            .map(|r| r.value().clone())
    }

    pub fn growth_events(&self) -> Vec<GrowthEvent> {
        self.growth_events.read().clone()
    }

    pub fn offers_for(&self, user_id: UserId) -> Vec<OfferInstance> {
        self.offers
            .get(&user_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ScenarioConfigRepository for InMemoryStore {
    async fn published_versions(&self, scenario_key: &str) -> GrowthResult<Vec<ScenarioVersion>> {
        Ok(self
            .versions
            .get(scenario_key)
            .map(|r| {
                r.value()
                    .iter()
                    .filter(|v| v.status == ConfigStatus::Published)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn published_keys(&self) -> GrowthResult<BTreeSet<String>> {
        Ok(self
            .versions
            .iter()
            .filter(|r| r.value().iter().any(|v| v.status == ConfigStatus::Published))
            .map(|r| r.key().clone())
            .collect())
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn get_user(&self, user_id: UserId) -> GrowthResult<Option<User>> {
        Ok(self.user(user_id))
    }

    async fn credit_bonus(&self, user_id: UserId, amount: f64) -> GrowthResult<f64> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| GrowthError::NotFound(format!("user {}", user_id)))?;
        user.bonus_balance += amount;
        Ok(user.bonus_balance)
    }
}

#[async_trait]
impl OfferRepository for InMemoryStore {
    async fn insert_offer(&self, offer: OfferInstance) -> GrowthResult<()> {
        self.offers.entry(offer.user_id).or_default().push(offer);
        Ok(())
    }

    async fn find_active_offer(
        &self,
        user_id: UserId,
        kind: &str,
        now: DateTime<Utc>,
    ) -> GrowthResult<Option<OfferInstance>> {
        Ok(self.offers.get(&user_id).and_then(|r| {
            r.value()
                .iter()
                .filter(|o| o.kind == kind && o.is_active(now))
                .max_by_key(|o| o.created_at)
                .cloned()
        }))
    }

    async fn mark_applied(&self, offer_id: Uuid, applied_at: DateTime<Utc>) -> GrowthResult<()> {
        for mut entry in self.offers.iter_mut() {
            if let Some(offer) = entry.value_mut().iter_mut().find(|o| o.id == offer_id) {
                offer.applied_at = Some(applied_at);
                return Ok(());
            }
        }
        Err(GrowthError::NotFound(format!("offer {}", offer_id)))
    }
}

#[async_trait]
impl NotificationStateRepository for InMemoryStore {
    async fn get_state(
        &self,
        user_id: UserId,
        scenario_key: &str,
    ) -> GrowthResult<Option<UserNotificationState>> {
        Ok(self.state(user_id, scenario_key))
    }

    async fn upsert_state(&self, state: UserNotificationState) -> GrowthResult<()> {
        self.states
            .insert((state.user_id, state.scenario_key.clone()), state);
        Ok(())
    }

    async fn list_due(
        &self,
        scenario_key: &str,
        now: DateTime<Utc>,
    ) -> GrowthResult<Vec<UserNotificationState>> {
        let mut due: Vec<UserNotificationState> = self
            .states
            .iter()
            .filter(|r| {
                let s = r.value();
                s.scenario_key == scenario_key
                    && !s.completed
                    && s.next_step_due_at.is_some_and(|at| at <= now)
            })
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|s| (s.next_step_due_at, s.user_id));
        Ok(due)
    }
}

#[async_trait]
impl GrowthEventRepository for InMemoryStore {
    async fn append(&self, event: GrowthEvent) -> GrowthResult<()> {
        self.growth_events.write().push(event);
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId) -> GrowthResult<Vec<GrowthEvent>> {
        Ok(self
            .growth_events
            .read()
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CommercialPushRepository for InMemoryStore {
    async fn last_commercial_push(&self, user_id: UserId) -> GrowthResult<Option<CommercialPushState>> {
        Ok(self.commercial.get(&user_id).map(|r| r.value().clone()))
    }

    async fn record_commercial_push(&self, user_id: UserId, at: DateTime<Utc>) -> GrowthResult<()> {
        self.commercial.insert(
            user_id,
            CommercialPushState {
                user_id,
                last_commercial_push_at: at,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_published_filter() {
        let store = InMemoryStore::new();
        store.insert_version(ScenarioVersion {
            scenario_key: "draft_only".into(),
            status: ConfigStatus::Draft,
            published_at: None,
            config: serde_json::json!({}),
        });
        store.publish("live", serde_json::json!({}), Utc::now());

        let keys = store.published_keys().await.unwrap();
        assert!(keys.contains("live"));
        assert!(!keys.contains("draft_only"));
        assert!(store.published_versions("draft_only").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_due_skips_future_and_completed() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let base = UserNotificationState {
            user_id: 1,
            scenario_key: "winback".into(),
            step: 0,
            variant: None,
            last_sent_at: now - Duration::hours(30),
            next_step_due_at: Some(now - Duration::hours(1)),
            completed: false,
        };
        store.upsert_state(base.clone()).await.unwrap();
        store
            .upsert_state(UserNotificationState {
                user_id: 2,
                next_step_due_at: Some(now + Duration::hours(1)),
                ..base.clone()
            })
            .await
            .unwrap();
        store
            .upsert_state(UserNotificationState {
                user_id: 3,
                completed: true,
                ..base
            })
            .await
            .unwrap();

        let due = store.list_due("winback", now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].user_id, 1);
    }
}
