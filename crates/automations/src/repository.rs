//! Persistence seams used by the engine. The bot's storage layer implements
//! these; [`crate::memory::InMemoryStore`] implements all of them for
//! development and tests.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use growth_core::types::{
    CommercialPushState, GrowthEvent, OfferInstance, User, UserId, UserNotificationState,
};
use growth_core::GrowthResult;

use crate::types::ScenarioVersion;

/// Versioned scenario configuration rows.
#[async_trait]
pub trait ScenarioConfigRepository: Send + Sync {
    /// All published versions for `scenario_key`, in any order.
    async fn published_versions(&self, scenario_key: &str) -> GrowthResult<Vec<ScenarioVersion>>;

    /// Keys that have at least one published version.
    async fn published_keys(&self) -> GrowthResult<BTreeSet<String>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, user_id: UserId) -> GrowthResult<Option<User>>;

    /// Adds `amount` to the user's bonus balance and returns the new value.
    async fn credit_bonus(&self, user_id: UserId, amount: f64) -> GrowthResult<f64>;
}

#[async_trait]
pub trait OfferRepository: Send + Sync {
    async fn insert_offer(&self, offer: OfferInstance) -> GrowthResult<()>;

    /// Most recent offer of `kind` for the user that expires after `now`.
    async fn find_active_offer(
        &self,
        user_id: UserId,
        kind: &str,
        now: DateTime<Utc>,
    ) -> GrowthResult<Option<OfferInstance>>;

    async fn mark_applied(&self, offer_id: uuid::Uuid, applied_at: DateTime<Utc>) -> GrowthResult<()>;
}

#[async_trait]
pub trait NotificationStateRepository: Send + Sync {
    async fn get_state(
        &self,
        user_id: UserId,
        scenario_key: &str,
    ) -> GrowthResult<Option<UserNotificationState>>;

    async fn upsert_state(&self, state: UserNotificationState) -> GrowthResult<()>;

    /// Unfinished states of `scenario_key` whose next step is due at `now`.
    async fn list_due(
        &self,
        scenario_key: &str,
        now: DateTime<Utc>,
    ) -> GrowthResult<Vec<UserNotificationState>>;
}

#[async_trait]
pub trait GrowthEventRepository: Send + Sync {
    async fn append(&self, event: GrowthEvent) -> GrowthResult<()>;

    async fn list_for_user(&self, user_id: UserId) -> GrowthResult<Vec<GrowthEvent>>;
}

#[async_trait]
pub trait CommercialPushRepository: Send + Sync {
    async fn last_commercial_push(&self, user_id: UserId) -> GrowthResult<Option<CommercialPushState>>;

    async fn record_commercial_push(&self, user_id: UserId, at: DateTime<Utc>) -> GrowthResult<()>;
}
