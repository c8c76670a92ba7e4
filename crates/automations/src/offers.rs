use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use growth_core::types::{OfferInstance, UserId};
use growth_core::{GrowthError, GrowthResult};
use tracing::info;
use uuid::Uuid;

use crate::repository::{OfferRepository, UserRepository};
use crate::types::OfferSpec;

/// Terms of a new offer.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferParams {
    pub bonus_percent: f64,
    pub required_amount: f64,
    pub ttl: Duration,
}

impl OfferParams {
    /// # Errors
    ///
    /// Returns `Validation` when the lifetime does not fit a `Duration`.
    pub fn from_spec(spec: &OfferSpec, default_ttl_hours: i64) -> GrowthResult<Self> {
        let ttl_hours = spec.ttl_hours.unwrap_or(default_ttl_hours);
        let ttl = Duration::try_hours(ttl_hours).ok_or_else(|| {
            GrowthError::Validation(format!("offer ttl of {} hours is out of range", ttl_hours))
        })?;
        Ok(Self {
            bonus_percent: spec.bonus_percent,
            required_amount: spec.required_amount,
            ttl,
        })
    }

    /// Expiry of an offer created at `now`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the expiry lies past the representable range.
    pub fn expires_at(&self, now: DateTime<Utc>) -> GrowthResult<DateTime<Utc>> {
        now.checked_add_signed(self.ttl)
            .ok_or_else(|| GrowthError::Validation("offer expiry is out of range".into()))
    }
}

/// Creates, looks up and applies time-boxed offers.
///
/// Duplicate avoidance lives in the evaluator; this service creates whatever
/// it is asked to.
#[derive(Clone)]
pub struct OfferService {
    offers: Arc<dyn OfferRepository>,
    users: Arc<dyn UserRepository>,
}

impl std::fmt::Debug for OfferService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfferService").finish_non_exhaustive()
    }
}

impl OfferService {
    pub fn new(offers: Arc<dyn OfferRepository>, users: Arc<dyn UserRepository>) -> Self {
        Self { offers, users }
    }

    /// Persists a new offer starting now.
    ///
    /// # Errors
    ///
    /// Propagates the repository error when the offer cannot be stored.
    pub async fn create_offer_instance(
        &self,
        user_id: UserId,
        kind: &str,
        params: OfferParams,
    ) -> GrowthResult<OfferInstance> {
        self.create_offer_instance_at(user_id, kind, params, Utc::now()).await
    }

    pub async fn create_offer_instance_at(
        &self,
        user_id: UserId,
        kind: &str,
        params: OfferParams,
        now: DateTime<Utc>,
    ) -> GrowthResult<OfferInstance> {
        let expires_at = params.expires_at(now)?;
        let offer = OfferInstance {
            id: Uuid::new_v4(),
            user_id,
            kind: kind.to_string(),
            bonus_percent: params.bonus_percent,
            required_amount: params.required_amount,
            created_at: now,
            expires_at,
            applied_at: None,
        };
        self.offers.insert_offer(offer.clone()).await?;

        info!(
            user_id,
            offer_id = %offer.id,
            kind = %kind,
            bonus_percent = offer.bonus_percent,
            expires_at = %offer.expires_at,
            "Offer created"
        );
        metrics::counter!("automations.offers_created").increment(1);
        Ok(offer)
    }

    /// The user's unexpired offer of `kind`, if any.
    ///
    /// # Errors
    ///
    /// Propagates the repository error.
    pub async fn get_active_offer(&self, user_id: UserId, kind: &str) -> GrowthResult<Option<OfferInstance>> {
        self.get_active_offer_at(user_id, kind, Utc::now()).await
    }

    pub async fn get_active_offer_at(
        &self,
        user_id: UserId,
        kind: &str,
        now: DateTime<Utc>,
    ) -> GrowthResult<Option<OfferInstance>> {
        self.offers.find_active_offer(user_id, kind, now).await
    }

    /// Credits the offer bonus to the user's bonus balance and stamps the
    /// offer as applied. Calling it twice credits twice.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user or offer, or the storage error.
    pub async fn apply_offer_to_balance(&self, user_id: UserId, offer: &OfferInstance) -> GrowthResult<f64> {
        let bonus = offer.bonus_amount();
        let new_balance = self.users.credit_bonus(user_id, bonus).await?;
        self.offers.mark_applied(offer.id, Utc::now()).await?;

        info!(
            user_id,
            offer_id = %offer.id,
            bonus,
            bonus_balance = new_balance,
            "Offer applied to balance"
        );
        Ok(new_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use growth_core::types::User;

    fn service() -> (Arc<InMemoryStore>, OfferService) {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store.upsert_user(User {
            id: 5,
            telegram_id: 500,
            first_name: "Eve".into(),
            locale: None,
            balance: 0.0,
            bonus_balance: 10.0,
            utc_offset_minutes: None,
            registered_at: now,
            last_active_at: now,
            attributes: serde_json::Map::new(),
        });
        let service = OfferService::new(store.clone(), store.clone());
        (store, service)
    }

    fn params() -> OfferParams {
        OfferParams {
            bonus_percent: 20.0,
            required_amount: 1000.0,
            ttl: Duration::hours(48),
        }
    }

    #[tokio::test]
    async fn test_created_offer_is_active() {
        let (_store, service) = service();
        let created = service.create_offer_instance(5, "topup_bonus", params()).await.unwrap();

        let active = service.get_active_offer(5, "topup_bonus").await.unwrap();
        assert_eq!(active, Some(created.clone()));
        assert!(created.expires_at > Utc::now());
        assert!(service.get_active_offer(5, "other_kind").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_offer_not_returned() {
        let (_store, service) = service();
        let long_ago = Utc::now() - Duration::days(10);
        service
            .create_offer_instance_at(5, "topup_bonus", params(), long_ago)
            .await
            .unwrap();
        assert!(service.get_active_offer(5, "topup_bonus").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_credits_bonus() {
        let (store, service) = service();
        let offer = service.create_offer_instance(5, "topup_bonus", params()).await.unwrap();

        let balance = service.apply_offer_to_balance(5, &offer).await.unwrap();
        assert!((balance - 210.0).abs() < 1e-9);
        assert!(store.offers_for(5)[0].applied_at.is_some());
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_rejected() {
        let (store, service) = service();
        let spec = OfferSpec {
            kind: "topup_bonus".into(),
            bonus_percent: 10.0,
            required_amount: 100.0,
            ttl_hours: Some(10_000_000_000),
            apply_immediately: false,
            reuse_active: true,
        };
        assert!(matches!(OfferParams::from_spec(&spec, 72), Err(GrowthError::Validation(_))));

        let huge = OfferParams {
            ttl: Duration::MAX,
            ..params()
        };
        assert!(service.create_offer_instance(5, "topup_bonus", huge).await.is_err());
        assert!(store.offers_for(5).is_empty());
    }

    #[tokio::test]
    async fn test_apply_for_unknown_user_fails() {
        let (_store, service) = service();
        let offer = service.create_offer_instance(5, "topup_bonus", params()).await.unwrap();
        assert!(service.apply_offer_to_balance(99, &offer).await.is_err());
    }
}
