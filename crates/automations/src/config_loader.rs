use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::repository::ScenarioConfigRepository;
use crate::types::{ScenarioConfig, ScenarioVersion};

/// Resolves the authoritative published config for a scenario key.
///
/// Every failure (storage error, malformed payload, failed validation) is
/// logged and surfaces as `None`; callers treat that as "scenario off".
#[derive(Clone)]
pub struct ConfigLoader {
    repo: Arc<dyn ScenarioConfigRepository>,
}

impl std::fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigLoader").finish_non_exhaustive()
    }
}

impl ConfigLoader {
    pub fn new(repo: Arc<dyn ScenarioConfigRepository>) -> Self {
        Self { repo }
    }

    /// Latest published version of `scenario_key`, parsed and validated.
    pub async fn get_published_config(&self, scenario_key: &str) -> Option<ScenarioConfig> {
        let versions = match self.repo.published_versions(scenario_key).await {
            Ok(v) => v,
            Err(e) => {
                warn!(scenario = %scenario_key, error = %e, "Failed to read scenario versions");
                return None;
            }
        };

        let latest = latest_published(versions)?;
        let config: ScenarioConfig = match serde_json::from_value(latest.config) {
            Ok(c) => c,
            Err(e) => {
                warn!(scenario = %scenario_key, error = %e, "Published config is malformed");
                return None;
            }
        };

        if config.key != scenario_key {
            warn!(
                scenario = %scenario_key,
                config_key = %config.key,
                "Published config key does not match its row"
            );
            return None;
        }
        if let Err(e) = config.validate() {
            warn!(scenario = %scenario_key, error = %e, "Published config failed validation");
            return None;
        }

        debug!(scenario = %scenario_key, published_at = ?latest.published_at, "Loaded scenario config");
        Some(config)
    }

    /// Keys that currently have a published version.
    pub async fn get_all_published_keys(&self) -> BTreeSet<String> {
        match self.repo.published_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list published scenario keys");
                BTreeSet::new()
            }
        }
    }
}

/// Picks the row with the greatest `published_at`; rows without a timestamp
/// lose to any stamped row.
fn latest_published(versions: Vec<ScenarioVersion>) -> Option<ScenarioVersion> {
    versions
        .into_iter()
        .filter(|v| v.status == crate::types::ConfigStatus::Published)
        .max_by_key(|v| v.published_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::types::fixtures::scenario;
    use crate::types::ConfigStatus;
    use chrono::{Duration, Utc};

    fn loader_with(store: Arc<InMemoryStore>) -> ConfigLoader {
        ConfigLoader::new(store)
    }

    #[tokio::test]
    async fn test_latest_published_wins() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();

        let mut old = scenario("upsell_vds");
        old.steps[0].template = crate::types::fixtures::template("old text");
        let mut new = scenario("upsell_vds");
        new.steps[0].template = crate::types::fixtures::template("new text");

        // Insert the newer one first so insertion order cannot decide.
        store.publish("upsell_vds", serde_json::to_value(&new).unwrap(), now);
        store.publish(
            "upsell_vds",
            serde_json::to_value(&old).unwrap(),
            now - Duration::days(1),
        );

        let loaded = loader_with(store).get_published_config("upsell_vds").await.unwrap();
        assert_eq!(loaded.steps[0].template.locales["ru"].text, "new text");
    }

    #[tokio::test]
    async fn test_missing_key_returns_none() {
        let store = Arc::new(InMemoryStore::new());
        assert!(loader_with(store).get_published_config("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_returns_none() {
        let store = Arc::new(InMemoryStore::new());
        store.publish("broken", serde_json::json!({"key": "broken", "steps": "oops"}), Utc::now());
        assert!(loader_with(store).get_published_config("broken").await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_returns_none() {
        let store = Arc::new(InMemoryStore::new());
        let mut config = scenario("empty");
        config.steps.clear();
        store.publish("empty", serde_json::to_value(&config).unwrap(), Utc::now());
        assert!(loader_with(store).get_published_config("empty").await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_hours_return_none() {
        let store = Arc::new(InMemoryStore::new());
        let template = serde_json::json!({ "base_locale": "ru", "locales": { "ru": { "text": "hi" } } });
        store.publish(
            "slow_drip",
            serde_json::json!({
                "key": "slow_drip",
                "event_kind": "onboarding",
                "steps": [
                    { "template": template },
                    { "delay_hours": 10_000_000_000_i64, "template": template }
                ]
            }),
            Utc::now(),
        );
        store.publish(
            "forever_offer",
            serde_json::json!({
                "key": "forever_offer",
                "event_kind": "upsell",
                "steps": [{
                    "template": template,
                    "offer": { "kind": "topup_bonus", "bonus_percent": 10, "ttl_hours": 10_000_000_000_i64 }
                }]
            }),
            Utc::now(),
        );
        store.publish(
            "rare",
            serde_json::json!({
                "key": "rare",
                "event_kind": "fomo",
                "throttle": { "min_interval_hours": 10_000_000_000_i64 },
                "steps": [{ "template": template }]
            }),
            Utc::now(),
        );

        let loader = loader_with(store);
        assert!(loader.get_published_config("slow_drip").await.is_none());
        assert!(loader.get_published_config("forever_offer").await.is_none());
        assert!(loader.get_published_config("rare").await.is_none());
    }

    #[tokio::test]
    async fn test_drafts_are_ignored() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store.publish("welcome", serde_json::to_value(scenario("welcome")).unwrap(), now - Duration::days(2));

        let mut draft = scenario("welcome");
        draft.steps.clear();
        store.insert_version(ScenarioVersion {
            scenario_key: "welcome".into(),
            status: ConfigStatus::Draft,
            published_at: Some(now),
            config: serde_json::to_value(&draft).unwrap(),
        });

        let loader = loader_with(store);
        assert!(loader.get_published_config("welcome").await.is_some());
        assert_eq!(loader.get_all_published_keys().await.len(), 1);
    }
}
