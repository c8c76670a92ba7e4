//! Demo scenarios and users for development runs of the engine.

use chrono::{Duration, Utc};
use growth_core::types::User;
use serde_json::json;
use tracing::info;

use crate::memory::InMemoryStore;

/// Publishes a small set of realistic scenarios and users into `store`.
pub fn seed_demo(store: &InMemoryStore) {
    seed_demo_scenarios(store);
    seed_demo_users(store);
}

pub fn seed_demo_scenarios(store: &InMemoryStore) {
    let now = Utc::now();

    // Onboarding: three steps after the first successful payment.
    store.publish(
        "onboarding",
        json!({
            "key": "onboarding",
            "trigger": { "event_types": ["payment_succeeded"], "scheduled": false },
            "conditions": { "op": "range", "field": "user.days_since_registration", "max": 7 },
            "quiet_hours": { "start_hour": 22, "end_hour": 9 },
            "event_kind": "onboarding",
            "steps": [
                {
                    "template": {
                        "base_locale": "ru",
                        "locales": {
                            "ru": { "text": "{{name}}, спасибо за оплату! Ваш баланс: {{balance}} ₽" },
                            "en": { "text": "{{name}}, thanks for your payment! Balance: {{balance}}" }
                        }
                    }
                },
                {
                    "delay_hours": 24,
                    "template": {
                        "base_locale": "ru",
                        "locales": {
                            "ru": {
                                "text": "Как настроить сервер за 5 минут",
                                "buttons": [{ "text": "Инструкция", "action": "url", "value": "https://example.com/guide" }]
                            }
                        }
                    }
                },
                {
                    "delay_hours": 72,
                    "template": {
                        "base_locale": "ru",
                        "locales": {
                            "ru": {
                                "text": "Оцените сервис от 1 до 5",
                                "buttons": [
                                    { "text": "5", "action": "callback", "value": "nps:5" },
                                    { "text": "3", "action": "callback", "value": "nps:3" },
                                    { "text": "1", "action": "callback", "value": "nps:1" }
                                ]
                            }
                        }
                    }
                }
            ]
        }),
        now - Duration::days(2),
    );

    // Top-up bonus: commercial offer with A/B copy.
    store.publish(
        "topup_bonus",
        json!({
            "key": "topup_bonus",
            "trigger": { "event_types": ["balance_low"], "scheduled": true },
            "conditions": { "op": "range", "field": "user.balance", "max": 100 },
            "throttle": { "min_interval_hours": 24 },
            "quiet_hours": { "start_hour": 22, "end_hour": 9 },
            "commercial": true,
            "event_kind": "upsell",
            "repeatable": true,
            "variants": [{ "name": "control", "weight": 1.0 }, { "name": "urgent", "weight": 1.0 }],
            "steps": [{
                "template": {
                    "base_locale": "ru",
                    "locales": {
                        "ru": {
                            "text": "Пополните на {{required_amount}} ₽ и получите +{{bonus_percent}}% до {{offer_expires_at}}",
                            "buttons": [{ "text": "Пополнить", "action": "callback", "value": "topup:{{required_amount}}" }]
                        }
                    }
                },
                "variant_templates": {
                    "urgent": {
                        "base_locale": "ru",
                        "locales": {
                            "ru": { "text": "Только до {{offer_expires_at}}: +{{bonus_percent}}% к пополнению!" }
                        }
                    }
                },
                "offer": {
                    "kind": "topup_bonus",
                    "bonus_percent": 10,
                    "required_amount": 1000,
                    "ttl_hours": 72
                }
            }]
        }),
        now - Duration::days(1),
    );

    // Winback: inactive users get a gift credited right away.
    store.publish(
        "winback",
        json!({
            "key": "winback",
            "trigger": { "event_types": [], "scheduled": true },
            "conditions": {
                "op": "and",
                "conditions": [
                    { "op": "range", "field": "user.days_inactive", "min": 30 },
                    { "op": "exists", "field": "user.attributes.services" }
                ]
            },
            "commercial": true,
            "event_kind": "winback",
            "steps": [{
                "template": {
                    "base_locale": "ru",
                    "locales": {
                        "ru": { "text": "{{name}}, мы соскучились! Начислили {{bonus_percent}}% бонусом." }
                    }
                },
                "offer": {
                    "kind": "winback_gift",
                    "bonus_percent": 5,
                    "required_amount": 500,
                    "ttl_hours": 168,
                    "apply_immediately": true
                }
            }]
        }),
        now - Duration::days(1),
    );

    // Detractor follow-up, fed by the NPS handler.
    store.publish(
        "nps_followup",
        json!({
            "key": "nps_followup",
            "trigger": { "event_types": ["nps_answered"] },
            "conditions": { "op": "eq", "field": "event.category", "value": "detractor" },
            "event_kind": "feedback",
            "repeatable": true,
            "steps": [{
                "template": {
                    "base_locale": "ru",
                    "locales": {
                        "ru": {
                            "text": "Жаль, что вам не понравилось. Напишите, что улучшить?",
                            "buttons": [{ "text": "Поддержка", "action": "url", "value": "https://t.me/support" }]
                        }
                    }
                }
            }]
        }),
        now - Duration::hours(6),
    );

    info!(scenarios = 4, "Demo scenarios published");
}

pub fn seed_demo_users(store: &InMemoryStore) {
    let now = Utc::now();
    let users = vec![
        (1, 1_000_001, "Анна", Some("ru"), 50.0, 2, 0),
        (2, 1_000_002, "Boris", Some("en"), 2400.0, 40, 1),
        (3, 1_000_003, "Вера", None, 0.0, 120, 60),
    ];

    for (id, telegram_id, name, locale, balance, registered_days, inactive_days) in users {
        let mut attributes = serde_json::Map::new();
        attributes.insert("services".into(), json!(id));
        store.upsert_user(User {
            id,
            telegram_id,
            first_name: name.to_string(),
            locale: locale.map(str::to_string),
            balance,
            bonus_balance: 0.0,
            utc_offset_minutes: None,
            registered_at: now - Duration::days(registered_days),
            last_active_at: now - Duration::days(inactive_days),
            attributes,
        });
    }
    info!(users = 3, "Demo users created");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_loader::ConfigLoader;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_demo_scenarios_are_valid() {
        let store = Arc::new(InMemoryStore::new());
        seed_demo(&store);
        let loader = ConfigLoader::new(store.clone());

        let keys = loader.get_all_published_keys().await;
        assert_eq!(keys.len(), 4);
        for key in keys {
            assert!(loader.get_published_config(&key).await.is_some(), "{} failed to load", key);
        }
        assert!(store.user(3).is_some());
    }
}
