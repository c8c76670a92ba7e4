use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config_loader::ConfigLoader;
use crate::evaluator::TriggerOrigin;
use crate::repository::NotificationStateRepository;
use crate::runner::{AutomationRunner, RunOutcome};

/// Totals for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned_keys: usize,
    pub due_users: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Sent { .. } => self.sent += 1,
            RunOutcome::Failed { .. } => self.failed += 1,
            RunOutcome::Skipped { .. } | RunOutcome::NoConfig { .. } => self.skipped += 1,
        }
    }
}

/// Periodic sweep that advances users whose next step of a multi-step
/// scenario has come due.
pub struct DueStepsRunner {
    loader: ConfigLoader,
    states: Arc<dyn NotificationStateRepository>,
    runner: Arc<AutomationRunner>,
}

impl DueStepsRunner {
    pub fn new(
        loader: ConfigLoader,
        states: Arc<dyn NotificationStateRepository>,
        runner: Arc<AutomationRunner>,
    ) -> Self {
        Self {
            loader,
            states,
            runner,
        }
    }

    pub async fn run_due_multi_steps(&self) -> SweepReport {
        self.run_due_multi_steps_at(Utc::now()).await
    }

    /// Users are processed one at a time. A failure for one user or one
    /// scenario is logged and the sweep moves on.
    pub async fn run_due_multi_steps_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let sender = self.runner.sender();

        for key in self.loader.get_all_published_keys().await {
            let Some(config) = self.loader.get_published_config(&key).await else {
                continue;
            };
            if !config.is_multi_step() {
                continue;
            }
            report.scanned_keys += 1;

            let due = match self.states.list_due(&key, now).await {
                Ok(due) => due,
                Err(e) => {
                    warn!(scenario = %key, error = %e, "Failed to list due users");
                    continue;
                }
            };
            debug!(scenario = %key, due = due.len(), "Due users found");

            for state in due {
                report.due_users += 1;
                let outcome = self
                    .runner
                    .run_loaded(&config, state.user_id, None, TriggerOrigin::Schedule, sender.as_ref(), now)
                    .await;
                report.record(&outcome);
                metrics::counter!("due_steps.users_processed").increment(1);
            }
        }

        info!(
            scanned = report.scanned_keys,
            due = report.due_users,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "Due-steps sweep finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::runner::{MessageSender, Repositories};
    use crate::types::fixtures::{scenario, step};
    use async_trait::async_trait;
    use chrono::Duration;
    use growth_core::config::AutomationConfig;
    use growth_core::types::{ButtonAction, User};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<String>>);

    #[async_trait]
    impl MessageSender for Outbox {
        async fn send_message(&self, _telegram_id: i64, text: &str, _buttons: &[ButtonAction]) -> anyhow::Result<()> {
            self.0.lock().push(text.to_string());
            Ok(())
        }
    }

    fn user(id: i64) -> User {
        let now = Utc::now();
        User {
            id,
            telegram_id: id,
            first_name: format!("user{}", id),
            locale: None,
            balance: 0.0,
            bonus_balance: 0.0,
            utc_offset_minutes: Some(0),
            registered_at: now,
            last_active_at: now,
            attributes: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_sweep_advances_due_users_only() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_user(user(1));
        store.upsert_user(user(2));

        let mut onboarding = scenario("onboarding");
        onboarding.steps.push(step("day two", 24));
        onboarding.steps.push(step("day four", 48));
        store.publish("onboarding", serde_json::to_value(&onboarding).unwrap(), Utc::now());
        // Single-step scenarios are never swept.
        store.publish("thanks", serde_json::to_value(scenario("thanks")).unwrap(), Utc::now());

        let outbox = Arc::new(Outbox::default());
        let repos = Repositories::in_memory(store.clone());
        let runner = Arc::new(AutomationRunner::new(&AutomationConfig::default(), repos.clone(), outbox.clone()));
        let sweeper = DueStepsRunner::new(runner.loader().clone(), repos.states.clone(), runner.clone());

        let t0 = Utc::now();
        runner.run_scenario_for_schedule_user_at(1, "onboarding", t0).await;
        runner
            .run_scenario_for_schedule_user_at(2, "onboarding", t0 + Duration::hours(20))
            .await;

        let report = sweeper.run_due_multi_steps_at(t0 + Duration::hours(25)).await;
        assert_eq!(report.scanned_keys, 1);
        assert_eq!(report.due_users, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(store.state(1, "onboarding").unwrap().step, 1);
        assert_eq!(store.state(2, "onboarding").unwrap().step, 0);

        // Same instant again: user 1's next step is 48h out.
        let again = sweeper.run_due_multi_steps_at(t0 + Duration::hours(25)).await;
        assert_eq!(again.due_users, 0);

        let last = sweeper.run_due_multi_steps_at(t0 + Duration::hours(80)).await;
        assert_eq!(last.sent, 2);
        assert!(store.state(1, "onboarding").unwrap().completed);
        assert_eq!(outbox.0.lock().iter().filter(|t| t.as_str() == "day four").count(), 1);
    }
}
