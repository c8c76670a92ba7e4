//! Scenario runner: load config, evaluate, render, send, record.
//!
//! Every entry point is best-effort: storage and send failures are logged
//! and reported as [`RunOutcome::Failed`], never returned as errors.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use growth_core::config::AutomationConfig;
use growth_core::event_bus::{EventBus, EventListener, Subscription};
use growth_core::types::{
    AutomationEvent, ButtonAction, GrowthEvent, OfferInstance, User, UserId, UserNotificationState,
};
use growth_core::GrowthResult;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config_loader::ConfigLoader;
use crate::evaluator::{Decision, EvaluationInput, ScenarioEvaluator, SendPlan, SkipReason, TriggerOrigin};
use crate::memory::InMemoryStore;
use crate::offers::{OfferParams, OfferService};
use crate::repository::{
    CommercialPushRepository, GrowthEventRepository, NotificationStateRepository,
    OfferRepository, ScenarioConfigRepository, UserRepository,
};
use crate::templates::render_template;
use crate::types::{OfferSpec, ScenarioConfig};

/// Event payload field that pins an event to one scenario.
pub const SCENARIO_KEY_FIELD: &str = "scenarioKey";

/// Outbound message callback supplied by the bot transport layer.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(
        &self,
        telegram_id: i64,
        text: &str,
        buttons: &[ButtonAction],
    ) -> anyhow::Result<()>;
}

/// Storage collaborators the runner reads and writes.
#[derive(Clone)]
pub struct Repositories {
    pub scenarios: Arc<dyn ScenarioConfigRepository>,
    pub users: Arc<dyn UserRepository>,
    pub offers: Arc<dyn OfferRepository>,
    pub states: Arc<dyn NotificationStateRepository>,
    pub growth_events: Arc<dyn GrowthEventRepository>,
    pub commercial: Arc<dyn CommercialPushRepository>,
}

impl Repositories {
    /// Wires every repository to the same in-memory store.
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            scenarios: store.clone(),
            users: store.clone(),
            offers: store.clone(),
            states: store.clone(),
            growth_events: store.clone(),
            commercial: store,
        }
    }
}

/// Result of one scenario run for one user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RunOutcome {
    Sent {
        scenario_key: String,
        user_id: UserId,
        step: u32,
        variant: Option<String>,
        offer_id: Option<Uuid>,
    },
    Skipped {
        scenario_key: String,
        user_id: UserId,
        reason: SkipReason,
    },
    /// No valid published config for the key.
    NoConfig { scenario_key: String, user_id: UserId },
    Failed {
        scenario_key: String,
        user_id: UserId,
        error: String,
    },
}

impl RunOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Orchestrates evaluator → renderer → sender → offer service → bookkeeping.
pub struct AutomationRunner {
    loader: ConfigLoader,
    evaluator: ScenarioEvaluator,
    offers: OfferService,
    repos: Repositories,
    sender: Arc<dyn MessageSender>,
    default_locale: String,
    default_offer_ttl_hours: i64,
}

impl std::fmt::Debug for AutomationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationRunner")
            .field("evaluator", &self.evaluator)
            .field("default_locale", &self.default_locale)
            .finish_non_exhaustive()
    }
}

impl AutomationRunner {
    pub fn new(config: &AutomationConfig, repos: Repositories, sender: Arc<dyn MessageSender>) -> Self {
        Self {
            loader: ConfigLoader::new(repos.scenarios.clone()),
            evaluator: ScenarioEvaluator::new(config),
            offers: OfferService::new(repos.offers.clone(), repos.users.clone()),
            repos,
            sender,
            default_locale: config.default_locale.clone(),
            default_offer_ttl_hours: config.default_offer_ttl_hours,
        }
    }

    pub fn loader(&self) -> &ConfigLoader {
        &self.loader
    }

    pub fn evaluator(&self) -> &ScenarioEvaluator {
        &self.evaluator
    }

    pub fn offers(&self) -> &OfferService {
        &self.offers
    }

    pub fn sender(&self) -> Arc<dyn MessageSender> {
        self.sender.clone()
    }

    /// Runs every scenario the event triggers (or the one named by its
    /// `scenarioKey` field) and sends through `sender`.
    pub async fn run_scenario_for_event(
        &self,
        event: &AutomationEvent,
        sender: &dyn MessageSender,
    ) -> Vec<RunOutcome> {
        self.run_scenario_for_event_at(event, sender, Utc::now()).await
    }

    pub async fn run_scenario_for_event_at(
        &self,
        event: &AutomationEvent,
        sender: &dyn MessageSender,
        now: DateTime<Utc>,
    ) -> Vec<RunOutcome> {
        let pinned = event
            .fields
            .get(SCENARIO_KEY_FIELD)
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let keys: BTreeSet<String> = match &pinned {
            Some(key) => BTreeSet::from([key.clone()]),
            None => self.loader.get_all_published_keys().await,
        };

        let mut outcomes = Vec::new();
        for key in keys {
            let Some(config) = self.loader.get_published_config(&key).await else {
                if pinned.is_some() {
                    outcomes.push(RunOutcome::NoConfig {
                        scenario_key: key,
                        user_id: event.user_id,
                    });
                }
                continue;
            };
            if pinned.is_none() && !config.triggered_by(&event.event_type) {
                continue;
            }

            debug!(scenario = %key, event_type = %event.event_type, user_id = event.user_id, "Event triggers scenario");
            let outcome = self
                .run_loaded(&config, event.user_id, Some(event), TriggerOrigin::Event, sender, now)
                .await;
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Runs one scenario for one user from a scheduled check, sending
    /// through the runner's own sender.
    pub async fn run_scenario_for_schedule_user(&self, user_id: UserId, scenario_key: &str) -> RunOutcome {
        self.run_scenario_for_schedule_user_at(user_id, scenario_key, Utc::now()).await
    }

    pub async fn run_scenario_for_schedule_user_at(
        &self,
        user_id: UserId,
        scenario_key: &str,
        now: DateTime<Utc>,
    ) -> RunOutcome {
        let Some(config) = self.loader.get_published_config(scenario_key).await else {
            return RunOutcome::NoConfig {
                scenario_key: scenario_key.to_string(),
                user_id,
            };
        };
        let sender = self.sender.clone();
        self.run_loaded(&config, user_id, None, TriggerOrigin::Schedule, sender.as_ref(), now)
            .await
    }

    /// Pipeline for an already loaded config.
    pub(crate) async fn run_loaded(
        &self,
        config: &ScenarioConfig,
        user_id: UserId,
        event: Option<&AutomationEvent>,
        origin: TriggerOrigin,
        sender: &dyn MessageSender,
        now: DateTime<Utc>,
    ) -> RunOutcome {
        match self.try_run(config, user_id, event, origin, sender, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(scenario = %config.key, user_id, error = %e, "Scenario run failed");
                metrics::counter!("automations.failed").increment(1);
                RunOutcome::Failed {
                    scenario_key: config.key.clone(),
                    user_id,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn try_run(
        &self,
        config: &ScenarioConfig,
        user_id: UserId,
        event: Option<&AutomationEvent>,
        origin: TriggerOrigin,
        sender: &dyn MessageSender,
        now: DateTime<Utc>,
    ) -> GrowthResult<RunOutcome> {
        let Some(user) = self.repos.users.get_user(user_id).await? else {
            debug!(scenario = %config.key, user_id, "Unknown user, skipping");
            return Ok(self.skipped(config, user_id, SkipReason::UnknownUser));
        };

        let state = self.repos.states.get_state(user_id, &config.key).await?;
        let last_commercial_push = if config.commercial {
            self.repos
                .commercial
                .last_commercial_push(user_id)
                .await?
                .map(|s| s.last_commercial_push_at)
        } else {
            None
        };
        let active_offers = self.active_offers(config, user_id, now).await?;

        let input = EvaluationInput {
            origin,
            user: &user,
            event,
            state: state.as_ref(),
            last_commercial_push,
            active_offers: &active_offers,
            now,
        };

        match self.evaluator.evaluate(config, &input) {
            Decision::Skip(reason) => {
                self.close_if_finished(config, state.as_ref(), &reason).await;
                Ok(self.skipped(config, user_id, reason))
            }
            Decision::Send(plan) => self.send_step(config, &user, event, plan, sender, now).await,
        }
    }

    async fn send_step(
        &self,
        config: &ScenarioConfig,
        user: &User,
        event: Option<&AutomationEvent>,
        plan: SendPlan,
        sender: &dyn MessageSender,
        now: DateTime<Utc>,
    ) -> GrowthResult<RunOutcome> {
        let Some(step) = config.step(plan.step) else {
            return Ok(self.skipped(config, user.id, SkipReason::Completed));
        };

        // Offer terms are checked before sending so an unusable offer never
        // reaches the user.
        let params = step
            .offer
            .as_ref()
            .map(|spec| OfferParams::from_spec(spec, self.default_offer_ttl_hours))
            .transpose()?;
        let terms = OfferTerms::resolve(params.as_ref(), plan.reuse_offer.as_ref(), now)?;
        let variables = build_variables(user, event, &config.key, plan.variant.as_deref(), terms.as_ref());
        let locale = user
            .locale
            .as_deref()
            .or(config.default_locale.as_deref())
            .unwrap_or(&self.default_locale);
        let rendered = render_template(step.template_for(plan.variant.as_deref()), locale, &variables);

        if let Err(e) = sender
            .send_message(user.telegram_id, &rendered.text, &rendered.buttons)
            .await
        {
            warn!(
                scenario = %config.key,
                user_id = user.id,
                step = plan.step,
                error = %e,
                "Message send failed"
            );
            metrics::counter!("automations.send_failed").increment(1);
            return Ok(RunOutcome::Failed {
                scenario_key: config.key.clone(),
                user_id: user.id,
                error: e.to_string(),
            });
        }

        let offer = match (step.offer.as_ref(), params, plan.reuse_offer.clone()) {
            (Some(_), _, Some(existing)) => Some(existing),
            (Some(spec), Some(params), None) => self.extend_offer(user.id, spec, params, now).await,
            _ => None,
        };

        self.record_send(config, user.id, &plan, offer.as_ref(), now).await;

        info!(
            scenario = %config.key,
            user_id = user.id,
            step = plan.step,
            variant = ?plan.variant,
            offer_id = ?offer.as_ref().map(|o| o.id),
            "Scenario message sent"
        );
        metrics::counter!("automations.sent").increment(1);

        Ok(RunOutcome::Sent {
            scenario_key: config.key.clone(),
            user_id: user.id,
            step: plan.step,
            variant: plan.variant,
            offer_id: offer.map(|o| o.id),
        })
    }

    /// Creates the step's offer, crediting it at once for `apply_immediately`.
    async fn extend_offer(
        &self,
        user_id: UserId,
        spec: &OfferSpec,
        params: OfferParams,
        now: DateTime<Utc>,
    ) -> Option<OfferInstance> {
        let offer = match self
            .offers
            .create_offer_instance_at(user_id, &spec.kind, params, now)
            .await
        {
            Ok(offer) => offer,
            Err(e) => {
                warn!(user_id, kind = %spec.kind, error = %e, "Failed to create offer");
                return None;
            }
        };
        if spec.apply_immediately {
            if let Err(e) = self.offers.apply_offer_to_balance(user_id, &offer).await {
                warn!(user_id, offer_id = %offer.id, error = %e, "Failed to apply offer");
            }
        }
        Some(offer)
    }

    /// Growth event, progress state and commercial stamp. The message is
    /// already out, so each write is attempted and logged independently.
    async fn record_send(
        &self,
        config: &ScenarioConfig,
        user_id: UserId,
        plan: &SendPlan,
        offer: Option<&OfferInstance>,
        now: DateTime<Utc>,
    ) {
        let event = GrowthEvent {
            scenario_key: Some(config.key.clone()),
            variant: plan.variant.clone(),
            step: Some(plan.step),
            created_at: now,
            ..GrowthEvent::new(user_id, config.event_kind, offer.map_or(0.0, |o| o.bonus_percent))
        };
        if let Err(e) = self.repos.growth_events.append(event).await {
            warn!(scenario = %config.key, user_id, error = %e, "Failed to record growth event");
        }

        let next_step_due_at = self.evaluator.next_due_at(config, plan.step, now);
        let state = UserNotificationState {
            user_id,
            scenario_key: config.key.clone(),
            step: plan.step,
            variant: plan.variant.clone(),
            last_sent_at: now,
            next_step_due_at,
            completed: next_step_due_at.is_none(),
        };
        if let Err(e) = self.repos.states.upsert_state(state).await {
            warn!(scenario = %config.key, user_id, error = %e, "Failed to update notification state");
        }

        if config.commercial {
            if let Err(e) = self.repos.commercial.record_commercial_push(user_id, now).await {
                warn!(user_id, error = %e, "Failed to record commercial push");
            }
        }
    }

    /// Marks an in-progress scenario finished when evaluation says it can
    /// no longer continue, so the due-steps sweep stops picking it up.
    async fn close_if_finished(
        &self,
        config: &ScenarioConfig,
        state: Option<&UserNotificationState>,
        reason: &SkipReason,
    ) {
        let Some(state) = state else { return };
        let finished = matches!(reason, SkipReason::ConditionsNotMet { exit: true })
            || (matches!(reason, SkipReason::Completed) && !state.completed);
        if !finished || state.completed {
            return;
        }

        let closed = UserNotificationState {
            completed: true,
            next_step_due_at: None,
            ..state.clone()
        };
        if let Err(e) = self.repos.states.upsert_state(closed).await {
            warn!(scenario = %config.key, user_id = state.user_id, error = %e, "Failed to close scenario state");
        } else {
            info!(scenario = %config.key, user_id = state.user_id, reason = reason.label(), "Scenario closed for user");
        }
    }

    async fn active_offers(
        &self,
        config: &ScenarioConfig,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> GrowthResult<Vec<OfferInstance>> {
        let kinds: BTreeSet<&str> = config
            .steps
            .iter()
            .filter_map(|s| s.offer.as_ref().map(|o| o.kind.as_str()))
            .collect();

        let mut active = Vec::new();
        for kind in kinds {
            if let Some(offer) = self.offers.get_active_offer_at(user_id, kind, now).await? {
                active.push(offer);
            }
        }
        Ok(active)
    }

    fn skipped(&self, config: &ScenarioConfig, user_id: UserId, reason: SkipReason) -> RunOutcome {
        metrics::counter!("automations.skipped", "reason" => reason.label()).increment(1);
        RunOutcome::Skipped {
            scenario_key: config.key.clone(),
            user_id,
            reason,
        }
    }

    /// Subscribes the runner to `bus`; failed runs are reported back to the
    /// bus as listener errors.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Subscription {
        bus.on_event(Arc::new(RunnerListener {
            runner: Arc::clone(self),
        }))
    }
}

struct RunnerListener {
    runner: Arc<AutomationRunner>,
}

#[async_trait]
impl EventListener for RunnerListener {
    fn name(&self) -> &str {
        "automation_runner"
    }

    async fn on_event(&self, event: &AutomationEvent) -> anyhow::Result<()> {
        let sender = self.runner.sender();
        let outcomes = self.runner.run_scenario_for_event(event, sender.as_ref()).await;
        let failed: Vec<&str> = outcomes
            .iter()
            .filter_map(|o| match o {
                RunOutcome::Failed { scenario_key, .. } => Some(scenario_key.as_str()),
                _ => None,
            })
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("scenario runs failed: {}", failed.join(", ")))
        }
    }
}

/// Offer figures shown in the message.
#[derive(Debug, Clone, PartialEq)]
struct OfferTerms {
    bonus_percent: f64,
    required_amount: f64,
    expires_at: DateTime<Utc>,
}

impl OfferTerms {
    fn resolve(
        params: Option<&OfferParams>,
        existing: Option<&OfferInstance>,
        now: DateTime<Utc>,
    ) -> GrowthResult<Option<Self>> {
        let terms = match (params, existing) {
            (_, Some(offer)) => Some(Self {
                bonus_percent: offer.bonus_percent,
                required_amount: offer.required_amount,
                expires_at: offer.expires_at,
            }),
            (Some(params), None) => Some(Self {
                bonus_percent: params.bonus_percent,
                required_amount: params.required_amount,
                expires_at: params.expires_at(now)?,
            }),
            (None, None) => None,
        };
        Ok(terms)
    }
}

fn build_variables(
    user: &User,
    event: Option<&AutomationEvent>,
    scenario_key: &str,
    variant: Option<&str>,
    offer: Option<&OfferTerms>,
) -> HashMap<String, String> {
    let mut vars = event.map(AutomationEvent::scalar_fields).unwrap_or_default();

    vars.insert("name".into(), user.first_name.clone());
    vars.insert("balance".into(), format_amount(user.balance));
    vars.insert("bonus_balance".into(), format_amount(user.bonus_balance));
    vars.insert("scenario".into(), scenario_key.to_string());
    if let Some(variant) = variant {
        vars.insert("variant".into(), variant.to_string());
    }
    if let Some(offer) = offer {
        vars.insert("bonus_percent".into(), format_amount(offer.bonus_percent));
        vars.insert("required_amount".into(), format_amount(offer.required_amount));
        vars.insert(
            "offer_expires_at".into(),
            offer.expires_at.format("%d.%m.%Y %H:%M UTC").to_string(),
        );
    }
    vars
}

fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}
