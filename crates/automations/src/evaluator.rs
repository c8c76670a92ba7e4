use chrono::{DateTime, Duration, Utc};
use growth_core::config::AutomationConfig;
use growth_core::types::{AutomationEvent, OfferInstance, User, UserNotificationState};
use growth_delivery::CommercialCooldown;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conditions;
use crate::types::{ScenarioConfig, VariantAssignment};

/// What started the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    Event,
    Schedule,
}

/// Everything the evaluator needs to know about one user at one instant.
#[derive(Debug, Clone)]
pub struct EvaluationInput<'a> {
    pub origin: TriggerOrigin,
    pub user: &'a User,
    pub event: Option<&'a AutomationEvent>,
    pub state: Option<&'a UserNotificationState>,
    pub last_commercial_push: Option<DateTime<Utc>>,
    /// Unexpired offers of the kinds this scenario can extend.
    pub active_offers: &'a [OfferInstance],
    pub now: DateTime<Utc>,
}

/// Which step, if any, is due for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResolution {
    Due { step: u32, restart: bool },
    NotYetDue { due_at: DateTime<Utc> },
    Completed,
}

/// Why nothing is sent. These are normal outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    Disabled,
    UnknownUser,
    NotTriggered,
    /// `exit` is set when an in-progress scenario should be closed.
    ConditionsNotMet { exit: bool },
    Throttled { next_allowed_at: DateTime<Utc> },
    QuietHours,
    CommercialCooldown,
    OfferAlreadyActive { kind: String },
    NotYetDue { due_at: DateTime<Utc> },
    Completed,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::UnknownUser => "unknown_user",
            Self::NotTriggered => "not_triggered",
            Self::ConditionsNotMet { .. } => "conditions_not_met",
            Self::Throttled { .. } => "throttled",
            Self::QuietHours => "quiet_hours",
            Self::CommercialCooldown => "commercial_cooldown",
            Self::OfferAlreadyActive { .. } => "offer_already_active",
            Self::NotYetDue { .. } => "not_yet_due",
            Self::Completed => "completed",
        }
    }
}

/// Approved send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendPlan {
    pub step: u32,
    pub variant: Option<String>,
    /// Unexpired offer to show instead of creating a new one.
    pub reuse_offer: Option<OfferInstance>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Send(SendPlan),
    Skip(SkipReason),
}

/// Decides whether a scenario fires for a user. Pure and synchronous; all
/// data is passed in through [`EvaluationInput`].
#[derive(Debug, Clone)]
pub struct ScenarioEvaluator {
    enabled: bool,
    cooldown: CommercialCooldown,
    default_utc_offset_minutes: i32,
}

impl ScenarioEvaluator {
    pub fn new(config: &AutomationConfig) -> Self {
        Self {
            enabled: config.enabled,
            cooldown: CommercialCooldown::new(config.commercial_cooldown_hours),
            default_utc_offset_minutes: config.default_utc_offset_minutes,
        }
    }

    /// Runs every check in order and returns the first rejection, or the
    /// step and variant to send.
    pub fn evaluate(&self, config: &ScenarioConfig, input: &EvaluationInput<'_>) -> Decision {
        let decision = self.evaluate_inner(config, input);
        if let Decision::Skip(reason) = &decision {
            debug!(
                scenario = %config.key,
                user_id = input.user.id,
                reason = reason.label(),
                "Scenario skipped"
            );
        }
        decision
    }

    fn evaluate_inner(&self, config: &ScenarioConfig, input: &EvaluationInput<'_>) -> Decision {
        if !self.enabled || !config.enabled {
            return Decision::Skip(SkipReason::Disabled);
        }

        let (step, restart) = match self.resolve_next_step(config, input.state, input.now) {
            StepResolution::Due { step, restart } => (step, restart),
            StepResolution::NotYetDue { due_at } => {
                return Decision::Skip(SkipReason::NotYetDue { due_at })
            }
            StepResolution::Completed => return Decision::Skip(SkipReason::Completed),
        };
        let starting = step == 0;

        if starting && input.origin == TriggerOrigin::Schedule && !config.trigger.scheduled {
            return Decision::Skip(SkipReason::NotTriggered);
        }

        if !self.matches_conditions(config, input) {
            return Decision::Skip(SkipReason::ConditionsNotMet { exit: !starting });
        }

        if starting {
            let last_sent = if restart { input.state.map(|s| s.last_sent_at) } else { None };
            if let Some(next_allowed_at) = self.check_throttle(config, last_sent, input.now) {
                return Decision::Skip(SkipReason::Throttled { next_allowed_at });
            }
        }

        if self.check_quiet_hours(config, input.user, input.now) {
            return Decision::Skip(SkipReason::QuietHours);
        }

        if config.commercial && !self.cooldown.can_send(input.last_commercial_push, input.now) {
            return Decision::Skip(SkipReason::CommercialCooldown);
        }

        let mut reuse_offer = None;
        if let Some(spec) = config.step(step).and_then(|s| s.offer.as_ref()) {
            let active = input
                .active_offers
                .iter()
                .find(|o| o.kind == spec.kind && o.is_active(input.now));
            if let Some(active) = active {
                if !spec.reuse_active {
                    return Decision::Skip(SkipReason::OfferAlreadyActive {
                        kind: spec.kind.clone(),
                    });
                }
                reuse_offer = Some(active.clone());
            }
        }

        let previous_variant = if restart { None } else { input.state.and_then(|s| s.variant.as_deref()) };
        let variant = self.pick_variant(config, input.user.id, previous_variant);

        Decision::Send(SendPlan {
            step,
            variant,
            reuse_offer,
        })
    }

    /// Boolean match of the scenario conditions; no conditions always match.
    pub fn matches_conditions(&self, config: &ScenarioConfig, input: &EvaluationInput<'_>) -> bool {
        let Some(condition) = &config.conditions else {
            return true;
        };
        let context = conditions::build_context(input.user, input.event, input.now);
        conditions::evaluate(condition, &context)
    }

    /// Returns the earliest allowed send time when the scenario's minimum
    /// interval has not elapsed since `last_sent_at`.
    pub fn check_throttle(
        &self,
        config: &ScenarioConfig,
        last_sent_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let interval = config.throttle?;
        match last_sent_at {
            Some(last) if !interval.allows(Some(last), now) => {
                Some(interval.next_allowed_at(last).unwrap_or(DateTime::<Utc>::MAX_UTC))
            }
            _ => None,
        }
    }

    /// True when `now` falls into the scenario's quiet hours in the user's
    /// local time.
    pub fn check_quiet_hours(&self, config: &ScenarioConfig, user: &User, now: DateTime<Utc>) -> bool {
        let Some(quiet) = config.quiet_hours else {
            return false;
        };
        let offset = user
            .utc_offset_minutes
            .unwrap_or(self.default_utc_offset_minutes);
        quiet.is_quiet(now, offset)
    }

    /// Keeps a previously assigned variant; otherwise assigns by weight,
    /// deterministically per (user, scenario) for sticky scenarios.
    pub fn pick_variant(
        &self,
        config: &ScenarioConfig,
        user_id: i64,
        previous: Option<&str>,
    ) -> Option<String> {
        if config.variants.is_empty() {
            return None;
        }
        if let Some(prev) = previous {
            if config.variants.iter().any(|v| v.name == prev) {
                return Some(prev.to_string());
            }
        }

        let total_weight: f32 = config.variants.iter().map(|v| v.weight).sum();
        let roll = match config.assignment {
            VariantAssignment::Sticky => {
                let hash = format!("{}:{}", user_id, config.key)
                    .bytes()
                    .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
                (hash % 10_000) as f32 / 10_000.0 * total_weight
            }
            VariantAssignment::Random => {
                use rand::Rng;
                rand::thread_rng().gen::<f32>() * total_weight
            }
        };

        let mut cumulative = 0.0;
        for variant in &config.variants {
            cumulative += variant.weight;
            if roll < cumulative {
                return Some(variant.name.clone());
            }
        }
        config.variants.last().map(|v| v.name.clone())
    }

    /// Which step is due given the recorded progress. A due time past the
    /// representable range means the step never comes due.
    pub fn resolve_next_step(
        &self,
        config: &ScenarioConfig,
        state: Option<&UserNotificationState>,
        now: DateTime<Utc>,
    ) -> StepResolution {
        let Some(state) = state else {
            return StepResolution::Due { step: 0, restart: false };
        };
        if state.completed {
            return if config.repeatable {
                StepResolution::Due { step: 0, restart: true }
            } else {
                StepResolution::Completed
            };
        }

        let next = state.step + 1;
        let Some(step) = config.step(next) else {
            return StepResolution::Completed;
        };
        let Some(due_at) = step_due_at(state.last_sent_at, step.delay_hours) else {
            return StepResolution::Completed;
        };
        if now >= due_at {
            StepResolution::Due { step: next, restart: false }
        } else {
            StepResolution::NotYetDue { due_at }
        }
    }

    /// When the step after `sent_step` becomes due, or `None` if `sent_step`
    /// was the last one or the due time is out of range.
    pub fn next_due_at(
        &self,
        config: &ScenarioConfig,
        sent_step: u32,
        sent_at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        config
            .step(sent_step + 1)
            .and_then(|s| step_due_at(sent_at, s.delay_hours))
    }
}

fn step_due_at(sent_at: DateTime<Utc>, delay_hours: i64) -> Option<DateTime<Utc>> {
    sent_at.checked_add_signed(Duration::try_hours(delay_hours)?)
}
