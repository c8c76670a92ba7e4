use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use growth_core::types::GrowthEventKind;
use growth_core::{GrowthError, GrowthResult};
use growth_delivery::{QuietHours, SendInterval};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a stored scenario version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStatus {
    Draft,
    Published,
    Archived,
}

/// One stored version of a scenario's configuration. `config` is kept raw so
/// that a malformed payload can be skipped instead of failing the read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioVersion {
    pub scenario_key: String,
    pub status: ConfigStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub config: serde_json::Value,
}

/// A validated scenario configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub key: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub trigger: ScenarioTrigger,
    #[serde(default)]
    pub conditions: Option<Condition>,
    #[serde(default)]
    pub throttle: Option<SendInterval>,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
    /// Commercially framed scenarios share the cross-scenario cooldown.
    #[serde(default)]
    pub commercial: bool,
    pub event_kind: GrowthEventKind,
    /// Completed scenarios restart from the first step on the next trigger.
    #[serde(default)]
    pub repeatable: bool,
    #[serde(default)]
    pub assignment: VariantAssignment,
    #[serde(default)]
    pub variants: Vec<Variant>,
    /// Locale used when the user has none; the engine default otherwise.
    #[serde(default)]
    pub default_locale: Option<String>,
    pub steps: Vec<ScenarioStep>,
}

/// Upper bound for every hour-valued setting (about ten years).
pub const MAX_POLICY_HOURS: i64 = 24 * 366 * 10;

fn default_true() -> bool {
    true
}

/// What starts a scenario.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioTrigger {
    #[serde(default)]
    pub event_types: Vec<String>,
    /// Whether periodic user checks may start the scenario.
    #[serde(default)]
    pub scheduled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantAssignment {
    #[default]
    Sticky,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub weight: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    /// Delay after the previous step; ignored for the first step.
    #[serde(default)]
    pub delay_hours: i64,
    pub template: MessageTemplate,
    /// Per-variant replacement of `template`.
    #[serde(default)]
    pub variant_templates: HashMap<String, MessageTemplate>,
    #[serde(default)]
    pub offer: Option<OfferSpec>,
}

impl ScenarioStep {
    pub fn template_for(&self, variant: Option<&str>) -> &MessageTemplate {
        variant
            .and_then(|v| self.variant_templates.get(v))
            .unwrap_or(&self.template)
    }
}

/// Localized message with optional buttons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub base_locale: String,
    pub locales: BTreeMap<String, LocalizedContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizedContent {
    pub text: String,
    #[serde(default)]
    pub buttons: Vec<ButtonSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonSpec {
    pub text: String,
    /// `url` or `callback`; anything else is treated as `url`.
    #[serde(default)]
    pub action: String,
    pub value: String,
}

/// Offer extended when a step is sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferSpec {
    pub kind: String,
    pub bonus_percent: f64,
    #[serde(default)]
    pub required_amount: f64,
    /// Lifetime of the offer; the engine-wide default when absent.
    #[serde(default)]
    pub ttl_hours: Option<i64>,
    /// Credit the bonus as soon as the message is delivered.
    #[serde(default)]
    pub apply_immediately: bool,
    /// Re-use an unexpired offer of the same kind instead of skipping.
    #[serde(default = "default_true")]
    pub reuse_active: bool,
}

/// Declarative predicate over the evaluation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Condition {
    And { conditions: Vec<Condition> },
    Or { conditions: Vec<Condition> },
    Eq { field: String, value: serde_json::Value },
    Ne { field: String, value: serde_json::Value },
    Range {
        field: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    In { field: String, values: Vec<serde_json::Value> },
    Exists { field: String },
}

impl ScenarioConfig {
    pub fn is_multi_step(&self) -> bool {
        self.steps.len() > 1
    }

    pub fn step(&self, index: u32) -> Option<&ScenarioStep> {
        self.steps.get(index as usize)
    }

    pub fn triggered_by(&self, event_type: &str) -> bool {
        self.trigger.event_types.iter().any(|t| t == event_type)
    }

    /// Checks the invariants a published config must hold.
    ///
    /// # Errors
    ///
    /// Returns [`GrowthError::Validation`] naming the first violated rule.
    pub fn validate(&self) -> GrowthResult<()> {
        let fail = |msg: String| Err(GrowthError::Validation(format!("{}: {}", self.key, msg)));

        if self.key.trim().is_empty() {
            return Err(GrowthError::Validation("scenario key is empty".into()));
        }
        if self.steps.is_empty() {
            return fail("scenario has no steps".into());
        }
        if let Some(throttle) = &self.throttle {
            if throttle.min_interval_hours <= 0 {
                return fail("throttle interval must be positive".into());
            }
            if throttle.min_interval_hours > MAX_POLICY_HOURS {
                return fail("throttle interval is too long".into());
            }
        }
        if let Some(quiet) = &self.quiet_hours {
            if !quiet.is_valid() {
                return fail(format!(
                    "quiet hours {}..{} out of range",
                    quiet.start_hour, quiet.end_hour
                ));
            }
        }

        let mut names = HashSet::new();
        for variant in &self.variants {
            if !(variant.weight > 0.0) {
                return fail(format!("variant '{}' has non-positive weight", variant.name));
            }
            if !names.insert(variant.name.as_str()) {
                return fail(format!("duplicate variant '{}'", variant.name));
            }
        }

        for (idx, step) in self.steps.iter().enumerate() {
            if idx > 0 && step.delay_hours < 0 {
                return fail(format!("step {} has negative delay", idx));
            }
            if step.delay_hours > MAX_POLICY_HOURS {
                return fail(format!("step {} delay is too long", idx));
            }
            for template in std::iter::once(&step.template).chain(step.variant_templates.values()) {
                if !template.locales.contains_key(&template.base_locale) {
                    return fail(format!(
                        "step {} template lacks base locale '{}'",
                        idx, template.base_locale
                    ));
                }
            }
            for variant in step.variant_templates.keys() {
                if !names.contains(variant.as_str()) {
                    return fail(format!("step {} references unknown variant '{}'", idx, variant));
                }
            }
            if let Some(offer) = &step.offer {
                if offer.ttl_hours.is_some_and(|h| h <= 0) {
                    return fail(format!("step {} offer ttl must be positive", idx));
                }
                if offer.ttl_hours.is_some_and(|h| h > MAX_POLICY_HOURS) {
                    return fail(format!("step {} offer ttl is too long", idx));
                }
                if !(offer.bonus_percent > 0.0 && offer.bonus_percent <= 100.0) {
                    return fail(format!("step {} offer bonus out of range", idx));
                }
            }
        }

        Ok(())
    }
}
