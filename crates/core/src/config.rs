use serde::Deserialize;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `GROWTH_ENGINE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub automations: AutomationConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Bot-level settings that used to live in module globals.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotConfig {
    /// Chat that receives copies of NPS detractor answers.
    #[serde(default)]
    pub moderator_chat_id: Option<i64>,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            automations: AutomationConfig::default(),
            bot: BotConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

// ─── Automation Config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    #[serde(default = "default_automations_enabled")]
    pub enabled: bool,
    #[serde(default = "default_locale")]
    pub default_locale: String,
    /// Minimum spacing between two commercially framed pushes to one user.
    #[serde(default = "default_commercial_cooldown_hours")]
    pub commercial_cooldown_hours: i64,
    /// Used for quiet hours when the user has no recorded offset.
    #[serde(default = "default_utc_offset_minutes")]
    pub default_utc_offset_minutes: i32,
    #[serde(default = "default_due_steps_interval_secs")]
    pub due_steps_interval_secs: u64,
    #[serde(default = "default_offer_ttl_hours")]
    pub default_offer_ttl_hours: i64,
}

fn default_automations_enabled() -> bool { true }
fn default_locale() -> String { "ru".to_string() }
fn default_commercial_cooldown_hours() -> i64 { 72 }
fn default_utc_offset_minutes() -> i32 { 180 }
fn default_due_steps_interval_secs() -> u64 { 300 }
fn default_offer_ttl_hours() -> i64 { 72 }

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enabled: default_automations_enabled(),
            default_locale: default_locale(),
            commercial_cooldown_hours: default_commercial_cooldown_hours(),
            default_utc_offset_minutes: default_utc_offset_minutes(),
            due_steps_interval_secs: default_due_steps_interval_secs(),
            default_offer_ttl_hours: default_offer_ttl_hours(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional config file, then environment
    /// variables (which take precedence).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("GROWTH_ENGINE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
