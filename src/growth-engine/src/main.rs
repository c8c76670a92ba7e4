//! Growth Engine — scenario-driven marketing automations for the bot.
//!
//! Wires the store, event bus, runner and due-steps sweep together and keeps
//! the sweep running until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use growth_automations::demo;
use growth_automations::feedback::FeedbackHandler;
use growth_automations::runner::Repositories;
use growth_automations::{AutomationRunner, DueStepsRunner, InMemoryStore, MessageSender};
use growth_core::config::{AppConfig, MetricsConfig};
use growth_core::types::{AutomationEvent, ButtonAction};
use growth_core::EventBus;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "growth-engine")]
#[command(about = "Scenario-driven marketing automations for a Telegram bot")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "GROWTH_ENGINE_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "GROWTH_ENGINE__NODE_ID")]
    node_id: Option<String>,

    /// Run a single due-steps sweep and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Start with an empty store
    #[arg(long, default_value_t = false)]
    no_demo: bool,
}

/// Stand-in for the bot transport: logs every outbound message.
struct LoggingSender;

#[async_trait]
impl MessageSender for LoggingSender {
    async fn send_message(&self, telegram_id: i64, text: &str, buttons: &[ButtonAction]) -> anyhow::Result<()> {
        info!(
            telegram_id,
            text,
            buttons = %serde_json::to_string(buttons)?,
            "Outbound message"
        );
        Ok(())
    }
}

fn start_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::new(config.host.parse()?, config.port);
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!(%addr, "Metrics exporter started");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "growth_engine=info,growth_automations=info,growth_core=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Growth Engine starting up");

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }

    info!(
        node_id = %config.node_id,
        enabled = config.automations.enabled,
        sweep_interval_secs = config.automations.due_steps_interval_secs,
        commercial_cooldown_hours = config.automations.commercial_cooldown_hours,
        "Configuration loaded"
    );

    if let Err(e) = start_metrics(&config.metrics) {
        error!(error = %e, "Failed to start metrics exporter");
    }

    let store = Arc::new(InMemoryStore::new());
    if !cli.no_demo {
        demo::seed_demo(&store);
    }

    let sender: Arc<dyn MessageSender> = Arc::new(LoggingSender);
    let repos = Repositories::in_memory(store.clone());
    let bus = EventBus::new();

    let runner = Arc::new(AutomationRunner::new(&config.automations, repos.clone(), sender.clone()));
    let _subscription = runner.attach(&bus);
    let sweeper = DueStepsRunner::new(runner.loader().clone(), repos.states.clone(), runner.clone());
    let feedback = FeedbackHandler::new(
        repos.growth_events.clone(),
        bus.clone(),
        sender,
        config.bot.moderator_chat_id,
    );

    if !cli.no_demo {
        let report = bus
            .emit(&AutomationEvent::new("payment_succeeded", 1).with_field("amount", 500))
            .await;
        info!(delivered = report.delivered, failures = report.failures.len(), "Demo event emitted");
        let report = bus.emit(&AutomationEvent::new("balance_low", 1)).await;
        info!(delivered = report.delivered, failures = report.failures.len(), "Demo event emitted");
        if let Err(e) = feedback.handle_callback(2, "nps:2").await {
            warn!(error = %e, "Demo feedback failed");
        }
    }

    if cli.once {
        let report = sweeper.run_due_multi_steps().await;
        info!(sent = report.sent, failed = report.failed, "Single sweep complete, exiting");
        return Ok(());
    }

    info!("Growth Engine is running");

    let mut interval = tokio::time::interval(Duration::from_secs(
        config.automations.due_steps_interval_secs.max(1),
    ));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweeper.run_due_multi_steps().await;
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Growth Engine stopped");
    Ok(())
}
