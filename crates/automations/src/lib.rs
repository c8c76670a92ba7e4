//! Automation engine: versioned scenario configs, condition evaluation,
//! delivery policies, localized templates, offers, and the runners that tie
//! them to bot events and periodic sweeps.

pub mod conditions;
pub mod config_loader;
pub mod demo;
pub mod due_steps;
pub mod evaluator;
pub mod feedback;
pub mod memory;
pub mod offers;
pub mod repository;
pub mod runner;
pub mod templates;
pub mod types;

pub use config_loader::ConfigLoader;
pub use due_steps::DueStepsRunner;
pub use evaluator::ScenarioEvaluator;
pub use memory::InMemoryStore;
pub use offers::OfferService;
pub use runner::{AutomationRunner, MessageSender};
