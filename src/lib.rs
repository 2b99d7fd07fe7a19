pub mod api;
pub mod bus;
pub mod config;
pub mod domain;
pub mod engine;
pub mod observability;
pub mod outbox;
pub mod registry;
pub mod velocity;

pub use config::Config;
pub use domain::{Decision, DecisionAction, EngineMode, Ruleset, Transaction};
pub use engine::RuleEvaluator;
pub use registry::RulesetRegistry;
