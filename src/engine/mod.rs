mod auth;
pub mod context;
pub mod debug;
pub mod evaluator;
mod monitoring;
pub mod operators;

pub use context::EvaluationContext;
pub use debug::{DebugBuilder, DebugConfig};
pub use evaluator::{ruleset_not_loaded_decision, EngineFault, RuleEvaluator};
