pub mod decision;
pub mod ruleset;
pub mod transaction;

pub use decision::{
    Decision, DecisionAction, DebugInfo, EngineErrorCode, EngineMode, MatchedRule,
    TimingBreakdown, VelocityResult,
};
pub use ruleset::{Condition, EvaluationType, Operator, Rule, Ruleset, VelocityConfig};
pub use transaction::{Extracted, FieldValue, Transaction};
