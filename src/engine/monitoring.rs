use crate::domain::{DecisionAction, EngineErrorCode, EngineMode, MatchedRule};

use super::context::EvaluationContext;
use super::evaluator::{EngineFault, RuleEvaluator};

/// MONITORING evaluation: all-match analytics over an upstream decision.
///
/// The response decision always equals the (validated) input decision;
/// rules only annotate. Velocity exceedance is recorded on the matched
/// rule without mutating the response.
pub(super) async fn evaluate(
    engine: &RuleEvaluator,
    ctx: &mut EvaluationContext<'_>,
) -> Result<(), EngineFault> {
    let input = match ctx.transaction.decision.as_deref() {
        None => {
            ctx.decision.decision = DecisionAction::Approve;
            ctx.decision.record_fault(
                EngineMode::Degraded,
                EngineErrorCode::MissingDecision,
                "monitoring input has no decision",
            );
            return Ok(());
        }
        Some(raw) => match DecisionAction::parse(raw) {
            Some(action @ (DecisionAction::Approve | DecisionAction::Decline)) => action,
            _ => {
                ctx.decision.decision = DecisionAction::Approve;
                ctx.decision.record_fault(
                    EngineMode::Degraded,
                    EngineErrorCode::InvalidDecision,
                    format!("monitoring decision must be APPROVE or DECLINE, got {raw:?}"),
                );
                return Ok(());
            }
        },
    };

    ctx.decision.decision = input;

    let ruleset = ctx.ruleset;
    for rule in &ruleset.rules {
        if !rule.enabled {
            continue;
        }

        if !RuleEvaluator::rule_matches(rule, ctx)? {
            continue;
        }

        let mut action = rule.action;
        let mut velocity_exceeded = false;

        if let Some(config) = &rule.velocity {
            if let Some(result) = engine.check_velocity(ctx, rule, config).await {
                if result.exceeded() {
                    action = config.action;
                    velocity_exceeded = true;
                }
                ctx.decision
                    .velocity_results
                    .insert(rule.id.clone(), result);
            }
        }

        ctx.decision.matched_rules.push(MatchedRule {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            action,
            priority: rule.priority,
            velocity_exceeded,
        });
    }

    // The input decision stands no matter what matched.
    ctx.decision.decision = input;
    ctx.decision.transaction_context = Some(ctx.transaction.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::domain::ruleset::GLOBAL_COUNTRY;
    use crate::domain::{
        Condition, DecisionAction, EngineErrorCode, EngineMode, EvaluationType, Operator, Ruleset,
        Transaction,
    };
    use crate::engine::evaluator::test_support::*;

    fn card_monitoring_ruleset() -> Ruleset {
        let mut ruleset = Ruleset {
            key: "CARD_MONITORING".to_string(),
            version: 1,
            country: GLOBAL_COUNTRY.to_string(),
            evaluation_type: EvaluationType::Monitoring,
            rules: vec![
                rule(
                    "high-amount",
                    100,
                    DecisionAction::Review,
                    vec![Condition::new("amount", Operator::Gt, json!(500))],
                ),
                rule(
                    "hr-country",
                    90,
                    DecisionAction::Review,
                    vec![Condition::with_values(
                        "country_code",
                        Operator::In,
                        vec![json!("NG"), json!("RU")],
                    )],
                ),
            ],
        };
        ruleset.prepare();
        ruleset
    }

    fn monitoring_transaction(amount: i64, country: &str, decision: Option<&str>) -> Transaction {
        let mut tx = transaction(amount, country);
        tx.decision = decision.map(str::to_string);
        tx
    }

    #[tokio::test]
    async fn test_all_match_collects_every_rule() {
        let engine = evaluator();
        let ruleset = card_monitoring_ruleset();
        let tx = monitoring_transaction(600, "NG", Some("DECLINE"));

        let decision = engine.evaluate(&tx, &ruleset, false).await;

        assert_eq!(decision.decision, DecisionAction::Decline);
        assert_eq!(decision.engine_mode, EngineMode::Normal);
        let ids: Vec<&str> = decision
            .matched_rules
            .iter()
            .map(|m| m.rule_id.as_str())
            .collect();
        assert_eq!(ids, vec!["high-amount", "hr-country"]);
    }

    #[tokio::test]
    async fn test_input_decision_is_never_replaced_by_rules() {
        let engine = evaluator();
        let ruleset = card_monitoring_ruleset();
        // Rules say REVIEW, input says APPROVE: input wins.
        let tx = monitoring_transaction(600, "NG", Some("approve"));

        let decision = engine.evaluate(&tx, &ruleset, false).await;

        assert_eq!(decision.decision, DecisionAction::Approve);
        assert_eq!(decision.matched_rules.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_decision_degrades() {
        let engine = evaluator();
        let ruleset = card_monitoring_ruleset();
        let tx = monitoring_transaction(600, "NG", None);

        let decision = engine.evaluate(&tx, &ruleset, false).await;

        assert_eq!(decision.decision, DecisionAction::Approve);
        assert_eq!(decision.engine_mode, EngineMode::Degraded);
        assert_eq!(
            decision.engine_error_code,
            Some(EngineErrorCode::MissingDecision)
        );
        assert!(decision.matched_rules.is_empty());
    }

    #[tokio::test]
    async fn test_review_input_is_invalid() {
        let engine = evaluator();
        let ruleset = card_monitoring_ruleset();
        let tx = monitoring_transaction(600, "US", Some("REVIEW"));

        let decision = engine.evaluate(&tx, &ruleset, false).await;

        assert_eq!(decision.decision, DecisionAction::Approve);
        assert_eq!(
            decision.engine_error_code,
            Some(EngineErrorCode::InvalidDecision)
        );
    }

    #[tokio::test]
    async fn test_embeds_transaction_context() {
        let engine = evaluator();
        let ruleset = card_monitoring_ruleset();
        let tx = monitoring_transaction(50, "US", Some("APPROVE"));

        let decision = engine.evaluate(&tx, &ruleset, false).await;

        let embedded = decision.transaction_context.unwrap();
        assert_eq!(embedded.transaction_id, tx.transaction_id);
    }
}
