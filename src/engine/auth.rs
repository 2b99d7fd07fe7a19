use crate::domain::{DecisionAction, EngineMode, MatchedRule};

use super::context::EvaluationContext;
use super::evaluator::{EngineFault, RuleEvaluator};

/// AUTH evaluation: first match in priority order wins.
///
/// Iteration stops at the first matching enabled rule; its action (or the
/// velocity override when the counter exceeded its threshold) becomes the
/// decision. No match approves in NORMAL mode.
pub(super) async fn evaluate(
    engine: &RuleEvaluator,
    ctx: &mut EvaluationContext<'_>,
) -> Result<(), EngineFault> {
    // Rules are pre-sorted by descending priority at install time.
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
        ctx.decision.decision = action;
        return Ok(());
    }

    ctx.decision.decision = DecisionAction::Approve;
    debug_assert_eq!(ctx.decision.engine_mode, EngineMode::Normal);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use serde_json::json;

    use crate::domain::ruleset::GLOBAL_COUNTRY;
    use crate::domain::{
        Condition, DecisionAction, EngineErrorCode, EngineMode, EvaluationType, Operator, Ruleset,
        Transaction, VelocityConfig,
    };
    use crate::engine::evaluator::test_support::*;
    use crate::velocity::MockVelocityStore;

    #[tokio::test]
    async fn test_first_match_wins() {
        let engine = evaluator();
        let ruleset = card_auth_ruleset();
        let tx = transaction(150, "US");

        let decision = engine.evaluate(&tx, &ruleset, false).await;

        assert_eq!(decision.decision, DecisionAction::Decline);
        assert_eq!(decision.engine_mode, EngineMode::Normal);
        assert_eq!(decision.matched_rules.len(), 1);
        assert_eq!(decision.matched_rules[0].rule_id, "high-amount");
    }

    #[tokio::test]
    async fn test_first_match_stops_before_later_rules() {
        let engine = evaluator();
        let ruleset = card_auth_ruleset();
        // Matches both high-amount (prio 100) and hr-country (prio 90);
        // only the higher-priority rule may appear.
        let tx = transaction(150, "NG");

        let decision = engine.evaluate(&tx, &ruleset, false).await;

        assert_eq!(decision.matched_rules.len(), 1);
        assert_eq!(decision.matched_rules[0].rule_id, "high-amount");
        assert_eq!(decision.decision, DecisionAction::Decline);
    }

    #[tokio::test]
    async fn test_fallthrough_to_default_rule() {
        let engine = evaluator();
        let ruleset = card_auth_ruleset();
        let tx = transaction(50, "US");

        let decision = engine.evaluate(&tx, &ruleset, false).await;

        assert_eq!(decision.decision, DecisionAction::Approve);
        assert_eq!(decision.matched_rules.len(), 1);
        assert_eq!(decision.matched_rules[0].rule_id, "default");
    }

    #[tokio::test]
    async fn test_no_match_approves_in_normal_mode() {
        let engine = evaluator();
        let mut ruleset = card_auth_ruleset();
        ruleset.rules.retain(|r| r.id != "default");

        let tx = transaction(50, "US");
        let decision = engine.evaluate(&tx, &ruleset, false).await;

        assert_eq!(decision.decision, DecisionAction::Approve);
        assert_eq!(decision.engine_mode, EngineMode::Normal);
        assert!(decision.matched_rules.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_rule_never_matches() {
        let engine = evaluator();
        let mut ruleset = card_auth_ruleset();
        for rule in &mut ruleset.rules {
            if rule.id == "high-amount" {
                rule.enabled = false;
            }
        }

        let tx = transaction(150, "NG");
        let decision = engine.evaluate(&tx, &ruleset, false).await;

        assert_eq!(decision.matched_rules.len(), 1);
        assert_eq!(decision.matched_rules[0].rule_id, "hr-country");
    }

    fn velocity_ruleset(threshold: u64) -> Ruleset {
        let mut high_amount = rule(
            "high-amount",
            100,
            DecisionAction::Review,
            vec![Condition::new("amount", Operator::Gt, json!(100))],
        );
        high_amount.velocity = Some(VelocityConfig {
            dimension: "card_hash".to_string(),
            window_seconds: 3600,
            threshold,
            action: DecisionAction::Decline,
        });

        let mut ruleset = Ruleset {
            key: "CARD_AUTH".to_string(),
            version: 1,
            country: GLOBAL_COUNTRY.to_string(),
            evaluation_type: EvaluationType::Auth,
            rules: vec![high_amount],
        };
        ruleset.prepare();
        ruleset
    }

    fn card_transaction(amount: i64, card: &str) -> Transaction {
        let mut tx = Transaction::new(format!("tx-{card}"));
        tx.amount = Some(Decimal::new(amount, 0));
        tx.card_hash = Some(card.to_string());
        tx
    }

    #[tokio::test]
    async fn test_velocity_exceedance_overrides_action() {
        let store = Arc::new(MockVelocityStore::new());
        let engine = evaluator_with_store(store);
        let ruleset = velocity_ruleset(2);
        let tx = card_transaction(150, "card-a");

        // First two matches stay on the rule action.
        for _ in 0..2 {
            let decision = engine.evaluate(&tx, &ruleset, false).await;
            assert_eq!(decision.decision, DecisionAction::Review);
        }

        // Third crosses the threshold; the velocity action replaces it.
        let decision = engine.evaluate(&tx, &ruleset, false).await;
        assert_eq!(decision.decision, DecisionAction::Decline);
        assert!(decision.matched_rules[0].velocity_exceeded);

        let result = decision.velocity_results.get("high-amount").unwrap();
        assert_eq!(result.current_count, 3);
        assert!(result.exceeded());
    }

    #[tokio::test]
    async fn test_replay_mode_does_not_increment() {
        let store = Arc::new(MockVelocityStore::new());
        let engine = evaluator_with_store(store.clone());
        let ruleset = velocity_ruleset(5);
        let tx = card_transaction(150, "card-a");

        engine.evaluate(&tx, &ruleset, false).await;
        let counts_after_live = store.counts();

        engine.evaluate(&tx, &ruleset, true).await;
        assert_eq!(store.counts(), counts_after_live);
    }

    #[tokio::test]
    async fn test_velocity_unavailable_degrades_but_keeps_rule_decision() {
        let store = Arc::new(MockVelocityStore::new());
        store.set_failing(true);
        let engine = evaluator_with_store(store);

        let mut ruleset = velocity_ruleset(2);
        ruleset.rules[0].action = DecisionAction::Decline;

        let tx = card_transaction(150, "card-a");
        let decision = engine.evaluate(&tx, &ruleset, false).await;

        // Rule still matched and declined; velocity simply didn't fire.
        assert_eq!(decision.decision, DecisionAction::Decline);
        assert_eq!(decision.engine_mode, EngineMode::Degraded);
        assert_eq!(
            decision.engine_error_code,
            Some(EngineErrorCode::RedisUnavailable)
        );
        assert!(decision.velocity_results.is_empty());
        assert!(!decision.matched_rules[0].velocity_exceeded);
    }
}
