use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;

use fraudr::domain::ruleset::GLOBAL_COUNTRY;
use fraudr::domain::{
    Condition, DecisionAction, EvaluationType, Operator, Rule, Ruleset, Transaction,
};
use fraudr::engine::{operators, DebugConfig, RuleEvaluator};
use fraudr::observability::EngineMetrics;
use fraudr::velocity::{MockVelocityStore, VelocityService};

fn test_transaction(amount: i64, country: &str) -> Transaction {
    let mut tx = Transaction::new("bench-tx-1");
    tx.amount = Some(Decimal::new(amount, 0));
    tx.country_code = Some(country.to_string());
    tx.merchant_name = Some("GROCERY STORE 42".to_string());
    tx.card_hash = Some("4f2e6a8b".to_string());
    tx
}

fn rule(id: &str, priority: i32, action: DecisionAction, conditions: Vec<Condition>) -> Rule {
    Rule {
        id: id.to_string(),
        name: id.to_string(),
        priority,
        enabled: true,
        action,
        conditions,
        velocity: None,
        predicate: None,
    }
}

fn auth_ruleset(rule_count: usize) -> Ruleset {
    let mut rules = vec![
        rule(
            "high-amount",
            1000,
            DecisionAction::Decline,
            vec![Condition::new("amount", Operator::Gt, json!(10_000))],
        ),
        rule(
            "hr-country",
            900,
            DecisionAction::Decline,
            vec![Condition::with_values(
                "country_code",
                Operator::In,
                vec![json!("NG"), json!("RU"), json!("KP")],
            )],
        ),
    ];
    // Pad with non-matching rules to exercise the fallthrough path.
    for i in 0..rule_count.saturating_sub(2) {
        rules.push(rule(
            &format!("filler-{i}"),
            500 - i as i32,
            DecisionAction::Review,
            vec![
                Condition::new("merchant_name", Operator::StartsWith, json!("CASINO")),
                Condition::with_values(
                    "amount",
                    Operator::Between,
                    vec![json!(90_000), json!(99_000)],
                ),
            ],
        ));
    }
    let mut ruleset = Ruleset {
        key: "CARD_AUTH".to_string(),
        version: 1,
        country: GLOBAL_COUNTRY.to_string(),
        evaluation_type: EvaluationType::Auth,
        rules,
    };
    ruleset.prepare();
    ruleset
}

fn bench_operator_apply(c: &mut Criterion) {
    let condition = Condition::new("amount", Operator::Gt, json!(100));
    let tx = test_transaction(150, "US");
    let input = tx.extract("amount");

    c.bench_function("operator_apply_gt", |b| {
        b.iter(|| operators::apply(black_box(&condition), black_box(&input)))
    });

    let in_condition = Condition::with_values(
        "country_code",
        Operator::In,
        vec![json!("NG"), json!("RU"), json!("KP"), json!("IR")],
    );
    let country = tx.extract("country_code");

    c.bench_function("operator_apply_in_miss", |b| {
        b.iter(|| operators::apply(black_box(&in_condition), black_box(&country)))
    });
}

fn bench_predicate_vs_interpreted(c: &mut Criterion) {
    let conditions = vec![
        Condition::new("amount", Operator::Gt, json!(100)),
        Condition::with_values("country_code", Operator::In, vec![json!("US"), json!("GB")]),
        Condition::new("merchant_name", Operator::Contains, json!("GROCERY")),
    ];
    let predicate = operators::compile(&conditions).unwrap();
    let tx = test_transaction(150, "US");

    c.bench_function("predicate_compiled", |b| {
        b.iter(|| predicate.matches(black_box(&tx)))
    });

    c.bench_function("predicate_interpreted", |b| {
        b.iter(|| {
            conditions
                .iter()
                .all(|cond| matches!(operators::apply(cond, &tx.extract(&cond.field)), Ok(true)))
        })
    });
}

fn bench_auth_evaluation(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let evaluator = RuleEvaluator::new(
        Arc::new(VelocityService::new(Arc::new(MockVelocityStore::new()))),
        Arc::new(EngineMetrics::new()),
        DebugConfig::default(),
    );
    let tx = test_transaction(150, "US");

    for rule_count in [3usize, 25] {
        let ruleset = auth_ruleset(rule_count);
        c.bench_function(&format!("auth_evaluate_{rule_count}_rules"), |b| {
            b.iter(|| {
                runtime.block_on(evaluator.evaluate(black_box(&tx), black_box(&ruleset), false))
            })
        });
    }
}

criterion_group!(
    benches,
    bench_operator_apply,
    bench_predicate_vs_interpreted,
    bench_auth_evaluation,
);

criterion_main!(benches);
