use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

use crate::domain::ruleset::Predicate;
use crate::domain::transaction::{Extracted, FieldValue};
use crate::domain::{Condition, Operator};

/// Structural faults in a condition.
///
/// These are evaluation errors, not "false": a rule carrying a malformed
/// condition trips the engine's EVALUATION_ERROR policy instead of
/// silently never matching.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperatorError {
    #[error("operator {operator} on field {field} requires a value")]
    MissingValue { field: String, operator: Operator },

    #[error("operator {operator} on field {field} requires a non-empty values list")]
    MissingValues { field: String, operator: Operator },

    #[error("between on field {field} requires exactly two monotone numeric bounds")]
    InvalidBetween { field: String },
}

/// Coerce a condition operand to decimal (JSON numbers and numeric strings).
fn operand_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Semantic equality, keyed by the kind of the extracted field value:
/// decimal equality by value for numbers, case-sensitive compare for
/// strings, plain equality for booleans.
fn semantic_eq(input: &FieldValue, operand: &Value) -> bool {
    match input {
        FieldValue::Number(d) => operand_decimal(operand).is_some_and(|o| *d == o),
        FieldValue::Text(s) => operand.as_str().is_some_and(|o| s == o),
        FieldValue::Bool(b) => operand.as_bool().is_some_and(|o| *b == o),
    }
}

fn scalar_operand<'a>(condition: &'a Condition) -> Result<&'a Value, OperatorError> {
    condition
        .value
        .as_ref()
        .filter(|v| !v.is_null())
        .ok_or_else(|| OperatorError::MissingValue {
            field: condition.field.clone(),
            operator: condition.operator,
        })
}

fn list_operand<'a>(condition: &'a Condition) -> Result<&'a [Value], OperatorError> {
    match condition.values.as_deref() {
        Some(values) if !values.is_empty() => Ok(values),
        _ => Err(OperatorError::MissingValues {
            field: condition.field.clone(),
            operator: condition.operator,
        }),
    }
}

fn between_bounds(condition: &Condition) -> Result<(Decimal, Decimal), OperatorError> {
    let invalid = || OperatorError::InvalidBetween {
        field: condition.field.clone(),
    };

    let values = condition.values.as_deref().ok_or_else(invalid)?;
    if values.len() != 2 {
        return Err(invalid());
    }
    let low = operand_decimal(&values[0]).ok_or_else(invalid)?;
    let high = operand_decimal(&values[1]).ok_or_else(invalid)?;
    if low > high {
        return Err(invalid());
    }
    Ok((low, high))
}

/// Apply one condition to an extracted field value.
///
/// Absent and type-mismatched inputs evaluate to false for every operator
/// except `exists`, which is true whenever the field is present and
/// non-null (even when the value is not comparable).
pub fn apply(condition: &Condition, input: &Extracted) -> Result<bool, OperatorError> {
    if condition.operator == Operator::Exists {
        return Ok(input.is_present());
    }

    let value = match input {
        Extracted::Present(v) => v,
        Extracted::Absent | Extracted::Mismatch => {
            // Still surface structural faults for malformed conditions.
            validate(condition)?;
            return Ok(false);
        }
    };

    match condition.operator {
        Operator::Eq => Ok(semantic_eq(value, scalar_operand(condition)?)),
        Operator::Ne => Ok(!semantic_eq(value, scalar_operand(condition)?)),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let operand = operand_decimal(scalar_operand(condition)?);
            let input = value.as_decimal();
            Ok(match (input, operand) {
                (Some(x), Some(bound)) => match condition.operator {
                    Operator::Gt => x > bound,
                    Operator::Gte => x >= bound,
                    Operator::Lt => x < bound,
                    Operator::Lte => x <= bound,
                    _ => unreachable!(),
                },
                _ => false,
            })
        }
        Operator::In => {
            let values = list_operand(condition)?;
            Ok(values.iter().any(|v| semantic_eq(value, v)))
        }
        Operator::NotIn => {
            let values = list_operand(condition)?;
            Ok(!values.iter().any(|v| semantic_eq(value, v)))
        }
        Operator::Between => {
            let (low, high) = between_bounds(condition)?;
            Ok(value.as_decimal().is_some_and(|x| x >= low && x <= high))
        }
        Operator::Contains => Ok(string_op(value, condition, |s, o| s.contains(o))?),
        Operator::StartsWith => Ok(string_op(value, condition, |s, o| s.starts_with(o))?),
        Operator::EndsWith => Ok(string_op(value, condition, |s, o| s.ends_with(o))?),
        Operator::Exists => unreachable!(),
    }
}

fn string_op(
    input: &FieldValue,
    condition: &Condition,
    f: impl Fn(&str, &str) -> bool,
) -> Result<bool, OperatorError> {
    let operand = scalar_operand(condition)?;
    match (input.as_text(), operand.as_str()) {
        (Some(s), Some(o)) => Ok(f(s, o)),
        _ => Ok(false),
    }
}

/// Check a condition's structure without an input value.
pub fn validate(condition: &Condition) -> Result<(), OperatorError> {
    match condition.operator {
        Operator::Exists => Ok(()),
        Operator::In | Operator::NotIn => list_operand(condition).map(|_| ()),
        Operator::Between => between_bounds(condition).map(|_| ()),
        _ => scalar_operand(condition).map(|_| ()),
    }
}

/// Compile a condition list into a single predicate over a transaction.
///
/// Returns None when any condition is structurally invalid so the
/// interpreted path (and its error policy) handles the rule instead.
pub fn compile(conditions: &[Condition]) -> Option<Predicate> {
    if conditions.iter().any(|c| validate(c).is_err()) {
        return None;
    }
    let compiled: Vec<Condition> = conditions.to_vec();
    Some(Predicate::new(move |tx| {
        compiled
            .iter()
            .all(|c| matches!(apply(c, &tx.extract(&c.field)), Ok(true)))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Transaction;
    use serde_json::json;

    fn present_number(n: i64) -> Extracted {
        Extracted::Present(FieldValue::Number(Decimal::new(n, 0)))
    }

    fn present_text(s: &str) -> Extracted {
        Extracted::Present(FieldValue::Text(s.to_string()))
    }

    #[test]
    fn test_numeric_comparisons() {
        let gt = Condition::new("amount", Operator::Gt, json!(100));
        assert_eq!(apply(&gt, &present_number(150)), Ok(true));
        assert_eq!(apply(&gt, &present_number(100)), Ok(false));

        let lte = Condition::new("amount", Operator::Lte, json!(100));
        assert_eq!(apply(&lte, &present_number(100)), Ok(true));
        assert_eq!(apply(&lte, &present_number(101)), Ok(false));
    }

    #[test]
    fn test_eq_decimal_by_value() {
        let eq = Condition::new("amount", Operator::Eq, json!(100.0));
        assert_eq!(apply(&eq, &present_number(100)), Ok(true));

        let ne = Condition::new("amount", Operator::Ne, json!(100.0));
        assert_eq!(apply(&ne, &present_number(100)), Ok(false));
    }

    #[test]
    fn test_eq_strings_case_sensitive() {
        let eq = Condition::new("currency", Operator::Eq, json!("EUR"));
        assert_eq!(apply(&eq, &present_text("EUR")), Ok(true));
        assert_eq!(apply(&eq, &present_text("eur")), Ok(false));
    }

    #[test]
    fn test_absent_field_is_false_for_everything_but_exists() {
        for operator in [
            Operator::Eq,
            Operator::Ne,
            Operator::Gt,
            Operator::Contains,
        ] {
            let cond = Condition::new("x", operator, json!("v"));
            assert_eq!(apply(&cond, &Extracted::Absent), Ok(false), "{operator}");
        }

        let not_in = Condition::with_values("x", Operator::NotIn, vec![json!("v")]);
        assert_eq!(apply(&not_in, &Extracted::Absent), Ok(false));

        let exists = Condition {
            field: "x".to_string(),
            operator: Operator::Exists,
            value: None,
            values: None,
        };
        assert_eq!(apply(&exists, &Extracted::Absent), Ok(false));
        assert_eq!(apply(&exists, &present_text("anything")), Ok(true));
        assert_eq!(apply(&exists, &Extracted::Mismatch), Ok(true));
    }

    #[test]
    fn test_in_and_not_in() {
        let country_in =
            Condition::with_values("country_code", Operator::In, vec![json!("NG"), json!("RU")]);
        assert_eq!(apply(&country_in, &present_text("NG")), Ok(true));
        assert_eq!(apply(&country_in, &present_text("US")), Ok(false));

        let country_not_in =
            Condition::with_values("country_code", Operator::NotIn, vec![json!("NG"), json!("RU")]);
        assert_eq!(apply(&country_not_in, &present_text("US")), Ok(true));
        assert_eq!(apply(&country_not_in, &present_text("RU")), Ok(false));
    }

    #[test]
    fn test_between_inclusive_bounds() {
        let between =
            Condition::with_values("amount", Operator::Between, vec![json!(10), json!(20)]);

        assert_eq!(apply(&between, &present_number(10)), Ok(true));
        assert_eq!(apply(&between, &present_number(20)), Ok(true));
        assert_eq!(apply(&between, &present_number(9)), Ok(false));
        assert_eq!(apply(&between, &present_number(21)), Ok(false));

        let below = Extracted::Present(FieldValue::Number(Decimal::new(9999, 3)));
        assert_eq!(apply(&between, &below), Ok(false));
        let above = Extracted::Present(FieldValue::Number(Decimal::new(20001, 3)));
        assert_eq!(apply(&between, &above), Ok(false));
    }

    #[test]
    fn test_between_rejects_bad_bounds() {
        let one_bound = Condition::with_values("amount", Operator::Between, vec![json!(10)]);
        assert!(apply(&one_bound, &present_number(10)).is_err());

        let inverted =
            Condition::with_values("amount", Operator::Between, vec![json!(20), json!(10)]);
        assert!(apply(&inverted, &present_number(15)).is_err());
    }

    #[test]
    fn test_missing_operands_are_errors_even_on_absent_input() {
        let no_value = Condition {
            field: "amount".to_string(),
            operator: Operator::Gt,
            value: None,
            values: None,
        };
        assert!(apply(&no_value, &Extracted::Absent).is_err());

        let empty_list = Condition::with_values("country_code", Operator::In, vec![]);
        assert!(apply(&empty_list, &present_text("US")).is_err());
    }

    #[test]
    fn test_string_operators() {
        let contains = Condition::new("merchant_name", Operator::Contains, json!("CASINO"));
        assert_eq!(apply(&contains, &present_text("GRAND CASINO LLC")), Ok(true));
        assert_eq!(apply(&contains, &present_text("GROCERY")), Ok(false));

        let starts = Condition::new("merchant_id", Operator::StartsWith, json!("m-"));
        assert_eq!(apply(&starts, &present_text("m-123")), Ok(true));

        let ends = Condition::new("merchant_id", Operator::EndsWith, json!("-eu"));
        assert_eq!(apply(&ends, &present_text("m-123-eu")), Ok(true));

        // Numeric input never matches a string operator
        assert_eq!(apply(&contains, &present_number(5)), Ok(false));
    }

    #[test]
    fn test_numeric_text_is_coerced() {
        let gt = Condition::new("amount", Operator::Gt, json!(100));
        assert_eq!(apply(&gt, &present_text("150.5")), Ok(true));
        assert_eq!(apply(&gt, &present_text("not-a-number")), Ok(false));
    }

    #[test]
    fn test_compile_matches_interpretation() {
        let conditions = vec![
            Condition::new("amount", Operator::Gt, json!(100)),
            Condition::with_values("country_code", Operator::In, vec![json!("US"), json!("GB")]),
        ];
        let predicate = compile(&conditions).unwrap();

        let mut tx = Transaction::new("tx-1");
        tx.amount = Some(Decimal::new(150, 0));
        tx.country_code = Some("US".to_string());
        assert!(predicate.matches(&tx));

        tx.country_code = Some("FR".to_string());
        assert!(!predicate.matches(&tx));
    }

    #[test]
    fn test_compile_refuses_invalid_conditions() {
        let conditions = vec![Condition::with_values(
            "amount",
            Operator::Between,
            vec![json!(10)],
        )];
        assert!(compile(&conditions).is_none());
    }
}
