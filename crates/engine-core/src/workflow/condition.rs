//! CONDITION step operator semantics (spec.md §4.1, §6 "Operator semantics").
//!
//! `resolve_field` reads a dot-notation path out of the nested template
//! namespace a CONDITION step evaluates against: `{contact, data, workflow}`,
//! where `data` is the triggering event's payload and `workflow` is the
//! execution's own `context`. `evaluate` then applies one of the eight
//! operators to the resolved value against the step's configured `value`.

use engine_types::error::ConditionError;
use engine_types::workflow::ConditionOperator;
use serde_json::Value;

/// Resolve a dot-notation path (e.g. `contact.plan`, `data.amount`) against a
/// JSON object. A missing path at any segment resolves to `Value::Null`, not
/// an error -- CONDITION treats "absent" and "null" identically (§6).
pub fn resolve_field(root: &Value, path: &str) -> Value {
    let mut current = root;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Evaluate `operator` with the resolved field value on the left and the
/// step's configured `value` on the right.
pub fn evaluate(operator: ConditionOperator, field: &Value, value: &Value) -> Result<bool, ConditionError> {
    match operator {
        ConditionOperator::Equals => Ok(field == value),
        ConditionOperator::NotEquals => Ok(field != value),
        ConditionOperator::Exists => Ok(!field.is_null()),
        ConditionOperator::NotExists => Ok(field.is_null()),
        ConditionOperator::Contains => contains(field, value).map(|found| found),
        ConditionOperator::NotContains => contains(field, value).map(|found| !found),
        ConditionOperator::GreaterThan => compare_numeric(field, value, |a, b| a > b),
        ConditionOperator::LessThan => compare_numeric(field, value, |a, b| a < b),
    }
}

/// `contains`: substring match for strings, membership for arrays. A `null`
/// field never contains anything (`contains` is `false`, `notContains` is
/// `true` via the caller's negation).
fn contains(field: &Value, value: &Value) -> Result<bool, ConditionError> {
    match field {
        Value::Null => Ok(false),
        Value::String(s) => {
            let needle = value.as_str().ok_or(ConditionError::TypeMismatch { expected: "string" })?;
            Ok(s.contains(needle))
        }
        Value::Array(items) => Ok(items.contains(value)),
        _ => Err(ConditionError::TypeMismatch { expected: "string or array" }),
    }
}

/// `greaterThan`/`lessThan`: numeric coercion. Strings that parse as numbers
/// are accepted; anything else (including `null`) fails the comparison.
fn compare_numeric(field: &Value, value: &Value, cmp: impl Fn(f64, f64) -> bool) -> Result<bool, ConditionError> {
    let (a, b) = match (as_f64(field), as_f64(value)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Ok(false),
    };
    Ok(cmp(a, b))
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_field_reads_nested_dot_path() {
        let root = json!({"contact": {"plan": "pro"}});
        assert_eq!(resolve_field(&root, "contact.plan"), json!("pro"));
    }

    #[test]
    fn resolve_field_missing_segment_is_null() {
        let root = json!({"contact": {}});
        assert_eq!(resolve_field(&root, "contact.plan"), Value::Null);
    }

    #[test]
    fn equals_strict_type_match() {
        let result = evaluate(ConditionOperator::Equals, &json!("1"), &json!(1)).unwrap();
        assert!(!result);
    }

    #[test]
    fn not_equals_is_inverse_of_equals() {
        assert!(evaluate(ConditionOperator::NotEquals, &json!("a"), &json!("b")).unwrap());
    }

    #[test]
    fn contains_substring_match() {
        assert!(evaluate(ConditionOperator::Contains, &json!("hello world"), &json!("world")).unwrap());
    }

    #[test]
    fn contains_null_field_is_false() {
        assert!(!evaluate(ConditionOperator::Contains, &Value::Null, &json!("x")).unwrap());
    }

    #[test]
    fn not_contains_null_field_is_true() {
        assert!(evaluate(ConditionOperator::NotContains, &Value::Null, &json!("x")).unwrap());
    }

    #[test]
    fn contains_array_membership() {
        assert!(evaluate(ConditionOperator::Contains, &json!(["a", "b"]), &json!("b")).unwrap());
    }

    #[test]
    fn greater_than_numeric_coercion_from_string() {
        assert!(evaluate(ConditionOperator::GreaterThan, &json!("10"), &json!(5)).unwrap());
    }

    #[test]
    fn greater_than_on_null_field_is_false() {
        assert!(!evaluate(ConditionOperator::GreaterThan, &Value::Null, &json!(5)).unwrap());
    }

    #[test]
    fn less_than_numeric() {
        assert!(evaluate(ConditionOperator::LessThan, &json!(3), &json!(5)).unwrap());
    }

    #[test]
    fn exists_false_for_null() {
        assert!(!evaluate(ConditionOperator::Exists, &Value::Null, &Value::Null).unwrap());
    }

    #[test]
    fn not_exists_true_for_null() {
        assert!(evaluate(ConditionOperator::NotExists, &Value::Null, &Value::Null).unwrap());
    }

    #[test]
    fn contains_type_mismatch_on_non_string_value() {
        let err = evaluate(ConditionOperator::Contains, &json!("abc"), &json!(5)).unwrap_err();
        assert!(matches!(err, ConditionError::TypeMismatch { .. }));
    }
}
