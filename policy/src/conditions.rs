//! Condition evaluation
//!
//! Attribute paths use dot notation for nested lookups. An unknown
//! attribute resolves to "undefined": every comparison against it is
//! false except `is_null`, which is true.

use crate::types::{Condition, ConditionOperator, ConditionSet, MatchMode};
use regex::Regex;
use serde_json::Value;

/// Resolve a dot path against a JSON document. Returns None for missing
/// segments and for traversal through non-objects.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Evaluate a full condition set against a document.
pub fn evaluate_set(set: &ConditionSet, document: &Value) -> bool {
    if set.conditions.is_empty() {
        return true;
    }
    match set.match_mode {
        MatchMode::All => set.conditions.iter().all(|c| evaluate(c, document)),
        MatchMode::Any => set.conditions.iter().any(|c| evaluate(c, document)),
    }
}

/// Evaluate one condition against a document.
pub fn evaluate(condition: &Condition, document: &Value) -> bool {
    let actual = lookup(document, &condition.attribute);

    match condition.operator {
        ConditionOperator::IsNull => actual.map(Value::is_null).unwrap_or(true),
        ConditionOperator::IsNotNull => actual.map(|v| !v.is_null()).unwrap_or(false),
        _ => {
            let Some(actual) = actual else {
                return false;
            };
            if actual.is_null() {
                return false;
            }
            compare(condition.operator, actual, &condition.value)
        }
    }
}

fn compare(operator: ConditionOperator, actual: &Value, expected: &Value) -> bool {
    match operator {
        ConditionOperator::Equals => values_equal(actual, expected),
        ConditionOperator::NotEquals => !values_equal(actual, expected),
        ConditionOperator::Contains => contains(actual, expected),
        ConditionOperator::NotContains => !contains(actual, expected),
        ConditionOperator::In => expected
            .as_array()
            .map(|items| items.iter().any(|item| values_equal(actual, item)))
            .unwrap_or(false),
        ConditionOperator::NotIn => expected
            .as_array()
            .map(|items| !items.iter().any(|item| values_equal(actual, item)))
            .unwrap_or(false),
        ConditionOperator::GreaterThan => match (as_f64(actual), as_f64(expected)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        ConditionOperator::LessThan => match (as_f64(actual), as_f64(expected)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        ConditionOperator::Between => {
            let Some(bounds) = expected.as_array() else {
                return false;
            };
            if bounds.len() != 2 {
                return false;
            }
            match (as_f64(actual), as_f64(&bounds[0]), as_f64(&bounds[1])) {
                (Some(v), Some(lo), Some(hi)) => v >= lo && v <= hi,
                _ => false,
            }
        }
        ConditionOperator::MatchesRegex => {
            let (Some(text), Some(pattern)) = (actual.as_str(), expected.as_str()) else {
                return false;
            };
            // An invalid pattern in a policy never matches.
            Regex::new(pattern).map(|re| re.is_match(text)).unwrap_or(false)
        }
        ConditionOperator::StartsWith => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(b)) => a.starts_with(b),
            _ => false,
        },
        ConditionOperator::EndsWith => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(b)) => a.ends_with(b),
            _ => false,
        },
        ConditionOperator::IsNull | ConditionOperator::IsNotNull => unreachable!(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    // Numeric comparison ignores representation (1 == 1.0).
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x == y;
    }
    a == b
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => expected.as_str().map(|e| s.contains(e)).unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        _ => false,
    }
}
