//! Leaf condition evaluation
//!
//! Pure and total: missing data is a non-match, never an error.

use rls_ir::{Condition, RecordSnapshot, RequestContext};
use serde_json::Value;

/// Evaluate one leaf against the principal and (optionally) the target record.
///
/// Equality is exact JSON equality: no case folding, no numeric/string
/// coercion. `null` on either side never matches.
pub fn evaluate_leaf(
    condition: &Condition,
    ctx: &RequestContext,
    record: Option<&RecordSnapshot>,
) -> bool {
    match condition {
        Condition::FieldEquals {
            field,
            value_source,
        } => {
            let Some(actual) = record.and_then(|r| r.get(field)) else {
                return false;
            };
            match value_source.resolve(ctx) {
                Some(expected) => values_match(actual, expected),
                None => false,
            }
        }
        Condition::UserAttributeMatch { attributes } => {
            !attributes.is_empty()
                && attributes.iter().all(|(name, expected)| {
                    ctx.get(name)
                        .is_some_and(|actual| values_match(actual, expected))
                })
        }
    }
}

fn values_match(actual: &Value, expected: &Value) -> bool {
    !actual.is_null() && actual == expected
}
