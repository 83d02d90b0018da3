use crate::types::Identifier;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

///
/// Value
///
/// Scalar field value used by the filter/order engine. Entities expose their
/// indexed fields as `Value`s; filter clauses carry a `Value` on the
/// right-hand side.
///
/// Null → the field's value is `Option::None`.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Value {
    Bool(bool),
    Id(Identifier),
    Int(i64),
    List(Vec<Value>),
    Null,
    Text(String),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_text(&self) -> Option<&String> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

// Comparison helpers return None when a comparison is invalid (mismatched
// variants, unordered kinds); predicate evaluation treats that as false.

/// Equality across two values of the same kind.
#[must_use]
pub fn compare_eq(actual: &Value, expected: &Value) -> Option<bool> {
    match (actual, expected) {
        (Value::Bool(a), Value::Bool(b)) => Some(a == b),
        (Value::Id(a), Value::Id(b)) => Some(a == b),
        (Value::Int(a), Value::Int(b)) => Some(a == b),
        (Value::Text(a), Value::Text(b)) => Some(a == b),
        (Value::List(a), Value::List(b)) => Some(a == b),
        (Value::Null, Value::Null) => Some(true),
        (Value::Null, _) | (_, Value::Null) => Some(false),
        _ => None,
    }
}

/// Ordering across two values of the same orderable kind.
#[must_use]
pub fn compare_order(actual: &Value, expected: &Value) -> Option<Ordering> {
    match (actual, expected) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Id(a), Value::Id(b)) => Some(a.order_key().cmp(&b.order_key())),
        _ => None,
    }
}

/// Membership of `actual` in a list value.
#[must_use]
pub fn contained_in(actual: &Value, list: &Value) -> Option<bool> {
    let Value::List(items) = list else {
        return None;
    };

    let mut saw_valid = false;
    for item in items {
        match compare_eq(actual, item) {
            Some(true) => return Some(true),
            Some(false) => saw_valid = true,
            None => {}
        }
    }

    saw_valid.then_some(false)
}

///
/// FieldValue
///
/// Conversion into a [`Value`] for the query DSL right-hand side.
///

pub trait FieldValue {
    fn to_value(self) -> Value;
}

impl FieldValue for Value {
    fn to_value(self) -> Value {
        self
    }
}

impl FieldValue for bool {
    fn to_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FieldValue for i64 {
    fn to_value(self) -> Value {
        Value::Int(self)
    }
}

impl FieldValue for i32 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl FieldValue for u32 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl FieldValue for &str {
    fn to_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl FieldValue for String {
    fn to_value(self) -> Value {
        Value::Text(self)
    }
}

impl FieldValue for Identifier {
    fn to_value(self) -> Value {
        Value::Id(self)
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn to_value(self) -> Value {
        self.map_or(Value::Null, FieldValue::to_value)
    }
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn to_value(self) -> Value {
        Value::List(self.into_iter().map(FieldValue::to_value).collect())
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_kinds_are_incomparable() {
        assert_eq!(compare_eq(&Value::Int(1), &Value::Text("1".into())), None);
        assert_eq!(compare_order(&Value::Bool(true), &Value::Int(1)), None);
    }

    #[test]
    fn null_equals_only_null() {
        assert_eq!(compare_eq(&Value::Null, &Value::Null), Some(true));
        assert_eq!(compare_eq(&Value::Null, &Value::Int(0)), Some(false));
    }

    #[test]
    fn contained_in_skips_invalid_elements() {
        let list = Value::List(vec![Value::Text("a".into()), Value::Int(2)]);

        assert_eq!(contained_in(&Value::Int(2), &list), Some(true));
        assert_eq!(contained_in(&Value::Int(3), &list), Some(false));
        assert_eq!(contained_in(&Value::Bool(true), &list), None);
    }
}
