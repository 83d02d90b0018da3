use crate::value::{FieldValue, Value};
use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr, Not};

///
/// FilterExpr
///
/// Logical expression for querying/filtering entities.
///
/// Expressions can be:
/// - `True` or `False` constants
/// - Single clauses comparing a field with a value
/// - Composite expressions: `And`, `Or`, and negation `Not`.
///
/// Regex clauses carry the pattern as text; compilation happens once per
/// query when the expression is lowered into a
/// [`FilterProgram`](crate::db::query::FilterProgram).
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum FilterExpr {
    #[default]
    True,
    False,
    Clause(FilterClause),
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
}

impl FilterExpr {
    // --- Clause ---

    /// Create a single clause: `field cmp value`.
    pub fn clause(field: impl Into<String>, cmp: Cmp, value: impl FieldValue) -> Self {
        Self::Clause(FilterClause::new(field, cmp, value))
    }

    // --- Equality ---

    pub fn eq(field: impl Into<String>, value: impl FieldValue) -> Self {
        Self::clause(field, Cmp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl FieldValue) -> Self {
        Self::clause(field, Cmp::Ne, value)
    }

    // --- Ordering ---

    pub fn lt(field: impl Into<String>, value: impl FieldValue) -> Self {
        Self::clause(field, Cmp::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl FieldValue) -> Self {
        Self::clause(field, Cmp::Lte, value)
    }

    pub fn gt(field: impl Into<String>, value: impl FieldValue) -> Self {
        Self::clause(field, Cmp::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl FieldValue) -> Self {
        Self::clause(field, Cmp::Gte, value)
    }

    // --- Membership / Text ---

    /// Field value is contained in the given set of values.
    pub fn in_iter<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: FieldValue,
    {
        let list = Value::List(values.into_iter().map(FieldValue::to_value).collect());
        Self::clause(field, Cmp::In, list)
    }

    /// Field text matches the given regex pattern.
    pub fn matches(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::clause(field, Cmp::Matches, Value::Text(pattern.into()))
    }

    // --- Combinators ---

    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And(mut children) => {
                children.push(other);
                Self::And(children)
            }
            expr => Self::And(vec![expr, other]),
        }
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or(mut children) => {
                children.push(other);
                Self::Or(children)
            }
            expr => Self::Or(vec![expr, other]),
        }
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }
}

impl BitAnd for FilterExpr {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.and(rhs)
    }
}

impl BitOr for FilterExpr {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.or(rhs)
    }
}

impl Not for FilterExpr {
    type Output = Self;

    fn not(self) -> Self {
        self.negate()
    }
}

///
/// FilterClause
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FilterClause {
    pub field: String,
    pub cmp: Cmp,
    pub value: Value,
}

impl FilterClause {
    pub fn new(field: impl Into<String>, cmp: Cmp, value: impl FieldValue) -> Self {
        Self {
            field: field.into(),
            cmp,
            value: value.to_value(),
        }
    }
}

///
/// Cmp
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Matches,
}

///
/// FilterDsl
///
/// Builder handle passed to `Query::filter(|f| …)` closures.
///

#[derive(Clone, Copy, Debug, Default)]
pub struct FilterDsl;

impl FilterDsl {
    pub fn eq(self, field: impl Into<String>, value: impl FieldValue) -> FilterExpr {
        FilterExpr::eq(field, value)
    }

    pub fn ne(self, field: impl Into<String>, value: impl FieldValue) -> FilterExpr {
        FilterExpr::ne(field, value)
    }

    pub fn lt(self, field: impl Into<String>, value: impl FieldValue) -> FilterExpr {
        FilterExpr::lt(field, value)
    }

    pub fn lte(self, field: impl Into<String>, value: impl FieldValue) -> FilterExpr {
        FilterExpr::lte(field, value)
    }

    pub fn gt(self, field: impl Into<String>, value: impl FieldValue) -> FilterExpr {
        FilterExpr::gt(field, value)
    }

    pub fn gte(self, field: impl Into<String>, value: impl FieldValue) -> FilterExpr {
        FilterExpr::gte(field, value)
    }

    pub fn in_iter<I, V>(self, field: impl Into<String>, values: I) -> FilterExpr
    where
        I: IntoIterator<Item = V>,
        V: FieldValue,
    {
        FilterExpr::in_iter(field, values)
    }

    pub fn matches(self, field: impl Into<String>, pattern: impl Into<String>) -> FilterExpr {
        FilterExpr::matches(field, pattern)
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_expressions_survive_serde() {
        let expr = (FilterExpr::gte("stars", 5) | FilterExpr::eq("title", "alpha"))
            & !FilterExpr::matches("title", "^draft");

        let json = serde_json::to_string(&expr).unwrap();
        let decoded: FilterExpr = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, expr);
    }

    #[test]
    fn and_combinator_flattens_chains() {
        let expr = FilterExpr::eq("a", 1).and(FilterExpr::eq("b", 2)).and(FilterExpr::eq("c", 3));

        let FilterExpr::And(children) = expr else {
            panic!("expected a flattened conjunction");
        };
        assert_eq!(children.len(), 3);
    }
}
