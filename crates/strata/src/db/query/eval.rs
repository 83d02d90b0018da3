use crate::{
    db::{
        primitives::{Cmp, FilterExpr, Order, SortExpr, SortKey, apply_pagination},
        query::{Payload, Query, QueryError, QueryResult},
    },
    traits::Entity,
    value::{Value, compare_eq, compare_order, contained_in},
};
use regex::Regex;
use std::cmp::Ordering;

///
/// FilterProgram
///
/// A filter expression lowered into executable form. Regex patterns are
/// compiled once here; evaluation is allocation-free and never suspends.
///

#[derive(Clone, Debug)]
pub struct FilterProgram {
    resolved: ResolvedExpr,
}

#[derive(Clone, Debug)]
enum ResolvedExpr {
    True,
    False,
    And(Vec<ResolvedExpr>),
    Or(Vec<ResolvedExpr>),
    Not(Box<ResolvedExpr>),
    Compare {
        field: String,
        cmp: Cmp,
        value: Value,
    },
    Matches {
        field: String,
        regex: Regex,
    },
}

impl FilterProgram {
    /// Lower a filter expression, compiling regex clauses.
    pub fn compile(expr: &FilterExpr) -> Result<Self, QueryError> {
        Ok(Self {
            resolved: lower(expr)?,
        })
    }

    /// Evaluate against one entity. A clause over a missing field or an
    /// invalid comparison evaluates to false.
    #[must_use]
    pub fn eval<E: Entity>(&self, entity: &E) -> bool {
        eval_resolved(entity, &self.resolved)
    }
}

fn lower(expr: &FilterExpr) -> Result<ResolvedExpr, QueryError> {
    Ok(match expr {
        FilterExpr::True => ResolvedExpr::True,
        FilterExpr::False => ResolvedExpr::False,
        FilterExpr::And(children) => {
            ResolvedExpr::And(children.iter().map(lower).collect::<Result<_, _>>()?)
        }
        FilterExpr::Or(children) => {
            ResolvedExpr::Or(children.iter().map(lower).collect::<Result<_, _>>()?)
        }
        FilterExpr::Not(inner) => ResolvedExpr::Not(Box::new(lower(inner)?)),
        FilterExpr::Clause(clause) if clause.cmp == Cmp::Matches => {
            let Value::Text(pattern) = &clause.value else {
                return Err(QueryError::RegexPatternNotText);
            };
            let regex = Regex::new(pattern).map_err(|err| QueryError::InvalidRegex {
                pattern: pattern.clone(),
                message: err.to_string(),
            })?;

            ResolvedExpr::Matches {
                field: clause.field.clone(),
                regex,
            }
        }
        FilterExpr::Clause(clause) => ResolvedExpr::Compare {
            field: clause.field.clone(),
            cmp: clause.cmp,
            value: clause.value.clone(),
        },
    })
}

fn eval_resolved<E: Entity>(entity: &E, expr: &ResolvedExpr) -> bool {
    match expr {
        ResolvedExpr::True => true,
        ResolvedExpr::False => false,
        ResolvedExpr::And(children) => children.iter().all(|child| eval_resolved(entity, child)),
        ResolvedExpr::Or(children) => children.iter().any(|child| eval_resolved(entity, child)),
        ResolvedExpr::Not(inner) => !eval_resolved(entity, inner),
        ResolvedExpr::Compare { field, cmp, value } => match entity.field(field) {
            Some(actual) => eval_compare(&actual, *cmp, value),
            None => false,
        },
        ResolvedExpr::Matches { field, regex } => entity
            .field(field)
            .as_ref()
            .and_then(Value::as_text)
            .is_some_and(|text| regex.is_match(text)),
    }
}

// Shared compare-op semantics. Invalid comparisons evaluate to false.
fn eval_compare(actual: &Value, cmp: Cmp, value: &Value) -> bool {
    match cmp {
        Cmp::Eq => compare_eq(actual, value).unwrap_or(false),
        Cmp::Ne => compare_eq(actual, value).is_some_and(|v| !v),

        Cmp::Lt => compare_order(actual, value).is_some_and(Ordering::is_lt),
        Cmp::Lte => compare_order(actual, value).is_some_and(Ordering::is_le),
        Cmp::Gt => compare_order(actual, value).is_some_and(Ordering::is_gt),
        Cmp::Gte => compare_order(actual, value).is_some_and(Ordering::is_ge),

        Cmp::In => contained_in(actual, value).unwrap_or(false),

        // Handled by the Matches arm of the resolved tree.
        Cmp::Matches => false,
    }
}

///
/// QueryProgram
///
/// One query lowered for repeated evaluation: compiled filter plus the
/// original query value. Continuous subscriptions keep one of these for the
/// lifetime of the stream.
///

#[derive(Clone, Debug)]
pub struct QueryProgram<E: Entity> {
    query: Query<E>,
    filter: Option<FilterProgram>,
}

impl<E: Entity> QueryProgram<E> {
    pub fn compile(query: Query<E>) -> Result<Self, QueryError> {
        let filter = query.filter.as_ref().map(FilterProgram::compile).transpose()?;

        Ok(Self { query, filter })
    }

    #[must_use]
    pub const fn query(&self) -> &Query<E> {
        &self.query
    }

    /// Whether one entity belongs in this query's result set: id targeting
    /// plus filter. Extras are checked separately (`extras_satisfied`).
    #[must_use]
    pub fn matches(&self, entity: &E) -> bool {
        if let Some(ids) = self.query.target_ids() {
            let id = entity.identifier();
            if !ids.iter().any(|candidate| candidate.same_entity(&id)) {
                return false;
            }
        }

        self.filter.as_ref().is_none_or(|f| f.eval(entity))
    }

    /// Whether one entity holds every extra this query selects.
    #[must_use]
    pub fn extras_satisfied(&self, entity: &E) -> bool {
        self.query.extras.satisfied_by(entity)
    }

    /// Drop entities whose selected extras are unrequested.
    #[must_use]
    pub fn filter_extras(&self, entities: Vec<E>) -> Vec<E> {
        if self.query.extras.is_empty() {
            return entities;
        }
        entities
            .into_iter()
            .filter(|entity| self.extras_satisfied(entity))
            .collect()
    }

    /// Evaluate the query over a fetched set: restrict to targeted ids,
    /// filter, sort. Pagination and grouping happen at materialization so
    /// incremental re-evaluation can work on the full matched set.
    #[must_use]
    pub fn evaluate(&self, entities: Vec<E>) -> Vec<E> {
        let mut matched: Vec<E> = entities
            .into_iter()
            .filter(|entity| self.matches(entity))
            .collect();

        if let Some(sort) = &self.query.sort {
            sort_entities(&mut matched, sort);
        }

        matched
    }

    /// Page, group, and wrap a matched set into a result.
    #[must_use]
    pub fn materialize(&self, mut matched: Vec<E>, is_data_remote: bool) -> QueryResult<E> {
        if let Some(page) = self.query.page {
            apply_pagination(&mut matched, page);
        }

        let payload = match &self.query.group_key {
            Some(key) => Payload::Grouped(group_by_field(matched, key)),
            None => Payload::Entities(matched),
        };

        QueryResult::new(payload, is_data_remote)
    }
}

/// Multi-key sort. Missing values sort before present ones; incomparable
/// pairs fall through to the next key.
pub fn sort_entities<E: Entity>(rows: &mut [E], sort: &SortExpr) {
    rows.sort_by(|a, b| {
        for (key, direction) in sort.iter() {
            let ordering = match key {
                SortKey::Identifier => a
                    .identifier()
                    .order_key()
                    .cmp(&b.identifier().order_key()),
                SortKey::Field(field) => match (a.field(field), b.field(field)) {
                    (None, None) => continue,
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (Some(va), Some(vb)) => match compare_order(&va, &vb) {
                        Some(ord) => ord,
                        None => continue,
                    },
                },
            };

            let ordering = match direction {
                Order::Asc => ordering,
                Order::Desc => ordering.reverse(),
            };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    });
}

/// Group entities by a field value, keeping first-occurrence group order.
/// Entities missing the field land in a `Null` group.
#[must_use]
pub fn group_by_field<E: Entity>(entities: Vec<E>, field: &str) -> Vec<(Value, Vec<E>)> {
    let mut groups: Vec<(Value, Vec<E>)> = Vec::new();
    for entity in entities {
        let key = entity.field(field).unwrap_or(Value::Null);
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, members)) => members.push(entity),
            None => groups.push((key, vec![entity])),
        }
    }

    groups
}
