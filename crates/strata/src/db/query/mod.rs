mod eval;
mod result;


pub use eval::*;
pub use result::*;

use crate::{
    db::primitives::{ExtrasSet, FilterDsl, FilterExpr, Order, Page, SortExpr, SortKey},
    error::Error,
    traits::Entity,
    types::Identifier,
};
use thiserror::Error as ThisError;

///
/// QueryError
///

#[derive(Debug, ThisError)]
pub enum QueryError {
    #[error("invalid regex pattern '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("regex applied to non-text right-hand side")]
    RegexPatternNotText,
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Self::InvalidQuery(err.to_string())
    }
}

///
/// Query
///
/// Immutable query value: filter, sort keys, pagination, optional grouping
/// key, and the extras every returned entity must hold. Built fluently:
///
/// `Query::all().filter(|f| f.gte("stars", 10)).sort_asc("title").limit(5)`
///
/// Id-targeted queries (`one` / `many`) expose their id set so the read
/// pipeline can decide get-by-ids completeness.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Query<E: Entity> {
    pub filter: Option<FilterExpr>,
    pub sort: Option<SortExpr>,
    pub page: Option<Page>,
    pub group_key: Option<String>,
    pub extras: ExtrasSet<E::Extra>,
    target_ids: Option<Vec<Identifier>>,
}

impl<E: Entity> Query<E> {
    // ─────────────────────────────────────────────
    // CONSTRUCTORS
    // ─────────────────────────────────────────────

    /// Read all rows.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            filter: None,
            sort: None,
            page: None,
            group_key: None,
            extras: ExtrasSet::none(),
            target_ids: None,
        }
    }

    /// Target a single identifier.
    #[must_use]
    pub fn one(id: Identifier) -> Self {
        Self::many(vec![id])
    }

    /// Target a set of identifiers.
    #[must_use]
    pub fn many(ids: Vec<Identifier>) -> Self {
        let mut query = Self::all();
        query.target_ids = Some(ids);
        query
    }

    // ─────────────────────────────────────────────
    // BUILDERS
    // ─────────────────────────────────────────────

    #[must_use]
    pub fn filter(mut self, f: impl FnOnce(FilterDsl) -> FilterExpr) -> Self {
        let expr = f(FilterDsl);
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    #[must_use]
    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort = Some(self.sort.take().unwrap_or_default().then_asc(field));
        self
    }

    #[must_use]
    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort = Some(self.sort.take().unwrap_or_default().then_desc(field));
        self
    }

    #[must_use]
    pub fn sort_by_identifier(mut self, order: Order) -> Self {
        let mut sort = self.sort.take().unwrap_or_default();
        sort.push((SortKey::Identifier, order));
        self.sort = Some(sort);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u32) -> Self {
        let mut page = self.page.take().unwrap_or_default();
        page.offset = offset;
        self.page = Some(page);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        let mut page = self.page.take().unwrap_or_default();
        page.limit = Some(limit);
        self.page = Some(page);
        self
    }

    #[must_use]
    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_key = Some(field.into());
        self
    }

    #[must_use]
    pub fn with_extras(mut self, extras: impl IntoIterator<Item = E::Extra>) -> Self {
        self.extras = ExtrasSet::of(extras);
        self
    }

    // ─────────────────────────────────────────────
    // INTROSPECTION
    // ─────────────────────────────────────────────

    /// The targeted id set, when this is a get-by-ids query.
    #[must_use]
    pub fn target_ids(&self) -> Option<&[Identifier]> {
        self.target_ids.as_deref()
    }

    #[must_use]
    pub const fn is_id_targeted(&self) -> bool {
        self.target_ids.is_some()
    }
}

impl<E: Entity> Default for Query<E> {
    fn default() -> Self {
        Self::all()
    }
}
