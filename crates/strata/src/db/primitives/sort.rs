use derive_more::{Deref, DerefMut};
use serde::{Deserialize, Serialize};

///
/// Order
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

///
/// SortKey
///
/// Results sort by the entity identifier or by an indexed field.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SortKey {
    Identifier,
    Field(String),
}

///
/// SortExpr
///
/// Ordered list of sort keys; earlier keys dominate.
///

#[derive(Clone, Debug, Default, Deref, DerefMut, Deserialize, Eq, PartialEq, Serialize)]
pub struct SortExpr(Vec<(SortKey, Order)>);

impl SortExpr {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self::new().then_asc(field)
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self::new().then_desc(field)
    }

    #[must_use]
    pub fn by_identifier(order: Order) -> Self {
        Self(vec![(SortKey::Identifier, order)])
    }

    #[must_use]
    pub fn then_asc(mut self, field: impl Into<String>) -> Self {
        self.0.push((SortKey::Field(field.into()), Order::Asc));
        self
    }

    #[must_use]
    pub fn then_desc(mut self, field: impl Into<String>) -> Self {
        self.0.push((SortKey::Field(field.into()), Order::Desc));
        self
    }
}
