use crate::traits::Entity;
use derive_more::Deref;
use std::collections::BTreeSet;

///
/// ExtrasSet
///
/// The set of extras fields a query requires to be present on every entity
/// it returns. Typed per entity: `X` is the entity's own `Extra` enum.
///

#[derive(Clone, Debug, Deref, Eq, PartialEq)]
pub struct ExtrasSet<X: Ord>(BTreeSet<X>);

impl<X: Copy + Ord> ExtrasSet<X> {
    /// The empty selection: no extras required.
    #[must_use]
    pub const fn none() -> Self {
        Self(BTreeSet::new())
    }

    #[must_use]
    pub fn of(extras: impl IntoIterator<Item = X>) -> Self {
        Self(extras.into_iter().collect())
    }

    /// Whether `entity` holds every selected extra in requested state.
    /// Filtering on this is a pure function of the entity and the set.
    #[must_use]
    pub fn satisfied_by<E>(&self, entity: &E) -> bool
    where
        E: Entity<Extra = X>,
    {
        self.0.iter().all(|extra| entity.extra_requested(*extra))
    }
}

impl<X: Copy + Ord> Default for ExtrasSet<X> {
    fn default() -> Self {
        Self::none()
    }
}

impl<X: Copy + Ord> FromIterator<X> for ExtrasSet<X> {
    fn from_iter<I: IntoIterator<Item = X>>(iter: I) -> Self {
        Self::of(iter)
    }
}
