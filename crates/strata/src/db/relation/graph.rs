use crate::{
    traits::{Entity, EntityUnion},
    types::{Identifier, IdentityMap},
};
use std::collections::HashMap;

///
/// EntityGraph
///
/// Typed, heterogeneous assembly of entities and their resolved
/// relationships: one identifier-keyed mapping per entity kind, plus an
/// `is_data_remote` bit covering every fetch that fed the graph.
///
/// Single-owner while the controller builds it; value-typed once emitted.
///

#[derive(Clone, Debug)]
pub struct EntityGraph<A: EntityUnion> {
    entries: HashMap<A::Kind, IdentityMap<A>>,
    is_data_remote: bool,
}

impl<A: EntityUnion> EntityGraph<A> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            is_data_remote: false,
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    #[must_use]
    pub const fn is_data_remote(&self) -> bool {
        self.is_data_remote
    }

    pub(crate) const fn set_data_remote(&mut self, is_data_remote: bool) {
        self.is_data_remote = is_data_remote;
    }

    /// Total entity count across kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(IdentityMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, kind: A::Kind, id: &Identifier) -> bool {
        self.entries
            .get(&kind)
            .is_some_and(|entities| entities.contains(id))
    }

    /// Graph equality up to the remote bit. Drives change-only emission on
    /// continuous graph streams.
    #[must_use]
    pub fn same_entities(&self, other: &Self) -> bool {
        self.entries == other.entries
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Borrow an entity through the union, by kind and identifier.
    #[must_use]
    pub fn get_any(&self, kind: A::Kind, id: &Identifier) -> Option<&A> {
        self.entries.get(&kind)?.get(id)
    }

    /// Fetch one entity as its concrete type.
    #[must_use]
    pub fn get<E>(&self, id: &Identifier) -> Option<E>
    where
        E: Entity<Union = A> + TryFrom<A>,
    {
        self.get_any(E::kind(), id)
            .and_then(|any| any.clone().try_into().ok())
    }

    /// All entities of one kind, in insertion order.
    pub fn of_kind(&self, kind: A::Kind) -> impl Iterator<Item = &A> {
        self.entries.get(&kind).into_iter().flat_map(IdentityMap::values)
    }

    /// All entities of one concrete type, in insertion order.
    #[must_use]
    pub fn all_of<E>(&self) -> Vec<E>
    where
        E: Entity<Union = A> + TryFrom<A>,
    {
        self.of_kind(E::kind())
            .filter_map(|any| any.clone().try_into().ok())
            .collect()
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Insert an entity, merging with any payload already held for the same
    /// identity: last writer wins per field, but an unrequested extra never
    /// overwrites a requested one. Returns whether the identity was new.
    pub fn insert(&mut self, entity: A) -> bool {
        let kind = entity.kind();
        let id = entity.identifier();
        let entities = self.entries.entry(kind).or_default();

        let created = entities.upsert(id, entity, |mut existing, incoming| {
            existing.merge_from(incoming);
            existing
        });

        // Keep the stored payload's identifier fused with the index.
        if let Some(canonical) = entities.canonical(&id) {
            if let Some(held) = entities.get_mut(&canonical) {
                held.adopt_identifier(canonical);
            }
        }

        created
    }
}

impl<A: EntityUnion> Default for EntityGraph<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: EntityUnion> PartialEq for EntityGraph<A> {
    fn eq(&self, other: &Self) -> bool {
        self.is_data_remote == other.is_data_remote && self.same_entities(other)
    }
}
