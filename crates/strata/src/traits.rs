//! Entity contracts. Concrete entity types are normally emitted by a code
//! generator from declarative definitions; that generator is out of scope
//! here, so consumers (and this crate's tests) implement these by hand.

use crate::{types::Identifier, value::Value};
use std::fmt::Debug;

///
/// Entity
///
/// A domain object with a typed identifier, scalar indexed fields, optional
/// lazily-loaded "extras" fields, and relationship fields resolved through
/// the entity's [`EntityUnion`].
///

pub trait Entity:
    Clone + Debug + PartialEq + Into<Self::Union> + Send + Sync + Sized + 'static
{
    /// The entity's own enumeration of extras fields.
    type Extra: Copy + Ord + Debug + Send + Sync + 'static;

    /// The closed any-entity universe this entity belongs to.
    type Union: EntityUnion;

    /// Stable type tag.
    const PATH: &'static str;

    /// This entity type's tag within the union.
    fn kind() -> <Self::Union as EntityUnion>::Kind;

    fn identifier(&self) -> Identifier;

    /// Adopt a fused identifier learned during identity resolution.
    fn adopt_identifier(&mut self, id: Identifier);

    /// Read one indexed field for filter/order evaluation. `None` means the
    /// field does not exist on this entity type.
    fn field(&self, name: &str) -> Option<Value>;

    /// Whether the given extras field has been requested (holds a value).
    fn extra_requested(&self, extra: Self::Extra) -> bool;

    /// Carry over extras that `local` holds but `self` was fetched without.
    /// A payload that never asked for an extra must not erase one already
    /// held (`persist(retain_extra_local_data)` semantics).
    fn retain_extras_from(&mut self, local: &Self);
}

///
/// EntityUnion
///
/// The consumer-defined tagged variant over the closed set of entity types
/// known at build time. The relationship controller traverses and assembles
/// graphs in terms of this union.
///

pub trait EntityUnion: Clone + Debug + PartialEq + Send + Sync + Sized + 'static {
    /// Tag enum distinguishing member entity types.
    type Kind: Copy + Eq + Ord + std::hash::Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;

    fn identifier(&self) -> Identifier;

    fn adopt_identifier(&mut self, id: Identifier);

    /// Enumerate this entity's relationship fields and their target ids.
    fn relationships(&self) -> Vec<RelationRef<Self::Kind>>;

    /// Merge a newer payload for the same entity into `self`: last writer
    /// wins on field collision, but an unrequested extra never overwrites a
    /// requested one.
    fn merge_from(&mut self, newer: Self);
}

///
/// RelationRef
///
/// One relationship field of an entity: the field name, the target entity
/// kind, and the foreign identifiers it holds (one or many).
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelationRef<K> {
    pub field: &'static str,
    pub target: K,
    pub ids: Vec<Identifier>,
}

impl<K> RelationRef<K> {
    #[must_use]
    pub const fn new(field: &'static str, target: K, ids: Vec<Identifier>) -> Self {
        Self { field, target, ids }
    }
}

///
/// NoExtras
///
/// Extras enumeration for entity types that declare none.
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum NoExtras {}
