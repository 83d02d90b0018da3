use crate::{traits::Entity, value::Value};

///
/// Payload
///
/// The materialized shape of a query result: an ordered sequence or a
/// grouped mapping (groups keep first-occurrence order).
///

#[derive(Clone, Debug, PartialEq)]
pub enum Payload<E: Entity> {
    Entities(Vec<E>),
    Grouped(Vec<(Value, Vec<E>)>),
}

///
/// QueryResult
///
/// Materialized query result plus the `is_data_remote` bit propagated from
/// the originating response source. Payload equality (ignoring the remote
/// bit) drives change-only emission on continuous streams.
///

#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult<E: Entity> {
    payload: Payload<E>,
    is_data_remote: bool,
}

impl<E: Entity> QueryResult<E> {
    #[must_use]
    pub const fn new(payload: Payload<E>, is_data_remote: bool) -> Self {
        Self {
            payload,
            is_data_remote,
        }
    }

    #[must_use]
    pub const fn from_entities(entities: Vec<E>, is_data_remote: bool) -> Self {
        Self::new(Payload::Entities(entities), is_data_remote)
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self::from_entities(Vec::new(), false)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    #[must_use]
    pub const fn is_data_remote(&self) -> bool {
        self.is_data_remote
    }

    #[must_use]
    pub const fn payload(&self) -> &Payload<E> {
        &self.payload
    }

    #[must_use]
    pub fn count(&self) -> usize {
        match &self.payload {
            Payload::Entities(entities) => entities.len(),
            Payload::Grouped(groups) => groups.iter().map(|(_, members)| members.len()).sum(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Payload equality, ignoring the remote bit. Continuous streams emit
    /// only when this differs from the last emitted value.
    #[must_use]
    pub fn same_payload(&self, other: &Self) -> bool {
        self.payload == other.payload
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// The single entity of a one-row sequence result.
    #[must_use]
    pub fn entity(&self) -> Option<&E> {
        match &self.payload {
            Payload::Entities(entities) => entities.first(),
            Payload::Grouped(_) => None,
        }
    }

    /// Borrow all entities in result order (grouped results flatten in
    /// group order).
    #[must_use]
    pub fn entities(&self) -> Vec<&E> {
        match &self.payload {
            Payload::Entities(entities) => entities.iter().collect(),
            Payload::Grouped(groups) => groups
                .iter()
                .flat_map(|(_, members)| members.iter())
                .collect(),
        }
    }

    /// Consume and return all entities in result order.
    #[must_use]
    pub fn into_entities(self) -> Vec<E> {
        match self.payload {
            Payload::Entities(entities) => entities,
            Payload::Grouped(groups) => groups
                .into_iter()
                .flat_map(|(_, members)| members)
                .collect(),
        }
    }

    /// Borrow the grouped mapping, when this result is grouped.
    #[must_use]
    pub fn groups(&self) -> Option<&[(Value, Vec<E>)]> {
        match &self.payload {
            Payload::Entities(_) => None,
            Payload::Grouped(groups) => Some(groups),
        }
    }

    #[must_use]
    pub fn with_remote(mut self, is_data_remote: bool) -> Self {
        self.is_data_remote = is_data_remote;
        self
    }
}
