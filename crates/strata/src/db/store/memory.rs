use crate::{
    db::{
        context::ReadContext,
        primitives::apply_pagination,
        query::{Query, QueryProgram},
        store::{Store, StoreLevel, StoreRead},
    },
    error::Error,
    traits::Entity,
    types::{Identifier, IdentityMap},
};
use async_trait::async_trait;
use tokio::sync::RwLock;

///
/// MemoryStore
///
/// Memory-level store over the dual-keyed identity index. Writes fuse
/// identifiers in place, so a lookup by either the local or the remote
/// component keeps resolving to the same entity after a server response
/// assigns a remote id.
///

#[derive(Debug, Default)]
pub struct MemoryStore<E: Entity> {
    rows: RwLock<IdentityMap<E>>,
}

impl<E: Entity> MemoryStore<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(IdentityMap::new()),
        }
    }

    /// Number of entities currently held.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl<E: Entity> Store<E> for MemoryStore<E> {
    fn level(&self) -> StoreLevel {
        StoreLevel::Memory
    }

    async fn get(
        &self,
        id: &Identifier,
        _ctx: &ReadContext<E::Union>,
    ) -> Result<StoreRead<Option<E>>, Error> {
        let rows = self.rows.read().await;

        Ok(StoreRead::local(rows.get(id).cloned()))
    }

    async fn search(
        &self,
        query: &Query<E>,
        _ctx: &ReadContext<E::Union>,
    ) -> Result<StoreRead<Vec<E>>, Error> {
        let program = QueryProgram::compile(query.clone())?;
        let rows = self.rows.read().await;

        let mut matched = program.evaluate(rows.values().cloned().collect());
        if let Some(page) = query.page {
            apply_pagination(&mut matched, page);
        }

        Ok(StoreRead::local(matched))
    }

    async fn set(&self, entities: Vec<E>) -> Result<Vec<E>, Error> {
        let mut rows = self.rows.write().await;

        let mut stored = Vec::with_capacity(entities.len());
        for entity in entities {
            let id = entity.identifier();
            rows.upsert(id, entity, |_existing, incoming| incoming);

            // Hand back the entity as stored, carrying the fused identifier.
            let canonical = rows.canonical(&id).unwrap_or(id);
            let mut entity = rows
                .get(&canonical)
                .cloned()
                .expect("entity inserted above");
            entity.adopt_identifier(canonical);
            stored.push(entity);
        }

        Ok(stored)
    }

    async fn remove(&self, ids: &[Identifier]) -> Result<Vec<Identifier>, Error> {
        let mut rows = self.rows.write().await;

        Ok(ids
            .iter()
            .filter_map(|id| rows.remove(id).map(|(canonical, _)| canonical))
            .collect())
    }

    async fn remove_all(&self, query: &Query<E>) -> Result<Vec<Identifier>, Error> {
        let program = QueryProgram::compile(query.clone())?;
        let mut rows = self.rows.write().await;

        let matched: Vec<Identifier> = rows
            .iter()
            .filter(|(_, entity)| program.matches(entity))
            .map(|(id, _)| *id)
            .collect();

        Ok(matched
            .iter()
            .filter_map(|id| rows.remove(id).map(|(canonical, _)| canonical))
            .collect())
    }
}
