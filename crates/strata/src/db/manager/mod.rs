mod publisher;

#[cfg(test)]
mod tests;

pub use publisher::*;

use crate::{
    db::{
        context::{DataSource, ExtraLocalData, PersistenceStrategy, ReadContext, WriteContext},
        query::{Query, QueryProgram, QueryResult, sort_entities},
        store::{Stack, StackError, StoreRead},
    },
    error::Error,
    traits::Entity,
    types::Identifier,
};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

const EVENT_TOPIC_CAPACITY: usize = 256;
const SUBSCRIPTION_BUFFER: usize = 16;

///
/// CoreManager
///
/// Public entity API for one entity type: `get`/`search` reads routed
/// through the store stack per the read context's data source, and
/// `set`/`remove`/`remove_all` writes routed per the write context's data
/// target. Mutations are serialized on the manager's operation lock and
/// published, in commit order, to the continuous-subscription topic.
///

pub struct CoreManager<E: Entity> {
    shared: Arc<ManagerShared<E>>,
}

impl<E: Entity> Clone for CoreManager<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct ManagerShared<E: Entity> {
    stack: Stack<E>,
    topic: broadcast::Sender<MutationEvent<E>>,
    write_lock: Mutex<()>,
}

impl<E: Entity> CoreManager<E> {
    #[must_use]
    pub fn new(stack: Stack<E>) -> Self {
        let (topic, _) = broadcast::channel(EVENT_TOPIC_CAPACITY);

        Self {
            shared: Arc::new(ManagerShared {
                stack,
                topic,
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Subscribe to committed mutations for this entity type.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<MutationEvent<E>> {
        self.shared.topic.subscribe()
    }

    // ─────────────────────────────────────────────
    // READS
    // ─────────────────────────────────────────────

    /// Run a search, returning the `(once, continuous)` subscription pair.
    #[must_use]
    pub fn search(&self, query: Query<E>, ctx: &ReadContext<E::Union>) -> SearchResponse<E> {
        let (mut emitter, response) = Emitter::channel(SUBSCRIPTION_BUFFER);

        match QueryProgram::compile(query) {
            Ok(program) => {
                let shared = self.shared.clone();
                let ctx = ctx.clone();
                let events = shared.topic.subscribe();
                tokio::spawn(run_subscription(shared, program, ctx, emitter, events));
            }
            Err(err) => {
                tokio::spawn(async move { emitter.fail(err.into()).await });
            }
        }

        response
    }

    /// Fetch one entity by identifier, requiring the given extras.
    #[must_use]
    pub fn get(
        &self,
        id: &Identifier,
        extras: impl IntoIterator<Item = E::Extra>,
        ctx: &ReadContext<E::Union>,
    ) -> SearchResponse<E> {
        self.search(Query::one(*id).with_extras(extras), ctx)
    }

    /// Fetch a batch of entities by identifier, awaiting the authoritative
    /// result. This is the default relationship-fetch entry point; it
    /// requests no extras.
    pub async fn get_by_ids(
        &self,
        ids: Vec<Identifier>,
        ctx: &ReadContext<E::Union>,
    ) -> Result<QueryResult<E>, Error> {
        self.search(Query::many(ids), ctx).result().await
    }

    // ─────────────────────────────────────────────
    // WRITES
    // ─────────────────────────────────────────────

    /// Write entities through the selected stores. Returns the entities as
    /// stored; a remote store may have assigned identifiers, which are
    /// fused into the local index before the call returns.
    pub async fn set(&self, entities: Vec<E>, ctx: &WriteContext) -> Result<Vec<E>, Error> {
        let _guard = self.shared.write_lock.lock().await;

        let mut current = entities;
        if ctx.data_target.includes_remote() {
            let remote = self
                .shared
                .stack
                .remote()
                .ok_or_else(|| Error::internal("write targets remote but stack has none"))?;
            current = remote.set(current).await?;
        }

        if ctx.data_target.includes_local() {
            let locals = self.shared.stack.local_stores();
            if locals.is_empty() {
                return Err(StackError::NoLocalStore.into());
            }
            let mut primary = None;
            for store in locals {
                let stored = store.set(current.clone()).await?;
                primary.get_or_insert(stored);
            }
            if let Some(stored) = primary {
                current = stored;
            }
        }

        let _ = self
            .shared
            .topic
            .send(MutationEvent::Upserted(current.clone()));

        Ok(current)
    }

    /// Remove entities by identifier through the selected stores, returning
    /// the identifiers actually removed.
    pub async fn remove(
        &self,
        ids: &[Identifier],
        ctx: &WriteContext,
    ) -> Result<Vec<Identifier>, Error> {
        let _guard = self.shared.write_lock.lock().await;

        let mut removed: Vec<Identifier> = Vec::new();
        if ctx.data_target.includes_remote() {
            let remote = self
                .shared
                .stack
                .remote()
                .ok_or_else(|| Error::internal("write targets remote but stack has none"))?;
            merge_ids(&mut removed, remote.remove(ids).await?);
        }
        if ctx.data_target.includes_local() {
            for store in self.shared.stack.local_stores() {
                merge_ids(&mut removed, store.remove(ids).await?);
            }
        }

        if !removed.is_empty() {
            let _ = self
                .shared
                .topic
                .send(MutationEvent::Removed(removed.clone()));
        }

        Ok(removed)
    }

    /// Remove everything matching the query through the selected stores.
    pub async fn remove_all(
        &self,
        query: Query<E>,
        ctx: &WriteContext,
    ) -> Result<Vec<Identifier>, Error> {
        let _guard = self.shared.write_lock.lock().await;

        let mut removed: Vec<Identifier> = Vec::new();
        if ctx.data_target.includes_remote() {
            let remote = self
                .shared
                .stack
                .remote()
                .ok_or_else(|| Error::internal("write targets remote but stack has none"))?;
            merge_ids(&mut removed, remote.remove_all(&query).await?);
        }
        if ctx.data_target.includes_local() {
            for store in self.shared.stack.local_stores() {
                merge_ids(&mut removed, store.remove_all(&query).await?);
            }
        }

        if !removed.is_empty() {
            let _ = self
                .shared
                .topic
                .send(MutationEvent::Removed(removed.clone()));
        }

        Ok(removed)
    }
}

// Merge identifiers, deduplicating by entity identity.
fn merge_ids(into: &mut Vec<Identifier>, ids: Vec<Identifier>) {
    for id in ids {
        if !into.iter().any(|existing| existing.same_entity(&id)) {
            into.push(id);
        }
    }
}

// ======================================================================
// Subscription pipeline
// ======================================================================

async fn run_subscription<E: Entity>(
    shared: Arc<ManagerShared<E>>,
    program: QueryProgram<E>,
    ctx: ReadContext<E::Union>,
    mut emitter: Emitter<E>,
    events: broadcast::Receiver<MutationEvent<E>>,
) {
    let Some(matched) = resolve_initial(&shared, &program, &ctx, &mut emitter).await else {
        return;
    };

    follow_mutations(&program, &ctx, &mut emitter, events, matched).await;
}

/// Resolve the initial result per the data-source matrix. Returns the
/// authoritative matched set (unpaginated) for the continuous phase, or
/// `None` after a terminal failure or cancellation.
async fn resolve_initial<E: Entity>(
    shared: &Arc<ManagerShared<E>>,
    program: &QueryProgram<E>,
    ctx: &ReadContext<E::Union>,
    emitter: &mut Emitter<E>,
) -> Option<Vec<E>> {
    debug!(data_source = ?ctx.data_source, entity = E::PATH, "resolving read");

    match ctx.data_source {
        DataSource::Local => resolve_local(shared, program, ctx, emitter).await,
        DataSource::Remote { or_local } => {
            resolve_remote(shared, program, ctx, emitter, or_local).await
        }
        DataSource::LocalOr => resolve_local_or(shared, program, ctx, emitter).await,
        DataSource::LocalThen => resolve_local_then(shared, program, ctx, emitter).await,
    }
}

async fn resolve_local<E: Entity>(
    shared: &Arc<ManagerShared<E>>,
    program: &QueryProgram<E>,
    ctx: &ReadContext<E::Union>,
    emitter: &mut Emitter<E>,
) -> Option<Vec<E>> {
    match fetch_local(shared, program, ctx).await {
        Ok(entities) => {
            let matched = apply_contract(ctx, program.filter_extras(entities));
            emitter
                .emit_authoritative(program.materialize(matched.clone(), false))
                .await;
            Some(matched)
        }
        Err(err) => {
            emitter.fail(err).await;
            None
        }
    }
}

async fn resolve_remote<E: Entity>(
    shared: &Arc<ManagerShared<E>>,
    program: &QueryProgram<E>,
    ctx: &ReadContext<E::Union>,
    emitter: &mut Emitter<E>,
    or_local: bool,
) -> Option<Vec<E>> {
    match fetch_remote(shared, program, ctx, emitter).await? {
        Ok(read) => {
            let is_remote = read.source.is_some();
            ctx.record_source(read.source);
            let persisted = persist_remote(shared, ctx, read.value).await;
            let prepared = prepare_remote(program, ctx, persisted);
            let kept = apply_contract(ctx, program.filter_extras(prepared.clone()));

            if or_local && kept.len() < prepared.len() {
                debug!(
                    entity = E::PATH,
                    "remote result failed extras filtering; falling back to local"
                );
                return resolve_local(shared, program, ctx, emitter).await;
            }

            emitter
                .emit_authoritative(program.materialize(kept.clone(), is_remote))
                .await;
            Some(kept)
        }
        Err(err) if or_local => {
            debug!(entity = E::PATH, %err, "remote read failed; downgrading to local");
            resolve_local(shared, program, ctx, emitter).await
        }
        Err(err) => {
            emitter.fail(err).await;
            None
        }
    }
}

async fn resolve_local_or<E: Entity>(
    shared: &Arc<ManagerShared<E>>,
    program: &QueryProgram<E>,
    ctx: &ReadContext<E::Union>,
    emitter: &mut Emitter<E>,
) -> Option<Vec<E>> {
    let local = match fetch_local(shared, program, ctx).await {
        Ok(entities) => Some(entities),
        Err(err) => {
            // Local errors downgrade to remote.
            debug!(entity = E::PATH, %err, "local read failed; consulting remote");
            None
        }
    };

    if let Some(entities) = &local {
        if local_result_is_complete(program, entities) {
            let matched = apply_contract(ctx, program.filter_extras(entities.clone()));
            emitter
                .emit_authoritative(program.materialize(matched.clone(), false))
                .await;
            return Some(matched);
        }
    }

    if !shared.stack.has_remote() {
        // Nothing to blend with; the (possibly partial) local result stands.
        let matched = apply_contract(ctx, program.filter_extras(local.unwrap_or_default()));
        emitter
            .emit_authoritative(program.materialize(matched.clone(), false))
            .await;
        return Some(matched);
    }

    match fetch_remote(shared, program, ctx, emitter).await? {
        Ok(read) => {
            let is_remote = read.source.is_some();
            ctx.record_source(read.source);
            let persisted = persist_remote(shared, ctx, read.value).await;
            let prepared = prepare_remote(program, ctx, persisted);
            let kept = apply_contract(ctx, program.filter_extras(prepared));
            emitter
                .emit_authoritative(program.materialize(kept.clone(), is_remote))
                .await;
            Some(kept)
        }
        Err(err) => {
            // Local was incomplete and remote failed; the remote error surfaces.
            emitter.fail(err).await;
            None
        }
    }
}

async fn resolve_local_then<E: Entity>(
    shared: &Arc<ManagerShared<E>>,
    program: &QueryProgram<E>,
    ctx: &ReadContext<E::Union>,
    emitter: &mut Emitter<E>,
) -> Option<Vec<E>> {
    match fetch_local(shared, program, ctx).await {
        Ok(entities) => {
            let matched = apply_contract(ctx, program.filter_extras(entities));
            emitter
                .emit_intermediate(program.materialize(matched, false))
                .await;
        }
        Err(err) => {
            // Local errors suppress the first emission without failing the stream.
            debug!(entity = E::PATH, %err, "local read failed; suppressing first emission");
        }
    }

    if !shared.stack.has_remote() {
        // No remote half: promote the local emission to authoritative.
        let matched = emitter.last().map(|last| {
            last.entities().into_iter().cloned().collect::<Vec<_>>()
        });
        let matched = matched.unwrap_or_default();
        emitter
            .emit_authoritative(program.materialize(matched.clone(), false))
            .await;
        return Some(matched);
    }

    match fetch_remote(shared, program, ctx, emitter).await? {
        Ok(read) => {
            let is_remote = read.source.is_some();
            ctx.record_source(read.source);
            let persisted = persist_remote(shared, ctx, read.value).await;
            let prepared = prepare_remote(program, ctx, persisted);
            let kept = apply_contract(ctx, program.filter_extras(prepared));
            emitter
                .emit_authoritative(program.materialize(kept.clone(), is_remote))
                .await;
            Some(kept)
        }
        Err(err) => {
            // Remote errors surface after the local emission.
            emitter.fail(err).await;
            None
        }
    }
}

// ----------------------------------------------------------------------
// Fetch helpers
// ----------------------------------------------------------------------

async fn fetch_local<E: Entity>(
    shared: &Arc<ManagerShared<E>>,
    program: &QueryProgram<E>,
    ctx: &ReadContext<E::Union>,
) -> Result<Vec<E>, Error> {
    let store = shared.stack.local().ok_or(StackError::NoLocalStore)?;

    // Local stores receive the query unpaginated: the subscription keeps the
    // full matched set so later page-aware re-evaluation stays correct.
    let mut query = program.query().clone();
    query.page = None;

    Ok(store.search(&query, ctx).await?.value)
}

/// Remote fetch, cancellable: resolves to `None` when every subscriber has
/// gone away while the request was in flight.
async fn fetch_remote<E: Entity>(
    shared: &Arc<ManagerShared<E>>,
    program: &QueryProgram<E>,
    ctx: &ReadContext<E::Union>,
    emitter: &mut Emitter<E>,
) -> Option<Result<StoreRead<Vec<E>>, Error>> {
    let Some(store) = shared.stack.remote() else {
        return Some(Err(Error::internal("data source requires a remote store")));
    };

    tokio::select! {
        read = store.search(program.query(), ctx) => Some(read),
        () = emitter.abandoned() => {
            debug!(entity = E::PATH, "subscription dropped; cancelling remote fetch");
            None
        }
    }
}

/// Re-evaluate a remote payload locally unless the context trusts remote
/// filtering, in which case the payload is authoritative as returned.
fn prepare_remote<E: Entity>(
    program: &QueryProgram<E>,
    ctx: &ReadContext<E::Union>,
    fetched: Vec<E>,
) -> Vec<E> {
    if ctx.trust_remote_filtering {
        fetched
    } else {
        program.evaluate(fetched)
    }
}

/// Completeness of a local result. Only id-targeted queries can be complete:
/// every requested id resolved and every selected extra requested on every
/// returned entity. A free-form filter query never claims completeness here.
fn local_result_is_complete<E: Entity>(program: &QueryProgram<E>, entities: &[E]) -> bool {
    let Some(ids) = program.query().target_ids() else {
        return false;
    };

    let all_present = ids.iter().all(|id| {
        entities
            .iter()
            .any(|entity| entity.identifier().same_entity(id))
    });

    all_present
        && entities
            .iter()
            .all(|entity| program.extras_satisfied(entity))
}

/// Write a remote payload back into the local stores per the persistence
/// strategy, returning the entities as merged. Persistence failures are
/// logged and never fail the read.
async fn persist_remote<E: Entity>(
    shared: &Arc<ManagerShared<E>>,
    ctx: &ReadContext<E::Union>,
    fetched: Vec<E>,
) -> Vec<E> {
    let PersistenceStrategy::Persist(policy) = ctx.persistence else {
        return fetched;
    };
    let locals = shared.stack.local_stores();
    if locals.is_empty() || fetched.is_empty() {
        return fetched;
    }

    // Serialize with external mutations so topic order matches commit order.
    let _guard = shared.write_lock.lock().await;

    let mut merged = fetched;
    if policy == ExtraLocalData::Retain {
        if let Some(local) = shared.stack.local() {
            let ids: Vec<Identifier> = merged.iter().map(Entity::identifier).collect();
            match local.search(&Query::many(ids), ctx).await {
                Ok(read) => {
                    for entity in &mut merged {
                        let id = entity.identifier();
                        if let Some(existing) = read
                            .value
                            .iter()
                            .find(|held| held.identifier().same_entity(&id))
                        {
                            entity.retain_extras_from(existing);
                        }
                    }
                }
                Err(err) => {
                    warn!(entity = E::PATH, %err, "could not read local copies for extras retention");
                }
            }
        }
    }

    let mut committed = false;
    for store in shared.stack.local_stores() {
        match store.set(merged.clone()).await {
            Ok(stored) => {
                if !committed {
                    merged = stored;
                    committed = true;
                }
            }
            Err(err) => {
                warn!(entity = E::PATH, level = %store.level(), %err, "persisting remote result failed");
            }
        }
    }

    if committed {
        let _ = shared
            .topic
            .send(MutationEvent::Upserted(merged.clone()));
    }

    merged
}

/// Drop entities the context's contract marks invalid.
fn apply_contract<E: Entity>(ctx: &ReadContext<E::Union>, entities: Vec<E>) -> Vec<E> {
    let Some(contract) = &ctx.contract else {
        return entities;
    };
    if !contract.should_validate(E::kind()) {
        return entities;
    }

    entities
        .into_iter()
        .filter(|entity| contract.is_entity_valid(&entity.clone().into()))
        .collect()
}

// ----------------------------------------------------------------------
// Continuous phase
// ----------------------------------------------------------------------

/// Track committed mutations against the query, emitting a new result only
/// when the evaluated payload changes.
async fn follow_mutations<E: Entity>(
    program: &QueryProgram<E>,
    ctx: &ReadContext<E::Union>,
    emitter: &mut Emitter<E>,
    mut events: broadcast::Receiver<MutationEvent<E>>,
    mut matched: Vec<E>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if apply_event(program, ctx, &mut matched, event) {
                        if let Some(sort) = &program.query().sort {
                            sort_entities(&mut matched, sort);
                        }
                        emitter
                            .emit_intermediate(program.materialize(matched.clone(), false))
                            .await;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(entity = E::PATH, skipped, "continuous subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            () = emitter.abandoned() => return,
        }
        if !emitter.has_consumers() {
            return;
        }
    }
}

// Apply one committed mutation to the matched set. Returns whether the set
// may have changed.
fn apply_event<E: Entity>(
    program: &QueryProgram<E>,
    ctx: &ReadContext<E::Union>,
    matched: &mut Vec<E>,
    event: MutationEvent<E>,
) -> bool {
    let mut changed = false;
    match event {
        MutationEvent::Upserted(entities) => {
            for entity in entities {
                let id = entity.identifier();
                let position = matched
                    .iter()
                    .position(|held| held.identifier().same_entity(&id));
                let keep = program.matches(&entity)
                    && program.extras_satisfied(&entity)
                    && apply_contract(ctx, vec![entity.clone()]).len() == 1;

                match (position, keep) {
                    (Some(index), true) => {
                        matched[index] = entity;
                        changed = true;
                    }
                    (Some(index), false) => {
                        matched.remove(index);
                        changed = true;
                    }
                    (None, true) => {
                        matched.push(entity);
                        changed = true;
                    }
                    (None, false) => {}
                }
            }
        }
        MutationEvent::Removed(ids) => {
            let before = matched.len();
            matched.retain(|held| {
                let id = held.identifier();
                !ids.iter().any(|removed| removed.same_entity(&id))
            });
            changed = matched.len() != before;
        }
    }

    changed
}
