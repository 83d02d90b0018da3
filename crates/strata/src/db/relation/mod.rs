mod graph;
mod plan;

#[cfg(test)]
mod tests;

pub use graph::*;
pub use plan::*;

use crate::{
    db::{context::ReadContext, manager::SearchResponse},
    error::Error,
    traits::{Entity, EntityUnion},
    types::{Identifier, IdentityMap},
};
use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const GRAPH_BUFFER: usize = 16;

///
/// RelationSource
///
/// The dispatch seam between the controller and per-type core managers: the
/// consumer routes a `(kind, ids)` batch to the right manager and wraps the
/// results into the union.
///

#[async_trait]
pub trait RelationSource<A: EntityUnion>: Send + Sync {
    async fn get_by_ids(
        &self,
        kind: A::Kind,
        ids: Vec<Identifier>,
        ctx: &ReadContext<A>,
    ) -> Result<Vec<A>, Error>;
}

///
/// GraphOnce
///

#[derive(Debug)]
pub struct GraphOnce<A: EntityUnion> {
    rx: oneshot::Receiver<Result<EntityGraph<A>, Error>>,
}

impl<A: EntityUnion> GraphOnce<A> {
    /// Await the first fully assembled graph.
    pub async fn result(self) -> Result<EntityGraph<A>, Error> {
        self.rx.await.map_err(|_| Error::Cancelled)?
    }
}

///
/// GraphContinuous
///

#[derive(Debug)]
pub struct GraphContinuous<A: EntityUnion> {
    rx: mpsc::Receiver<Result<EntityGraph<A>, Error>>,
}

impl<A: EntityUnion> GraphContinuous<A> {
    pub async fn next(&mut self) -> Option<Result<EntityGraph<A>, Error>> {
        self.rx.recv().await
    }
}

///
/// GraphResponse
///
/// `once` fires exactly once with the first fully assembled graph and
/// completes; `continuous` fires whenever the root publisher emits a new
/// value or a relationship fetch produces a differing graph. Dropping both
/// handles cancels outstanding fetches at the next batch boundary.
///

#[derive(Debug)]
pub struct GraphResponse<A: EntityUnion> {
    pub once: GraphOnce<A>,
    pub continuous: GraphContinuous<A>,
}

///
/// RelationController
///
/// Graph traversal engine: walks relationship fields level by level from a
/// set of roots, batches identifier fetches per `(path, entity kind)`,
/// merges fetched entities into a typed graph, and honors per-path fetchers
/// and recursion policy.
///

pub struct RelationController<A: EntityUnion> {
    source: Arc<dyn RelationSource<A>>,
    plan: Arc<TraversalPlan<A>>,
}

impl<A: EntityUnion> Clone for RelationController<A> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            plan: self.plan.clone(),
        }
    }
}

struct FrontierItem<A: EntityUnion> {
    entity: A,
    path: RelationPath<A::Kind>,
    budget: Budget,
}

struct Group<A: EntityUnion> {
    path: RelationPath<A::Kind>,
    kind: A::Kind,
    ids: Vec<Identifier>,
    child_budget: Budget,
}

impl<A: EntityUnion> RelationController<A> {
    #[must_use]
    pub fn new(source: Arc<dyn RelationSource<A>>, plan: TraversalPlan<A>) -> Self {
        Self {
            source,
            plan: Arc::new(plan),
        }
    }

    /// Assemble one graph from the given roots. Batches at each level run
    /// concurrently; the next level starts only after every insert from the
    /// current one has completed.
    pub async fn assemble(
        &self,
        roots: Vec<A>,
        roots_remote: bool,
        ctx: &ReadContext<A>,
    ) -> Result<EntityGraph<A>, Error> {
        let mut graph = EntityGraph::new();
        let mut visited: HashMap<A::Kind, IdentityMap<()>> = HashMap::new();

        let root_budget = Budget::for_roots(self.plan.recursion());
        let mut frontier: Vec<FrontierItem<A>> = Vec::with_capacity(roots.len());
        for root in roots {
            graph.insert(root.clone());
            frontier.push(FrontierItem {
                entity: root,
                path: RelationPath::root(),
                budget: root_budget,
            });
        }

        while !frontier.is_empty() {
            let groups = collect_groups(&self.plan, &frontier, &visited);
            if groups.is_empty() {
                break;
            }

            // Decide each group's fetch now (fetchers are synchronous), then
            // run the level's batches concurrently. A failure in any batch
            // fails the traversal; skipped paths issue no fetch at all.
            let mut metas: Vec<(RelationPath<A::Kind>, Budget, ReadContext<A>)> = Vec::new();
            let mut batches: Vec<BoxFuture<'static, Result<Vec<A>, Error>>> = Vec::new();

            for group in groups {
                let Group {
                    path,
                    kind,
                    ids,
                    child_budget,
                } = group;

                // Derive the path's sub-contract; a contract that derives
                // nothing keeps validating through the parent.
                let sub_contract = ctx.contract.as_ref().map(|contract| {
                    contract
                        .contract_at(&path, &graph)
                        .unwrap_or_else(|| contract.clone())
                });
                let sub_ctx = ctx.derived(sub_contract);

                match self.plan.fetcher_for(&path) {
                    None => {
                        mark_visited::<A>(&mut visited, kind, &ids);
                        let source = self.source.clone();
                        let fetch_ctx = sub_ctx.clone();
                        metas.push((path, child_budget, sub_ctx));
                        batches.push(
                            async move { source.get_by_ids(kind, ids, &fetch_ctx).await }.boxed(),
                        );
                    }
                    Some(fetcher) => match fetcher(&path, ids.clone()) {
                        FetchOutcome::Skip => {
                            debug!(%path, "fetcher skipped relationship");
                        }
                        FetchOutcome::Filtered {
                            ids: filtered,
                            recursion,
                            ctx: fetcher_ctx,
                        } => {
                            if filtered.is_empty() {
                                continue;
                            }
                            mark_visited::<A>(&mut visited, kind, &filtered);
                            let source = self.source.clone();
                            let fetch_ctx = fetcher_ctx.unwrap_or_else(|| sub_ctx.clone());
                            let batch_ctx = fetch_ctx.clone();
                            metas.push((path, Budget::for_fetched(recursion), fetch_ctx));
                            batches.push(
                                async move { source.get_by_ids(kind, filtered, &batch_ctx).await }
                                    .boxed(),
                            );
                        }
                        FetchOutcome::Ready(future) => {
                            mark_visited::<A>(&mut visited, kind, &ids);
                            metas.push((path, child_budget, sub_ctx));
                            batches.push(future);
                        }
                    },
                }
            }

            if batches.is_empty() {
                break;
            }
            let results = futures::future::try_join_all(batches).await?;

            let mut next_frontier = Vec::new();
            for ((path, budget, batch_ctx), fetched) in metas.into_iter().zip(results) {
                for entity in validate(&batch_ctx, fetched) {
                    graph.insert(entity.clone());
                    next_frontier.push(FrontierItem {
                        entity,
                        path: path.clone(),
                        budget,
                    });
                }
            }

            frontier = next_frontier;
        }

        graph.set_data_remote(roots_remote || ctx.sources().any_remote());

        Ok(graph)
    }

    /// Wrap a root subscription into graph streams: the root publisher's
    /// values drive re-assembly; a differing graph is emitted.
    #[must_use]
    pub fn stream<E>(&self, roots: SearchResponse<E>, ctx: &ReadContext<A>) -> GraphResponse<A>
    where
        E: Entity<Union = A>,
    {
        let (once_tx, once_rx) = oneshot::channel();
        let (cont_tx, cont_rx) = mpsc::channel(GRAPH_BUFFER);

        let controller = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(run_graph_subscription(controller, roots, ctx, once_tx, cont_tx));

        GraphResponse {
            once: GraphOnce { rx: once_rx },
            continuous: GraphContinuous { rx: cont_rx },
        }
    }
}

async fn run_graph_subscription<A, E>(
    controller: RelationController<A>,
    roots: SearchResponse<E>,
    ctx: ReadContext<A>,
    once_tx: oneshot::Sender<Result<EntityGraph<A>, Error>>,
    cont_tx: mpsc::Sender<Result<EntityGraph<A>, Error>>,
) where
    A: EntityUnion,
    E: Entity<Union = A>,
{
    let SearchResponse {
        once: _root_once,
        continuous: mut root_values,
    } = roots;

    let mut once_tx = Some(once_tx);
    let mut last: Option<EntityGraph<A>> = None;

    while let Some(item) = root_values.next().await {
        let result = match item {
            Ok(result) => result,
            Err(err) => {
                fail_graph(&mut once_tx, &cont_tx, err).await;
                return;
            }
        };

        let roots_remote = result.is_data_remote();
        let root_entities: Vec<A> = result
            .into_entities()
            .into_iter()
            .map(Into::into)
            .collect();

        // Cancellation is observed between batches: dropping both graph
        // handles stops the assembly at the next boundary.
        let assembled = tokio::select! {
            graph = controller.assemble(root_entities, roots_remote, &ctx) => graph,
            () = graph_abandoned(&mut once_tx, &cont_tx) => return,
        };

        match assembled {
            Ok(graph) => {
                let changed = last
                    .as_ref()
                    .is_none_or(|held| !held.same_entities(&graph));
                if let Some(tx) = once_tx.take() {
                    let _ = tx.send(Ok(graph.clone()));
                }
                if changed {
                    if cont_tx.send(Ok(graph.clone())).await.is_err() {
                        return;
                    }
                    last = Some(graph);
                }
            }
            Err(err) => {
                fail_graph(&mut once_tx, &cont_tx, err).await;
                return;
            }
        }
    }
}

async fn fail_graph<A: EntityUnion>(
    once_tx: &mut Option<oneshot::Sender<Result<EntityGraph<A>, Error>>>,
    cont_tx: &mpsc::Sender<Result<EntityGraph<A>, Error>>,
    err: Error,
) {
    if let Some(tx) = once_tx.take() {
        let _ = tx.send(Err(err.clone()));
    }
    let _ = cont_tx.send(Err(err)).await;
}

async fn graph_abandoned<A: EntityUnion>(
    once_tx: &mut Option<oneshot::Sender<Result<EntityGraph<A>, Error>>>,
    cont_tx: &mpsc::Sender<Result<EntityGraph<A>, Error>>,
) {
    cont_tx.closed().await;
    if let Some(tx) = once_tx.as_mut() {
        tx.closed().await;
    }
}

// ----------------------------------------------------------------------
// Frontier expansion
// ----------------------------------------------------------------------

/// Compute one level's fetch groups: ids for the same `(path, kind)` are
/// coalesced into a single batch even when they originate from different
/// frontier entities. Identifiers already scheduled by the traversal are
/// dropped, which keeps cyclic graphs finite.
fn collect_groups<A: EntityUnion>(
    plan: &TraversalPlan<A>,
    frontier: &[FrontierItem<A>],
    visited: &HashMap<A::Kind, IdentityMap<()>>,
) -> Vec<Group<A>> {
    let mut groups: Vec<Group<A>> = Vec::new();

    for item in frontier {
        if !item.budget.allows_expansion() {
            continue;
        }
        let child_budget = item.budget.decremented();

        for relation in item.entity.relationships() {
            let path = item
                .path
                .child(PathStep::new(item.entity.kind(), relation.field));
            if !plan.traverses(&path) {
                continue;
            }

            let pending: Vec<Identifier> = relation
                .ids
                .iter()
                .copied()
                .filter(|id| !is_visited::<A>(visited, relation.target, id))
                .collect();
            if pending.is_empty() {
                continue;
            }

            match groups
                .iter_mut()
                .find(|group| group.path == path && group.kind == relation.target)
            {
                Some(group) => {
                    for id in pending {
                        if !group.ids.iter().any(|existing| existing.same_entity(&id)) {
                            group.ids.push(id);
                        }
                    }
                    group.child_budget = group.child_budget.widened(child_budget);
                }
                None => {
                    let mut ids: Vec<Identifier> = Vec::with_capacity(pending.len());
                    for id in pending {
                        if !ids.iter().any(|existing| existing.same_entity(&id)) {
                            ids.push(id);
                        }
                    }
                    groups.push(Group {
                        path,
                        kind: relation.target,
                        ids,
                        child_budget,
                    });
                }
            }
        }
    }

    groups
}

fn is_visited<A: EntityUnion>(
    visited: &HashMap<A::Kind, IdentityMap<()>>,
    kind: A::Kind,
    id: &Identifier,
) -> bool {
    visited
        .get(&kind)
        .is_some_and(|entities| entities.contains(id))
}

fn mark_visited<A: EntityUnion>(
    visited: &mut HashMap<A::Kind, IdentityMap<()>>,
    kind: A::Kind,
    ids: &[Identifier],
) {
    let entities = visited.entry(kind).or_default();
    for id in ids {
        entities.insert(*id, ());
    }
}

/// Drop entities the context's contract marks invalid before insertion.
fn validate<A: EntityUnion>(ctx: &ReadContext<A>, entities: Vec<A>) -> Vec<A> {
    let Some(contract) = &ctx.contract else {
        return entities;
    };

    entities
        .into_iter()
        .filter(|entity| {
            !contract.should_validate(entity.kind()) || contract.is_entity_valid(entity)
        })
        .collect()
}
