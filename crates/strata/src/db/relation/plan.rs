use crate::{db::context::ReadContext, error::Error, traits::EntityUnion, types::Identifier};
use derive_more::Deref;
use futures::future::BoxFuture;
use std::{fmt, sync::Arc};

///
/// PathStep
///
/// One traversal step: a relationship field on an entity kind.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PathStep<K> {
    pub kind: K,
    pub field: &'static str,
}

impl<K> PathStep<K> {
    #[must_use]
    pub const fn new(kind: K, field: &'static str) -> Self {
        Self { kind, field }
    }
}

///
/// RelationPath
///
/// A chain of `(entity kind, relationship field)` steps from the traversal
/// roots.
///

#[derive(Clone, Debug, Deref, Eq, Hash, PartialEq)]
pub struct RelationPath<K>(Vec<PathStep<K>>);

impl<K: Copy + Eq> RelationPath<K> {
    /// The empty path: the roots themselves.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn of(steps: impl IntoIterator<Item = PathStep<K>>) -> Self {
        Self(steps.into_iter().collect())
    }

    #[must_use]
    pub fn step(kind: K, field: &'static str) -> Self {
        Self(vec![PathStep::new(kind, field)])
    }

    /// Extend this path by one step.
    #[must_use]
    pub fn child(&self, step: PathStep<K>) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        Self(steps)
    }

    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl<K: Copy + Eq> Default for RelationPath<K> {
    fn default() -> Self {
        Self::root()
    }
}

impl<K: fmt::Debug> fmt::Display for RelationPath<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, step) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:?}:{}", step.kind, step.field)?;
        }
        Ok(())
    }
}

///
/// Recursion
///
/// How far relationship expansion proceeds past the entities it reaches.
/// `None` fetches the relationships in question and stops; `Depth(n)`
/// continues for `n` further levels; `Full` continues until the frontier is
/// exhausted (cycle avoidance keeps that finite).
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Recursion {
    None,
    Full,
    Depth(u32),
}

///
/// Budget
///
/// Remaining expansion levels below one frontier entity.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Budget {
    Unlimited,
    Finite(u32),
}

impl Budget {
    /// Budget for entities fetched under the given recursion policy.
    pub(crate) const fn for_fetched(recursion: Recursion) -> Self {
        match recursion {
            Recursion::None => Self::Finite(0),
            Recursion::Full => Self::Unlimited,
            Recursion::Depth(levels) => Self::Finite(levels),
        }
    }

    /// Budget for traversal roots: their direct relationships always
    /// resolve, and entities below them inherit `for_fetched`.
    pub(crate) const fn for_roots(recursion: Recursion) -> Self {
        match recursion {
            Recursion::None => Self::Finite(1),
            Recursion::Full => Self::Unlimited,
            Recursion::Depth(levels) => Self::Finite(levels.saturating_add(1)),
        }
    }

    pub(crate) const fn allows_expansion(self) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Finite(levels) => levels > 0,
        }
    }

    pub(crate) const fn decremented(self) -> Self {
        match self {
            Self::Unlimited => Self::Unlimited,
            Self::Finite(levels) => Self::Finite(levels.saturating_sub(1)),
        }
    }

    /// Combine budgets when one batch serves parents with different
    /// remaining depth; the deeper allowance wins.
    pub(crate) fn widened(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unlimited, _) | (_, Self::Unlimited) => Self::Unlimited,
            (Self::Finite(a), Self::Finite(b)) => Self::Finite(a.max(b)),
        }
    }
}

///
/// FetchOutcome
///
/// What a per-path fetcher decided for one batch.
///

pub enum FetchOutcome<A: EntityUnion> {
    /// Skip this relationship entirely.
    Skip,
    /// Replace the id set and continue with the default fetch, under the
    /// given recursion policy and optional dedicated context.
    Filtered {
        ids: Vec<Identifier>,
        recursion: Recursion,
        ctx: Option<ReadContext<A>>,
    },
    /// The fetcher supplies ready results; the controller awaits them and
    /// inserts them in place of a default fetch.
    Ready(BoxFuture<'static, Result<Vec<A>, Error>>),
}

impl<A: EntityUnion> fmt::Debug for FetchOutcome<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "Skip"),
            Self::Filtered { ids, recursion, .. } => f
                .debug_struct("Filtered")
                .field("ids", ids)
                .field("recursion", recursion)
                .finish_non_exhaustive(),
            Self::Ready(_) => write!(f, "Ready(..)"),
        }
    }
}

///
/// Fetcher
///
/// Per-path fetch override, invoked with the path and the batched id set.
///

pub type Fetcher<A> = Arc<
    dyn Fn(&RelationPath<<A as EntityUnion>::Kind>, Vec<Identifier>) -> FetchOutcome<A>
        + Send
        + Sync,
>;

///
/// TraversalPlan
///
/// What the relationship controller resolves: everything (with a recursion
/// policy), or explicit path chains; minus exclusions; with per-path
/// fetchers kept in a path-keyed table.
///

pub struct TraversalPlan<A: EntityUnion> {
    include_all: bool,
    recursion: Recursion,
    includes: Vec<RelationPath<A::Kind>>,
    excludes: Vec<RelationPath<A::Kind>>,
    fetchers: Vec<(RelationPath<A::Kind>, Fetcher<A>)>,
}

impl<A: EntityUnion> TraversalPlan<A> {
    /// Resolve every relationship reachable under the recursion policy.
    #[must_use]
    pub fn including_all_relationships(recursion: Recursion) -> Self {
        Self {
            include_all: true,
            recursion,
            includes: Vec::new(),
            excludes: Vec::new(),
            fetchers: Vec::new(),
        }
    }

    /// Resolve only explicitly included paths.
    #[must_use]
    pub fn new() -> Self {
        Self {
            include_all: false,
            recursion: Recursion::Full,
            includes: Vec::new(),
            excludes: Vec::new(),
            fetchers: Vec::new(),
        }
    }

    #[must_use]
    pub fn including(mut self, path: RelationPath<A::Kind>) -> Self {
        self.includes.push(path);
        self
    }

    #[must_use]
    pub fn excluding(mut self, path: RelationPath<A::Kind>) -> Self {
        self.excludes.push(path);
        self
    }

    #[must_use]
    pub fn with_fetcher(
        mut self,
        path: RelationPath<A::Kind>,
        fetcher: impl Fn(&RelationPath<A::Kind>, Vec<Identifier>) -> FetchOutcome<A>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.fetchers.push((path, Arc::new(fetcher)));
        self
    }

    #[must_use]
    pub const fn recursion(&self) -> Recursion {
        self.recursion
    }

    /// Whether a path is traversed: not excluded (by prefix), and either
    /// everything is included or the path lies on an included chain.
    #[must_use]
    pub fn traverses(&self, path: &RelationPath<A::Kind>) -> bool {
        if self
            .excludes
            .iter()
            .any(|excluded| excluded.is_prefix_of(path))
        {
            return false;
        }
        if self.include_all {
            return true;
        }

        self.includes
            .iter()
            .any(|included| path.is_prefix_of(included))
    }

    #[must_use]
    pub fn fetcher_for(&self, path: &RelationPath<A::Kind>) -> Option<&Fetcher<A>> {
        self.fetchers
            .iter()
            .find(|(candidate, _)| candidate == path)
            .map(|(_, fetcher)| fetcher)
    }
}

impl<A: EntityUnion> Default for TraversalPlan<A> {
    fn default() -> Self {
        Self::new()
    }
}
