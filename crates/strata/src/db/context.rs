use crate::{
    db::{
        relation::{EntityGraph, RelationPath},
        store::ResponseSource,
    },
    traits::EntityUnion,
};
use std::{
    fmt,
    sync::{Arc, Mutex},
};

///
/// DataSource
///
/// Per-call policy choosing how the store stack is traversed. Endpoint
/// selection belongs to the remote store implementation; this layer only
/// decides routing and blending.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DataSource {
    /// Query the local store only. Partial extras filter results out; no
    /// remote fallback.
    #[default]
    Local,
    /// Query the remote store. With `or_local`, a remote result that fails
    /// extras-filtering falls back to the local result.
    Remote { or_local: bool },
    /// Query local first; go remote only when the local result is not
    /// provably complete.
    LocalOr,
    /// Emit the local result immediately, then fetch remote and emit again
    /// if it differs.
    LocalThen,
}

impl DataSource {
    #[must_use]
    pub const fn reaches_remote(self) -> bool {
        !matches!(self, Self::Local)
    }
}

///
/// PersistenceStrategy
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PersistenceStrategy {
    #[default]
    DoNotPersist,
    Persist(ExtraLocalData),
}

///
/// ExtraLocalData
///
/// What happens to extras the local copy holds but the incoming remote
/// payload was fetched without.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExtraLocalData {
    Retain,
    Discard,
}

///
/// DataTarget
///
/// Write-side store selection: which stores must acknowledge a mutation
/// before the call returns.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DataTarget {
    #[default]
    Local,
    Remote,
    LocalAndRemote,
}

impl DataTarget {
    #[must_use]
    pub const fn includes_local(self) -> bool {
        matches!(self, Self::Local | Self::LocalAndRemote)
    }

    #[must_use]
    pub const fn includes_remote(self) -> bool {
        matches!(self, Self::Remote | Self::LocalAndRemote)
    }
}

///
/// WriteContext
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WriteContext {
    pub data_target: DataTarget,
}

impl WriteContext {
    #[must_use]
    pub const fn local() -> Self {
        Self {
            data_target: DataTarget::Local,
        }
    }

    #[must_use]
    pub const fn remote() -> Self {
        Self {
            data_target: DataTarget::Remote,
        }
    }

    #[must_use]
    pub const fn local_and_remote() -> Self {
        Self {
            data_target: DataTarget::LocalAndRemote,
        }
    }
}

///
/// Contract
///
/// Validator attached to a read context. May mark fetched entities invalid
/// (they are dropped before emission/insertion) and derives sub-contracts
/// for relationship traversal.
///

pub trait Contract<A: EntityUnion>: Send + Sync {
    fn should_validate(&self, _kind: A::Kind) -> bool {
        true
    }

    fn is_entity_valid(&self, entity: &A) -> bool;

    /// Derive the contract for entities fetched one path step deeper.
    fn contract_at(
        &self,
        _path: &RelationPath<A::Kind>,
        _graph: &EntityGraph<A>,
    ) -> Option<Arc<dyn Contract<A>>> {
        None
    }
}

///
/// ResponseSources
///
/// Accumulator for remote response sources observed during one read
/// operation, including its recursive relationship expansion. Shared by
/// cloning the context.
///

#[derive(Clone, Default)]
pub struct ResponseSources {
    collected: Arc<Mutex<Vec<ResponseSource>>>,
}

impl ResponseSources {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, source: ResponseSource) {
        self.collected
            .lock()
            .expect("response source accumulator poisoned")
            .push(source);
    }

    /// Whether any fetch so far was served remotely (server or URL cache).
    #[must_use]
    pub fn any_remote(&self) -> bool {
        !self
            .collected
            .lock()
            .expect("response source accumulator poisoned")
            .is_empty()
    }

    #[must_use]
    pub fn collected(&self) -> Vec<ResponseSource> {
        self.collected
            .lock()
            .expect("response source accumulator poisoned")
            .clone()
    }
}

impl fmt::Debug for ResponseSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSources")
            .field("collected", &self.collected.lock().map(|v| v.len()))
            .finish()
    }
}

///
/// ReadContext
///
/// Per-call policy bundle. Lives for one read operation, including the
/// recursive relationship expansion it triggers; sub-contexts derived for
/// relationship fetches share the response-source accumulator.
///

#[derive(Clone)]
pub struct ReadContext<A: EntityUnion> {
    pub data_source: DataSource,
    pub persistence: PersistenceStrategy,
    pub trust_remote_filtering: bool,
    pub contract: Option<Arc<dyn Contract<A>>>,
    sources: ResponseSources,
}

impl<A: EntityUnion> ReadContext<A> {
    // ─────────────────────────────────────────────
    // CONSTRUCTORS
    // ─────────────────────────────────────────────

    #[must_use]
    pub fn new(data_source: DataSource) -> Self {
        Self {
            data_source,
            persistence: PersistenceStrategy::DoNotPersist,
            trust_remote_filtering: false,
            contract: None,
            sources: ResponseSources::new(),
        }
    }

    #[must_use]
    pub fn local() -> Self {
        Self::new(DataSource::Local)
    }

    #[must_use]
    pub fn remote() -> Self {
        Self::new(DataSource::Remote { or_local: false }).persisting(ExtraLocalData::Retain)
    }

    #[must_use]
    pub fn remote_or_local() -> Self {
        Self::new(DataSource::Remote { or_local: true }).persisting(ExtraLocalData::Retain)
    }

    #[must_use]
    pub fn local_or_remote() -> Self {
        Self::new(DataSource::LocalOr).persisting(ExtraLocalData::Retain)
    }

    #[must_use]
    pub fn local_then_remote() -> Self {
        Self::new(DataSource::LocalThen).persisting(ExtraLocalData::Retain)
    }

    // ─────────────────────────────────────────────
    // BUILDERS
    // ─────────────────────────────────────────────

    #[must_use]
    pub fn persisting(mut self, extra_local_data: ExtraLocalData) -> Self {
        self.persistence = PersistenceStrategy::Persist(extra_local_data);
        self
    }

    #[must_use]
    pub fn do_not_persist(mut self) -> Self {
        self.persistence = PersistenceStrategy::DoNotPersist;
        self
    }

    #[must_use]
    pub fn trusting_remote_filtering(mut self) -> Self {
        self.trust_remote_filtering = true;
        self
    }

    #[must_use]
    pub fn with_contract(mut self, contract: Arc<dyn Contract<A>>) -> Self {
        self.contract = Some(contract);
        self
    }

    /// Derive the context for one relationship path step, sharing the
    /// response-source accumulator with this context.
    #[must_use]
    pub fn derived(&self, contract: Option<Arc<dyn Contract<A>>>) -> Self {
        Self {
            data_source: self.data_source,
            persistence: self.persistence,
            trust_remote_filtering: self.trust_remote_filtering,
            contract,
            sources: self.sources.clone(),
        }
    }

    // ─────────────────────────────────────────────
    // RESPONSE SOURCES
    // ─────────────────────────────────────────────

    #[must_use]
    pub const fn sources(&self) -> &ResponseSources {
        &self.sources
    }

    /// Record a response source reported by a store read.
    pub fn record_source(&self, source: Option<ResponseSource>) {
        if let Some(source) = source {
            self.sources.record(source);
        }
    }
}

impl<A: EntityUnion> fmt::Debug for ReadContext<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadContext")
            .field("data_source", &self.data_source)
            .field("persistence", &self.persistence)
            .field("trust_remote_filtering", &self.trust_remote_filtering)
            .field("has_contract", &self.contract.is_some())
            .field("sources", &self.sources)
            .finish()
    }
}
