mod memory;
mod stack;

pub use memory::*;
pub use stack::*;

use crate::{
    db::{context::ReadContext, query::Query},
    error::Error,
    traits::Entity,
    types::Identifier,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

///
/// StoreLevel
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum StoreLevel {
    Memory,
    Disk,
    Remote,
}

impl StoreLevel {
    #[must_use]
    pub const fn is_local(self) -> bool {
        matches!(self, Self::Memory | Self::Disk)
    }
}

impl fmt::Display for StoreLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Remote => "remote",
        };
        write!(f, "{label}")
    }
}

///
/// SourceMetadata
///
/// Opaque description of the remote request that produced a response, used
/// to key the read context's response-source accumulator.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SourceMetadata {
    pub descriptor: String,
}

impl SourceMetadata {
    #[must_use]
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
        }
    }
}

///
/// ResponseSource
///
/// Where a remote-capable store actually served a read from. Local stores
/// report no source.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ResponseSource {
    Server(SourceMetadata),
    UrlCache(SourceMetadata),
}

impl ResponseSource {
    #[must_use]
    pub const fn metadata(&self) -> &SourceMetadata {
        match self {
            Self::Server(meta) | Self::UrlCache(meta) => meta,
        }
    }
}

///
/// StoreRead
///
/// A read result together with the response source that produced it.
///

#[derive(Clone, Debug)]
pub struct StoreRead<T> {
    pub value: T,
    pub source: Option<ResponseSource>,
}

impl<T> StoreRead<T> {
    /// A read served locally, with no response source.
    #[must_use]
    pub const fn local(value: T) -> Self {
        Self {
            value,
            source: None,
        }
    }

    #[must_use]
    pub const fn remote(value: T, source: ResponseSource) -> Self {
        Self {
            value,
            source: Some(source),
        }
    }
}

///
/// Store
///
/// Typed async read/write surface over one backing medium. Implementations
/// are expected to suspend the calling task for blocking I/O; the layer
/// above serializes mutations per entity type.
///

#[async_trait]
pub trait Store<E: Entity>: Send + Sync {
    fn level(&self) -> StoreLevel;

    async fn get(
        &self,
        id: &Identifier,
        ctx: &ReadContext<E::Union>,
    ) -> Result<StoreRead<Option<E>>, Error>;

    async fn search(
        &self,
        query: &Query<E>,
        ctx: &ReadContext<E::Union>,
    ) -> Result<StoreRead<Vec<E>>, Error>;

    /// Write entities, returning them as stored (a remote store may have
    /// assigned identifiers).
    async fn set(&self, entities: Vec<E>) -> Result<Vec<E>, Error>;

    /// Remove by identifier, returning the identifiers actually removed.
    async fn remove(&self, ids: &[Identifier]) -> Result<Vec<Identifier>, Error>;

    /// Remove everything matching the query, returning removed identifiers.
    async fn remove_all(&self, query: &Query<E>) -> Result<Vec<Identifier>, Error>;
}
