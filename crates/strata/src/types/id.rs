use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

///
/// LocalId
///
/// Identifier minted on this device before the remote side has assigned one.
/// ULIDs keep local ids sortable by mint time without coordination.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct LocalId(Ulid);

impl LocalId {
    /// Mint a fresh local identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

///
/// RemoteId
///
/// Identifier assigned by the remote store. Opaque to this layer beyond
/// equality and ordering.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct RemoteId(i64);

impl RemoteId {
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for RemoteId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

///
/// Identifier
///
/// Entity identity. A remote component is authoritative once known; a local
/// component survives fusion so in-flight references keep resolving.
///
/// Equality: remote ids win when both sides carry one; otherwise local ids
/// are compared. Two identifiers sharing either component denote the same
/// entity (see [`Identifier::same_entity`]); keyed collections must go
/// through [`IdentityMap`](crate::types::IdentityMap), which keeps both
/// components indexed against a single slot.
///

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub enum Identifier {
    Local(LocalId),
    Remote {
        remote: RemoteId,
        local: Option<LocalId>,
    },
}

impl Identifier {
    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Mint a fresh local-only identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self::Local(LocalId::generate())
    }

    #[must_use]
    pub const fn local(id: LocalId) -> Self {
        Self::Local(id)
    }

    #[must_use]
    pub const fn remote(id: RemoteId) -> Self {
        Self::Remote {
            remote: id,
            local: None,
        }
    }

    #[must_use]
    pub const fn remote_with_local(remote: RemoteId, local: LocalId) -> Self {
        Self::Remote {
            remote,
            local: Some(local),
        }
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    #[must_use]
    pub const fn local_id(&self) -> Option<LocalId> {
        match self {
            Self::Local(local) => Some(*local),
            Self::Remote { local, .. } => *local,
        }
    }

    #[must_use]
    pub const fn remote_id(&self) -> Option<RemoteId> {
        match self {
            Self::Local(_) => None,
            Self::Remote { remote, .. } => Some(*remote),
        }
    }

    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    // ------------------------------------------------------------------
    // Identity resolution
    // ------------------------------------------------------------------

    /// Whether two identifiers denote the same entity: they share a remote
    /// component or a local component.
    #[must_use]
    pub fn same_entity(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.remote_id(), other.remote_id()) {
            return a == b;
        }
        matches!(
            (self.local_id(), other.local_id()),
            (Some(a), Some(b)) if a == b
        )
    }

    /// Fuse two identifiers for the same entity, preferring remote knowledge
    /// and retaining any local component either side carries.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let local = self.local_id().or_else(|| other.local_id());
        match (self.remote_id(), other.remote_id()) {
            (Some(remote), _) | (None, Some(remote)) => Self::Remote { remote, local },
            (None, None) => *self,
        }
    }

    /// Key used when sorting results by identifier. Remote-bearing ids sort
    /// before local-only ids so server ordering stays stable across fusion.
    #[must_use]
    pub(crate) fn order_key(&self) -> IdentifierOrderKey {
        match self.remote_id() {
            Some(remote) => IdentifierOrderKey::Remote(remote),
            None => IdentifierOrderKey::Local(self.local_id().expect("local-only identifier")),
        }
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        match (self.remote_id(), other.remote_id()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.local_id() == other.local_id(),
            _ => matches!(
                (self.local_id(), other.local_id()),
                (Some(a), Some(b)) if a == b
            ),
        }
    }
}

impl Eq for Identifier {}

impl From<LocalId> for Identifier {
    fn from(id: LocalId) -> Self {
        Self::Local(id)
    }
}

impl From<RemoteId> for Identifier {
    fn from(id: RemoteId) -> Self {
        Self::remote(id)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(local) => write!(f, "local:{local}"),
            Self::Remote {
                remote,
                local: Some(local),
            } => write!(f, "remote:{remote}+local:{local}"),
            Self::Remote {
                remote,
                local: None,
            } => write!(f, "remote:{remote}"),
        }
    }
}

///
/// IdentifierOrderKey
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) enum IdentifierOrderKey {
    Remote(RemoteId),
    Local(LocalId),
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_component_is_authoritative_for_equality() {
        let local = LocalId::generate();
        let a = Identifier::remote_with_local(RemoteId::new(7), local);
        let b = Identifier::remote(RemoteId::new(7));

        assert_eq!(a, b);
        assert_ne!(a, Identifier::remote(RemoteId::new(8)));
    }

    #[test]
    fn local_only_identifier_matches_fused_identifier() {
        let local = LocalId::generate();
        let plain = Identifier::local(local);
        let fused = Identifier::remote_with_local(RemoteId::new(3), local);

        assert_eq!(plain, fused);
        assert!(plain.same_entity(&fused));
    }

    #[test]
    fn merged_prefers_remote_and_keeps_local() {
        let local = LocalId::generate();
        let merged = Identifier::local(local).merged(&Identifier::remote(RemoteId::new(9)));

        assert_eq!(merged.remote_id(), Some(RemoteId::new(9)));
        assert_eq!(merged.local_id(), Some(local));
    }

    #[test]
    fn distinct_local_ids_are_unequal() {
        assert_ne!(Identifier::generate(), Identifier::generate());
    }
}
