use crate::types::{Identifier, LocalId, RemoteId};
use std::collections::{BTreeMap, HashMap};

///
/// IdentityMap
///
/// Value map keyed by [`Identifier`] through a dual index: both the local and
/// the remote component of an identifier resolve to the same slot. When a
/// remote id is learned for an entity previously known only locally, the
/// index is rewritten in place: the slot (and hence iteration identity)
/// survives, so readers observe continuity across fusion.
///
/// Iteration follows slot creation order.
///

#[derive(Clone, Debug)]
pub struct IdentityMap<V> {
    slots: BTreeMap<u64, Slot<V>>,
    by_local: HashMap<LocalId, u64>,
    by_remote: HashMap<RemoteId, u64>,
    next_slot: u64,
}

#[derive(Clone, Debug)]
struct Slot<V> {
    identifier: Identifier,
    value: V,
}

impl<V> IdentityMap<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            by_local: HashMap::new(),
            by_remote: HashMap::new(),
            next_slot: 0,
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &Identifier) -> bool {
        self.slot_of(id).is_some()
    }

    /// The canonical (fused) identifier stored for `id`, if present.
    #[must_use]
    pub fn canonical(&self, id: &Identifier) -> Option<Identifier> {
        self.slot_of(id)
            .and_then(|slot| self.slots.get(&slot))
            .map(|slot| slot.identifier)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    #[must_use]
    pub fn get(&self, id: &Identifier) -> Option<&V> {
        let slot = self.slot_of(id)?;
        self.slots.get(&slot).map(|slot| &slot.value)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: &Identifier) -> Option<&mut V> {
        let slot = self.slot_of(id)?;
        self.slots.get_mut(&slot).map(|slot| &mut slot.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &V)> {
        self.slots
            .values()
            .map(|slot| (&slot.identifier, &slot.value))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.slots.values().map(|slot| &slot.value)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Insert or replace the value for `id`, returning the previous value.
    pub fn insert(&mut self, id: Identifier, value: V) -> Option<V> {
        let mut previous = None;
        self.upsert(id, value, |existing, incoming| {
            previous = Some(existing);
            incoming
        });

        previous
    }

    /// Insert the value for `id`, resolving collisions with `merge`.
    /// Returns `true` when a new slot was created.
    ///
    /// Fusing an incoming identifier that bridges two previously distinct
    /// slots (one remote-keyed, one local-keyed) keeps the remote-keyed slot;
    /// the local-only slot's value is superseded.
    pub fn upsert(&mut self, id: Identifier, value: V, merge: impl FnOnce(V, V) -> V) -> bool {
        let remote_slot = id.remote_id().and_then(|rid| self.by_remote.get(&rid).copied());
        let local_slot = id.local_id().and_then(|lid| self.by_local.get(&lid).copied());

        let target = match (remote_slot, local_slot) {
            (Some(a), Some(b)) if a != b => {
                let _ = self.drop_slot(b);
                Some(a)
            }
            (Some(slot), _) | (None, Some(slot)) => Some(slot),
            (None, None) => None,
        };

        match target {
            Some(key) => {
                let slot = self.slots.remove(&key).expect("indexed slot must exist");
                let fused = slot.identifier.merged(&id);
                self.slots.insert(
                    key,
                    Slot {
                        identifier: fused,
                        value: merge(slot.value, value),
                    },
                );
                self.index(fused, key);
                false
            }
            None => {
                let key = self.next_slot;
                self.next_slot += 1;
                self.slots.insert(
                    key,
                    Slot {
                        identifier: id,
                        value,
                    },
                );
                self.index(id, key);
                true
            }
        }
    }

    /// Remove the value for `id`, returning the canonical identifier and
    /// value that were stored.
    pub fn remove(&mut self, id: &Identifier) -> Option<(Identifier, V)> {
        let key = self.slot_of(id)?;
        let slot = self.drop_slot(key)?;

        Some((slot.identifier, slot.value))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.by_local.clear();
        self.by_remote.clear();
    }

    // ------------------------------------------------------------------
    // Private helpers
    // ------------------------------------------------------------------

    fn slot_of(&self, id: &Identifier) -> Option<u64> {
        let by_remote = id
            .remote_id()
            .and_then(|remote| self.by_remote.get(&remote).copied());

        by_remote.or_else(|| {
            id.local_id()
                .and_then(|local| self.by_local.get(&local).copied())
        })
    }

    fn index(&mut self, id: Identifier, key: u64) {
        if let Some(local) = id.local_id() {
            self.by_local.insert(local, key);
        }
        if let Some(remote) = id.remote_id() {
            self.by_remote.insert(remote, key);
        }
    }

    fn drop_slot(&mut self, key: u64) -> Option<Slot<V>> {
        let slot = self.slots.remove(&key)?;
        if let Some(local) = slot.identifier.local_id() {
            self.by_local.remove(&local);
        }
        if let Some(remote) = slot.identifier.remote_id() {
            self.by_remote.remove(&remote);
        }

        Some(slot)
    }
}

impl<V> Default for IdentityMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: PartialEq> PartialEq for IdentityMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(id, value)| other.get(id).is_some_and(|found| found == value))
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_resolves_by_either_component_after_fusion() {
        let local = LocalId::generate();
        let mut map = IdentityMap::new();
        map.insert(Identifier::local(local), "draft");

        // Remote id learned from a server response.
        let fused = Identifier::remote_with_local(RemoteId::new(42), local);
        let previous = map.insert(fused, "published");

        assert_eq!(previous, Some("draft"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Identifier::local(local)), Some(&"published"));
        assert_eq!(map.get(&Identifier::remote(RemoteId::new(42))), Some(&"published"));
        assert_eq!(map.canonical(&Identifier::local(local)), Some(fused));
    }

    #[test]
    fn upsert_merges_against_the_existing_value() {
        let id = Identifier::remote(RemoteId::new(1));
        let mut map = IdentityMap::new();
        map.insert(id, 10);

        let created = map.upsert(id, 5, |existing, incoming| existing + incoming);

        assert!(!created);
        assert_eq!(map.get(&id), Some(&15));
    }

    #[test]
    fn remove_clears_both_indexes() {
        let local = LocalId::generate();
        let id = Identifier::remote_with_local(RemoteId::new(9), local);
        let mut map = IdentityMap::new();
        map.insert(id, ());

        let removed = map.remove(&Identifier::local(local));

        assert!(removed.is_some());
        assert!(map.is_empty());
        assert!(!map.contains(&Identifier::remote(RemoteId::new(9))));
    }

    #[test]
    fn bridging_identifier_fuses_two_slots() {
        let local = LocalId::generate();
        let mut map = IdentityMap::new();
        map.insert(Identifier::remote(RemoteId::new(7)), "remote");
        map.insert(Identifier::local(local), "local");
        assert_eq!(map.len(), 2);

        map.insert(Identifier::remote_with_local(RemoteId::new(7), local), "fused");

        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Identifier::local(local)), Some(&"fused"));
    }
}
