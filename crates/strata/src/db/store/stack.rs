use crate::{
    db::store::{Store, StoreLevel},
    error::Error,
    traits::Entity,
};
use std::sync::Arc;
use thiserror::Error as ThisError;

///
/// StackError
///

#[derive(Debug, ThisError)]
pub enum StackError {
    #[error("duplicate store for level '{0}'")]
    DuplicateLevel(StoreLevel),

    #[error("stack has no store at any local level")]
    NoLocalStore,
}

impl From<StackError> for Error {
    fn from(err: StackError) -> Self {
        Self::Internal(err.to_string())
    }
}

///
/// Stack
///
/// Ordered composition of stores, at most one per level. The read order is
/// dictated by the data source on each call, not by list order; writes fan
/// out to every selected level.
///

#[derive(Clone)]
pub struct Stack<E: Entity> {
    stores: Vec<Arc<dyn Store<E>>>,
}

impl<E: Entity> std::fmt::Debug for Stack<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("stores", &self.stores.len())
            .finish()
    }
}

impl<E: Entity> Stack<E> {
    pub fn new(stores: Vec<Arc<dyn Store<E>>>) -> Result<Self, StackError> {
        let mut seen = Vec::new();
        for store in &stores {
            let level = store.level();
            if seen.contains(&level) {
                return Err(StackError::DuplicateLevel(level));
            }
            seen.push(level);
        }

        Ok(Self { stores })
    }

    #[must_use]
    pub fn store(&self, level: StoreLevel) -> Option<&Arc<dyn Store<E>>> {
        self.stores.iter().find(|store| store.level() == level)
    }

    /// The primary local store: memory when present, disk otherwise.
    #[must_use]
    pub fn local(&self) -> Option<&Arc<dyn Store<E>>> {
        self.store(StoreLevel::Memory)
            .or_else(|| self.store(StoreLevel::Disk))
    }

    /// All local-level stores, memory first.
    #[must_use]
    pub fn local_stores(&self) -> Vec<&Arc<dyn Store<E>>> {
        [StoreLevel::Memory, StoreLevel::Disk]
            .iter()
            .filter_map(|level| self.store(*level))
            .collect()
    }

    #[must_use]
    pub fn remote(&self) -> Option<&Arc<dyn Store<E>>> {
        self.store(StoreLevel::Remote)
    }

    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.remote().is_some()
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::store::MemoryStore,
        test_fixtures::{Post, RemoteStub},
    };
    use std::sync::Arc;

    #[test]
    fn at_most_one_store_per_level() {
        let err = Stack::new(vec![
            Arc::new(MemoryStore::<Post>::new()) as Arc<dyn Store<Post>>,
            Arc::new(MemoryStore::<Post>::new()) as Arc<dyn Store<Post>>,
        ])
        .unwrap_err();

        assert!(matches!(err, StackError::DuplicateLevel(StoreLevel::Memory)));
    }

    #[test]
    fn lookup_by_level_is_order_independent() {
        let remote = RemoteStub::<Post>::new();
        let stack = Stack::new(vec![
            remote as Arc<dyn Store<Post>>,
            Arc::new(MemoryStore::new()) as Arc<dyn Store<Post>>,
        ])
        .unwrap();

        assert!(stack.has_remote());
        assert_eq!(
            stack.local().map(|store| store.level()),
            Some(StoreLevel::Memory)
        );
        assert_eq!(stack.local_stores().len(), 1);
    }
}
