use serde::{Deserialize, Serialize};

///
/// Lazy
///
/// Value state of an extras field: either never requested from any store, or
/// requested and carrying the value that came back. `Requested(None)` is a
/// legal state for optional extras whose fetched value was empty.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Lazy<T> {
    #[default]
    Unrequested,
    Requested(T),
}

impl<T> Lazy<T> {
    #[must_use]
    pub const fn is_requested(&self) -> bool {
        matches!(self, Self::Requested(_))
    }

    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Unrequested => None,
            Self::Requested(value) => Some(value),
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Unrequested => None,
            Self::Requested(value) => Some(value),
        }
    }

    /// Retain a previously requested value when `self` is unrequested.
    /// This is the merge rule for `persist(retain_extra_local_data)`: a
    /// payload that never asked for an extra must not erase one already held.
    pub fn retain_requested(&mut self, existing: &Self)
    where
        T: Clone,
    {
        if !self.is_requested() && existing.is_requested() {
            *self = existing.clone();
        }
    }
}

impl<T> From<T> for Lazy<T> {
    fn from(value: T) -> Self {
        Self::Requested(value)
    }
}

///
/// TESTS
///
