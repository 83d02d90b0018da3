use crate::db::store::StoreLevel;
use thiserror::Error as ThisError;

///
/// Error
///
/// Central runtime error taxonomy. Per-module error enums convert into this
/// type at the public API boundary; the variant set is stable, the message
/// text is not.
///

#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum Error {
    #[error("store error at {level}: {message}")]
    Store { level: StoreLevel, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a store error for a given level.
    pub fn store(level: StoreLevel, message: impl Into<String>) -> Self {
        Self::Store {
            level,
            message: message.into(),
        }
    }

    /// Build a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Build an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Whether this error came from a local (memory or disk) store.
    #[must_use]
    pub const fn is_local_store(&self) -> bool {
        matches!(
            self,
            Self::Store {
                level: StoreLevel::Memory | StoreLevel::Disk,
                ..
            }
        )
    }
}
