use crate::ids::{ContainerId, EntryId};
use thiserror::Error;

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, ThcError>;

/// Errors that can occur when using a Container
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThcError {
    /// The value being stored is the container itself
    #[error("container may not store itself")]
    SelfContainment,

    /// The key was issued by a different container
    #[error("key belongs to container {key}, not {container}")]
    IdentityMismatch {
        key: ContainerId,
        container: ContainerId,
    },

    /// The key was removed and can never be used again
    #[error("key was removed")]
    Tombstoned,

    /// No entry exists for the key
    #[error("no value found for entry {0}")]
    NotFound(EntryId),

    /// The stored value is not of the requested type
    #[error("type mismatch: requested {expected}, stored {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}
