//! Error types for the model layer.

use crate::entity::EntityKind;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur in the model layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// An entity kind has no registry entry.
    ///
    /// This is a configuration defect, not a valid runtime state.
    #[error("no registry entry for entity kind {0:?}")]
    UnregisteredKind(EntityKind),

    /// A reserved entity kind appeared on the sync path.
    #[error("entity kind {0:?} is reserved and excluded from sync")]
    ReservedKind(EntityKind),

    /// A payload was missing where the operation kind requires one.
    #[error("operation on {kind:?} entity {entity_id} requires a payload")]
    MissingPayload {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        entity_id: String,
    },
}
