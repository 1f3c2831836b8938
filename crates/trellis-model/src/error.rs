// SPDX-License-Identifier: Apache-2.0
//! Error types for the model engine.
use thiserror::Error;

use crate::gid::Gid;

/// Errors raised by model, field, registry, and factory operations.
///
/// Non-fatal conditions (unresolved references, unknown `_type`
/// discriminators) are not errors: they log a warning and degrade to an
/// absent value or the expected schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// A strict-mode `set` received a value of the wrong runtime type.
    ///
    /// Non-strict models downgrade this to a recorded per-field error and
    /// accept the value as-is.
    #[error("type mismatch on `{field}`: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Field that rejected the value.
        field: String,
        /// Declared runtime kind, rendered for display.
        expected: String,
        /// Kind of the offered value.
        actual: String,
    },
    /// A required field was set to null/absent with no default to fall back on.
    #[error("required field `{0}` may not be null")]
    RequiredNull(String),
    /// A schema declared a field both `required` and `reference` without a default.
    #[error("field `{0}` is required and a reference but has no default")]
    RequiredReference(String),
    /// Adopting the value would make a model the owned child of two fields.
    #[error("model {0} is already owned by another field")]
    AlreadyOwned(Gid),
    /// Adopting the value would create an ownership cycle.
    #[error("adopting model {0} would create an ownership cycle")]
    OwnershipCycle(Gid),
    /// Two models from different registries may not share a hierarchy.
    #[error("model {0} belongs to a different registry")]
    CrossRegistry(Gid),
    /// A locked model refused re-parenting.
    #[error("model {0} is locked to its parent")]
    LockedReparent(Gid),
    /// Registration would duplicate a gid within the registry.
    #[error("duplicate gid in registry: {0}")]
    DuplicateGid(Gid),
    /// Field access on a destroyed model (only `gid` remains readable).
    #[error("model {0} has been destroyed")]
    UseAfterDestroy(Gid),
    /// `set_path` crossed a non-model field with lazy creation disabled.
    #[error("path `{0}` does not exist and may not be created")]
    NotFoundPath(String),
    /// The named field is not declared on the schema.
    #[error("no such field: `{0}`")]
    UnknownField(String),
    /// A schema name was referenced that the factory does not know.
    #[error("no schema registered under `{0}`")]
    UnknownSchema(String),
    /// `end_batch` was called with a token that does not own the current
    /// batch level.
    #[error("batch token does not own the current batch")]
    BatchTokenMismatch,
}

/// Convenience alias for fallible model-engine operations.
pub type Result<T, E = ModelError> = std::result::Result<T, E>;
