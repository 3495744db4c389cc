//! Error types for livemodel core.

use crate::types::Key;
use std::sync::Arc;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in livemodel core operations.
///
/// Some of these are contract violations rather than runtime conditions:
/// using a deleted instance, mutating through a closed database, leaving a
/// reconciliation conflict unresolved or a primary-key generator that never
/// produces a fresh key. [`CoreError::is_fatal`] identifies them. Callers
/// should let those propagate instead of retrying.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The statement channel rejected an operation.
    #[error("statement failed: {0}")]
    Statement(#[from] livemodel_channel::ChannelError),

    /// A value could not be converted to or from its stored form.
    #[error("codec error: {0}")]
    Codec(#[from] livemodel_codec::CodecError),

    /// An instance with this key is already registered and live.
    #[error("duplicate key {key} for model {model}")]
    DuplicateKey {
        /// Model name.
        model: String,
        /// The conflicting key.
        key: Key,
    },

    /// The operation is not valid in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of what was attempted.
        message: String,
    },

    /// A reload found a locally edited field that also changed in the
    /// database, and the model does not resolve conflicts.
    #[error("unresolved reload conflict on {model}.{field} (key {key})")]
    UnresolvedConflict {
        /// Model name.
        model: String,
        /// Primary key of the instance.
        key: Key,
        /// Conflicting field.
        field: String,
    },

    /// The primary-key generator kept producing keys that are already taken.
    #[error("no unused primary key for {model} after {attempts} attempts")]
    GenerationExhausted {
        /// Model name.
        model: String,
        /// Number of keys tried.
        attempts: usize,
    },

    /// The database has been closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Closing left registered instances behind.
    #[error("{count} live instances were orphaned by close")]
    OrphanedInstances {
        /// Number of instances still alive at close time.
        count: usize,
    },

    /// No model with this name is registered.
    #[error("unknown model: {name}")]
    UnknownModel {
        /// Model name.
        name: String,
    },

    /// The model has no field with this name.
    #[error("unknown field {field} on model {model}")]
    UnknownField {
        /// Model name.
        model: String,
        /// Field name.
        field: String,
    },

    /// The model's table cannot be mapped.
    #[error("schema error for model {model}: {message}")]
    Schema {
        /// Model name.
        model: String,
        /// Description of the problem.
        message: String,
    },

    /// A cache generator failed. Every caller waiting on the same key
    /// receives the same underlying error.
    #[error("cache generation failed: {source}")]
    CacheGeneration {
        /// The generator's error.
        source: Arc<CoreError>,
    },

    /// A cache generator panicked before producing a value.
    #[error("cache generator panicked")]
    CacheGeneratorPanicked,

    /// A cached value exists under this identifier but has a different type.
    #[error("cached value {identifier} has a different type")]
    CacheTypeMismatch {
        /// Cache identifier.
        identifier: String,
    },
}

impl CoreError {
    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a schema error.
    pub fn schema(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Creates an unknown-model error.
    pub fn unknown_model(name: impl Into<String>) -> Self {
        Self::UnknownModel { name: name.into() }
    }

    /// Creates an unknown-field error.
    pub fn unknown_field(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            model: model.into(),
            field: field.into(),
        }
    }

    /// Returns true for contract violations that callers must not recover
    /// from by retrying.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            CoreError::InvalidOperation { .. }
            | CoreError::UnresolvedConflict { .. }
            | CoreError::GenerationExhausted { .. }
            | CoreError::DatabaseClosed => true,
            CoreError::CacheGeneration { source } => source.is_fatal(),
            _ => false,
        }
    }
}
