//! Error types for statement execution.

use thiserror::Error;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur while executing statements.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The SQL engine rejected the statement.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The channel has been closed.
    #[error("statement channel is closed")]
    Closed,

    /// An argument cannot be bound as a column value.
    #[error("cannot bind {kind} value as a statement argument")]
    UnbindableValue {
        /// Kind of the offending value.
        kind: &'static str,
    },

    /// The statement was rejected for a reason other than an engine error.
    #[error("statement rejected: {message}")]
    Rejected {
        /// Description of the rejection.
        message: String,
    },
}

impl ChannelError {
    /// Creates a rejected-statement error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Returns true if the engine reported a constraint violation
    /// (unique, primary key, not-null, ...).
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            ChannelError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
