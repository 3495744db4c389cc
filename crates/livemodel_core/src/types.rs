//! Core types for livemodel.

use livemodel_codec::Value;
use std::collections::BTreeSet;
use std::fmt;

/// A primary-key value.
///
/// Keys are normalized to the primary-key column's type before they reach
/// the identity map, so `Key::Integer(5)` and `Key::Text("5")` never name two
/// different instances of the same model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Integer key.
    Integer(i64),
    /// Text key.
    Text(String),
}

impl Key {
    /// Converts a column value into a key.
    ///
    /// Returns `None` for values that cannot identify a row.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(n) => Some(Key::Integer(*n)),
            Value::Text(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    /// The key as a statement argument.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Integer(n) => Value::Integer(*n),
            Key::Text(s) => Value::Text(s.clone()),
        }
    }

    /// Returns the integer key, if this is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Key::Integer(n) => Some(*n),
            Key::Text(_) => None,
        }
    }

    /// Returns the text key, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Key::Text(s) => Some(s),
            Key::Integer(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Integer(n) => write!(f, "{n}"),
            Key::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Integer(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Integer(i64::from(n))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<uuid::Uuid> for Key {
    fn from(id: uuid::Uuid) -> Self {
        Key::Text(id.hyphenated().to_string())
    }
}

/// Outcome of a save or delete.
///
/// Contract violations (saving a deleted instance, a closed database) are
/// reported as errors instead; see [`CoreError::is_fatal`](crate::CoreError::is_fatal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveResult {
    /// The statement channel rejected the write. The error is kept on the
    /// instance; see [`Instance::last_error`](crate::Instance::last_error).
    Failed,
    /// A `should_*` hook vetoed the operation.
    Refused,
    /// The write was performed.
    Succeeded,
    /// Nothing to write.
    NoChanges,
}

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Constructed but never persisted.
    New,
    /// Persisted, with no unsaved changes.
    Clean,
    /// Persisted, with unsaved changes.
    Dirty,
    /// Deleted. Terminal.
    Deleted,
}

/// Which models an operation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelScope {
    /// Every registered model.
    All,
    /// The named model and every model declared as its subtype.
    Model(String),
}

impl ModelScope {
    /// Scope for a single model and its subtypes.
    pub fn model(name: impl Into<String>) -> Self {
        ModelScope::Model(name.into())
    }
}

impl From<&str> for ModelScope {
    fn from(name: &str) -> Self {
        ModelScope::Model(name.to_string())
    }
}

/// Outcome of a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReloadOutcome {
    /// The instance was refreshed from its row.
    Reloaded,
    /// The row no longer exists; the instance is now deleted.
    Deleted,
    /// Nothing was read: the instance was never saved or the database is
    /// closed.
    Skipped,
}

/// The set of fields a write touched, used for cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffectedFields {
    /// Unknown or all fields (inserts, deletes, external changes).
    All,
    /// Exactly these fields.
    Some(BTreeSet<String>),
}

impl AffectedFields {
    /// Returns true if every affected field is in `ignored`.
    pub fn is_subset_of(&self, ignored: &BTreeSet<String>) -> bool {
        match self {
            AffectedFields::All => false,
            AffectedFields::Some(fields) => fields.is_subset(ignored),
        }
    }
}
