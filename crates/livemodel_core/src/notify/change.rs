//! Change notification types.

use crate::instance::Instance;
use std::collections::BTreeSet;

/// Kind of change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    /// Instances were inserted.
    Insert,
    /// Instances were updated.
    Update,
    /// Instances were deleted.
    Delete,
    /// Rows were changed outside the lifecycle API and live instances were
    /// reloaded.
    ExternalChange,
    /// Any of the above. Emitted alongside every other kind.
    AnyChange,
}

/// A delivered change notification.
///
/// Outside a batch, lifecycle notifications carry exactly one instance.
/// Batched notifications carry every instance affected during the batch, in
/// first-occurrence order. External-change notifications carry all live
/// instances of the model, which may be none.
///
/// Holding a notification keeps its instances alive.
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    /// Monotonic sequence number, unique per database.
    pub sequence: u64,
    /// Model the instances belong to.
    pub model: String,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Affected instances, without duplicates.
    pub instances: Vec<Instance>,
    /// Names of the fields that may have changed. May be larger than the
    /// set of fields that actually changed, never smaller.
    pub changed_fields: BTreeSet<String>,
}

impl ChangeNotification {
    /// Returns true if `instance` is among the affected instances.
    pub fn contains(&self, instance: &Instance) -> bool {
        self.instances.iter().any(|i| i.ptr_eq(instance))
    }
}
