//! Live model instances.

use crate::error::{CoreError, CoreResult};
use crate::identity::IdentityShared;
use crate::model::{Model, ModelHooks};
use crate::schema::ModelSchema;
use crate::types::{EntityState, Key};
use livemodel_codec::{FieldInfo, Value};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// A live, uniquely identified row of a model.
///
/// `Instance` is a cheap handle: clones refer to the same object, and two
/// handles compare equal only if they are the same object. While any handle
/// is alive, every lookup of the same model and key returns that object.
///
/// Field access and reverts are in-memory operations. Saving, deleting and
/// reloading go through [`Database`](crate::Database).
///
/// An instance must not be mutated, saved, deleted or reloaded from two
/// threads at once. Different instances are independent.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

pub(crate) struct InstanceInner {
    model: Arc<Model>,
    schema: Arc<ModelSchema>,
    key: Key,
    data: Mutex<InstanceData>,
    registry: Weak<IdentityShared>,
}

#[derive(Debug, Clone)]
pub(crate) struct InstanceData {
    pub(crate) current: Vec<Value>,
    pub(crate) persisted: Vec<Value>,
    pub(crate) exists: bool,
    pub(crate) deleted: bool,
    pub(crate) last_error: Option<Arc<CoreError>>,
}

impl InstanceData {
    /// A never-saved instance: every field at its default.
    pub(crate) fn fresh(schema: &ModelSchema, key: &Key) -> Self {
        let values = schema.default_values(key);
        Self {
            current: values.clone(),
            persisted: values,
            exists: false,
            deleted: false,
            last_error: None,
        }
    }

    /// An instance loaded from its row.
    pub(crate) fn loaded(values: Vec<Value>) -> Self {
        Self {
            current: values.clone(),
            persisted: values,
            exists: true,
            deleted: false,
            last_error: None,
        }
    }

    pub(crate) fn dirty_indices(&self) -> Vec<usize> {
        self.current
            .iter()
            .zip(&self.persisted)
            .enumerate()
            .filter(|(_, (c, p))| c != p)
            .map(|(i, _)| i)
            .collect()
    }
}

impl Instance {
    pub(crate) fn new(
        model: Arc<Model>,
        schema: Arc<ModelSchema>,
        key: Key,
        data: InstanceData,
        registry: Weak<IdentityShared>,
    ) -> Self {
        Self {
            inner: Arc::new(InstanceInner {
                model,
                schema,
                key,
                data: Mutex::new(data),
                registry,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<InstanceInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<InstanceInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn as_ptr(&self) -> *const InstanceInner {
        Arc::as_ptr(&self.inner)
    }

    pub(crate) fn model(&self) -> &Arc<Model> {
        &self.inner.model
    }

    pub(crate) fn hooks(&self) -> Arc<dyn ModelHooks> {
        Arc::clone(&self.inner.model.hooks)
    }

    pub(crate) fn schema(&self) -> &Arc<ModelSchema> {
        &self.inner.schema
    }

    pub(crate) fn snapshot(&self) -> InstanceData {
        self.inner.data.lock().clone()
    }

    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&mut InstanceData) -> R) -> R {
        f(&mut self.inner.data.lock())
    }

    /// Name of the model this instance belongs to.
    pub fn model_name(&self) -> &str {
        &self.inner.model.name
    }

    /// Primary key.
    pub fn key(&self) -> &Key {
        &self.inner.key
    }

    /// Field descriptors of the instance's model.
    pub fn fields(&self) -> &[FieldInfo] {
        self.inner.schema.fields()
    }

    fn index_of(&self, field: &str) -> CoreResult<usize> {
        self.inner
            .schema
            .field_index(field)
            .ok_or_else(|| CoreError::unknown_field(self.model_name(), field))
    }

    /// Current value of a field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] if the model has no such field.
    pub fn get(&self, field: &str) -> CoreResult<Value> {
        let i = self.index_of(field)?;
        Ok(self.inner.data.lock().current[i].clone())
    }

    /// Last known stored value of a field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] if the model has no such field.
    pub fn persisted(&self, field: &str) -> CoreResult<Value> {
        let i = self.index_of(field)?;
        Ok(self.inner.data.lock().persisted[i].clone())
    }

    /// Sets a field. The change is in memory until the instance is saved.
    ///
    /// The value is kept as given. A successful save replaces it with the
    /// form the field reads back as, so `3` in a real field becomes `3.0`.
    ///
    /// # Errors
    ///
    /// Fails if the field does not exist, is the primary key, or the
    /// instance has been deleted.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> CoreResult<()> {
        let i = self.index_of(field)?;
        if i == self.inner.schema.pk_index() {
            return Err(CoreError::invalid_operation(format!(
                "the primary key of {} cannot be changed",
                self.model_name()
            )));
        }
        let mut data = self.inner.data.lock();
        if data.deleted {
            return Err(CoreError::invalid_operation(format!(
                "cannot modify deleted {} {}",
                self.model_name(),
                self.key()
            )));
        }
        data.current[i] = value.into();
        Ok(())
    }

    /// Current values of every field, in column order.
    pub fn all_fields(&self) -> Vec<(String, Value)> {
        let data = self.inner.data.lock();
        self.inner
            .schema
            .fields()
            .iter()
            .zip(&data.current)
            .map(|(f, v)| (f.name.clone(), v.clone()))
            .collect()
    }

    /// Fields whose current value differs from the last known stored value.
    ///
    /// Computed on demand.
    pub fn changed_field_names(&self) -> BTreeSet<String> {
        let data = self.inner.data.lock();
        data.dirty_indices()
            .into_iter()
            .map(|i| self.inner.schema.fields()[i].name.clone())
            .collect()
    }

    /// Returns true if the instance has never been saved or any field has
    /// an unsaved change. Always false once deleted.
    pub fn has_unsaved_changes(&self) -> bool {
        let data = self.inner.data.lock();
        !data.deleted && (!data.exists || data.current != data.persisted)
    }

    /// Returns true once the instance's row is known to exist.
    pub fn exists_in_database(&self) -> bool {
        self.inner.data.lock().exists
    }

    /// Returns true once the instance has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.inner.data.lock().deleted
    }

    /// Lifecycle state.
    pub fn state(&self) -> EntityState {
        let data = self.inner.data.lock();
        if data.deleted {
            EntityState::Deleted
        } else if !data.exists {
            EntityState::New
        } else if data.current != data.persisted {
            EntityState::Dirty
        } else {
            EntityState::Clean
        }
    }

    /// The error from the last failed save or delete, cleared by the next
    /// successful one.
    pub fn last_error(&self) -> Option<Arc<CoreError>> {
        self.inner.data.lock().last_error.clone()
    }

    /// Resets every field to its last known stored value. No I/O.
    pub fn revert_unsaved_changes(&self) {
        let mut data = self.inner.data.lock();
        data.current = data.persisted.clone();
    }

    /// Resets one field to its last known stored value. No I/O.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] if the model has no such field.
    pub fn revert_unsaved_change(&self, field: &str) -> CoreResult<()> {
        let i = self.index_of(field)?;
        let mut data = self.inner.data.lock();
        data.current[i] = data.persisted[i].clone();
        Ok(())
    }

    /// Returns true if both handles refer to the same object.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Instance {}

impl Hash for Instance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.inner), state);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("model", &self.model_name())
            .field("key", self.key())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.model.name, &self.key, self as *const InstanceInner);
        }
    }
}
