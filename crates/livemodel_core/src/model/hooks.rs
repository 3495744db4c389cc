//! Per-model behavior hooks.

use crate::error::{CoreError, CoreResult};
use crate::instance::Instance;
use crate::types::Key;
use livemodel_codec::{CodecResult, FieldInfo, FieldType, RowCodec, Value};
use rand::Rng;

/// Customization points for one model.
///
/// Every method has a permissive default, so models without custom
/// behavior use [`DefaultHooks`]. Hooks are called without any internal
/// lock held and may read or modify the instance they receive. They must
/// not save, delete or reload that same instance.
///
/// # Example
///
/// ```rust
/// use livemodel_core::{CoreResult, Instance, ModelHooks};
/// use livemodel_codec::Value;
///
/// struct KeepLocal;
///
/// impl ModelHooks for KeepLocal {
///     fn resolve_conflict(
///         &self,
///         instance: &Instance,
///         field: &str,
///         _database_value: &Value,
///     ) -> CoreResult<Value> {
///         instance.get(field)
///     }
/// }
/// ```
pub trait ModelHooks: Send + Sync {
    /// Called once when an instance is first loaded or created.
    fn did_init(&self, _instance: &Instance) {}

    /// Approves inserting a new instance. May adjust fields first.
    fn should_insert(&self, _instance: &Instance) -> bool {
        true
    }

    /// Approves updating an existing instance. May adjust fields first.
    fn should_update(&self, _instance: &Instance) -> bool {
        true
    }

    /// Approves deleting an instance.
    fn should_delete(&self, _instance: &Instance) -> bool {
        true
    }

    /// Called after a successful insert.
    fn did_insert(&self, _instance: &Instance) {}

    /// Called after a successful update.
    fn did_update(&self, _instance: &Instance) {}

    /// Called after a successful delete.
    fn did_delete(&self, _instance: &Instance) {}

    /// Called when a `should_*` hook vetoed a save or delete.
    fn save_was_refused(&self, _instance: &Instance) {}

    /// Called when the statement channel rejected a save or delete.
    fn save_did_fail(&self, _instance: &Instance, _error: &CoreError) {}

    /// Produces a primary key for a new instance.
    ///
    /// The runtime retries with fresh keys while the result is already in
    /// use, and gives up after
    /// [`MAX_KEY_GENERATION_ATTEMPTS`](crate::MAX_KEY_GENERATION_ATTEMPTS).
    fn primary_key_for_new_instance(&self, field: &FieldInfo) -> Key {
        default_primary_key(field)
    }

    /// Converts a field value to its stored form.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be stored.
    fn serialized_value(
        &self,
        field: &FieldInfo,
        value: &Value,
        codec: &dyn RowCodec,
    ) -> CodecResult<Value> {
        codec.encode(value, field)
    }

    /// Converts a stored column value to the field's value.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value cannot be represented.
    fn unserialized_value(
        &self,
        field: &FieldInfo,
        raw: Value,
        codec: &dyn RowCodec,
    ) -> CodecResult<Value> {
        codec.decode(raw, field)
    }

    /// Picks the value of a field that was edited locally and changed in
    /// the database at the same time.
    ///
    /// The default refuses to choose, which aborts the reload.
    ///
    /// # Errors
    ///
    /// The default returns [`CoreError::UnresolvedConflict`].
    fn resolve_conflict(
        &self,
        instance: &Instance,
        field: &str,
        _database_value: &Value,
    ) -> CoreResult<Value> {
        Err(CoreError::UnresolvedConflict {
            model: instance.model_name().to_string(),
            key: instance.key().clone(),
            field: field.to_string(),
        })
    }
}

/// Hooks with every default in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ModelHooks for DefaultHooks {}

/// The default primary-key generator: a random UUID for text keys, a
/// random positive integer otherwise.
pub fn default_primary_key(field: &FieldInfo) -> Key {
    match field.field_type {
        FieldType::Text => Key::from(uuid::Uuid::new_v4()),
        _ => Key::Integer(rand::thread_rng().gen_range(1..=i64::MAX)),
    }
}
