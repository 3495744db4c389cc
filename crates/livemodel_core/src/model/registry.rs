//! Model definitions and the registry of known models.

use super::hooks::{DefaultHooks, ModelHooks};
use crate::error::{CoreError, CoreResult};
use crate::schema::ModelSchema;
use crate::types::ModelScope;
use livemodel_channel::StatementChannel;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Declares a model.
///
/// # Example
///
/// ```rust
/// use livemodel_core::{DefaultHooks, ModelDef};
///
/// let def = ModelDef::new("person")
///     .table("people")
///     .ignore_field("legacy_blob")
///     .hooks(DefaultHooks);
/// assert_eq!(def.name(), "person");
/// ```
#[derive(Clone)]
pub struct ModelDef {
    name: String,
    table: Option<String>,
    primary_key: Option<String>,
    ignored_fields: BTreeSet<String>,
    parent: Option<String>,
    hooks: Arc<dyn ModelHooks>,
}

impl ModelDef {
    /// Starts a definition. The table name defaults to the model name and
    /// the primary key to the table's declared primary key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            primary_key: None,
            ignored_fields: BTreeSet::new(),
            parent: None,
            hooks: Arc::new(DefaultHooks),
        }
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maps the model onto a differently named table.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Uses another column as the primary key.
    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    /// Leaves a column out of the in-memory representation.
    #[must_use]
    pub fn ignore_field(mut self, column: impl Into<String>) -> Self {
        self.ignored_fields.insert(column.into());
        self
    }

    /// Leaves several columns out of the in-memory representation.
    #[must_use]
    pub fn ignore_fields<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_fields
            .extend(columns.into_iter().map(Into::into));
        self
    }

    /// Declares this model a subtype of `parent`. Scoped operations on the
    /// parent include this model.
    #[must_use]
    pub fn subtype_of(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Sets the model's hooks.
    #[must_use]
    pub fn hooks(self, hooks: impl ModelHooks + 'static) -> Self {
        self.shared_hooks(Arc::new(hooks))
    }

    /// Sets hooks shared with other owners (e.g. a test that inspects them).
    #[must_use]
    pub fn shared_hooks(mut self, hooks: Arc<dyn ModelHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("ignored_fields", &self.ignored_fields)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

/// A registered model.
pub(crate) struct Model {
    pub(crate) name: String,
    pub(crate) table: String,
    configured_pk: Option<String>,
    ignored: BTreeSet<String>,
    parent: Option<String>,
    pub(crate) hooks: Arc<dyn ModelHooks>,
    schema: OnceCell<Arc<ModelSchema>>,
}

impl Model {
    fn from_def(def: ModelDef) -> Self {
        let table = def.table.unwrap_or_else(|| def.name.clone());
        Self {
            name: def.name,
            table,
            configured_pk: def.primary_key,
            ignored: def.ignored_fields,
            parent: def.parent,
            hooks: def.hooks,
            schema: OnceCell::new(),
        }
    }

    /// Returns the schema, reading the table definition on first use.
    pub(crate) fn schema(&self, channel: &dyn StatementChannel) -> CoreResult<Arc<ModelSchema>> {
        self.schema
            .get_or_try_init(|| -> CoreResult<Arc<ModelSchema>> {
                let columns = channel.table_info(&self.table)?;
                let schema = ModelSchema::from_columns(
                    &self.name,
                    &self.table,
                    self.configured_pk.as_deref(),
                    &self.ignored,
                    columns,
                )?;
                tracing::debug!(
                    model = %self.name,
                    table = %self.table,
                    fields = schema.fields().len(),
                    "model schema loaded"
                );
                Ok(Arc::new(schema))
            })
            .cloned()
    }

    /// The schema, if it has been loaded. A model without a loaded schema
    /// has never produced an instance.
    pub(crate) fn loaded_schema(&self) -> Option<Arc<ModelSchema>> {
        self.schema.get().cloned()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

/// All registered models.
#[derive(Debug, Default)]
pub(crate) struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<Model>>>,
}

impl ModelRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, def: ModelDef) -> CoreResult<()> {
        let mut models = self.models.write();
        if models.contains_key(&def.name) {
            return Err(CoreError::invalid_operation(format!(
                "model {} is already registered",
                def.name
            )));
        }
        if let Some(parent) = &def.parent {
            if !models.contains_key(parent) {
                return Err(CoreError::unknown_model(parent.clone()));
            }
        }
        let model = Model::from_def(def);
        models.insert(model.name.clone(), Arc::new(model));
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> CoreResult<Arc<Model>> {
        self.models
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::unknown_model(name))
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Models covered by a scope: everything, or a model and its subtypes.
    pub(crate) fn resolve(&self, scope: &ModelScope) -> CoreResult<Vec<Arc<Model>>> {
        let models = self.models.read();
        let mut resolved: Vec<Arc<Model>> = match scope {
            ModelScope::All => models.values().cloned().collect(),
            ModelScope::Model(root) => {
                if !models.contains_key(root) {
                    return Err(CoreError::unknown_model(root.clone()));
                }
                models
                    .values()
                    .filter(|m| descends_from(&models, m, root))
                    .cloned()
                    .collect()
            }
        };
        resolved.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(resolved)
    }

    /// Models mapped onto one of `tables` (case-insensitive).
    pub(crate) fn for_tables(&self, tables: &[String]) -> Vec<Arc<Model>> {
        let mut found: Vec<Arc<Model>> = self
            .models
            .read()
            .values()
            .filter(|m| tables.iter().any(|t| t.eq_ignore_ascii_case(&m.table)))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}

fn descends_from(models: &HashMap<String, Arc<Model>>, model: &Model, root: &str) -> bool {
    let mut current = Some(model);
    // parents are registered first, so the chain is finite
    while let Some(m) = current {
        if m.name == root {
            return true;
        }
        current = m.parent.as_ref().and_then(|p| models.get(p)).map(Arc::as_ref);
    }
    false
}
