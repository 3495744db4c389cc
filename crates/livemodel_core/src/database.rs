//! Database facade.

use crate::cache::QueryCache;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::identity::IdentityMap;
use crate::instance::{Instance, InstanceData};
use crate::model::{Model, ModelDef, ModelRegistry};
use crate::notify::ChangeFeed;
use crate::schema::{quote_ident, ModelSchema};
use crate::stats::DatabaseStats;
use crate::types::Key;
use livemodel_channel::{ResultSet, Row, SqliteChannel, SqliteConfig, StatementChannel};
use livemodel_codec::{DefaultRowCodec, FieldInfo, RowCodec, Value};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// How many fresh keys [`Database::new_instance`] tries before giving up.
pub const MAX_KEY_GENERATION_ATTEMPTS: usize = 100;

/// The main database handle.
///
/// `Database` owns the statement channel and every piece of shared runtime
/// state: the model registry, the identity map, the query cache and the
/// change feed. It is `Send + Sync`; share it between threads with an
/// `Arc`.
///
/// # Opening a Database
///
/// ```rust
/// use livemodel_core::{Database, ModelDef};
///
/// let db = Database::open_in_memory().unwrap();
/// db.execute_update_query(
///     None,
///     "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL DEFAULT '')",
///     &[],
///     false,
/// )
/// .unwrap();
/// db.register_model(ModelDef::new("person").table("people")).unwrap();
///
/// let alice = db.instance_with_key("person", 1, true).unwrap().unwrap();
/// alice.set("name", "Alice").unwrap();
/// db.save(&alice).unwrap();
///
/// db.close().unwrap();
/// ```
///
/// # Closing
///
/// After [`Database::close`], mutating operations fail with
/// [`CoreError::DatabaseClosed`] and read operations return empty results.
pub struct Database {
    /// Configuration.
    pub(crate) config: Config,
    /// Serialized path to the store.
    channel: Arc<dyn StatementChannel>,
    /// Column value conversion.
    codec: Arc<dyn RowCodec>,
    /// Registered models.
    pub(crate) models: ModelRegistry,
    /// Live instances.
    pub(crate) identity: IdentityMap,
    /// Memoized queries and objects.
    pub(crate) cache: QueryCache,
    /// Subscribers.
    pub(crate) feed: ChangeFeed,
    /// Counters.
    pub(crate) stats: DatabaseStats,
    /// Whether the database is open.
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a file-backed SQLite database.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let channel = SqliteChannel::open(path, &SqliteConfig::default())?;
        Ok(Self::open_with_channel(Arc::new(channel), config))
    }

    /// Opens a private in-memory SQLite database with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> CoreResult<Self> {
        let channel = SqliteChannel::open_in_memory()?;
        Ok(Self::open_with_channel(Arc::new(channel), Config::default()))
    }

    /// Opens a database over an existing channel.
    pub fn open_with_channel(channel: Arc<dyn StatementChannel>, config: Config) -> Self {
        Self::open_with_parts(channel, Arc::new(DefaultRowCodec::new()), config)
    }

    /// Opens a database over an existing channel and row codec.
    pub fn open_with_parts(
        channel: Arc<dyn StatementChannel>,
        codec: Arc<dyn RowCodec>,
        config: Config,
    ) -> Self {
        debug!(?config, "database opened");
        Self {
            config,
            channel,
            codec,
            models: ModelRegistry::new(),
            identity: IdentityMap::new(),
            cache: QueryCache::new(),
            feed: ChangeFeed::new(),
            stats: DatabaseStats::new(),
            is_open: RwLock::new(true),
        }
    }

    /// Registers a model. The table is not inspected until first use.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken, the parent model is unknown or the
    /// database is closed.
    pub fn register_model(&self, def: ModelDef) -> CoreResult<()> {
        self.ensure_open()?;
        debug!(model = def.name(), "model registered");
        self.models.register(def)
    }

    /// Closes the database.
    ///
    /// Clears the query cache, forgets every live instance, disconnects
    /// subscribers and closes the channel. Closing an already closed
    /// database does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OrphanedInstances`] if instances were still
    /// alive. The database is closed regardless; those instances keep their
    /// data but can no longer be saved, deleted or reloaded.
    pub fn close(&self) -> CoreResult<()> {
        {
            let mut is_open = self.is_open.write();
            if !*is_open {
                return Ok(());
            }
            *is_open = false;
        }

        self.cache.clear_all();
        let orphaned = self.identity.live_count();
        self.identity.clear();
        self.feed.close();
        self.channel.close()?;
        debug!("database closed");

        if orphaned > 0 {
            warn!(count = orphaned, "closed with live instances; they are now orphaned");
            return Err(CoreError::OrphanedInstances { count: orphaned });
        }
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Ensures the database is open.
    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns database statistics.
    #[must_use]
    pub fn stats(&self) -> &DatabaseStats {
        &self.stats
    }

    /// Names of the registered models, sorted.
    pub fn model_names(&self) -> Vec<String> {
        self.models.names()
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Resolves a model and its schema.
    pub(crate) fn model_and_schema(&self, model: &str) -> CoreResult<(Arc<Model>, Arc<ModelSchema>)> {
        let model = self.models.get(model)?;
        let schema = model.schema(self.channel.as_ref())?;
        Ok((model, schema))
    }

    /// The mapped schema of a model.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or its table cannot be mapped.
    pub fn schema(&self, model: &str) -> CoreResult<Arc<ModelSchema>> {
        Ok(self.model_and_schema(model)?.1)
    }

    /// Descriptor of one field.
    ///
    /// # Errors
    ///
    /// Fails if the model or field is unknown.
    pub fn field_info(&self, model: &str, field: &str) -> CoreResult<FieldInfo> {
        let schema = self.schema(model)?;
        schema
            .field(field)
            .cloned()
            .ok_or_else(|| CoreError::unknown_field(model, field))
    }

    /// Field names of a model, in column order.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or its table cannot be mapped.
    pub fn field_names(&self, model: &str) -> CoreResult<Vec<String>> {
        Ok(self.schema(model)?.field_names())
    }

    /// Primary-key field name of a model.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or its table cannot be mapped.
    pub fn primary_key_field_name(&self, model: &str) -> CoreResult<String> {
        Ok(self.schema(model)?.primary_key().to_string())
    }

    /// Table a model is mapped onto.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownModel`] for an unknown model.
    pub fn table_name(&self, model: &str) -> CoreResult<String> {
        Ok(self.models.get(model)?.table.clone())
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn log_statement(&self, sql: &str, args: &[Value]) {
        if self.config.log_statements {
            debug!(sql, args = args.len(), "statement");
        } else {
            trace!(sql, args = args.len(), "statement");
        }
    }

    pub(crate) fn execute_sql(&self, sql: &str, args: &[Value]) -> CoreResult<u64> {
        self.log_statement(sql, args);
        self.stats.record_statement();
        Ok(self.channel.execute(sql, args)?)
    }

    pub(crate) fn query_sql(&self, sql: &str, args: &[Value]) -> CoreResult<ResultSet> {
        self.log_statement(sql, args);
        self.stats.record_query();
        Ok(self.channel.query(sql, args)?)
    }

    // ========================================================================
    // Rows and instances
    // ========================================================================

    /// Decodes one column into a field value.
    fn decode_field(&self, model: &Model, field: &FieldInfo, raw: Option<&Value>) -> CoreResult<Value> {
        let raw = raw.cloned().unwrap_or(Value::Null);
        Ok(model
            .hooks
            .unserialized_value(field, raw, self.codec.as_ref())?)
    }

    /// Decodes a row selected with the schema's column list.
    pub(crate) fn decode_row(&self, model: &Model, schema: &ModelSchema, row: &Row<'_>) -> CoreResult<Vec<Value>> {
        schema
            .fields()
            .iter()
            .enumerate()
            .map(|(i, field)| self.decode_field(model, field, row.get_index(i)))
            .collect()
    }

    /// Encodes a field value for a statement.
    pub(crate) fn encode_field(&self, model: &Model, field: &FieldInfo, value: &Value) -> CoreResult<Value> {
        Ok(model
            .hooks
            .serialized_value(field, value, self.codec.as_ref())?)
    }

    /// The value a field reads back as after `encoded` was written.
    pub(crate) fn stored_form(&self, model: &Model, field: &FieldInfo, encoded: &Value) -> CoreResult<Value> {
        self.decode_field(model, field, Some(encoded))
    }

    /// The key stored in a selected row.
    pub(crate) fn row_key(&self, model: &Model, schema: &ModelSchema, row: &Row<'_>) -> CoreResult<Key> {
        let pk = schema.pk_index();
        let value = self.decode_field(model, schema.primary_key_field(), row.get_index(pk))?;
        let key = Key::from_value(&value).ok_or_else(|| {
            CoreError::schema(
                &model.name,
                format!("primary key value {value:?} cannot identify a row"),
            )
        })?;
        schema.normalize_key(key)
    }

    /// Returns the live instance for a selected row, loading it if needed.
    ///
    /// A live instance is returned as is; its unsaved edits are kept.
    pub(crate) fn instance_from_row(
        &self,
        model: &Arc<Model>,
        schema: &Arc<ModelSchema>,
        row: &Row<'_>,
    ) -> CoreResult<Instance> {
        let key = self.row_key(model, schema, row)?;
        if let Some(live) = self.identity.find(&model.name, &key) {
            return Ok(live);
        }
        let values = self.decode_row(model, schema, row)?;
        let candidate = Instance::new(
            Arc::clone(model),
            Arc::clone(schema),
            key,
            InstanceData::loaded(values),
            self.identity.handle(),
        );
        Ok(self.adopt(candidate))
    }

    /// Registers a candidate, or returns the instance that beat it.
    fn adopt(&self, candidate: Instance) -> Instance {
        let (instance, fresh) = self.identity.get_or_register(candidate);
        if fresh {
            trace!(model = instance.model_name(), key = %instance.key(), "instance registered");
            instance.hooks().did_init(&instance);
        }
        instance
    }

    /// Returns the instance with this key.
    ///
    /// A live instance is returned if there is one. Otherwise the row is
    /// loaded. If there is no row and `create` is true, a new unsaved
    /// instance with this key is returned, otherwise `None`.
    ///
    /// Returns `Ok(None)` when the database is closed.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown, the key does not fit the primary-key
    /// type or the row cannot be read.
    pub fn instance_with_key(
        &self,
        model: &str,
        key: impl Into<Key>,
        create: bool,
    ) -> CoreResult<Option<Instance>> {
        if !self.is_open() {
            warn!(model, "lookup on closed database");
            return Ok(None);
        }
        let (model, schema) = self.model_and_schema(model)?;
        let key = schema.normalize_key(key.into())?;

        if let Some(live) = self.identity.find(&model.name, &key) {
            return Ok(Some(live));
        }

        let rows = self.query_sql(&schema.select_by_key_sql(), &[key.to_value()])?;
        if let Some(row) = rows.row(0) {
            return self.instance_from_row(&model, &schema, &row).map(Some);
        }
        if !create {
            return Ok(None);
        }

        let data = InstanceData::fresh(&schema, &key);
        let candidate = Instance::new(model, schema, key, data, self.identity.handle());
        Ok(Some(self.adopt(candidate)))
    }

    /// Creates a new unsaved instance with a generated primary key.
    ///
    /// Keys come from the model's
    /// [`primary_key_for_new_instance`](crate::ModelHooks::primary_key_for_new_instance)
    /// hook. A key is used only if no live instance and no stored row holds
    /// it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::GenerationExhausted`] if
    /// [`MAX_KEY_GENERATION_ATTEMPTS`] keys were all taken, and
    /// [`CoreError::DatabaseClosed`] on a closed database.
    pub fn new_instance(&self, model: &str) -> CoreResult<Instance> {
        self.ensure_open()?;
        let (model, schema) = self.model_and_schema(model)?;
        let exists_sql = format!(
            "SELECT 1 FROM {} WHERE {} = ? LIMIT 1",
            quote_ident(schema.table()),
            quote_ident(schema.primary_key())
        );

        for attempt in 1..=MAX_KEY_GENERATION_ATTEMPTS {
            let key = model
                .hooks
                .primary_key_for_new_instance(schema.primary_key_field());
            let key = schema.normalize_key(key)?;

            if self.identity.contains(&model.name, &key) {
                trace!(model = %model.name, %key, attempt, "generated key is live");
                continue;
            }
            if !self.query_sql(&exists_sql, &[key.to_value()])?.is_empty() {
                trace!(model = %model.name, %key, attempt, "generated key is stored");
                continue;
            }

            let data = InstanceData::fresh(&schema, &key);
            let candidate = Instance::new(
                Arc::clone(&model),
                Arc::clone(&schema),
                key,
                data,
                self.identity.handle(),
            );
            match self.identity.register(&candidate) {
                Ok(()) => {
                    candidate.hooks().did_init(&candidate);
                    return Ok(candidate);
                }
                // Another thread took the key between the check and now.
                Err(CoreError::DuplicateKey { .. }) => {
                    trace!(model = %model.name, attempt, "generated key was claimed");
                }
                Err(e) => return Err(e),
            }
        }

        error!(
            model = %model.name,
            attempts = MAX_KEY_GENERATION_ATTEMPTS,
            "primary key generator exhausted"
        );
        Err(CoreError::GenerationExhausted {
            model: model.name.clone(),
            attempts: MAX_KEY_GENERATION_ATTEMPTS,
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("is_open", &self.is_open())
            .field("models", &self.models.names())
            .finish_non_exhaustive()
    }
}
