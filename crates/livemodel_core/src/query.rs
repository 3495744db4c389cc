//! Bulk queries.
//!
//! Filter and order clauses may use `$T` for the model's table and `$PK` for
//! its primary key. Every instance returned goes through the identity map:
//! a row whose instance is already live yields that instance, unsaved edits
//! included.
//!
//! All reads return empty results on a closed database.

use crate::database::Database;
use crate::error::CoreResult;
use crate::instance::Instance;
use crate::types::{Key, ModelScope};
use livemodel_channel::ResultSet;
use livemodel_codec::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

impl Database {
    fn readable(&self, what: &str) -> bool {
        let open = self.is_open();
        if !open {
            warn!(what, "read on closed database");
        }
        open
    }

    /// Runs the model's select with `clause` appended.
    fn select_instances(&self, model: &str, clause: &str, args: &[Value]) -> CoreResult<Vec<Instance>> {
        if !self.readable(model) {
            return Ok(Vec::new());
        }
        let (model, schema) = self.model_and_schema(model)?;
        let sql = if clause.is_empty() {
            schema.select_sql().to_string()
        } else {
            format!("{} {}", schema.select_sql(), schema.expand_placeholders(clause))
        };
        let rows = self.query_sql(&sql, args)?;
        rows.iter()
            .map(|row| self.instance_from_row(&model, &schema, &row))
            .collect()
    }

    fn keyed(instances: Vec<Instance>) -> BTreeMap<Key, Instance> {
        instances
            .into_iter()
            .map(|i| (i.key().clone(), i))
            .collect()
    }

    /// Every stored instance of a model.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or the query fails.
    pub fn all_instances(&self, model: &str) -> CoreResult<Vec<Instance>> {
        self.select_instances(model, "", &[])
    }

    /// Every stored instance of a model, by key.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or the query fails.
    pub fn keyed_all_instances(&self, model: &str) -> CoreResult<BTreeMap<Key, Instance>> {
        self.all_instances(model).map(Self::keyed)
    }

    /// Instances matching a `WHERE` clause.
    ///
    /// ```rust,ignore
    /// let adults = db.instances_where("person", "age >= ? ORDER BY $PK", &[18.into()])?;
    /// ```
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or the query fails.
    pub fn instances_where(&self, model: &str, filter: &str, args: &[Value]) -> CoreResult<Vec<Instance>> {
        self.select_instances(model, &format!("WHERE {filter}"), args)
    }

    /// The first instance matching a `WHERE` clause.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or the query fails.
    pub fn first_instance_where(
        &self,
        model: &str,
        filter: &str,
        args: &[Value],
    ) -> CoreResult<Option<Instance>> {
        let found = self.select_instances(model, &format!("WHERE {filter} LIMIT 1"), args)?;
        Ok(found.into_iter().next())
    }

    /// Instances matching a `WHERE` clause, by key.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or the query fails.
    pub fn keyed_instances_where(
        &self,
        model: &str,
        filter: &str,
        args: &[Value],
    ) -> CoreResult<BTreeMap<Key, Instance>> {
        self.instances_where(model, filter, args).map(Self::keyed)
    }

    /// Every instance, sorted by an `ORDER BY` clause.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or the query fails.
    pub fn instances_ordered_by(&self, model: &str, order: &str, args: &[Value]) -> CoreResult<Vec<Instance>> {
        self.select_instances(model, &format!("ORDER BY {order}"), args)
    }

    /// The first instance in `ORDER BY` order.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or the query fails.
    pub fn first_instance_ordered_by(
        &self,
        model: &str,
        order: &str,
        args: &[Value],
    ) -> CoreResult<Option<Instance>> {
        let found = self.select_instances(model, &format!("ORDER BY {order} LIMIT 1"), args)?;
        Ok(found.into_iter().next())
    }

    /// Number of stored rows of a model.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or the query fails.
    pub fn number_of_instances(&self, model: &str) -> CoreResult<u64> {
        self.count(model, "SELECT COUNT(*) FROM $T", &[])
    }

    /// Number of stored rows matching a `WHERE` clause.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or the query fails.
    pub fn number_of_instances_where(&self, model: &str, filter: &str, args: &[Value]) -> CoreResult<u64> {
        self.count(model, &format!("SELECT COUNT(*) FROM $T WHERE {filter}"), args)
    }

    fn count(&self, model: &str, sql: &str, args: &[Value]) -> CoreResult<u64> {
        let count = self.first_value_from_query(Some(model), sql, args)?;
        Ok(match count {
            Some(Value::Integer(n)) => u64::try_from(n).unwrap_or(0),
            _ => 0,
        })
    }

    /// Instances for a list of keys, in the order given.
    ///
    /// Live instances are returned without a query. Keys without a row are
    /// skipped, as are duplicates.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown, a key does not fit the primary-key type
    /// or the query fails.
    pub fn instances_with_primary_key_values(&self, model: &str, keys: &[Key]) -> CoreResult<Vec<Instance>> {
        if !self.readable(model) || keys.is_empty() {
            return Ok(Vec::new());
        }
        let (model, schema) = self.model_and_schema(model)?;
        let keys = keys
            .iter()
            .map(|k| schema.normalize_key(k.clone()))
            .collect::<CoreResult<Vec<Key>>>()?;

        let mut found: HashMap<Key, Instance> = HashMap::with_capacity(keys.len());
        let mut missing: Vec<Key> = Vec::new();
        for key in &keys {
            if found.contains_key(key) || missing.contains(key) {
                continue;
            }
            match self.identity.find(&model.name, key) {
                Some(live) => {
                    found.insert(key.clone(), live);
                }
                None => missing.push(key.clone()),
            }
        }

        for chunk in missing.chunks(self.config.reload_batch_size.max(1)) {
            let args: Vec<Value> = chunk.iter().map(Key::to_value).collect();
            let rows = self.query_sql(&schema.select_by_keys_sql(args.len()), &args)?;
            for row in rows.iter() {
                let instance = self.instance_from_row(&model, &schema, &row)?;
                found.insert(instance.key().clone(), instance);
            }
        }

        let mut ordered = Vec::with_capacity(found.len());
        for key in &keys {
            if let Some(instance) = found.remove(key) {
                ordered.push(instance);
            }
        }
        Ok(ordered)
    }

    /// Instances for a list of keys, by key.
    ///
    /// # Errors
    ///
    /// Same as [`Database::instances_with_primary_key_values`].
    pub fn keyed_instances_with_primary_key_values(
        &self,
        model: &str,
        keys: &[Key],
    ) -> CoreResult<BTreeMap<Key, Instance>> {
        self.instances_with_primary_key_values(model, keys)
            .map(Self::keyed)
    }

    /// Runs an arbitrary query and returns its raw rows.
    ///
    /// With `model` given, `$T` and `$PK` are replaced by that model's names.
    ///
    /// # Errors
    ///
    /// Fails if the model is unknown or the query fails.
    pub fn result_rows_from_query(
        &self,
        model: Option<&str>,
        sql: &str,
        args: &[Value],
    ) -> CoreResult<ResultSet> {
        if !self.readable(sql) {
            return Ok(ResultSet::new(Vec::new(), Vec::new()));
        }
        let sql = match model {
            Some(name) => self.schema(name)?.expand_placeholders(sql),
            None => sql.to_string(),
        };
        self.query_sql(&sql, args)
    }

    /// The first column of every row of a query.
    ///
    /// # Errors
    ///
    /// Same as [`Database::result_rows_from_query`].
    pub fn first_column_from_query(
        &self,
        model: Option<&str>,
        sql: &str,
        args: &[Value],
    ) -> CoreResult<Vec<Value>> {
        Ok(self.result_rows_from_query(model, sql, args)?.first_column())
    }

    /// The first column of the first row of a query.
    ///
    /// # Errors
    ///
    /// Same as [`Database::result_rows_from_query`].
    pub fn first_value_from_query(
        &self,
        model: Option<&str>,
        sql: &str,
        args: &[Value],
    ) -> CoreResult<Option<Value>> {
        Ok(self.result_rows_from_query(model, sql, args)?.first_value())
    }

    /// Live instances of the models in scope. No I/O.
    ///
    /// The result is a snapshot: other threads may load or release instances
    /// at any time.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownModel`](crate::CoreError::UnknownModel)
    /// for an unknown scope.
    pub fn all_loaded_instances(&self, scope: &ModelScope) -> CoreResult<Vec<Instance>> {
        if !self.readable("loaded instances") {
            return Ok(Vec::new());
        }
        let mut loaded = Vec::new();
        for model in self.models.resolve(scope)? {
            loaded.extend(self.identity.all_live(&model.name));
        }
        Ok(loaded)
    }
}
