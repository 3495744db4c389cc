//! Reconciling live instances with changes made behind their back.
//!
//! A write that bypasses the lifecycle API leaves live instances and cached
//! results stale. Reconciliation drops the affected cache entries, re-reads
//! every live instance of the affected models and merges the stored values
//! into them, then announces an `ExternalChange`.

use crate::database::Database;
use crate::error::CoreResult;
use crate::instance::Instance;
use crate::model::Model;
use crate::notify::{ChangeKind, Delivery};
use crate::types::{AffectedFields, Key, ModelScope};
use livemodel_codec::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error};

// Target table of INSERT, REPLACE, UPDATE and DELETE statements. The name
// may be quoted or schema-qualified.
static WRITE_TARGET: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(
        r#"(?i)\b(?:INSERT(?:\s+OR\s+\w+)?\s+INTO|REPLACE\s+INTO|UPDATE(?:\s+OR\s+\w+)?|DELETE\s+FROM)\s+(?:(?:"[^"]+"|\w+)\.)?(?:"([^"]+)"|`([^`]+)`|\[([^\]]+)\]|(\w+))"#,
    )
    .expect("write target pattern is valid")
});

/// Tables written by `sql`, in order of appearance, without duplicates.
///
/// Tables changed by triggers are not found.
pub(crate) fn infer_tables(sql: &str) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for caps in WRITE_TARGET.captures_iter(sql) {
        let Some(name) = (1..=4).find_map(|i| caps.get(i)) else {
            continue;
        };
        let name = name.as_str();
        // upsert clause: `ON CONFLICT DO UPDATE SET`
        if name.eq_ignore_ascii_case("set") {
            continue;
        }
        if !tables.iter().any(|t| t.eq_ignore_ascii_case(name)) {
            tables.push(name.to_string());
        }
    }
    tables
}

impl Database {
    /// Merges freshly read stored values into an instance.
    ///
    /// Clean fields take the stored value. A field with an unsaved edit keeps
    /// it unless the stored value moved too, in which case the model's
    /// `resolve_conflict` hook picks the new current value. The stored values
    /// become the persisted values. Nothing is applied if a conflict is left
    /// unresolved.
    pub(crate) fn merge_stored(&self, instance: &Instance, stored: Vec<Value>) -> CoreResult<()> {
        let data = instance.snapshot();
        let hooks = instance.hooks();
        let fields = instance.fields();

        let mut current = data.current.clone();
        let mut resolved = 0u64;
        for (i, stored_value) in stored.iter().enumerate() {
            let edited = data.current[i] != data.persisted[i];
            if !edited {
                current[i] = stored_value.clone();
            } else if *stored_value != data.persisted[i] {
                let field = &fields[i].name;
                match hooks.resolve_conflict(instance, field, stored_value) {
                    Ok(value) => {
                        debug!(model = instance.model_name(), key = %instance.key(), field, "conflict resolved");
                        current[i] = value;
                        resolved += 1;
                    }
                    Err(err) => {
                        error!(
                            model = instance.model_name(),
                            key = %instance.key(),
                            field,
                            error = %err,
                            "reload conflict not resolved"
                        );
                        return Err(err);
                    }
                }
            }
        }

        instance.with_data(|d| {
            d.current = current;
            d.persisted = stored;
        });
        if resolved > 0 {
            self.stats.record_conflicts_resolved(resolved);
        }
        Ok(())
    }

    /// Tells the runtime that rows of the models in scope were changed
    /// outside the lifecycle API.
    ///
    /// Cached results for those models are dropped, every live instance is
    /// re-read and merged as in [`Database::reload`], instances whose rows are
    /// gone become deleted, and an `ExternalChange` notification listing the
    /// remaining live instances is sent for each model.
    ///
    /// # Errors
    ///
    /// Fails on a closed database, an unknown scope, a read error or an
    /// unresolved conflict. Models processed before the failure stay
    /// reconciled.
    pub fn data_was_updated_externally(&self, scope: &ModelScope) -> CoreResult<()> {
        self.data_was_updated_externally_in(scope, &Delivery::Immediate)
    }

    pub(crate) fn data_was_updated_externally_in(
        &self,
        scope: &ModelScope,
        delivery: &Delivery<'_>,
    ) -> CoreResult<()> {
        self.ensure_open()?;
        for model in self.models.resolve(scope)? {
            self.reconcile_model(&model, delivery)?;
        }
        Ok(())
    }

    fn reconcile_model(&self, model: &Arc<Model>, delivery: &Delivery<'_>) -> CoreResult<()> {
        self.invalidate_cache(&model.name, &AffectedFields::All);

        // No schema means no instance was ever created.
        let Some(schema) = model.loaded_schema() else {
            self.publish(delivery, &model.name, ChangeKind::ExternalChange, Vec::new(), BTreeSet::new());
            return Ok(());
        };

        let live = self.identity.all_live(&model.name);
        let (stored, unsaved): (Vec<Instance>, Vec<Instance>) = live
            .into_iter()
            .filter(|i| !i.is_deleted())
            .partition(Instance::exists_in_database);

        let mut survivors = unsaved;
        let mut vanished = 0usize;
        for chunk in stored.chunks(self.config.reload_batch_size.max(1)) {
            let keys: Vec<Value> = chunk.iter().map(|i| i.key().to_value()).collect();
            let rows = self.query_sql(&schema.select_by_keys_sql(keys.len()), &keys)?;

            let mut found: HashMap<Key, Vec<Value>> = HashMap::with_capacity(rows.len());
            for row in rows.iter() {
                let key = self.row_key(model, &schema, &row)?;
                found.insert(key, self.decode_row(model, &schema, &row)?);
            }

            for instance in chunk {
                match found.remove(instance.key()) {
                    Some(values) => {
                        self.merge_stored(instance, values)?;
                        self.stats.record_reload();
                        survivors.push(instance.clone());
                    }
                    None => {
                        self.mark_vanished(instance, delivery);
                        vanished += 1;
                    }
                }
            }
        }

        debug!(
            model = %model.name,
            reloaded = survivors.len(),
            vanished,
            "external change reconciled"
        );
        survivors.sort_by(|a, b| a.key().cmp(b.key()));
        let fields = schema.field_names().into_iter().collect();
        self.publish(delivery, &model.name, ChangeKind::ExternalChange, survivors, fields);
        Ok(())
    }

    /// Runs a write statement outside the lifecycle API, then reconciles.
    ///
    /// With `model` given, `$T` and `$PK` in `sql` are replaced by that
    /// model's quoted table and primary-key names, and the model and its
    /// subtypes are reconciled. Without it, the written tables are inferred
    /// from the statement text and the models mapped onto them are
    /// reconciled; when nothing can be inferred every model is.
    ///
    /// With `notify` false, cached results are still dropped but live
    /// instances are not reloaded and nothing is announced.
    ///
    /// Returns the number of rows affected.
    ///
    /// # Errors
    ///
    /// Fails on a closed database, an unknown model, a rejected statement or
    /// an unresolved conflict.
    pub fn execute_update_query(
        &self,
        model: Option<&str>,
        sql: &str,
        args: &[Value],
        notify: bool,
    ) -> CoreResult<u64> {
        self.execute_update_query_in(model, sql, args, notify, &Delivery::Immediate)
    }

    pub(crate) fn execute_update_query_in(
        &self,
        model: Option<&str>,
        sql: &str,
        args: &[Value],
        notify: bool,
        delivery: &Delivery<'_>,
    ) -> CoreResult<u64> {
        self.ensure_open()?;
        let (sql, affected) = match model {
            Some(name) => {
                let schema = self.schema(name)?;
                let affected = self.models.resolve(&ModelScope::model(name))?;
                (schema.expand_placeholders(sql), affected)
            }
            None => (sql.to_string(), self.models_written_by(sql)?),
        };

        let rows = self.execute_sql(&sql, args)?;
        for model in &affected {
            if notify {
                self.reconcile_model(model, delivery)?;
            } else {
                self.invalidate_cache(&model.name, &AffectedFields::All);
            }
        }
        Ok(rows)
    }

    fn models_written_by(&self, sql: &str) -> CoreResult<Vec<Arc<Model>>> {
        if self.config.infer_external_tables {
            let tables = infer_tables(sql);
            if !tables.is_empty() {
                return Ok(self.models.for_tables(&tables));
            }
        }
        self.models.resolve(&ModelScope::All)
    }
}
