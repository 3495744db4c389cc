//! Save, delete and reload.
//!
//! Every operation takes a consistent snapshot of the instance, calls hooks
//! with no lock held, talks to the store, and only then writes its outcome
//! back into the instance. A failed statement leaves the instance exactly as
//! it was.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::instance::Instance;
use crate::notify::{ChangeKind, Delivery};
use crate::schema::{placeholders, quote_ident};
use crate::types::{AffectedFields, ModelScope, ReloadOutcome, SaveResult};
use livemodel_codec::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

impl Database {
    /// Saves an instance.
    ///
    /// Inserts a new instance, or updates the changed fields of an existing
    /// one. Returns [`SaveResult::NoChanges`] without touching the store when
    /// nothing changed, and [`SaveResult::Refused`] when the model's
    /// `should_insert`/`should_update` hook declines.
    ///
    /// If the store rejects the statement the instance is left unchanged,
    /// the error is kept in [`Instance::last_error`] and
    /// [`SaveResult::Failed`] is returned.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidOperation`] for a deleted instance and
    /// [`CoreError::DatabaseClosed`] on a closed database.
    pub fn save(&self, instance: &Instance) -> CoreResult<SaveResult> {
        self.save_in(instance, &Delivery::Immediate)
    }

    pub(crate) fn save_in(&self, instance: &Instance, delivery: &Delivery<'_>) -> CoreResult<SaveResult> {
        self.ensure_open()?;
        let before = instance.snapshot();
        if before.deleted {
            return Err(CoreError::invalid_operation(format!(
                "cannot save deleted {} {}",
                instance.model_name(),
                instance.key()
            )));
        }

        let inserting = !before.exists;
        if !inserting && before.dirty_indices().is_empty() {
            self.stats.record_no_change();
            return Ok(SaveResult::NoChanges);
        }

        let hooks = instance.hooks();
        let approved = if inserting {
            hooks.should_insert(instance)
        } else {
            hooks.should_update(instance)
        };
        if !approved {
            self.stats.record_refusal();
            warn!(model = instance.model_name(), key = %instance.key(), inserting, "save refused");
            hooks.save_was_refused(instance);
            return Ok(SaveResult::Refused);
        }

        // The approval hooks may have edited fields.
        let data = instance.snapshot();
        let schema = Arc::clone(instance.schema());
        let written: Vec<usize> = if inserting {
            (0..schema.fields().len())
                .filter(|&i| {
                    i == schema.pk_index()
                        || schema.required_on_insert(i)
                        || data.current[i] != schema.fields()[i].default_value
                })
                .collect()
        } else {
            data.dirty_indices()
        };
        if !inserting && written.is_empty() {
            self.stats.record_no_change();
            return Ok(SaveResult::NoChanges);
        }

        let outcome = self.write_fields(instance, inserting, &written, &data.current);
        let (rows, stored) = match outcome {
            Ok(done) => done,
            Err(err @ (CoreError::Statement(_) | CoreError::Codec(_))) => {
                return Ok(self.save_failed(instance, err));
            }
            Err(err) => return Err(err),
        };

        let changed: BTreeSet<String> = if inserting {
            schema.field_names().into_iter().collect()
        } else {
            written
                .iter()
                .map(|&i| schema.fields()[i].name.clone())
                .collect()
        };

        // Written fields take the form a later read produces, so a reload
        // compares like with like. Edits made since the snapshot are kept.
        instance.with_data(|d| {
            d.persisted.clone_from(&data.current);
            for (&i, value) in written.iter().zip(stored) {
                if d.current[i] == data.current[i] {
                    d.current[i] = value.clone();
                }
                d.persisted[i] = value;
            }
            d.exists = true;
            d.last_error = None;
        });

        let model = instance.model_name();
        if inserting {
            self.stats.record_insert();
            debug!(model, key = %instance.key(), "inserted");
            self.invalidate_cache(model, &AffectedFields::All);
            hooks.did_insert(instance);
            self.publish(delivery, model, ChangeKind::Insert, vec![instance.clone()], changed);
        } else {
            if rows == 0 {
                warn!(model, key = %instance.key(), "update matched no row");
            }
            self.stats.record_update();
            debug!(model, key = %instance.key(), fields = ?changed, "updated");
            self.invalidate_cache(model, &AffectedFields::Some(changed.clone()));
            hooks.did_update(instance);
            self.publish(delivery, model, ChangeKind::Update, vec![instance.clone()], changed);
        }
        Ok(SaveResult::Succeeded)
    }

    /// Issues the INSERT or UPDATE for `indices`.
    ///
    /// Returns the affected row count and, per index, the value the field
    /// will read back as. A value that would not read back fails before
    /// anything is written.
    fn write_fields(
        &self,
        instance: &Instance,
        inserting: bool,
        indices: &[usize],
        values: &[Value],
    ) -> CoreResult<(u64, Vec<Value>)> {
        let schema = instance.schema();
        let model = instance.model();
        let mut args = Vec::with_capacity(indices.len() + 1);
        let mut stored = Vec::with_capacity(indices.len());
        for &i in indices {
            let field = &schema.fields()[i];
            let encoded = self.encode_field(model, field, &values[i])?;
            stored.push(self.stored_form(model, field, &encoded)?);
            args.push(encoded);
        }
        let columns: Vec<String> = indices
            .iter()
            .map(|&i| quote_ident(&schema.fields()[i].name))
            .collect();

        let sql = if inserting {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(schema.table()),
                columns.join(", "),
                placeholders(columns.len())
            )
        } else {
            args.push(instance.key().to_value());
            let assignments: Vec<String> = columns.iter().map(|c| format!("{c} = ?")).collect();
            format!(
                "UPDATE {} SET {} WHERE {} = ?",
                quote_ident(schema.table()),
                assignments.join(", "),
                quote_ident(schema.primary_key())
            )
        };
        let rows = self.execute_sql(&sql, &args)?;
        Ok((rows, stored))
    }

    fn save_failed(&self, instance: &Instance, err: CoreError) -> SaveResult {
        self.stats.record_failure();
        warn!(model = instance.model_name(), key = %instance.key(), error = %err, "save failed");
        let err = Arc::new(err);
        instance.with_data(|d| d.last_error = Some(Arc::clone(&err)));
        instance.hooks().save_did_fail(instance, &err);
        SaveResult::Failed
    }

    /// Deletes an instance.
    ///
    /// Deleting an already deleted instance succeeds without touching the
    /// store. The model's `should_delete` hook may refuse, and a rejected
    /// statement is reported like a failed save.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::DatabaseClosed`] on a closed database.
    pub fn delete(&self, instance: &Instance) -> CoreResult<SaveResult> {
        self.delete_in(instance, &Delivery::Immediate)
    }

    pub(crate) fn delete_in(&self, instance: &Instance, delivery: &Delivery<'_>) -> CoreResult<SaveResult> {
        self.ensure_open()?;
        if instance.is_deleted() {
            return Ok(SaveResult::Succeeded);
        }

        let hooks = instance.hooks();
        if !hooks.should_delete(instance) {
            self.stats.record_refusal();
            warn!(model = instance.model_name(), key = %instance.key(), "delete refused");
            hooks.save_was_refused(instance);
            return Ok(SaveResult::Refused);
        }

        let schema = instance.schema();
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(schema.table()),
            quote_ident(schema.primary_key())
        );
        match self.execute_sql(&sql, &[instance.key().to_value()]) {
            Ok(_) => {}
            Err(err @ CoreError::Statement(_)) => return Ok(self.save_failed(instance, err)),
            Err(err) => return Err(err),
        }

        self.identity.unregister(instance);
        instance.with_data(|d| {
            d.deleted = true;
            d.exists = false;
            d.last_error = None;
        });

        let model = instance.model_name();
        self.stats.record_delete();
        debug!(model, key = %instance.key(), "deleted");
        self.invalidate_cache(model, &AffectedFields::All);
        hooks.did_delete(instance);
        let fields = schema.field_names().into_iter().collect();
        self.publish(delivery, model, ChangeKind::Delete, vec![instance.clone()], fields);
        Ok(SaveResult::Succeeded)
    }

    /// Re-reads an instance from the store and merges the stored values into
    /// it.
    ///
    /// Fields without unsaved edits take the stored value. A field with an
    /// unsaved edit whose stored value also changed is a conflict, settled by
    /// the model's `resolve_conflict` hook. If the row is gone the instance
    /// becomes deleted.
    ///
    /// New instances and closed databases are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnresolvedConflict`] if a conflict is not
    /// resolved, in which case the instance is left unchanged.
    pub fn reload(&self, instance: &Instance) -> CoreResult<ReloadOutcome> {
        self.reload_in(instance, &Delivery::Immediate)
    }

    pub(crate) fn reload_in(&self, instance: &Instance, delivery: &Delivery<'_>) -> CoreResult<ReloadOutcome> {
        if !self.is_open() {
            warn!(model = instance.model_name(), key = %instance.key(), "reload on closed database");
            return Ok(ReloadOutcome::Skipped);
        }
        let data = instance.snapshot();
        if data.deleted {
            return Ok(ReloadOutcome::Deleted);
        }
        if !data.exists {
            return Ok(ReloadOutcome::Skipped);
        }

        let schema = Arc::clone(instance.schema());
        let rows = self.query_sql(&schema.select_by_key_sql(), &[instance.key().to_value()])?;
        match rows.row(0) {
            Some(row) => {
                let stored = self.decode_row(instance.model(), &schema, &row)?;
                self.merge_stored(instance, stored)?;
                self.stats.record_reload();
                Ok(ReloadOutcome::Reloaded)
            }
            None => {
                self.mark_vanished(instance, delivery);
                Ok(ReloadOutcome::Deleted)
            }
        }
    }

    /// Discards unsaved changes, then reloads.
    ///
    /// With no local edits left a reload cannot conflict.
    ///
    /// # Errors
    ///
    /// Fails if the row cannot be read.
    pub fn reload_after_revert(&self, instance: &Instance) -> CoreResult<ReloadOutcome> {
        instance.revert_unsaved_changes();
        self.reload(instance)
    }

    /// Saves every live instance in scope that has unsaved changes.
    ///
    /// Returns the number of instances written. Refused and failed saves are
    /// reported through hooks and [`Instance::last_error`] as usual.
    ///
    /// # Errors
    ///
    /// Fails for an unknown scope or a closed database.
    pub fn save_all(&self, scope: &ModelScope) -> CoreResult<usize> {
        self.save_all_in(scope, &Delivery::Immediate)
    }

    pub(crate) fn save_all_in(&self, scope: &ModelScope, delivery: &Delivery<'_>) -> CoreResult<usize> {
        self.ensure_open()?;
        let mut saved = 0;
        for model in self.models.resolve(scope)? {
            for instance in self.identity.all_live(&model.name) {
                if !instance.has_unsaved_changes() {
                    continue;
                }
                if self.save_in(&instance, delivery)? == SaveResult::Succeeded {
                    saved += 1;
                }
            }
        }
        debug!(?scope, saved, "saved all");
        Ok(saved)
    }

    /// Marks an instance whose row is gone as deleted.
    pub(crate) fn mark_vanished(&self, instance: &Instance, delivery: &Delivery<'_>) {
        self.identity.unregister(instance);
        instance.with_data(|d| {
            d.deleted = true;
            d.exists = false;
        });
        let model = instance.model_name();
        debug!(model, key = %instance.key(), "row vanished, instance deleted");
        self.invalidate_cache(model, &AffectedFields::All);
        let fields = instance.schema().field_names().into_iter().collect();
        self.publish(delivery, model, ChangeKind::Delete, vec![instance.clone()], fields);
    }
}
