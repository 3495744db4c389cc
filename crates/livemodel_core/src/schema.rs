//! Per-model schema derived from the table definition.

use crate::error::{CoreError, CoreResult};
use crate::types::Key;
use livemodel_channel::ColumnInfo;
use livemodel_codec::{FieldInfo, FieldType, Value};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\$(PK|T)\b").expect("placeholder pattern is valid")
});

/// The mapped shape of one model: table, primary key and field descriptors.
///
/// Computed once, the first time the model is used, and immutable
/// afterwards. Ignored columns are not part of the schema.
#[derive(Debug)]
pub struct ModelSchema {
    model: String,
    table: String,
    primary_key: String,
    pk_index: usize,
    fields: Vec<FieldInfo>,
    index: HashMap<String, usize>,
    // NOT NULL without a SQL default: the engine would reject an insert
    // that leaves these out.
    required_on_insert: Vec<bool>,
    select_sql: String,
}

impl ModelSchema {
    pub(crate) fn from_columns(
        model: &str,
        table: &str,
        configured_pk: Option<&str>,
        ignored: &BTreeSet<String>,
        columns: Vec<ColumnInfo>,
    ) -> CoreResult<Self> {
        if columns.is_empty() {
            return Err(CoreError::schema(model, format!("table {table} does not exist")));
        }

        let primary_key = match configured_pk {
            Some(name) => {
                if !columns.iter().any(|c| c.name == name) {
                    return Err(CoreError::schema(
                        model,
                        format!("configured primary key {name} is not a column of {table}"),
                    ));
                }
                name.to_string()
            }
            None => {
                let declared: Vec<&ColumnInfo> =
                    columns.iter().filter(|c| c.primary_key_position > 0).collect();
                match declared.as_slice() {
                    [single] => single.name.clone(),
                    [] => {
                        return Err(CoreError::schema(
                            model,
                            format!("table {table} has no primary key"),
                        ))
                    }
                    _ => {
                        return Err(CoreError::schema(
                            model,
                            "composite primary keys are not supported",
                        ))
                    }
                }
            }
        };

        if ignored.contains(&primary_key) {
            return Err(CoreError::schema(model, "the primary key cannot be ignored"));
        }

        let mut fields = Vec::with_capacity(columns.len());
        let mut required_on_insert = Vec::with_capacity(columns.len());
        for column in columns.into_iter().filter(|c| !ignored.contains(&c.name)) {
            required_on_insert.push(column.not_null && column.default_sql.is_none());
            fields.push(FieldInfo::from_column(
                column.name,
                &column.declared_type,
                column.not_null,
                column.default_sql.as_deref(),
            ));
        }

        let index: HashMap<String, usize> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        let pk_index = index
            .get(&primary_key)
            .copied()
            .ok_or_else(|| CoreError::schema(model, "primary key column missing"))?;

        let columns_sql = fields
            .iter()
            .map(|f| quote_ident(&f.name))
            .collect::<Vec<_>>()
            .join(", ");
        let select_sql = format!("SELECT {columns_sql} FROM {}", quote_ident(table));

        Ok(Self {
            model: model.to_string(),
            table: table.to_string(),
            primary_key,
            pk_index,
            fields,
            index,
            required_on_insert,
            select_sql,
        })
    }

    /// Model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Primary-key field name.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Descriptor of the primary-key field.
    pub fn primary_key_field(&self) -> &FieldInfo {
        &self.fields[self.pk_index]
    }

    /// All field descriptors, in column order.
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    /// Looks up a field descriptor.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// Field names, in column order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub(crate) fn field_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn pk_index(&self) -> usize {
        self.pk_index
    }

    pub(crate) fn required_on_insert(&self, index: usize) -> bool {
        self.required_on_insert[index]
    }

    /// Initial values of a new instance with the given key.
    pub(crate) fn default_values(&self, key: &Key) -> Vec<Value> {
        let mut values: Vec<Value> = self.fields.iter().map(|f| f.default_value.clone()).collect();
        values[self.pk_index] = key.to_value();
        values
    }

    /// Converts a key to the primary-key column's type.
    pub(crate) fn normalize_key(&self, key: Key) -> CoreResult<Key> {
        match (self.primary_key_field().field_type, key) {
            (FieldType::Integer, Key::Text(text)) => text
                .trim()
                .parse::<i64>()
                .map(Key::Integer)
                .map_err(|_| {
                    CoreError::invalid_operation(format!(
                        "key {text:?} is not an integer, as {}.{} requires",
                        self.model, self.primary_key
                    ))
                }),
            (FieldType::Text, Key::Integer(n)) => Ok(Key::Text(n.to_string())),
            (_, key) => Ok(key),
        }
    }

    /// `SELECT <fields> FROM <table>`.
    pub(crate) fn select_sql(&self) -> &str {
        &self.select_sql
    }

    /// `SELECT <fields> FROM <table> WHERE <pk> = ?`.
    pub(crate) fn select_by_key_sql(&self) -> String {
        format!("{} WHERE {} = ?", self.select_sql, quote_ident(&self.primary_key))
    }

    /// `SELECT <fields> FROM <table> WHERE <pk> IN (?, ...)`.
    pub(crate) fn select_by_keys_sql(&self, count: usize) -> String {
        format!(
            "{} WHERE {} IN ({})",
            self.select_sql,
            quote_ident(&self.primary_key),
            placeholders(count)
        )
    }

    /// Replaces `$T` with the quoted table name and `$PK` with the quoted
    /// primary-key name.
    pub fn expand_placeholders(&self, sql: &str) -> String {
        PLACEHOLDER
            .replace_all(sql, |caps: &Captures<'_>| match &caps[1] {
                "T" => quote_ident(&self.table),
                _ => quote_ident(&self.primary_key),
            })
            .into_owned()
    }
}

/// Quotes an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `?, ?, ...` with `count` markers.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
