//! Statement channel trait and result types.

use crate::error::ChannelResult;
use livemodel_codec::Value;
use std::sync::Arc;

/// The single execution path for every statement the runtime issues.
///
/// Implementations must serialize access: at most one statement is in
/// flight at a time, and calls are executed in the order they acquire the
/// channel. This makes each individual statement atomic relative to the
/// others, but not multi-step logic built around several statements.
///
/// # Invariants
///
/// - `execute` returns the number of rows the statement changed
/// - `query` returns every row the statement produced, in engine order
/// - after `close`, every call fails with [`ChannelError::Closed`](crate::ChannelError::Closed)
/// - implementations must be `Send + Sync`
pub trait StatementChannel: Send + Sync {
    /// Executes a statement that does not return rows.
    ///
    /// Arguments bind to `?` placeholders in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the statement or the channel
    /// is closed.
    fn execute(&self, sql: &str, args: &[Value]) -> ChannelResult<u64>;

    /// Executes a statement and collects its rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the statement or the channel
    /// is closed.
    fn query(&self, sql: &str, args: &[Value]) -> ChannelResult<ResultSet>;

    /// Executes a batch of `;`-separated statements without arguments.
    ///
    /// Used for schema setup.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    fn execute_batch(&self, sql: &str) -> ChannelResult<()>;

    /// Describes the columns of a table, in declaration order.
    ///
    /// Returns an empty list if the table does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    fn table_info(&self, table: &str) -> ChannelResult<Vec<ColumnInfo>>;

    /// Closes the channel. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying connection fails to close cleanly.
    fn close(&self) -> ChannelResult<()>;

    /// Returns true once the channel has been closed.
    fn is_closed(&self) -> bool;
}

/// Column metadata reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type, verbatim (may be empty).
    pub declared_type: String,
    /// Whether the column is declared NOT NULL.
    pub not_null: bool,
    /// The default expression, verbatim.
    pub default_sql: Option<String>,
    /// 1-based position in the primary key, or 0 if not part of it.
    pub primary_key_position: u32,
}

/// The materialized result of a query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultSet {
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Creates a result set from column names and row values.
    ///
    /// Every row must have one value per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self {
            columns: columns.into(),
            rows,
        }
    }

    /// Column names, in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the query produced no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the row at `index`.
    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Iterates over rows.
    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Returns the first column of every row.
    pub fn first_column(&self) -> Vec<Value> {
        self.rows
            .iter()
            .filter_map(|r| r.first().cloned())
            .collect()
    }

    /// Returns the first value of the first row.
    pub fn first_value(&self) -> Option<Value> {
        self.rows.first().and_then(|r| r.first().cloned())
    }

    /// Consumes the set, returning the raw rows.
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }
}

/// A borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    /// Returns the value of the named column.
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Returns the value at a column index.
    pub fn get_index(&self, index: usize) -> Option<&'a Value> {
        self.values.get(index)
    }

    /// Iterates over (column, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        ResultSet::new(
            vec!["id".into(), "name".into()],
            vec![
                vec![Value::Integer(1), Value::from("a")],
                vec![Value::Integer(2), Value::from("b")],
            ],
        )
    }

    #[test]
    fn rows_by_name_and_index() {
        let rs = sample();
        let row = rs.row(1).unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("b")));
        assert_eq!(row.get_index(0), Some(&Value::Integer(2)));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn first_column_and_value() {
        let rs = sample();
        assert_eq!(rs.first_column(), vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(rs.first_value(), Some(Value::Integer(1)));
        assert!(ResultSet::default().first_value().is_none());
    }

    #[test]
    fn iterate_pairs() {
        let rs = sample();
        let pairs: Vec<_> = rs.row(0).unwrap().iter().collect();
        assert_eq!(pairs, vec![("id", &Value::Integer(1)), ("name", &Value::from("a"))]);
    }
}
