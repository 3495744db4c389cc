//! SQLite statement channel.

use crate::channel::{ColumnInfo, ResultSet, StatementChannel};
use crate::error::{ChannelError, ChannelResult};
use livemodel_codec::Value;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

/// Connection settings for [`SqliteChannel`].
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// How long to wait on a locked database file before failing.
    pub busy_timeout: Duration,
    /// Whether `PRAGMA foreign_keys` is enabled.
    pub foreign_keys: bool,
    /// Journal mode to set on open, e.g. `"WAL"`. `None` keeps the default.
    pub journal_mode: Option<&'static str>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            foreign_keys: true,
            journal_mode: None,
        }
    }
}

impl SqliteConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the busy timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets whether foreign keys are enforced.
    #[must_use]
    pub const fn foreign_keys(mut self, value: bool) -> Self {
        self.foreign_keys = value;
        self
    }

    /// Sets the journal mode.
    #[must_use]
    pub const fn journal_mode(mut self, mode: &'static str) -> Self {
        self.journal_mode = Some(mode);
        self
    }
}

/// A statement channel over a single SQLite connection.
///
/// The connection sits behind a mutex, so every statement runs to completion
/// before the next one starts. Callers are served in lock acquisition order.
///
/// # Example
///
/// ```rust
/// use livemodel_channel::{SqliteChannel, StatementChannel};
/// use livemodel_codec::Value;
///
/// let channel = SqliteChannel::open_in_memory().unwrap();
/// channel.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
/// let changed = channel.execute("INSERT INTO t VALUES (?, ?)", &[Value::Integer(1), Value::from("a")]).unwrap();
/// assert_eq!(changed, 1);
/// ```
pub struct SqliteChannel {
    conn: Mutex<Option<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteChannel {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or configured.
    pub fn open(path: impl AsRef<Path>, config: &SqliteConfig) -> ChannelResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        configure(&conn, config)?;
        debug!(path = %path.display(), "opened sqlite channel");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> ChannelResult<Self> {
        Self::open_in_memory_with(&SqliteConfig::default())
    }

    /// Opens a private in-memory database with explicit settings.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory_with(config: &SqliteConfig) -> ChannelResult<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn, config)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: None,
        })
    }

    /// Path of the database file, or `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> ChannelResult<T>) -> ChannelResult<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(ChannelError::Closed)?;
        f(conn)
    }
}

fn configure(conn: &Connection, config: &SqliteConfig) -> ChannelResult<()> {
    conn.busy_timeout(config.busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
    if let Some(mode) = config.journal_mode {
        let actual: String =
            conn.pragma_update_and_check(None, "journal_mode", mode, |row| row.get(0))?;
        debug!(requested = mode, actual = %actual, "journal mode set");
    }
    Ok(())
}

impl std::fmt::Debug for SqliteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteChannel")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StatementChannel for SqliteChannel {
    fn execute(&self, sql: &str, args: &[Value]) -> ChannelResult<u64> {
        let params = bind_all(args)?;
        self.with_conn(|conn| {
            trace!(sql, args = args.len(), "execute");
            let mut stmt = conn.prepare_cached(sql)?;
            let changed = stmt.execute(params_from_iter(params.iter()))?;
            Ok(changed as u64)
        })
    }

    fn query(&self, sql: &str, args: &[Value]) -> ChannelResult<ResultSet> {
        let params = bind_all(args)?;
        self.with_conn(|conn| {
            trace!(sql, args = args.len(), "query");
            let mut stmt = conn.prepare_cached(sql)?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let width = columns.len();

            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(from_sql(row.get_ref(i)?));
                }
                out.push(values);
            }
            Ok(ResultSet::new(columns, out))
        })
    }

    fn execute_batch(&self, sql: &str) -> ChannelResult<()> {
        self.with_conn(|conn| {
            trace!(sql, "execute batch");
            conn.execute_batch(sql)?;
            Ok(())
        })
    }

    fn table_info(&self, table: &str) -> ChannelResult<Vec<ColumnInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
            )?;
            let columns = stmt
                .query_map([table], |row| {
                    Ok(ColumnInfo {
                        name: row.get(0)?,
                        declared_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        not_null: row.get::<_, i64>(2)? != 0,
                        default_sql: row.get(3)?,
                        primary_key_position: row.get::<_, u32>(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(columns)
        })
    }

    fn close(&self) -> ChannelResult<()> {
        let Some(conn) = self.conn.lock().take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, err)| ChannelError::Sqlite(err))?;
        debug!(path = ?self.path, "closed sqlite channel");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }
}

fn bind_all(args: &[Value]) -> ChannelResult<Vec<SqlValue>> {
    args.iter().map(to_sql).collect()
}

fn to_sql(value: &Value) -> ChannelResult<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(n) => SqlValue::Integer(*n),
        Value::Real(n) => SqlValue::Real(*n),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        other @ (Value::Array(_) | Value::Map(_)) => {
            return Err(ChannelError::UnbindableValue {
                kind: other.kind_name(),
            })
        }
    })
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Integer(n),
        ValueRef::Real(n) => Value::Real(n),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}
