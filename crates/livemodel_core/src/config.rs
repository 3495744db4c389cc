//! Database configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of primary keys per `IN (...)` statement when live
    /// instances are reloaded after an external change.
    pub reload_batch_size: usize,

    /// Whether cached queries and cached objects are memoized. When false
    /// the query or generator runs on every call.
    pub query_cache_enabled: bool,

    /// Whether `execute_update_query` without an explicit model infers the
    /// affected tables from the statement text. When false, or when nothing
    /// can be inferred, every model is reconciled.
    pub infer_external_tables: bool,

    /// Whether generated statements are logged at `debug` level.
    pub log_statements: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reload_batch_size: 500,
            query_cache_enabled: true,
            infer_external_tables: true,
            log_statements: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reload batch size. Zero is treated as one.
    #[must_use]
    pub const fn reload_batch_size(mut self, size: usize) -> Self {
        self.reload_batch_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets whether the query cache is used.
    #[must_use]
    pub const fn query_cache_enabled(mut self, value: bool) -> Self {
        self.query_cache_enabled = value;
        self
    }

    /// Sets whether external statements are scanned for target tables.
    #[must_use]
    pub const fn infer_external_tables(mut self, value: bool) -> Self {
        self.infer_external_tables = value;
        self
    }

    /// Sets whether generated statements are logged.
    #[must_use]
    pub const fn log_statements(mut self, value: bool) -> Self {
        self.log_statements = value;
        self
    }
}
