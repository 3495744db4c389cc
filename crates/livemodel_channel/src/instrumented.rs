//! A channel wrapper that counts statements and injects failures.

use crate::channel::{ColumnInfo, ResultSet, StatementChannel};
use crate::error::{ChannelError, ChannelResult};
use livemodel_codec::Value;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Wraps a channel and records how it is used.
///
/// Useful in tests that assert "no I/O happened" or that need a write to
/// fail without corrupting the underlying database.
pub struct InstrumentedChannel<C> {
    inner: C,
    executes: AtomicU64,
    queries: AtomicU64,
    fail_executes: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl<C: StatementChannel> InstrumentedChannel<C> {
    /// Wraps `inner`.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            executes: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            fail_executes: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Number of `execute` calls so far (including injected failures).
    pub fn execute_count(&self) -> u64 {
        self.executes.load(Ordering::SeqCst)
    }

    /// Number of `query` calls so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    /// Total statements issued through `execute` and `query`.
    pub fn statement_count(&self) -> u64 {
        self.execute_count() + self.query_count()
    }

    /// Makes the next `n` calls to `execute` fail with
    /// [`ChannelError::Rejected`] without reaching the inner channel.
    pub fn fail_next_executes(&self, n: usize) {
        self.fail_executes.store(n, Ordering::SeqCst);
    }

    /// The SQL text of every statement issued, oldest first.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Clears counters and the statement log.
    pub fn reset(&self) {
        self.executes.store(0, Ordering::SeqCst);
        self.queries.store(0, Ordering::SeqCst);
        self.log.lock().clear();
    }

    /// The wrapped channel.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn take_failure(&self) -> bool {
        self.fail_executes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<C: StatementChannel> StatementChannel for InstrumentedChannel<C> {
    fn execute(&self, sql: &str, args: &[Value]) -> ChannelResult<u64> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(sql.to_string());
        if self.take_failure() {
            return Err(ChannelError::rejected("injected failure"));
        }
        self.inner.execute(sql, args)
    }

    fn query(&self, sql: &str, args: &[Value]) -> ChannelResult<ResultSet> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(sql.to_string());
        self.inner.query(sql, args)
    }

    fn execute_batch(&self, sql: &str) -> ChannelResult<()> {
        self.inner.execute_batch(sql)
    }

    fn table_info(&self, table: &str) -> ChannelResult<Vec<ColumnInfo>> {
        self.inner.table_info(table)
    }

    fn close(&self) -> ChannelResult<()> {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
