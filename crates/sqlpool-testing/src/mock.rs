//! In-memory mock driver.
//!
//! [`MockDriver`] counts every connection it opens and closes, returns
//! scripted rows and command tags, and fails operations on request. Its
//! connections track protocol state (open result set, open transaction) and
//! report misuse, so a connection returned to the pool in the wrong state
//! shows up in [`MockStats::misuse`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlpool::{BoxError, CommandTag, Connection, Driver, SqlValue};
use thiserror::Error;

/// A row produced by a mock query.
pub type MockRow = Vec<SqlValue>;

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// Opening a connection.
    Connect,
    /// Running a statement.
    Execute,
    /// Starting a query.
    Query,
    /// Reading a row.
    NextRow,
    /// Discarding unread rows.
    FinishQuery,
    /// Starting a transaction.
    Begin,
    /// Committing a transaction.
    Commit,
    /// Rolling back a transaction.
    Rollback,
}

/// Errors produced by mock connections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockError {
    /// A failure injected with [`MockDriver::fail_next`] or
    /// [`MockDriver::break_next`].
    #[error("injected {op:?} failure")]
    Injected {
        /// The operation that failed.
        op: MockOp,
    },

    /// The connection was broken by an earlier failure.
    #[error("connection {id} is broken")]
    Broken {
        /// Connection identifier.
        id: u64,
    },

    /// The connection was used in a state the protocol does not allow.
    #[error("connection {id}: {message}")]
    Misuse {
        /// Connection identifier.
        id: u64,
        /// What went wrong.
        message: &'static str,
    },
}

/// Counters kept by a [`MockDriver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    /// Connections opened.
    pub connects: u64,
    /// Connections closed.
    pub closes: u64,
    /// Connection attempts that failed.
    pub failed_connects: u64,
    /// Operations attempted in an invalid protocol state.
    pub misuse: u64,
}

impl MockStats {
    /// Connections opened and not yet closed.
    #[must_use]
    pub fn open(&self) -> u64 {
        self.connects.saturating_sub(self.closes)
    }
}

struct Failure {
    op: MockOp,
    fatal: bool,
}

#[derive(Default)]
struct Script {
    failures: VecDeque<Failure>,
    rows: HashMap<String, Vec<MockRow>>,
    tags: HashMap<String, CommandTag>,
    log: Vec<String>,
    connect_delay: Duration,
    close_delay: Duration,
}

#[derive(Default)]
struct Shared {
    next_id: AtomicU64,
    connects: AtomicU64,
    closes: AtomicU64,
    failed_connects: AtomicU64,
    misuse: AtomicU64,
    script: Mutex<Script>,
}

impl Shared {
    /// Remove the first pending failure for `op`; returns whether it is fatal.
    fn take_failure(&self, op: MockOp) -> Option<bool> {
        let mut script = self.script.lock();
        let index = script.failures.iter().position(|f| f.op == op)?;
        script.failures.remove(index).map(|f| f.fatal)
    }

    fn record(&self, entry: String) {
        tracing::trace!(entry = %entry, "mock driver");
        self.script.lock().log.push(entry);
    }
}

/// A driver whose connections live in memory.
///
/// Clones share counters and scripts, so keep one clone for assertions
/// after handing another to the pool.
#[derive(Clone, Default)]
pub struct MockDriver {
    shared: Arc<Shared>,
}

impl MockDriver {
    /// Create a driver with no scripted rows or failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `op` fail. The connection stays usable.
    pub fn fail_next(&self, op: MockOp) -> &Self {
        self.push_failure(op, false)
    }

    /// Make the next `op` fail and leave its connection broken.
    pub fn break_next(&self, op: MockOp) -> &Self {
        self.push_failure(op, true)
    }

    fn push_failure(&self, op: MockOp, fatal: bool) -> &Self {
        self.shared
            .script
            .lock()
            .failures
            .push_back(Failure { op, fatal });
        self
    }

    /// Rows returned by every query with exactly this SQL text.
    pub fn rows(&self, sql: impl Into<String>, rows: Vec<MockRow>) -> &Self {
        self.shared.script.lock().rows.insert(sql.into(), rows);
        self
    }

    /// Command tag returned by every statement with exactly this SQL text.
    ///
    /// Unscripted statements report their leading keyword with a zero count.
    pub fn command_tag(&self, sql: impl Into<String>, tag: impl Into<String>) -> &Self {
        self.shared
            .script
            .lock()
            .tags
            .insert(sql.into(), CommandTag::new(tag));
        self
    }

    /// Delay every connection attempt.
    pub fn connect_delay(&self, delay: Duration) -> &Self {
        self.shared.script.lock().connect_delay = delay;
        self
    }

    /// Delay every connection close.
    pub fn close_delay(&self, delay: Duration) -> &Self {
        self.shared.script.lock().close_delay = delay;
        self
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> MockStats {
        MockStats {
            connects: self.shared.connects.load(Ordering::SeqCst),
            closes: self.shared.closes.load(Ordering::SeqCst),
            failed_connects: self.shared.failed_connects.load(Ordering::SeqCst),
            misuse: self.shared.misuse.load(Ordering::SeqCst),
        }
    }

    /// Every operation run so far, as `"<connection id>: <operation>"`.
    #[must_use]
    pub fn log(&self) -> Vec<String> {
        self.shared.script.lock().log.clone()
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Connection = MockConnection;

    async fn connect(&self, _target: &str) -> Result<MockConnection, BoxError> {
        let delay = self.shared.script.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.shared.take_failure(MockOp::Connect).is_some() {
            self.shared.failed_connects.fetch_add(1, Ordering::SeqCst);
            return Err(MockError::Injected {
                op: MockOp::Connect,
            }
            .into());
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        self.shared.record(format!("{id}: CONNECT"));

        Ok(MockConnection {
            id,
            shared: Arc::clone(&self.shared),
            pending: None,
            in_transaction: false,
            broken: false,
        })
    }
}

/// A connection opened by [`MockDriver`].
pub struct MockConnection {
    id: u64,
    shared: Arc<Shared>,
    pending: Option<VecDeque<MockRow>>,
    in_transaction: bool,
    broken: bool,
}

impl MockConnection {
    /// Connection identifier, starting at 1 for each driver.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Whether a result set is open.
    #[must_use]
    pub fn has_open_result(&self) -> bool {
        self.pending.is_some()
    }

    fn check(&mut self, op: MockOp) -> Result<(), MockError> {
        if self.broken {
            return Err(MockError::Broken { id: self.id });
        }
        match self.shared.take_failure(op) {
            Some(fatal) => {
                self.broken |= fatal;
                self.shared.record(format!("{}: {op:?} FAILED", self.id));
                Err(MockError::Injected { op })
            }
            None => Ok(()),
        }
    }

    fn misuse(&self, message: &'static str) -> MockError {
        self.shared.misuse.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(connection_id = self.id, reason = message, "mock connection misused");
        MockError::Misuse {
            id: self.id,
            message,
        }
    }

    fn require_idle(&self) -> Result<(), MockError> {
        if self.pending.is_some() {
            return Err(self.misuse("result set still open"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    type Row = MockRow;

    async fn execute(&mut self, sql: &str, _args: &[SqlValue]) -> Result<CommandTag, BoxError> {
        self.require_idle()?;
        self.check(MockOp::Execute)?;
        self.shared.record(format!("{}: EXECUTE {sql}", self.id));

        let scripted = self.shared.script.lock().tags.get(sql).cloned();
        Ok(scripted.unwrap_or_else(|| {
            let keyword = sql.split_whitespace().next().unwrap_or_default();
            CommandTag::new(format!("{} 0", keyword.to_ascii_uppercase()))
        }))
    }

    async fn query(&mut self, sql: &str, _args: &[SqlValue]) -> Result<(), BoxError> {
        self.require_idle()?;
        self.check(MockOp::Query)?;
        self.shared.record(format!("{}: QUERY {sql}", self.id));

        let rows = self
            .shared
            .script
            .lock()
            .rows
            .get(sql)
            .cloned()
            .unwrap_or_default();
        self.pending = Some(rows.into());
        Ok(())
    }

    async fn next_row(&mut self) -> Result<Option<MockRow>, BoxError> {
        if self.pending.is_none() {
            return Err(self.misuse("no open result set").into());
        }
        if let Err(e) = self.check(MockOp::NextRow) {
            self.pending = None;
            return Err(e.into());
        }

        let row = self.pending.as_mut().and_then(VecDeque::pop_front);
        if row.is_none() {
            self.pending = None;
        }
        Ok(row)
    }

    async fn finish_query(&mut self) -> Result<(), BoxError> {
        if self.pending.is_none() {
            return Err(self.misuse("no open result set").into());
        }
        let result = self.check(MockOp::FinishQuery);
        self.pending = None;
        result?;
        self.shared.record(format!("{}: FINISH", self.id));
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), BoxError> {
        self.require_idle()?;
        if self.in_transaction {
            return Err(self.misuse("transaction already open").into());
        }
        self.check(MockOp::Begin)?;
        self.in_transaction = true;
        self.shared.record(format!("{}: BEGIN", self.id));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BoxError> {
        if !self.in_transaction {
            return Err(self.misuse("no open transaction").into());
        }
        // The transaction is over whether or not the commit succeeds.
        self.in_transaction = false;
        self.check(MockOp::Commit)?;
        self.shared.record(format!("{}: COMMIT", self.id));
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BoxError> {
        if !self.in_transaction {
            return Err(self.misuse("no open transaction").into());
        }
        self.in_transaction = false;
        self.check(MockOp::Rollback)?;
        self.shared.record(format!("{}: ROLLBACK", self.id));
        Ok(())
    }

    async fn close(self) -> Result<(), BoxError> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.shared.record(format!("{}: CLOSE", self.id));

        let delay = self.shared.script.lock().close_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}
