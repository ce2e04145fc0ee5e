//! Database driver seam.
//!
//! The pool never speaks a wire protocol itself. A [`Driver`] opens
//! connections to a target, and each [`Connection`] runs statements, streams
//! result rows and drives transactions. Implement both traits to pool any
//! database client.

use async_trait::async_trait;

use crate::error::BoxError;
use crate::value::{CommandTag, SqlValue};

/// Opens connections to a database.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Connection type produced by this driver.
    type Connection: Connection;

    /// Open a new connection to `target`.
    ///
    /// `target` is the connection string given to
    /// [`Pool::connect`](crate::Pool::connect); its format is up to the driver.
    async fn connect(&self, target: &str) -> Result<Self::Connection, BoxError>;
}

/// A live connection to a database.
///
/// A connection has at most one open result set. After
/// [`query`](Connection::query) succeeds, rows are read with
/// [`next_row`](Connection::next_row) until it returns `None` or an error, or
/// the remainder is discarded with [`finish_query`](Connection::finish_query).
/// A failed `query` leaves no result set open.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Row type produced by queries.
    type Row: Send + 'static;

    /// Run a statement that returns no rows.
    async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<CommandTag, BoxError>;

    /// Start a query, opening a result set.
    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<(), BoxError>;

    /// Read the next row of the open result set.
    ///
    /// Returns `None` once the result set is exhausted, which also ends it.
    async fn next_row(&mut self) -> Result<Option<Self::Row>, BoxError>;

    /// Discard any unread rows and end the open result set.
    async fn finish_query(&mut self) -> Result<(), BoxError>;

    /// Start a transaction.
    async fn begin(&mut self) -> Result<(), BoxError>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<(), BoxError>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<(), BoxError>;

    /// Close the connection gracefully.
    async fn close(self) -> Result<(), BoxError>;

    /// Whether the connection can no longer be used.
    ///
    /// Broken connections are destroyed instead of being returned to the
    /// idle set. Drivers should report `true` after an I/O failure or an
    /// operation interrupted midway.
    fn is_broken(&self) -> bool {
        false
    }
}
