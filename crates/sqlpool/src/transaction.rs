//! Transactions on a pooled connection.

use std::fmt;

use crate::connection::{DriverRow, PoolConnection};
use crate::driver::{Connection, Driver};
use crate::error::{Error, Result};
use crate::instrumentation::{self, span_names};
use crate::rows::read_single;
use crate::value::{CommandTag, SqlValue};

/// A transaction holding a connection borrowed from the pool.
///
/// Created by [`Pool::begin_transaction`](crate::Pool::begin_transaction).
/// [`commit`](PoolTransaction::commit) and
/// [`rollback`](PoolTransaction::rollback) return the connection to the pool
/// whether or not the server accepts the command.
///
/// A transaction dropped without either is left open on the server, so its
/// connection is closed rather than reused.
pub struct PoolTransaction<D: Driver> {
    conn: Option<PoolConnection<D>>,
}

impl<D: Driver> PoolTransaction<D> {
    pub(crate) fn new(conn: PoolConnection<D>) -> Self {
        Self { conn: Some(conn) }
    }

    /// Identifier of the connection the transaction runs on.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.conn.as_ref().map_or(0, PoolConnection::id)
    }

    /// Run a statement inside the transaction.
    pub async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<CommandTag> {
        self.conn_mut().execute(sql, args).await
    }

    /// Run a query inside the transaction and read its first row.
    ///
    /// Returns [`Error::NoRows`] if the query produced no rows.
    pub async fn query_row(&mut self, sql: &str, args: &[SqlValue]) -> Result<DriverRow<D>> {
        let conn = self.conn_mut();
        instrumentation::log_statement(span_names::QUERY_ROW, conn.id(), sql, args);
        conn.query(sql, args).await.map_err(Error::protocol)?;
        read_single(&mut **conn).await
    }

    /// Commit the transaction and return the connection to the pool.
    pub async fn commit(mut self) -> Result<()> {
        tracing::debug!(connection_id = self.connection_id(), "committing transaction");
        let result = self.conn_mut().commit().await.map_err(Error::protocol);
        self.finish();
        result
    }

    /// Roll back the transaction and return the connection to the pool.
    pub async fn rollback(mut self) -> Result<()> {
        tracing::debug!(
            connection_id = self.connection_id(),
            "rolling back transaction"
        );
        let result = self.conn_mut().rollback().await.map_err(Error::protocol);
        self.finish();
        result
    }

    #[allow(clippy::expect_used)]
    fn conn_mut(&mut self) -> &mut PoolConnection<D> {
        // Only `Drop` observes the connection taken.
        self.conn
            .as_mut()
            .expect("transaction connection taken before drop")
    }

    fn finish(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.release();
        }
    }
}

impl<D: Driver> Drop for PoolTransaction<D> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(
                connection_id = conn.id(),
                "transaction dropped without commit or rollback, closing connection"
            );
            conn.destroy();
        }
    }
}

impl<D: Driver> fmt::Debug for PoolTransaction<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolTransaction")
            .field("connection_id", &self.connection_id())
            .finish()
    }
}
