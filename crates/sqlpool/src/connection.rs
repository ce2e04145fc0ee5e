//! Connections borrowed from the pool.

use std::fmt;
use std::ops::{Deref, DerefMut};

use sqlpool_resource::{Resource, ResourceMetadata};

use crate::driver::{Connection, Driver};
use crate::error::{Error, Result};
use crate::instrumentation::{self, span_names};
use crate::manager::ConnectionManager;
use crate::rows::{PoolRow, PoolRows};
use crate::transaction::PoolTransaction;
use crate::value::{CommandTag, SqlValue};

/// Row type produced by a driver's connections.
pub type DriverRow<D> = <<D as Driver>::Connection as Connection>::Row;

/// A connection borrowed from a [`Pool`](crate::Pool).
///
/// Dereferences to the driver's connection. Dropping it returns the
/// connection to the pool; a connection reporting
/// [`is_broken`](Connection::is_broken) is closed instead.
pub struct PoolConnection<D: Driver> {
    resource: Resource<ConnectionManager<D>>,
}

impl<D: Driver> PoolConnection<D> {
    pub(crate) fn new(resource: Resource<ConnectionManager<D>>) -> Self {
        Self { resource }
    }

    /// Pool-assigned identifier of this connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.resource.id()
    }

    /// Lifecycle metadata of this connection.
    #[must_use]
    pub fn metadata(&self) -> &ResourceMetadata {
        self.resource.metadata()
    }

    /// Run a statement that returns no rows.
    pub async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<CommandTag> {
        instrumentation::log_statement(span_names::EXECUTE, self.id(), sql, args);
        let tag = self
            .resource
            .execute(sql, args)
            .await
            .map_err(Error::protocol)?;
        tracing::trace!(
            connection_id = self.id(),
            rows_affected = tag.rows_affected(),
            "statement complete"
        );
        Ok(tag)
    }

    /// Start a query and hand this connection to the returned cursor.
    ///
    /// If the query cannot be started the connection goes straight back to
    /// the pool and the cursor carries the failure.
    pub async fn query_rows(mut self, sql: &str, args: &[SqlValue]) -> PoolRows<D> {
        instrumentation::log_statement(span_names::QUERY, self.id(), sql, args);
        match self.resource.query(sql, args).await {
            Ok(()) => PoolRows::open(self),
            Err(e) => {
                self.release();
                PoolRows::failed(Error::protocol(e))
            }
        }
    }

    /// Start a query whose first row is read by [`PoolRow::get`].
    pub async fn query_row(mut self, sql: &str, args: &[SqlValue]) -> PoolRow<D> {
        instrumentation::log_statement(span_names::QUERY_ROW, self.id(), sql, args);
        match self.resource.query(sql, args).await {
            Ok(()) => PoolRow::pending(self),
            Err(e) => {
                self.release();
                PoolRow::failed(Error::protocol(e))
            }
        }
    }

    /// Start a transaction on this connection.
    ///
    /// On failure the connection is returned to the pool before the error
    /// is reported.
    pub async fn begin(mut self) -> Result<PoolTransaction<D>> {
        tracing::debug!(connection_id = self.id(), "beginning transaction");
        match self.resource.begin().await {
            Ok(()) => Ok(PoolTransaction::new(self)),
            Err(e) => {
                self.release();
                Err(Error::protocol(e))
            }
        }
    }

    /// Return the connection to the pool.
    pub fn release(self) {
        self.resource.release();
    }

    /// Close the connection instead of returning it to the pool.
    pub fn destroy(self) {
        self.resource.destroy();
    }
}

impl<D: Driver> Deref for PoolConnection<D> {
    type Target = D::Connection;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<D: Driver> DerefMut for PoolConnection<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.resource
    }
}

impl<D: Driver> fmt::Debug for PoolConnection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConnection")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}
