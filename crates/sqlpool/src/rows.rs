//! Cursors and single-row results that own a borrowed connection.
//!
//! Both types hold the pool connection until their terminal event and
//! return it exactly once: a cursor when its rows are exhausted, when a read
//! fails or when it is closed; a single-row result once its row has been
//! read. A cursor or row created from a failed call carries only the error
//! and never touches the pool.

use std::fmt;

use futures_core::Stream;

use crate::connection::{DriverRow, PoolConnection};
use crate::driver::{Connection, Driver};
use crate::error::{Error, Result};

enum RowsState<D: Driver> {
    Open(PoolConnection<D>),
    Closed,
    Failed(Error),
}

/// A cursor over the rows of a query run on a pooled connection.
///
/// Returned by [`Pool::query_rows`](crate::Pool::query_rows). If the query
/// could not be started, the cursor holds the failure and every read returns
/// it.
///
/// Dropping a cursor that still has unread rows closes its connection
/// rather than returning it with a result set in flight; call
/// [`close`](PoolRows::close) to drain the rows and keep the connection.
pub struct PoolRows<D: Driver> {
    state: RowsState<D>,
}

impl<D: Driver> PoolRows<D> {
    pub(crate) fn open(conn: PoolConnection<D>) -> Self {
        Self {
            state: RowsState::Open(conn),
        }
    }

    pub(crate) fn failed(err: Error) -> Self {
        Self {
            state: RowsState::Failed(err),
        }
    }

    /// Read the next row.
    ///
    /// Returns `Ok(None)` once the rows are exhausted; the connection is
    /// returned to the pool at that point. A read error also returns the
    /// connection and is repeated by every later call.
    pub async fn next(&mut self) -> Result<Option<DriverRow<D>>> {
        let conn = match &mut self.state {
            RowsState::Open(conn) => conn,
            RowsState::Closed => return Ok(None),
            RowsState::Failed(err) => return Err(err.clone()),
        };

        match conn.next_row().await {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.finish(RowsState::Closed);
                Ok(None)
            }
            Err(e) => {
                let err = Error::protocol(e);
                self.finish(RowsState::Failed(err.clone()));
                Err(err)
            }
        }
    }

    /// Discard any unread rows and return the connection to the pool.
    ///
    /// Closing an already closed or failed cursor does nothing.
    pub async fn close(&mut self) -> Result<()> {
        let RowsState::Open(conn) = &mut self.state else {
            return Ok(());
        };

        match conn.finish_query().await {
            Ok(()) => {
                self.finish(RowsState::Closed);
                Ok(())
            }
            Err(e) => {
                let err = Error::protocol(e);
                self.finish(RowsState::Failed(err.clone()));
                Err(err)
            }
        }
    }

    /// The failure this cursor carries, if any.
    #[must_use]
    pub fn err(&self) -> Option<&Error> {
        match &self.state {
            RowsState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the cursor still holds a connection.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.state, RowsState::Open(_))
    }

    /// Read all remaining rows.
    pub async fn collect(mut self) -> Result<Vec<DriverRow<D>>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Adapt the cursor into a [`Stream`] of rows.
    ///
    /// The stream ends after the last row or after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<DriverRow<D>>> + Send {
        futures_util::stream::try_unfold(self, |mut rows| async move {
            let row = rows.next().await?;
            Ok::<_, Error>(row.map(|row| (row, rows)))
        })
    }

    fn finish(&mut self, next: RowsState<D>) {
        if let RowsState::Open(conn) = std::mem::replace(&mut self.state, next) {
            tracing::trace!(connection_id = conn.id(), "cursor finished");
            conn.release();
        }
    }
}

impl<D: Driver> Drop for PoolRows<D> {
    fn drop(&mut self) {
        if let RowsState::Open(conn) = std::mem::replace(&mut self.state, RowsState::Closed) {
            tracing::debug!(
                connection_id = conn.id(),
                "cursor dropped with unread rows, closing connection"
            );
            conn.destroy();
        }
    }
}

impl<D: Driver> fmt::Debug for PoolRows<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            RowsState::Open(conn) => format!("Open({})", conn.id()),
            RowsState::Closed => "Closed".to_owned(),
            RowsState::Failed(err) => format!("Failed({err})"),
        };
        f.debug_struct("PoolRows").field("state", &state).finish()
    }
}

enum RowState<D: Driver> {
    Pending(PoolConnection<D>),
    Failed(Error),
}

/// The result of a query expected to produce a single row.
///
/// Returned by [`Pool::query_row`](crate::Pool::query_row). The row is read,
/// and the connection returned, by [`get`](PoolRow::get).
pub struct PoolRow<D: Driver> {
    state: Option<RowState<D>>,
}

impl<D: Driver> PoolRow<D> {
    pub(crate) fn pending(conn: PoolConnection<D>) -> Self {
        Self {
            state: Some(RowState::Pending(conn)),
        }
    }

    pub(crate) fn failed(err: Error) -> Self {
        Self {
            state: Some(RowState::Failed(err)),
        }
    }

    /// Read the first row and discard the rest.
    ///
    /// Returns [`Error::NoRows`] if the query produced no rows. The
    /// connection is returned to the pool whether or not the read succeeds.
    pub async fn get(mut self) -> Result<DriverRow<D>> {
        let conn = match &mut self.state {
            Some(RowState::Pending(conn)) => conn,
            Some(RowState::Failed(err)) => return Err(err.clone()),
            None => return Err(Error::NoRows),
        };

        let result = read_single(&mut **conn).await;
        if let Some(RowState::Pending(conn)) = self.state.take() {
            conn.release();
        }
        result
    }

    /// The failure this row carries, if any.
    #[must_use]
    pub fn err(&self) -> Option<&Error> {
        match &self.state {
            Some(RowState::Failed(err)) => Some(err),
            _ => None,
        }
    }
}

impl<D: Driver> Drop for PoolRow<D> {
    fn drop(&mut self) {
        if let Some(RowState::Pending(conn)) = self.state.take() {
            tracing::debug!(
                connection_id = conn.id(),
                "row result dropped before it was read, closing connection"
            );
            conn.destroy();
        }
    }
}

impl<D: Driver> fmt::Debug for PoolRow<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            Some(RowState::Pending(conn)) => format!("Pending({})", conn.id()),
            Some(RowState::Failed(err)) => format!("Failed({err})"),
            None => "Done".to_owned(),
        };
        f.debug_struct("PoolRow").field("state", &state).finish()
    }
}

/// Read the first row of the open result set and end it.
pub(crate) async fn read_single<C: Connection>(conn: &mut C) -> Result<C::Row> {
    match conn.next_row().await.map_err(Error::protocol)? {
        Some(row) => {
            conn.finish_query().await.map_err(Error::protocol)?;
            Ok(row)
        }
        None => Err(Error::NoRows),
    }
}
