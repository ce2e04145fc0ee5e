//! Connection pool.

use std::fmt;

use sqlpool_resource::{CancellationToken, ResourcePool, Stat};

use crate::config::PoolConfig;
use crate::connection::PoolConnection;
use crate::driver::Driver;
use crate::error::Result;
use crate::instrumentation::span_names;
use crate::manager::ConnectionManager;
use crate::rows::{PoolRow, PoolRows};
use crate::transaction::PoolTransaction;
use crate::value::{CommandTag, SqlValue};

/// A pool of database connections.
///
/// The pool opens connections on demand up to
/// [`max_connections`](PoolConfig::max_connections) and keeps them open until
/// it is closed. When every connection is in use, callers wait in arrival
/// order for one to be returned.
///
/// The convenience methods ([`execute`](Pool::execute),
/// [`query_rows`](Pool::query_rows), [`query_row`](Pool::query_row),
/// [`begin_transaction`](Pool::begin_transaction)) borrow a connection for
/// the duration of one operation. They wait as long as it takes for a
/// connection; wrap them in [`tokio::time::timeout`] to bound the wait.
///
/// Cloning a pool is cheap and shares the same connections.
///
/// # Example
///
/// ```rust,ignore
/// use sqlpool::{Pool, SqlValue};
///
/// let pool = Pool::connect(driver, "postgres://localhost/app").await?;
///
/// pool.execute("INSERT INTO users (name) VALUES ($1)", &["alice".into()])
///     .await?;
///
/// let mut rows = pool.query_rows("SELECT id, name FROM users", &[]).await;
/// while let Some(row) = rows.next().await? {
///     println!("{row:?}");
/// }
///
/// pool.close().await;
/// ```
pub struct Pool<D: Driver> {
    pool: ResourcePool<ConnectionManager<D>>,
    config: PoolConfig,
}

impl<D: Driver> Pool<D> {
    /// Create a pool with the default configuration and open its first
    /// connection.
    pub async fn connect(driver: D, target: impl Into<String>) -> Result<Self> {
        Self::connect_with(driver, target, PoolConfig::default(), &CancellationToken::new()).await
    }

    /// Create a pool and open its first connection.
    ///
    /// The first connection verifies that `target` is reachable; it is
    /// returned to the pool and stays open. If it cannot be established, the
    /// pool is closed and the error returned. `cancel` aborts the wait for
    /// that first connection.
    pub async fn connect_with(
        driver: D,
        target: impl Into<String>,
        config: PoolConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let manager = ConnectionManager::new(driver, target, config.destroy_timeout);
        let pool = ResourcePool::new(manager, config.resource_config())?;

        tracing::debug!(operation = span_names::CONNECT, "opening initial connection");
        match pool.acquire(cancel).await {
            Ok(conn) => conn.release(),
            Err(e) => {
                pool.close().await;
                return Err(e.into());
            }
        }

        tracing::info!(
            max_connections = config.max_connections,
            "connection pool ready"
        );

        Ok(Self { pool, config })
    }

    /// Borrow a connection.
    ///
    /// Waits while every connection is in use. Fails with
    /// [`Error::PoolClosed`](crate::Error::PoolClosed) once the pool is closed, with
    /// [`Error::Cancelled`](crate::Error::Cancelled) if `cancel` fires first, or with
    /// [`Error::Connect`](crate::Error::Connect) if a new connection could not be opened.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<PoolConnection<D>> {
        let resource = self.pool.acquire(cancel).await?;
        tracing::trace!(
            operation = span_names::ACQUIRE,
            connection_id = resource.id(),
            "connection acquired"
        );
        Ok(PoolConnection::new(resource))
    }

    /// Borrow an idle connection without waiting or connecting.
    pub fn try_acquire(&self) -> Result<Option<PoolConnection<D>>> {
        Ok(self.pool.try_acquire()?.map(PoolConnection::new))
    }

    /// Close the pool.
    ///
    /// New acquires fail immediately. Idle connections are closed right away
    /// and borrowed ones as they come back; this waits until every
    /// connection is closed. Calling it again has no further effect.
    pub async fn close(&self) {
        tracing::debug!(operation = span_names::CLOSE, "closing connection pool");
        self.pool.close().await;
    }

    /// Check if the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Snapshot of the pool's connection counts and metrics.
    #[must_use]
    pub fn stat(&self) -> Stat {
        self.pool.stat()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The driver connections are opened with.
    #[must_use]
    pub fn driver(&self) -> &D {
        self.pool.manager().driver()
    }

    /// Run a statement that returns no rows on a borrowed connection.
    pub async fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<CommandTag> {
        let mut conn = self.acquire(&CancellationToken::new()).await?;
        let result = conn.execute(sql, args).await;
        conn.release();
        result
    }

    /// Start a query on a borrowed connection.
    ///
    /// The returned cursor holds the connection until it is exhausted,
    /// fails or is closed. If no connection could be borrowed or the query
    /// could not be started, the cursor carries that error instead.
    pub async fn query_rows(&self, sql: &str, args: &[SqlValue]) -> PoolRows<D> {
        match self.acquire(&CancellationToken::new()).await {
            Ok(conn) => conn.query_rows(sql, args).await,
            Err(e) => PoolRows::failed(e),
        }
    }

    /// Start a query whose first row is read by [`PoolRow::get`].
    pub async fn query_row(&self, sql: &str, args: &[SqlValue]) -> PoolRow<D> {
        match self.acquire(&CancellationToken::new()).await {
            Ok(conn) => conn.query_row(sql, args).await,
            Err(e) => PoolRow::failed(e),
        }
    }

    /// Begin a transaction on a borrowed connection.
    ///
    /// The transaction holds the connection until it is committed or
    /// rolled back.
    pub async fn begin_transaction(&self) -> Result<PoolTransaction<D>> {
        tracing::trace!(operation = span_names::BEGIN_TRANSACTION, "acquiring connection");
        let conn = self.acquire(&CancellationToken::new()).await?;
        conn.begin().await
    }
}

impl<D: Driver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            config: self.config.clone(),
        }
    }
}

impl<D: Driver> fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = PoolBuilder::new()
///     .max_connections(10)
///     .build(driver, "postgres://localhost/app")
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct PoolBuilder {
    config: PoolConfig,
}

impl PoolBuilder {
    /// Create a new pool builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the timeout for closing a connection.
    #[must_use]
    pub fn destroy_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.destroy_timeout = timeout;
        self
    }

    /// Build the pool and open its first connection.
    pub async fn build<D: Driver>(self, driver: D, target: impl Into<String>) -> Result<Pool<D>> {
        Pool::connect_with(driver, target, self.config, &CancellationToken::new()).await
    }

    /// Build the pool, giving up on the first connection when `cancel` fires.
    pub async fn build_with_cancel<D: Driver>(
        self,
        driver: D,
        target: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<Pool<D>> {
        Pool::connect_with(driver, target, self.config, cancel).await
    }
}
