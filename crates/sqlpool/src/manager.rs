//! Adapts a [`Driver`] to the generic resource pool.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use sqlpool_resource::Manage;

use crate::driver::{Connection, Driver};
use crate::error::Error;

/// Opens and closes connections on behalf of the resource pool.
pub struct ConnectionManager<D: Driver> {
    driver: D,
    target: String,
    destroy_timeout: Duration,
}

impl<D: Driver> ConnectionManager<D> {
    /// Create a manager that connects `driver` to `target`.
    pub fn new(driver: D, target: impl Into<String>, destroy_timeout: Duration) -> Self {
        Self {
            driver,
            target: target.into(),
            destroy_timeout,
        }
    }

    /// The underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: Driver> fmt::Debug for ConnectionManager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The target may carry credentials.
        f.debug_struct("ConnectionManager")
            .field("destroy_timeout", &self.destroy_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<D: Driver> Manage for ConnectionManager<D> {
    type Resource = D::Connection;
    type Error = Error;

    async fn create(&self) -> Result<D::Connection, Error> {
        tracing::debug!("opening connection");
        self.driver.connect(&self.target).await.map_err(|e| {
            tracing::debug!(error = %e, "failed to open connection");
            Error::connect(e)
        })
    }

    async fn destroy(&self, conn: D::Connection) {
        match tokio::time::timeout(self.destroy_timeout, conn.close()).await {
            Ok(Ok(())) => tracing::debug!("connection closed"),
            Ok(Err(e)) => tracing::debug!(error = %e, "error while closing connection"),
            Err(_) => tracing::warn!(
                timeout_ms = self.destroy_timeout.as_millis() as u64,
                "timed out closing connection"
            ),
        }
    }

    fn is_reusable(&self, conn: &D::Connection) -> bool {
        !conn.is_broken()
    }
}
