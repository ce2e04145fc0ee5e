//! Pool configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default number of connections the pool may hold.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default bound on closing a single connection.
pub const DEFAULT_DESTROY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`Pool`](crate::Pool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of live connections (idle + in use).
    pub max_connections: u32,

    /// How long closing a connection may take before it is abandoned.
    pub destroy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            destroy_timeout: DEFAULT_DESTROY_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the timeout for closing a connection.
    #[must_use]
    pub fn destroy_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".into()));
        }
        if self.destroy_timeout.is_zero() {
            return Err(Error::Config("destroy_timeout must be greater than zero".into()));
        }
        Ok(())
    }

    pub(crate) fn resource_config(&self) -> sqlpool_resource::PoolConfig {
        sqlpool_resource::PoolConfig::new().max_size(self.max_connections as usize)
    }
}
