//! Resource pool configuration.

use crate::error::PoolError;

/// Default maximum number of live resources.
pub const DEFAULT_MAX_SIZE: usize = 5;

/// Configuration for a [`ResourcePool`](crate::ResourcePool).
///
/// The pool grows on demand up to `max_size` and never shrinks while open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of concurrently live resources (idle + acquired).
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of live resources.
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Check that the configuration describes a usable pool.
    pub fn validate<E>(&self) -> Result<(), PoolError<E>> {
        if self.max_size == 0 {
            return Err(PoolError::Config("max_size must be at least 1".into()));
        }
        Ok(())
    }
}
