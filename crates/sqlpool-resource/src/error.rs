//! Pool error types.

use thiserror::Error;

/// Errors returned by [`ResourcePool`](crate::ResourcePool) operations.
///
/// `E` is the error type of the resource constructor.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PoolError<E> {
    /// The pool has been closed; no further resources are handed out.
    #[error("pool is closed")]
    PoolClosed,

    /// The resource constructor failed. The live count was not incremented,
    /// so acquiring again will attempt construction again.
    #[error("failed to construct resource: {0}")]
    ConstructFailed(#[source] E),

    /// The caller's cancellation token fired before a resource was available.
    #[error("acquire cancelled")]
    Cancelled,

    /// Invalid pool configuration.
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl<E> PoolError<E> {
    /// Check if this error is [`PoolError::PoolClosed`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::PoolClosed)
    }

    /// Check if this error is [`PoolError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Convert the constructor error with `f`, keeping every other variant.
    pub fn map_construct<F, T>(self, f: F) -> PoolError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            Self::PoolClosed => PoolError::PoolClosed,
            Self::ConstructFailed(e) => PoolError::ConstructFailed(f(e)),
            Self::Cancelled => PoolError::Cancelled,
            Self::Config(msg) => PoolError::Config(msg),
        }
    }
}
