//! Error types for the connection pool.

use std::sync::Arc;

use sqlpool_resource::PoolError;
use thiserror::Error;

/// Boxed error returned by [`Driver`](crate::Driver) and
/// [`Connection`](crate::Connection) implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared driver error.
///
/// Errors are reference counted so that a failed cursor can hand the same
/// failure back on every call.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`Pool`](crate::Pool) and its scoped wrappers.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The pool has been closed.
    #[error("pool is closed")]
    PoolClosed,

    /// The caller's cancellation token fired before a connection was available.
    #[error("acquire cancelled")]
    Cancelled,

    /// Opening a new connection failed.
    #[error("connection failed: {0}")]
    Connect(#[source] SharedError),

    /// A statement, query or transaction command failed.
    #[error("protocol error: {0}")]
    Protocol(#[source] SharedError),

    /// A single-row query produced no rows.
    #[error("no rows in result set")]
    NoRows,

    /// Invalid pool configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap a driver error raised while connecting.
    pub fn connect(err: impl Into<BoxError>) -> Self {
        Self::Connect(Arc::from(err.into()))
    }

    /// Wrap a driver error raised by a connection operation.
    pub fn protocol(err: impl Into<BoxError>) -> Self {
        Self::Protocol(Arc::from(err.into()))
    }

    /// Check if this error means the pool was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::PoolClosed)
    }

    /// Check if this error came from a cancelled acquire.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error came from the driver.
    #[must_use]
    pub fn is_driver_error(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Protocol(_))
    }
}

impl From<PoolError<Error>> for Error {
    fn from(err: PoolError<Error>) -> Self {
        match err {
            PoolError::PoolClosed => Self::PoolClosed,
            PoolError::Cancelled => Self::Cancelled,
            PoolError::ConstructFailed(err) => err,
            PoolError::Config(msg) => Self::Config(msg),
            other => Self::Config(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display_and_source() {
        let err = Error::protocol("syntax error at or near \"SELEC\"");
        assert_eq!(
            err.to_string(),
            "protocol error: syntax error at or near \"SELEC\""
        );
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.is_driver_error());
    }

    #[test]
    fn test_clone_shares_driver_error() {
        let err = Error::connect(std::io::Error::other("connection refused"));
        let copy = err.clone();
        match (&err, &copy) {
            (Error::Connect(a), Error::Connect(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_from_pool_error() {
        assert!(Error::from(PoolError::<Error>::PoolClosed).is_closed());
        assert!(Error::from(PoolError::<Error>::Cancelled).is_cancelled());

        let err = Error::from(PoolError::ConstructFailed(Error::connect("refused")));
        assert_eq!(err.to_string(), "connection failed: refused");

        let err = Error::from(PoolError::<Error>::Config("max_size must be at least 1".into()));
        assert!(matches!(err, Error::Config(_)));
    }
}
