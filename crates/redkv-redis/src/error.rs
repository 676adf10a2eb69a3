//! Error types for Redis backend operations

use std::time::Duration;

use thiserror::Error;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by a [`KvBackend`](crate::backend::KvBackend)
#[derive(Error, Debug)]
pub enum BackendError {
    /// Command or connection failure reported by the redis client
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// No pooled connection became available in time
    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,

    /// The pool was closed by `stop`
    #[error("connection pool is closed")]
    Closed,

    /// Pool failure other than timeout or closing
    #[error("connection pool: {0}")]
    Pool(String),

    /// A command exceeded the read + write timeout
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// Connecting or handshaking failed
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// No sentinel could resolve the primary
    #[error("sentinel: {0}")]
    Sentinel(String),
}

impl BackendError {
    /// Transport failures on an established connection. Connection
    /// creation has its own retry loop, so pool errors are excluded.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Redis(e) => {
                e.kind() == redis::ErrorKind::IoError || e.is_connection_dropped()
            }
            _ => false,
        }
    }
}

impl From<deadpool::managed::PoolError<BackendError>> for BackendError {
    fn from(err: deadpool::managed::PoolError<BackendError>) -> Self {
        use deadpool::managed::PoolError;
        match err {
            PoolError::Timeout(_) => BackendError::PoolTimeout,
            PoolError::Closed => BackendError::Closed,
            PoolError::Backend(e) => e,
            other => BackendError::Pool(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deadpool::managed::{PoolError, TimeoutType};

    #[test]
    fn pool_errors_are_flattened() {
        let timeout: BackendError = PoolError::Timeout(TimeoutType::Wait).into();
        assert!(matches!(timeout, BackendError::PoolTimeout));

        let closed: BackendError = PoolError::<BackendError>::Closed.into();
        assert!(matches!(closed, BackendError::Closed));

        let inner: BackendError = PoolError::Backend(BackendError::Sentinel("down".into())).into();
        assert_eq!(inner.to_string(), "sentinel: down");
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        let reset: BackendError = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ))
        .into();
        assert!(reset.is_retryable());

        let wrong_type: BackendError =
            redis::RedisError::from((redis::ErrorKind::TypeError, "wrong type")).into();
        assert!(!wrong_type.is_retryable());
        assert!(!BackendError::PoolTimeout.is_retryable());
        assert!(!BackendError::Closed.is_retryable());
    }

    #[test]
    fn redis_errors_convert() {
        let err: BackendError =
            redis::RedisError::from((redis::ErrorKind::IoError, "connection reset")).into();
        assert!(err.to_string().starts_with("redis:"));
    }
}
