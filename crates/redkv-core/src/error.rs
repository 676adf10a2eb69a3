//! Error types for KV drivers.
//!
//! Every driver failure is a [`KvError`]. Operation-level variants carry the
//! [`Op`] that raised them so a caller can tell which step failed without
//! inspecting the backend payload. TLS material problems are described by
//! [`TlsError`] and surface through [`KvError::Tls`] at construction time.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for KV operations.
pub type KvResult<T> = Result<T, KvError>;

/// Opaque error produced by a storage backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Operation tag attached to driver errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Has,
    Get,
    MGet,
    Set,
    MExpire,
    Ttl,
    Delete,
    Clear,
}

impl Op {
    /// Lower-case operation name, as used in span names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Has => "has",
            Op::Get => "get",
            Op::MGet => "mget",
            Op::Set => "set",
            Op::MExpire => "mexpire",
            Op::Ttl => "ttl",
            Op::Delete => "delete",
            Op::Clear => "clear",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`Storage`](crate::Storage) implementations.
#[derive(Error, Debug)]
pub enum KvError {
    /// The key or item list was empty.
    #[error("{op}: no keys provided")]
    NoKeysProvided { op: Op },

    /// A key was empty or whitespace-only.
    #[error("{op}: key at index {index} is empty")]
    EmptyKey { op: Op, index: usize },

    /// An input record was incomplete.
    #[error("{op}: {reason}")]
    Validation { op: Op, reason: String },

    /// A timeout was not a valid RFC3339 timestamp.
    #[error("{op}: cannot parse timeout '{value}' as RFC3339: {source}")]
    TimestampParse {
        op: Op,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// The key does not exist.
    #[error("{op}: key '{key}' not found")]
    NotFound { op: Op, key: String },

    /// The backend failed; the source is passed through untouched.
    #[error("{op}: backend error: {source}")]
    Backend {
        op: Op,
        #[source]
        source: BoxError,
    },

    /// Configuration is missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// TLS material could not be loaded.
    #[error(transparent)]
    Tls(#[from] TlsError),
}

impl KvError {
    /// Wrap a backend failure with the operation it happened in.
    pub fn backend(op: Op, source: impl Into<BoxError>) -> Self {
        KvError::Backend {
            op,
            source: source.into(),
        }
    }

    /// Operation tag, if the error was raised by an operation.
    pub fn op(&self) -> Option<Op> {
        match self {
            KvError::NoKeysProvided { op }
            | KvError::EmptyKey { op, .. }
            | KvError::Validation { op, .. }
            | KvError::TimestampParse { op, .. }
            | KvError::NotFound { op, .. }
            | KvError::Backend { op, .. } => Some(*op),
            KvError::Config(_) | KvError::Tls(_) => None,
        }
    }

    /// True for errors raised before any backend call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            KvError::NoKeysProvided { .. }
                | KvError::EmptyKey { .. }
                | KvError::Validation { .. }
                | KvError::TimestampParse { .. }
        )
    }
}

/// Errors raised while building a TLS security context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TlsError {
    #[error("TLS file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("invalid certificate in {}: {reason}", path.display())]
    InvalidCertificate { path: PathBuf, reason: String },

    #[error("invalid private key in {}: {reason}", path.display())]
    InvalidKey { path: PathBuf, reason: String },

    #[error("TLS configuration error: {0}")]
    Config(String),
}
