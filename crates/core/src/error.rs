//! Error types for the document store
//!
//! This module defines the error taxonomy shared by every layer.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Taxonomy
//!
//! Callers only ever need to distinguish the coarse [`ErrorKind`]s:
//!
//! | Kind | Raised by | Caller action |
//! |------|-----------|---------------|
//! | `Validation` | malformed metadata, schema violation, invalid query, reactor rejection | fix the request |
//! | `Conflict` | explicit version mismatch, unique index violation, model in use | re-read, resubmit |
//! | `NotFound` | absent document or model | none |
//! | `Cancelled` | deadline or explicit cancel on the request context | none |
//! | `Internal` | storage or encoding failure | report |
//!
//! `WriteConflict` is the backend's commit-time signal. The CRUD engine
//! consumes it for implicit-version retries and maps it to `Conflict`
//! everywhere else.

use thiserror::Error;

/// Result type alias for document store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the document store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Request is malformed or was rejected by a validator
    #[error("{0}")]
    Validation(String),

    /// Request lost against a concurrent or prior change
    #[error("{0}")]
    Conflict(String),

    /// Document or model does not exist
    #[error("{0}")]
    NotFound(String),

    /// Backend detected a write-write conflict at commit time
    #[error("write conflict on key {}", escape_key(.key))]
    WriteConflict {
        /// Key that was committed by another transaction
        key: Vec<u8>,
    },

    /// Request context was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Request context deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Encoding or decoding of a stored record failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Storage or invariant failure
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse error classification exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed request or validator rejection
    Validation,
    /// Version, uniqueness or usage conflict
    Conflict,
    /// Absent entity
    NotFound,
    /// Context cancelled or deadline exceeded
    Cancelled,
    /// Storage or encoding failure
    Internal,
}

impl Error {
    /// Construct a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Construct a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// Construct a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Construct an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Classify this error into the public taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) | Error::WriteConflict { .. } => ErrorKind::Conflict,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Cancelled | Error::DeadlineExceeded => ErrorKind::Cancelled,
            Error::Serialization(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for any conflict, including backend write conflicts
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// True only for the commit-time signal that an implicit write may retry on
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::WriteConflict { .. })
    }

    /// True if the error came from the request context
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// Prefix the message with context, keeping the variant
    ///
    /// Variants without a free-form message are returned unchanged.
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            Error::Validation(m) => Error::Validation(format!("{}: {}", ctx, m)),
            Error::Conflict(m) => Error::Conflict(format!("{}: {}", ctx, m)),
            Error::NotFound(m) => Error::NotFound(format!("{}: {}", ctx, m)),
            Error::Serialization(m) => Error::Serialization(format!("{}: {}", ctx, m)),
            Error::Internal(m) => Error::Internal(format!("{}: {}", ctx, m)),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Render a binary key with non-printable bytes escaped
pub fn escape_key(key: &[u8]) -> String {
    let mut out = String::with_capacity(key.len());
    for &b in key {
        if (32..=126).contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02x}", b));
        }
    }
    out
}
