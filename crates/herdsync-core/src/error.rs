//! Error types for herdsync-core

use std::fmt;

use thiserror::Error;

use crate::auth::AuthError;

/// Result type alias using herdsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in herdsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Session or tenant resolution error
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl Error {
    /// Whether this error is the remote signalling a missing referenced row.
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, Self::Remote(error) if error.is_foreign_key_violation())
    }

    /// Whether this error means the current sync cycle cannot authenticate.
    pub const fn is_auth(&self) -> bool {
        match self {
            Self::Auth(_) => true,
            Self::Remote(error) => matches!(error.kind, RemoteErrorKind::Unauthorized),
            _ => false,
        }
    }
}

/// Classification of a remote store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// Timeout, connection drop, 5xx, rate limiting
    Transient,
    /// A referenced row does not exist remotely (Postgres `23503`)
    ForeignKeyViolation,
    /// The row already exists remotely (Postgres `23505`)
    Duplicate,
    /// Missing, expired, or rejected credentials
    Unauthorized,
    /// Not found
    NotFound,
    /// Any other request the remote refused
    Rejected,
    /// Payload could not be decoded
    Decode,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::ForeignKeyViolation => "foreign key violation",
            Self::Duplicate => "duplicate",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not found",
            Self::Rejected => "rejected",
            Self::Decode => "decode",
        };
        f.write_str(label)
    }
}

/// Error returned by a [`crate::remote::RemoteStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Remote {kind} error: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    /// Backend error code when one was reported (e.g. `23503`)
    pub code: Option<String>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, message)
    }

    pub fn foreign_key(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::ForeignKeyViolation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unauthorized, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Decode, message)
    }

    pub const fn is_foreign_key_violation(&self) -> bool {
        matches!(self.kind, RemoteErrorKind::ForeignKeyViolation)
    }

    pub const fn is_duplicate(&self) -> bool {
        matches!(self.kind, RemoteErrorKind::Duplicate)
    }
}
