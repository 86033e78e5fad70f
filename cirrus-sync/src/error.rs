//! Error types for the sync layer.

use cirrus_model::{CodecError, OperationError, RegistryError};
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// A numeric error code reported by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i64);

impl ErrorCode {
    pub const OTHER_CAUSE: ErrorCode = ErrorCode(-1);
    pub const INTERNAL_SERVER_ERROR: ErrorCode = ErrorCode(1);
    pub const CONNECTION_FAILED: ErrorCode = ErrorCode(100);
    pub const OBJECT_NOT_FOUND: ErrorCode = ErrorCode(101);
    pub const INVALID_QUERY: ErrorCode = ErrorCode(102);
    pub const INVALID_CLASS_NAME: ErrorCode = ErrorCode(103);
    pub const MISSING_OBJECT_ID: ErrorCode = ErrorCode(104);
    pub const INVALID_KEY_NAME: ErrorCode = ErrorCode(105);
    pub const INVALID_POINTER: ErrorCode = ErrorCode(106);
    pub const INVALID_JSON: ErrorCode = ErrorCode(107);
    pub const COMMAND_UNAVAILABLE: ErrorCode = ErrorCode(108);
    pub const NOT_INITIALIZED: ErrorCode = ErrorCode(109);
    pub const INCORRECT_TYPE: ErrorCode = ErrorCode(111);
    pub const TIMEOUT: ErrorCode = ErrorCode(124);
    pub const OBJECT_TOO_LARGE: ErrorCode = ErrorCode(116);
    pub const OPERATION_FORBIDDEN: ErrorCode = ErrorCode(119);
    pub const DUPLICATE_VALUE: ErrorCode = ErrorCode(137);
    pub const USERNAME_MISSING: ErrorCode = ErrorCode(200);
    pub const PASSWORD_MISSING: ErrorCode = ErrorCode(201);
    pub const USERNAME_TAKEN: ErrorCode = ErrorCode(202);
    pub const INVALID_SESSION_TOKEN: ErrorCode = ErrorCode(209);
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A field operation could not follow the pending one.
    #[error("invalid operation: {0}")]
    InvalidOperation(#[from] OperationError),

    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Subclass registration failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The transport failed before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote store answered with an error.
    #[error("server error {code}: {message}")]
    Server { code: ErrorCode, message: String },

    /// A batch response did not line up with its request.
    #[error("batch command result count expected: {expected} but was: {actual}")]
    BatchCountMismatch { expected: usize, actual: usize },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The entity is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Several items of a multi-entity operation failed.
    #[error("{} of the requested operations failed", .0.len())]
    Aggregate(Vec<SyncError>),
}

impl SyncError {
    /// The remote error code, for server errors.
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            SyncError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// A copy of this error for each caller of a shared request.
    pub(crate) fn fan_out(&self) -> SyncError {
        match self {
            SyncError::Cancelled => SyncError::Cancelled,
            SyncError::BatchCountMismatch { expected, actual } => SyncError::BatchCountMismatch {
                expected: *expected,
                actual: *actual,
            },
            SyncError::Server { code, message } => SyncError::server(*code, message.clone()),
            SyncError::Transport(message) => SyncError::Transport(message.clone()),
            other => SyncError::Transport(other.to_string()),
        }
    }

    pub(crate) fn server(code: ErrorCode, message: impl Into<String>) -> Self {
        SyncError::Server {
            code,
            message: message.into(),
        }
    }
}
