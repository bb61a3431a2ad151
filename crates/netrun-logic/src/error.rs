//! Engine error taxonomy.
//!
//! Every failure the engine reports carries a stable machine-readable
//! [`ErrorCode`]. Callers branch on the code, never on the message text.
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`EngineError::NotFound`] | `NOT_FOUND` | No |
//! | [`EngineError::PermissionDenied`] | `PERMISSION_DENIED` | No |
//! | [`EngineError::InvalidState`] | `INVALID_STATE` | No |
//! | [`EngineError::InvalidMove`] | `INVALID_MOVE` | No |
//! | [`EngineError::Validation`] | `VALIDATION_ERROR` | No |
//! | [`EngineError::Storage`] | `STORAGE_UNAVAILABLE` | Yes |
//!
//! Only storage failures are worth retrying; the others will fail the
//! same way on every attempt.
//!
//! ```
//! use netrun_logic::error::{EngineError, ErrorCode};
//!
//! let err = EngineError::not_found("run 7");
//! assert_eq!(err.code(), ErrorCode::NotFound);
//! assert_eq!(err.code().as_str(), "NOT_FOUND");
//! assert!(!err.is_recoverable());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::definition::DefinitionError;
use crate::store::StoreError;

/// Stable error codes exposed across the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    PermissionDenied,
    InvalidState,
    InvalidMove,
    ValidationError,
    StorageUnavailable,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::InvalidMove => "INVALID_MOVE",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::StorageUnavailable => "STORAGE_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by every engine and service operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A run, definition, circuit, node or link does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The access gateway refused the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The target entity is terminal, completed, or otherwise cannot change.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Illegal traversal.
    #[error("invalid move: {0}")]
    InvalidMove(String),
    /// Malformed input or payload.
    #[error("validation error: {0}")]
    Validation(String),
    /// The persistence collaborator failed.
    #[error("storage unavailable: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    pub fn permission_denied(what: impl Into<String>) -> Self {
        EngineError::PermissionDenied(what.into())
    }

    pub fn invalid_state(what: impl Into<String>) -> Self {
        EngineError::InvalidState(what.into())
    }

    pub fn invalid_move(what: impl Into<String>) -> Self {
        EngineError::InvalidMove(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        EngineError::Validation(what.into())
    }

    /// Machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            EngineError::InvalidState(_) => ErrorCode::InvalidState,
            EngineError::InvalidMove(_) => ErrorCode::InvalidMove,
            EngineError::Validation(_) => ErrorCode::ValidationError,
            EngineError::Storage(_) => ErrorCode::StorageUnavailable,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}

impl From<DefinitionError> for EngineError {
    fn from(e: DefinitionError) -> Self {
        EngineError::Validation(e.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RunNotFound(id) => EngineError::NotFound(format!("run {id}")),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
