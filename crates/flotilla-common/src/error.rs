//! Error types and error codes for Flotilla
//!
//! This module defines:
//! - `FlotillaError`: the engine's error enum, one variant per error kind
//! - `ErrorKind`: the coarse classification API layers map to responses
//! - `ErrorCode`: Structured error codes for API responses

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Result type alias using [`FlotillaError`].
pub type FlotillaResult<T> = Result<T, FlotillaError>;

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum FlotillaError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl FlotillaError {
    /// Create a not found error for the given entity name and identifier
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        FlotillaError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        FlotillaError::Conflict(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        FlotillaError::InvalidInput(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        FlotillaError::Unauthorized(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        FlotillaError::StorageFailure(msg.into())
    }

    /// Coarse classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlotillaError::NotFound { .. } => ErrorKind::NotFound,
            FlotillaError::Conflict(_) => ErrorKind::Conflict,
            FlotillaError::InvalidInput(_) => ErrorKind::InvalidInput,
            FlotillaError::Unauthorized(_) => ErrorKind::Unauthorized,
            FlotillaError::StorageFailure(_) => ErrorKind::StorageFailure,
        }
    }

    /// Structured error code for API responses
    pub fn error_code(&self) -> ErrorCode<'static> {
        match self.kind() {
            ErrorKind::NotFound => RESOURCE_NOT_FOUND,
            ErrorKind::Conflict => RESOURCE_CONFLICT,
            ErrorKind::InvalidInput => PARAMETER_VALIDATE_ERROR,
            ErrorKind::Unauthorized => ACCESS_DENIED,
            ErrorKind::StorageFailure => DATA_ACCESS_ERROR,
        }
    }

    /// Whether the error is caused by the client rather than the server
    pub fn is_client_error(&self) -> bool {
        !matches!(self.kind(), ErrorKind::StorageFailure)
    }
}

/// Error kinds surfaced at the API boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    Unauthorized,
    StorageFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::StorageFailure => "storage_failure",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error code structure for API responses
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const ACCESS_DENIED: ErrorCode<'static> = ErrorCode {
    code: 10001,
    message: "access denied",
};

pub const DATA_ACCESS_ERROR: ErrorCode<'static> = ErrorCode {
    code: 10002,
    message: "data access error",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const RESOURCE_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 20004,
    message: "resource not found",
};

pub const RESOURCE_CONFLICT: ErrorCode<'static> = ErrorCode {
    code: 20005,
    message: "resource conflict",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flotilla_error_display() {
        let err = FlotillaError::not_found("edge stack", 7);
        assert_eq!(format!("{}", err), "edge stack 7 not found");

        let err = FlotillaError::conflict("edge stack name 'web' is already used");
        assert_eq!(
            format!("{}", err),
            "conflict: edge stack name 'web' is already used"
        );
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            FlotillaError::invalid_input("x").kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            FlotillaError::unauthorized("x").kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(FlotillaError::storage("x").error_code().code, 10002);
        assert_eq!(FlotillaError::not_found("tag", 1).error_code().code, 20004);
    }

    #[test]
    fn test_client_errors() {
        assert!(FlotillaError::conflict("x").is_client_error());
        assert!(!FlotillaError::storage("disk full").is_client_error());
    }
}
