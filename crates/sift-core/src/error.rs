//! Error types for Sift operations.
//!
//! This module provides the common `Error` type and `Result<T>` alias used
//! across all Sift crates. Uses `thiserror` for derive macros.
//!
//! The variants double as the error taxonomy of the search RPC surface:
//! each one has a stable wire [`code`](Error::code) so remote providers can
//! map failures back to the same variant.

use std::path::Path;

use thiserror::Error;

/// Errors that can occur in Sift operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed query, out-of-range page size, missing reference.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A page token that cannot be decoded or does not belong to the query.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Space has no index yet, or a resource is unknown.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A collaborator (storage, remote provider) is unreachable or timed out.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Index corruption or an unexpected failure inside the engine.
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an invalid cursor error.
    pub fn invalid_cursor(msg: impl Into<String>) -> Self {
        Self::InvalidCursor(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a permission denied error.
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn io_with_path(err: std::io::Error, path: &Path) -> Self {
        Self::Io(std::io::Error::new(
            err.kind(),
            format!("{}: {err}", path.display()),
        ))
    }

    /// True for caller mistakes that must not be retried.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::InvalidCursor(_))
    }

    /// True for the not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Stable error code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidCursor(_) => "invalid_cursor",
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) | Self::Io(_) | Self::Config(_) | Self::Serialization(_) => {
                "internal"
            }
        }
    }

    /// Rebuild an error from a wire code and message.
    ///
    /// Unknown codes map to [`Error::Internal`].
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "invalid_argument" => Self::InvalidArgument(message),
            "invalid_cursor" => Self::InvalidCursor(message),
            "not_found" => Self::NotFound(message),
            "permission_denied" => Self::PermissionDenied(message),
            "unavailable" => Self::Unavailable(message),
            _ => Self::Internal(message),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using Sift's Error type.
pub type Result<T> = std::result::Result<T, Error>;
