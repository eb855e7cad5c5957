//! Error handling
//!
//! Provides the typed error taxonomy shared by every store operation,
//! with helpers the outer layers use to classify a failure.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::field::ConversionError;

/// Errors that can occur during work item operations
#[derive(Error, Debug)]
pub enum Error {
    /// Row absent or soft-deleted
    #[error("{entity} with id '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Invalid filter shape, disallowed field name or forbidden type
    #[error("Bad value for parameter '{name}': {reason}")]
    BadParameter { name: String, reason: String },

    /// Optimistic version check failed
    #[error("Version conflict on {entity} '{id}': expected version {expected}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: i64,
    },

    /// A field value cannot be coerced into its declared kind
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// The operation was cancelled by its caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Unexpected failure that should not be exposed in detail
    #[error("Internal error: {0}")]
    Internal(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// Stored JSON could not be read or written
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn bad_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::BadParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn version_conflict(entity: &'static str, id: impl ToString, expected: i64) -> Self {
        Error::VersionConflict {
            entity,
            id: id.to_string(),
            expected,
        }
    }

    /// Check if the caller can correct this error by changing its input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::BadParameter { .. }
                | Error::VersionConflict { .. }
                | Error::Conversion(_)
        )
    }

    /// Check if this error is an internal storage fault
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Error::Internal(_) | Error::Database(_) | Error::Json(_)
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::VersionConflict { .. } => {
                Some("Reload the work item and apply the change to its latest version.")
            }
            Error::BadParameter { .. } => Some("Check the request parameters and try again."),
            Error::Conversion(_) => {
                Some("Check that every field value matches the kind its type declares.")
            }
            Error::Cancelled => Some("The operation was cancelled; retry if it is still needed."),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        match error.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => Error::Cancelled,
            _ => Error::Database(error),
        }
    }
}

impl From<ConversionError> for Error {
    fn from(error: ConversionError) -> Self {
        Error::Conversion(error.to_string())
    }
}

/// Result type for work item operations
pub type Result<T> = std::result::Result<T, Error>;
