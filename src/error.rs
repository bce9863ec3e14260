//! Preparer Error Types

use thiserror::Error;

/// Errors that abort a preparation pass
///
/// Nothing here is raised for empty inputs, missing candidates or exceeded
/// limits; those are ordinary request outcomes.
#[derive(Error, Debug, Clone)]
pub enum PreparerError {
    /// Connection loss, serialization conflict, deadlock, ...
    #[error("Database error: {0}")]
    Database(String),

    /// Transaction was aborted by the store (retryable)
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid request state id: {0}")]
    InvalidState(i16),

    /// A row read from the catalog could not be decoded
    #[error("Corrupt catalog row: {0}")]
    Corrupt(String),
}

impl PreparerError {
    /// Stable error code for logs and metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            PreparerError::Database(_) => "DATABASE_ERROR",
            PreparerError::Conflict(_) => "TRANSACTION_CONFLICT",
            PreparerError::Config(_) => "CONFIG_ERROR",
            PreparerError::Io(_) => "IO_ERROR",
            PreparerError::InvalidState(_) => "INVALID_STATE",
            PreparerError::Corrupt(_) => "CORRUPT_ROW",
        }
    }

    /// Whether the next scheduled pass may succeed without operator action
    pub fn is_transient(&self) -> bool {
        matches!(self, PreparerError::Database(_) | PreparerError::Conflict(_))
    }
}

impl From<sqlx::Error> for PreparerError {
    fn from(e: sqlx::Error) -> Self {
        // 40001 serialization_failure, 40P01 deadlock_detected
        if let sqlx::Error::Database(db) = &e
            && matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        {
            return PreparerError::Conflict(e.to_string());
        }
        PreparerError::Database(e.to_string())
    }
}

impl From<std::io::Error> for PreparerError {
    fn from(e: std::io::Error) -> Self {
        PreparerError::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for PreparerError {
    fn from(e: serde_yaml::Error) -> Self {
        PreparerError::Config(e.to_string())
    }
}
