//! Error handling module for the DAO tracker core.
//!
//! Provides the centralized error type with stable codes for the response layer.

use thiserror::Error;

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const DUPLICATE_KEY: &str = "DUPLICATE_KEY";
    pub const STORE_UNAVAILABLE: &str = "STORE_UNAVAILABLE";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const MAIL_ERROR: &str = "MAIL_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Application error type.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Resource not found
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    /// Validation error
    #[error("VALIDATION_ERROR: {0}")]
    Validation(String),
    /// Caller lacks the role required for the operation
    #[error("FORBIDDEN: {0}")]
    Forbidden(String),
    /// A unique key (id, sequence number, email) already exists
    #[error("DUPLICATE_KEY: {0}")]
    DuplicateKey(String),
    /// External store could not be reached in strict mode
    #[error("STORE_UNAVAILABLE: {0}")]
    StoreUnavailable(String),
    /// Database error
    #[error("DATABASE_ERROR: {0}")]
    Database(String),
    /// Mail transport refused the message
    #[error("MAIL_ERROR: {0}")]
    Mail(String),
    /// Internal error
    #[error("INTERNAL_ERROR: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::Forbidden(_) => codes::FORBIDDEN,
            AppError::DuplicateKey(_) => codes::DUPLICATE_KEY,
            AppError::StoreUnavailable(_) => codes::STORE_UNAVAILABLE,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::Mail(_) => codes::MAIL_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        match self {
            AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::Forbidden(msg)
            | AppError::DuplicateKey(msg)
            | AppError::StoreUnavailable(msg)
            | AppError::Database(msg)
            | AppError::Mail(msg)
            | AppError::Internal(msg) => msg,
        }
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, AppError::DuplicateKey(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return AppError::DuplicateKey(db_err.message().to_string());
            }
        }
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::Internal(format!("JSON error: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_display_prefix() {
        let err = AppError::DuplicateKey("numero_liste".to_string());
        assert_eq!(err.error_code(), codes::DUPLICATE_KEY);
        assert_eq!(err.message(), "numero_liste");
        assert!(err.to_string().starts_with("DUPLICATE_KEY"));
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn test_every_variant_displays_its_code() {
        let errors = [
            AppError::NotFound("x".to_string()),
            AppError::Validation("x".to_string()),
            AppError::Forbidden("x".to_string()),
            AppError::DuplicateKey("x".to_string()),
            AppError::StoreUnavailable("x".to_string()),
            AppError::Database("x".to_string()),
            AppError::Mail("x".to_string()),
            AppError::Internal("x".to_string()),
        ];
        for err in errors {
            assert_eq!(err.to_string(), format!("{}: x", err.error_code()));
            assert_eq!(err.message(), "x");
        }
    }

    #[test]
    fn test_json_error_maps_to_internal() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: AppError = json_err.into();
        assert_eq!(err.error_code(), codes::INTERNAL_ERROR);
    }
}
