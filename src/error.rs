//! Error types for matching, ranking and the proactive sweep
//!
//! Errors are classified by recoverability:
//! - Retryable: repository reads that failed (try again on the next tick)
//! - NonRetryable: bad input, bad configuration
//! - NotFound: the requested member does not exist
//!
//! Anything else (empty pools, missing optional profile fields, no clusters)
//! is not an error and produces an empty, well-formed result.

use thiserror::Error;

use crate::db::DbError;

/// Error types for the matching core
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("No member with handle @{0}")]
    NotFound(String),

    // Retryable
    #[error("Profile repository unavailable: {0}")]
    TransientRepository(String),

    // Non-retryable
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MatchError {
    /// Returns true if the failed operation can simply be retried later
    pub fn is_retryable(&self) -> bool {
        matches!(self, MatchError::TransientRepository(_))
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            MatchError::NotFound(_) => "Check the handle spelling, or wait until they join.",
            MatchError::TransientRepository(_) => {
                "The profile store could not be read. The next sweep will retry."
            }
            MatchError::InvalidInput(_) => {
                "Handles are 1-39 characters: letters, digits, '-' or '_'."
            }
            MatchError::Configuration(_) => "Check your configuration in ~/.crossings/config.json",
        }
    }
}

impl From<DbError> for MatchError {
    fn from(err: DbError) -> Self {
        MatchError::TransientRepository(err.to_string())
    }
}

impl From<rusqlite::Error> for MatchError {
    fn from(err: rusqlite::Error) -> Self {
        MatchError::TransientRepository(err.to_string())
    }
}

/// Serializable error representation for presentation layers
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    NotFound,
}

impl From<&MatchError> for ErrorReport {
    fn from(err: &MatchError) -> Self {
        let error_type = if matches!(err, MatchError::NotFound(_)) {
            ErrorType::NotFound
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        };

        ErrorReport {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_repository_errors_retry() {
        assert!(MatchError::TransientRepository("locked".into()).is_retryable());
        assert!(!MatchError::InvalidInput("@@".into()).is_retryable());
        assert!(!MatchError::NotFound("ghost".into()).is_retryable());
    }

    #[test]
    fn test_db_errors_become_transient() {
        let err: MatchError = DbError::Migration("boom".into()).into();
        assert!(err.is_retryable(), "storage failures should be retryable: {}", err);
    }

    #[test]
    fn test_report_classification() {
        let report = ErrorReport::from(&MatchError::NotFound("ghost".into()));
        assert_eq!(report.error_type, ErrorType::NotFound);
        assert!(!report.can_retry);
        assert!(report.message.contains("@ghost"));
    }
}
