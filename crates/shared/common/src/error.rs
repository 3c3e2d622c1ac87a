//! Unified error handling for the persistence layer.
//!
//! Store and transport errors are carried unmodified so callers can inspect
//! the underlying driver error. Nothing in this layer retries.

use thiserror::Error;

/// Store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    // Caller errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("More than one {entity} matched a single-result query")]
    MultipleMatches { entity: String },

    #[error("Key {key} appears more than once in one write")]
    DuplicateKey { key: String },

    // External store errors
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[cfg(feature = "documents")]
    #[error("Document store error: {0}")]
    Document(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Commit failed and the replacement context could not be created either.
    #[error("Commit failed: [{commit}]; recreating the context failed as well")]
    RecoveryFailed {
        commit: Box<StoreError>,
        #[source]
        recovery: Box<StoreError>,
    },

    // Internal
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Stable error code for logs and CLI output
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Configuration(_) => "CONFIGURATION_ERROR",
            StoreError::MultipleMatches { .. } => "MULTIPLE_MATCHES",
            StoreError::DuplicateKey { .. } => "DUPLICATE_KEY",
            #[cfg(feature = "database")]
            StoreError::Database(_) => "DATABASE_ERROR",
            #[cfg(feature = "documents")]
            StoreError::Document(_) => "DOCUMENT_STORE_ERROR",
            StoreError::Serialization(_) => "SERIALIZATION_ERROR",
            StoreError::Timeout { .. } => "TIMEOUT",
            StoreError::RecoveryFailed { .. } => "RECOVERY_FAILED",
            StoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the store reported that the targeted record does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            #[cfg(feature = "database")]
            StoreError::Database(sea_orm::DbErr::RecordNotFound(_))
            | StoreError::Database(sea_orm::DbErr::RecordNotUpdated) => true,
            StoreError::RecoveryFailed { commit, .. } => commit.is_not_found(),
            _ => false,
        }
    }
}

/// Result type alias
pub type StoreResult<T> = Result<T, StoreError>;

/// Convenience constructors
impl StoreError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        StoreError::Configuration(msg.into())
    }

    pub fn multiple_matches(entity: impl Into<String>) -> Self {
        StoreError::MultipleMatches {
            entity: entity.into(),
        }
    }

    pub fn duplicate_key(key: impl Into<String>) -> Self {
        StoreError::DuplicateKey { key: key.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        StoreError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(StoreError::configuration("x").code(), "CONFIGURATION_ERROR");
        assert_eq!(StoreError::multiple_matches("person").code(), "MULTIPLE_MATCHES");
        assert_eq!(StoreError::Timeout { seconds: 3 }.code(), "TIMEOUT");
        assert_eq!(StoreError::duplicate_key("person#1").code(), "DUPLICATE_KEY");
    }

    #[test]
    fn test_recovery_failed_keeps_commit_message() {
        let err = StoreError::RecoveryFailed {
            commit: Box::new(StoreError::internal("disk full")),
            recovery: Box::new(StoreError::configuration("no url")),
        };

        assert!(err.to_string().contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[cfg(feature = "database")]
    #[test]
    fn test_missing_rows_are_not_found() {
        let err = StoreError::from(sea_orm::DbErr::RecordNotUpdated);
        assert!(err.is_not_found());
        assert!(!StoreError::internal("boom").is_not_found());
    }
}
