//! # Engine Error Types
//!
//! Errors returned by the managers and workers.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │      Rule       │  │     Storage     │  │   Config / Channel      │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  CoreError      │  │  Duplicate      │  │  InvalidConfig          │ │
//! │  │  (never retried)│  │  Conflict   ↻   │  │  ConfigLoadFailed       │ │
//! │  │                 │  │  Unavailable ↻  │  │  ChannelError           │ │
//! │  │                 │  │  Backend        │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ↻ = is_retryable() → the fulfillment worker backs off and tries again │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use libris_core::{CoreError, ErrorCategory, ValidationError};
use libris_db::DbError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for port calls.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Storage Errors (port level)
// =============================================================================

/// Failure reported by a storage port.
///
/// Adapters translate their own errors into these four shapes so the
/// managers never see a backend type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A uniqueness rule in storage rejected the write.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// A guarded write lost against a concurrent writer.
    #[error("Concurrent update: {0}")]
    Conflict(String),

    /// Storage is busy or unreachable right now.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Anything else.
    #[error("Storage failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// True when the same call may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::UniqueViolation { field, value } => {
                StoreError::Duplicate(format!("{field} '{value}'"))
            }
            e if e.is_transient() => StoreError::Unavailable(e.to_string()),
            e => StoreError::Backend(e.to_string()),
        }
    }
}

// =============================================================================
// Engine Errors
// =============================================================================

/// Engine error type covering every failure a caller can see.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A circulation rule rejected the request.
    #[error(transparent)]
    Rule(#[from] CoreError),

    /// Storage failed underneath a request.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Invalid engine configuration.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read or parse the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// A worker is shutting down.
    #[error("Engine is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Rule(CoreError::Validation(err))
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        EngineError::Storage(StoreError::from(err))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl EngineError {
    /// Returns true if the operation can be retried.
    ///
    /// Rule violations are never retryable; only transient storage
    /// failures are.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }

    /// The rule violation behind this error, if any.
    pub fn rule(&self) -> Option<&CoreError> {
        match self {
            EngineError::Rule(e) => Some(e),
            _ => None,
        }
    }

    /// Coarse category for rule violations; `None` for infrastructure errors.
    pub fn category(&self) -> Option<ErrorCategory> {
        self.rule().map(CoreError::category)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_errors_map_to_store_errors() {
        let dup = StoreError::from(DbError::duplicate("open loan", "s1/b1"));
        assert!(matches!(dup, StoreError::Duplicate(_)));
        assert!(!dup.is_transient());

        let busy = StoreError::from(DbError::QueryFailed("database is locked".into()));
        assert!(matches!(busy, StoreError::Unavailable(_)));
        assert!(busy.is_transient());

        let other = StoreError::from(DbError::Internal("corrupt".into()));
        assert!(matches!(other, StoreError::Backend(_)));
    }

    #[test]
    fn test_retryable() {
        let err: EngineError = StoreError::Conflict("renewed concurrently".into()).into();
        assert!(err.is_retryable());

        let err: EngineError = CoreError::not_found("Book", "b1").into();
        assert!(!err.is_retryable());
        assert_eq!(err.category(), Some(ErrorCategory::NotFound));

        let err = EngineError::ChannelError("closed".into());
        assert!(!err.is_retryable());
        assert!(err.category().is_none());
    }

    #[test]
    fn test_validation_wraps_into_rule() {
        let err: EngineError = ValidationError::Required {
            field: "book_id".into(),
        }
        .into();
        assert!(matches!(err, EngineError::Rule(CoreError::Validation(_))));
    }
}
