//! # Error Types
//!
//! Domain-specific error types for libris-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  libris-core errors (this file)                                        │
//! │  ├── CoreError        - Rule violations, one variant per category      │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  libris-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  libris-engine errors                                                  │
//! │  └── EngineError      - Rule | Storage | Config | Channel              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Every rule violation is its own variant so callers can `match` on it
//! 2. Messages name the rule that was violated
//! 3. None of these errors are retried automatically

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Loan and reservation rule violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Book, student, librarian, transaction or reservation does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Student or book exists but is deactivated.
    #[error("{entity} {id} is not active")]
    InactiveEntity { entity: &'static str, id: String },

    /// No copy can be handed out (borrow), or copies are free (reserve).
    ///
    /// ## When This Occurs
    /// ```text
    /// borrow  + available_copies == 0  → "book not available"
    /// reserve + available_copies  > 0  → "book is currently available for borrowing"
    /// borrow  lost the race on the last copy (guarded decrement hit 0 rows)
    /// ```
    #[error("Book {book_id} unavailable: {reason}")]
    Unavailable { book_id: String, reason: String },

    /// A per-student or per-loan limit has been reached.
    #[error("{limit_name} limit reached ({current} of {max})")]
    QuotaExceeded {
        limit_name: &'static str,
        current: i64,
        max: i64,
    },

    /// Student already holds an open loan of this book.
    #[error("Student {student_id} already has book {book_id} on loan")]
    DuplicateLoan { student_id: String, book_id: String },

    /// Borrow or renewal blocked by an overdue loan.
    #[error("Overdue loan {transaction_id} blocks this operation: {reason}")]
    OverdueBlock {
        transaction_id: String,
        reason: String,
    },

    /// Return condition outside excellent/good/fair/poor/damaged.
    #[error("Invalid return condition '{0}': must be one of excellent, good, fair, poor, damaged")]
    InvalidCondition(String),

    /// Transaction is already closed.
    #[error("Book already returned (transaction {transaction_id})")]
    AlreadyReturned { transaction_id: String },

    /// Another student holds an earlier claim on this book.
    #[error("Book {book_id} is held for another student: {reason}")]
    ReservationConflict { book_id: String, reason: String },

    /// Reservation is already terminal (fulfilled, cancelled or expired).
    #[error("Reservation {reservation_id} is {status}, cannot {action}")]
    InvalidTransition {
        reservation_id: String,
        status: String,
        action: &'static str,
    },

    /// Transaction type is neither borrow nor renew, or no fine is owed.
    #[error("Transaction {transaction_id} cannot be processed: {reason}")]
    InvalidTransactionType {
        transaction_id: String,
        reason: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Coarse error category used by outer layers for status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Entity missing, 404-equivalent.
    NotFound,
    /// The request conflicts with current state, 409-equivalent.
    Conflict,
    /// The request is malformed or breaks a limit, 422-equivalent.
    Unprocessable,
}

impl ErrorCategory {
    /// HTTP-equivalent status code.
    pub const fn status_hint(&self) -> u16 {
        match self {
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::Unprocessable => 422,
        }
    }
}

impl CoreError {
    /// Creates a NotFound error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an InactiveEntity error.
    pub fn inactive(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::InactiveEntity {
            entity,
            id: id.into(),
        }
    }

    /// Creates an Unavailable error.
    pub fn unavailable(book_id: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::Unavailable {
            book_id: book_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a ReservationConflict error.
    pub fn reservation_conflict(book_id: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::ReservationConflict {
            book_id: book_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::NotFound { .. } => ErrorCategory::NotFound,
            CoreError::InactiveEntity { .. }
            | CoreError::Unavailable { .. }
            | CoreError::DuplicateLoan { .. }
            | CoreError::OverdueBlock { .. }
            | CoreError::AlreadyReturned { .. }
            | CoreError::ReservationConflict { .. }
            | CoreError::InvalidTransition { .. } => ErrorCategory::Conflict,
            CoreError::QuotaExceeded { .. }
            | CoreError::InvalidCondition(_)
            | CoreError::InvalidTransactionType { .. }
            | CoreError::Validation(_) => ErrorCategory::Unprocessable,
        }
    }

    /// Short machine-readable code, stable across message wording changes.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::InactiveEntity { .. } => "INACTIVE_ENTITY",
            CoreError::Unavailable { .. } => "UNAVAILABLE",
            CoreError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            CoreError::DuplicateLoan { .. } => "DUPLICATE_LOAN",
            CoreError::OverdueBlock { .. } => "OVERDUE_BLOCK",
            CoreError::InvalidCondition(_) => "INVALID_CONDITION",
            CoreError::AlreadyReturned { .. } => "ALREADY_RETURNED",
            CoreError::ReservationConflict { .. } => "RESERVATION_CONFLICT",
            CoreError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CoreError::InvalidTransactionType { .. } => "INVALID_TRANSACTION_TYPE",
            CoreError::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before any rule runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::QuotaExceeded {
            limit_name: "Active loans",
            current: 5,
            max: 5,
        };
        assert_eq!(err.to_string(), "Active loans limit reached (5 of 5)");

        let err = CoreError::unavailable("book-1", "book not available");
        assert_eq!(err.to_string(), "Book book-1 unavailable: book not available");
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            CoreError::not_found("Book", "x").category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            CoreError::reservation_conflict("x", "queued").category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            CoreError::InvalidCondition("mint".into()).category(),
            ErrorCategory::Unprocessable
        );
        assert_eq!(ErrorCategory::NotFound.status_hint(), 404);
        assert_eq!(ErrorCategory::Conflict.status_hint(), 409);
    }

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            CoreError::not_found("Book", "x"),
            CoreError::inactive("Book", "x"),
            CoreError::unavailable("x", "y"),
            CoreError::DuplicateLoan {
                student_id: "s".into(),
                book_id: "b".into(),
            },
            CoreError::AlreadyReturned {
                transaction_id: "t".into(),
            },
            CoreError::reservation_conflict("x", "y"),
        ];
        let mut codes: Vec<_> = errors.iter().map(CoreError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "student_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
