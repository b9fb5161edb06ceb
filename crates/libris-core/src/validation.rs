//! # Validation Module
//!
//! Input checks that run before any eligibility rule.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: THIS MODULE                                                   │
//! │  ├── Identifier format (UUID)                                          │
//! │  └── Free text length (notes)                                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Eligibility rules (eligibility.rs)                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (available_copies BETWEEN 0 AND total_copies)               │
//! │  ├── Partial UNIQUE index on active reservations                       │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::MAX_NOTES_LENGTH;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates an identifier field.
///
/// ## Rules
/// - Must not be empty
/// - Must parse as a UUID (36 characters with hyphens)
///
/// ## Example
/// ```rust
/// use libris_core::validation::validate_uuid;
///
/// assert!(validate_uuid("book_id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("book_id", "not-a-uuid").is_err());
/// ```
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

/// Validates optional free-text notes and normalizes blank input to `None`.
///
/// ## Example
/// ```rust
/// use libris_core::validation::validate_notes;
///
/// assert_eq!(validate_notes(Some("  ")).unwrap(), None);
/// assert_eq!(validate_notes(Some(" torn cover ")).unwrap().as_deref(), Some("torn cover"));
/// assert!(validate_notes(Some(&"x".repeat(1001))).is_err());
/// ```
pub fn validate_notes(notes: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(notes) = notes.map(str::trim) else {
        return Ok(None);
    };

    if notes.is_empty() {
        return Ok(None);
    }

    if notes.chars().count() > MAX_NOTES_LENGTH {
        return Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: MAX_NOTES_LENGTH,
        });
    }

    Ok(Some(notes.to_string()))
}

/// Validates a policy limit read from configuration.
pub fn validate_limit(field: &str, value: i64, min: i64, max: i64) -> ValidationResult<()> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min,
            max,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
