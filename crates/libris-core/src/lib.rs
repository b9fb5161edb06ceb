//! # libris-core: Pure Circulation Rules for Libris
//!
//! This crate holds the rules of the loan and reservation engine as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Libris Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                libris-engine (managers + workers)               │   │
//! │  │   LoanLifecycleManager  ReservationQueueManager  Fulfillment    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ snapshot reads, then one guarded write │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ libris-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   fine    │  │eligibility │  │  policy   │  │   │
//! │  │   │Transaction│  │   Money   │  │ can_borrow │  │ LoanPolicy│  │   │
//! │  │   │Reservation│  │           │  │ can_renew  │  │ due_date  │  │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  libris-db (Database Layer)                     │   │
//! │  │              SQLite queries, migrations, repositories           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Transaction, Reservation, Book, Student)
//! - [`money`] - Money type with integer arithmetic
//! - [`fine`] - Fine calculator
//! - [`policy`] - Tunable limits and the loan period table
//! - [`eligibility`] - Borrow, renew and reserve rules
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use libris_core::{fine, LoanPolicy};
//!
//! let policy = LoanPolicy::default();
//! let due = Utc::now();
//! let owed = fine::fine(due, due + Duration::days(2), policy.fine_rate);
//! assert_eq!(owed.to_string(), "1.00");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod eligibility;
pub mod error;
pub mod fine;
pub mod money;
pub mod policy;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use eligibility::QueueGate;
pub use error::{CoreError, CoreResult, ErrorCategory, ValidationError};
pub use money::Money;
pub use policy::{LoanPeriodRule, LoanPolicy};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of return condition notes and loan notes, in characters.
pub const MAX_NOTES_LENGTH: usize = 1000;
