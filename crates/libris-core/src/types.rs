//! # Domain Types
//!
//! Core domain types used throughout Libris.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   Transaction   │   │   Reservation   │   │      Book       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  type           │   │  status         │   │  total_copies   │       │
//! │  │  due_date       │   │  reserved_at    │   │  available_...  │       │
//! │  │  returned_date  │   │  expires_at     │   │  condition      │       │
//! │  │  superseded_by  │   │  fulfilled_at   │   │  is_active      │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  Transactions are an append-only log: a renewal is a NEW row and the   │
//! │  row it replaces gets `superseded_by`. The current loan of a           │
//! │  (student, book) pair is its single open row.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::money::Money;

// =============================================================================
// Transaction Type
// =============================================================================

/// Kind of loan event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Physical copy handed to the student.
    Borrow,
    /// Possession extended without a physical return.
    Renew,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Borrow => write!(f, "borrow"),
            TransactionType::Renew => write!(f, "renew"),
        }
    }
}

// =============================================================================
// Condition
// =============================================================================

/// Physical condition of a copy, best first.
///
/// ## Ordering
/// `Excellent > Good > Fair > Poor > Damaged`. The derived `Ord` follows
/// declaration order, so `Condition::Excellent < Condition::Damaged`; use
/// [`Condition::is_worse_than`] instead of raw comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Excellent,
    Good,
    Fair,
    Poor,
    Damaged,
}

impl Condition {
    /// All conditions, best first.
    pub const ALL: [Condition; 5] = [
        Condition::Excellent,
        Condition::Good,
        Condition::Fair,
        Condition::Poor,
        Condition::Damaged,
    ];

    /// Rank where a higher number is a better condition.
    pub const fn rank(&self) -> u8 {
        match self {
            Condition::Excellent => 4,
            Condition::Good => 3,
            Condition::Fair => 2,
            Condition::Poor => 1,
            Condition::Damaged => 0,
        }
    }

    /// True if `self` ranks strictly below `other`.
    pub const fn is_worse_than(&self, other: Condition) -> bool {
        self.rank() < other.rank()
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Condition::Excellent => "excellent",
            Condition::Good => "good",
            Condition::Fair => "fair",
            Condition::Poor => "poor",
            Condition::Damaged => "damaged",
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Good
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Condition::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| CoreError::InvalidCondition(s.to_string()))
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// One loan event (borrow or renew).
///
/// ## Lifecycle
/// ```text
///   BorrowBook ──► open ──► ReturnBook ──► closed (returned_date set)
///                   │
///                   └──► RenewBook ──► superseded (superseded_by set)
///                                      + new open "renew" row
/// ```
/// Once closed, only `fine_paid` may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Transaction {
    pub id: String,
    pub student_id: String,
    pub book_id: String,
    pub transaction_type: TransactionType,
    pub transaction_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    /// Set exactly once, by ReturnBook.
    pub returned_date: Option<DateTime<Utc>>,
    /// Librarian who processed the event.
    pub librarian_id: String,
    /// Fine in cents, fixed at return time.
    pub fine_cents: i64,
    pub fine_paid: bool,
    pub return_condition: Option<Condition>,
    pub notes: Option<String>,
    /// ID of the renewal row that replaced this one.
    pub superseded_by: Option<String>,
}

impl Transaction {
    /// True while the copy is out and this row is the current loan.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.returned_date.is_none() && self.superseded_by.is_none()
    }

    #[inline]
    pub fn is_returned(&self) -> bool {
        self.returned_date.is_some()
    }

    /// Overdue means strictly past the due date and not yet returned.
    #[inline]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.returned_date.is_none() && now > self.due_date
    }

    /// Returns the fine as Money.
    #[inline]
    pub fn fine(&self) -> Money {
        Money::from_cents(self.fine_cents)
    }

    /// Fine that is still owed.
    #[inline]
    pub fn unpaid_fine(&self) -> Money {
        if self.fine_paid {
            Money::zero()
        } else {
            self.fine()
        }
    }
}

// =============================================================================
// Reservation
// =============================================================================

/// Status of a reservation. Everything but `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Fulfilled,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Fulfilled => "fulfilled",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queue entry for a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Reservation {
    pub id: String,
    pub student_id: String,
    pub book_id: String,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ReservationStatus,
    pub fulfilled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// FIFO sort key: `(reserved_at, id)`.
    #[inline]
    pub fn queue_key(&self) -> (DateTime<Utc>, &str) {
        (self.reserved_at, self.id.as_str())
    }

    /// A fulfilled reservation is a claim on a copy until the window lapses.
    pub fn claim_is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match (self.status, self.fulfilled_at) {
            (ReservationStatus::Fulfilled, Some(at)) => at + window >= now,
            _ => false,
        }
    }
}

/// A reservation with its computed 1-based queue position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedReservation {
    pub reservation: Reservation,
    pub position: usize,
}

// =============================================================================
// Catalog & People (external, referenced not owned)
// =============================================================================

/// A title with a pool of physical copies.
///
/// Invariant kept by the engine: `0 <= available_copies <= total_copies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Book {
    pub id: String,
    pub title: String,
    pub total_copies: i64,
    pub available_copies: i64,
    pub is_active: bool,
    pub condition: Condition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    #[inline]
    pub fn has_free_copy(&self) -> bool {
        self.available_copies > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Student {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    /// Drives the loan period; values above 4 are graduate years.
    pub year_of_study: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Librarian {
    pub id: String,
    pub name: String,
    pub is_active: bool,
}

// =============================================================================
// Probe Results
// =============================================================================

/// Side-effect-free answer to "can this student borrow this book now?".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowEligibility {
    pub can_borrow: bool,
    /// Every rule that currently blocks the borrow, in evaluation order.
    pub reasons: Vec<String>,
    /// Another student is ahead in the queue or holds a claim.
    pub reservation_conflict: bool,
    /// The student is head of queue or holds a live claim.
    pub reservation_match: bool,
}

/// Side-effect-free answer to "can this loan be renewed now?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalCheck {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl RenewalCheck {
    pub fn allowed() -> Self {
        RenewalCheck {
            allowed: true,
            reason: None,
        }
    }

    pub fn denied(err: &CoreError) -> Self {
        RenewalCheck {
            allowed: false,
            reason: Some(err.to_string()),
        }
    }
}

/// Snapshot used to check copy conservation for one book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyAudit {
    pub total_copies: i64,
    pub available_copies: i64,
    pub open_transactions: i64,
}

impl CopyAudit {
    /// `0 <= available <= total` and `total - available == open loans`.
    pub fn is_consistent(&self) -> bool {
        self.available_copies >= 0
            && self.available_copies <= self.total_copies
            && self.total_copies - self.available_copies == self.open_transactions
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
