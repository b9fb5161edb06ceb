//! # Storage Ports
//!
//! The traits the managers talk to. Adapters live in [`crate::adapters`].
//!
//! ## Port Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  LoanLifecycleManager ─┐                                                │
//! │  ReservationQueueMgr  ─┼──► Stores { catalog, people, loans, reservations }
//! │  FulfillmentCoord.    ─┘          │                                     │
//! │                                   ├──► SqliteStore  (libris-db)         │
//! │                                   └──► MemoryStore  (tests, embedding)  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The three loan writes (`open_loan`, `renew`, `close_loan`) are atomic
//! units: each adapter either applies every row change of the unit or none.
//! Copy counters and book condition are only ever written inside them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use libris_core::{Book, Condition, Librarian, Reservation, ReservationStatus, Student, Transaction};

use crate::error::StoreResult;

/// Result of [`LoanStore::open_loan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenLoanOutcome {
    /// Loan row written and one copy taken. `claimed` tells whether the
    /// borrower's reservation was fulfilled along with it.
    Opened { claimed: bool },
    /// No free copy at write time; nothing was written.
    NoCopyAvailable,
}

/// Everything a return writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnRecord {
    pub transaction_id: String,
    pub book_id: String,
    pub returned_at: DateTime<Utc>,
    pub fine_cents: i64,
    pub condition: Condition,
    pub notes: Option<String>,
}

/// Read access to the catalog.
#[async_trait]
pub trait CatalogAccessor: Send + Sync {
    async fn get_book(&self, id: &str) -> StoreResult<Option<Book>>;
}

/// Read access to students and librarians.
#[async_trait]
pub trait PersonAccessor: Send + Sync {
    async fn get_student(&self, id: &str) -> StoreResult<Option<Student>>;
    async fn get_librarian(&self, id: &str) -> StoreResult<Option<Librarian>>;
}

/// The loan event log.
#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn get(&self, id: &str) -> StoreResult<Option<Transaction>>;

    /// Open loans of a student.
    async fn open_for_student(&self, student_id: &str) -> StoreResult<Vec<Transaction>>;

    /// Number of `renew` rows ever written for the pair.
    async fn count_renewals(&self, student_id: &str, book_id: &str) -> StoreResult<i64>;

    async fn count_open_for_book(&self, book_id: &str) -> StoreResult<i64>;

    /// All rows of the pair, oldest first.
    async fn history(&self, student_id: &str, book_id: &str) -> StoreResult<Vec<Transaction>>;

    /// Whether a `borrow` row for the pair was written at or after `since`.
    async fn borrowed_since(
        &self,
        student_id: &str,
        book_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn outstanding_fine_cents(&self, student_id: &str) -> StoreResult<i64>;

    /// Marks a returned row's fine paid. False if nothing unpaid was owed.
    async fn mark_fine_paid(&self, id: &str) -> StoreResult<bool>;

    /// Insert a borrow row and take one copy.
    ///
    /// With `claim`, also fulfill that reservation if it is still active,
    /// stamping `fulfilled_at` with `txn.transaction_date`. When no copy is
    /// free the reservation is left untouched.
    ///
    /// A second open loan for the pair fails with `StoreError::Duplicate`.
    async fn open_loan(
        &self,
        txn: &Transaction,
        claim: Option<&str>,
    ) -> StoreResult<OpenLoanOutcome>;

    /// Supersede `predecessor_id` and insert `renewal`. False if the
    /// predecessor was no longer open.
    async fn renew(&self, predecessor_id: &str, renewal: &Transaction) -> StoreResult<bool>;

    /// Close the loan, give the copy back and degrade the book condition.
    /// False if the loan was no longer open.
    async fn close_loan(&self, record: &ReturnRecord) -> StoreResult<bool>;
}

/// The reservation queue.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get(&self, id: &str) -> StoreResult<Option<Reservation>>;

    /// A second active reservation for the pair fails with `StoreError::Duplicate`.
    async fn insert(&self, reservation: &Reservation) -> StoreResult<()>;

    /// Active reservations for a book in FIFO order.
    async fn active_for_book(&self, book_id: &str) -> StoreResult<Vec<Reservation>>;

    /// Reservations of the book fulfilled at or after `since`.
    async fn fulfilled_for_book(
        &self,
        book_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Reservation>>;

    async fn count_active_for_student(&self, student_id: &str) -> StoreResult<i64>;

    async fn find_active(&self, student_id: &str, book_id: &str)
        -> StoreResult<Option<Reservation>>;

    /// Active reservations with `expires_at < now`.
    async fn active_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Reservation>>;

    async fn books_with_active(&self) -> StoreResult<Vec<String>>;

    /// Moves an active reservation to `to`. False if it was no longer active.
    async fn transition(
        &self,
        id: &str,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// The four ports, shared by every manager.
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn CatalogAccessor>,
    pub people: Arc<dyn PersonAccessor>,
    pub loans: Arc<dyn LoanStore>,
    pub reservations: Arc<dyn ReservationStore>,
}

impl Stores {
    /// Uses one adapter value for all four ports.
    pub fn from_adapter<A>(adapter: Arc<A>) -> Self
    where
        A: CatalogAccessor + PersonAccessor + LoanStore + ReservationStore + 'static,
    {
        Stores {
            catalog: adapter.clone(),
            people: adapter.clone(),
            loans: adapter.clone(),
            reservations: adapter,
        }
    }
}
