//! # SQLite Adapter
//!
//! Implements every port on top of [`libris_db::Database`]. The atomic
//! units map one-to-one onto the `LoanRepository` transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use libris_core::{Book, Librarian, Reservation, ReservationStatus, Student, Transaction};
use libris_db::{self as db, Database};

use crate::error::StoreResult;
use crate::ports::{
    CatalogAccessor, LoanStore, OpenLoanOutcome, PersonAccessor, ReservationStore, ReturnRecord,
    Stores,
};

/// All four ports over one connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        SqliteStore { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Wraps this adapter as the engine's port bundle.
    pub fn into_stores(self) -> Stores {
        Stores::from_adapter(Arc::new(self))
    }
}

#[async_trait]
impl CatalogAccessor for SqliteStore {
    async fn get_book(&self, id: &str) -> StoreResult<Option<Book>> {
        Ok(self.db.books().get_by_id(id).await?)
    }
}

#[async_trait]
impl PersonAccessor for SqliteStore {
    async fn get_student(&self, id: &str) -> StoreResult<Option<Student>> {
        Ok(self.db.people().get_student(id).await?)
    }

    async fn get_librarian(&self, id: &str) -> StoreResult<Option<Librarian>> {
        Ok(self.db.people().get_librarian(id).await?)
    }
}

#[async_trait]
impl LoanStore for SqliteStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Transaction>> {
        Ok(self.db.loans().get_by_id(id).await?)
    }

    async fn open_for_student(&self, student_id: &str) -> StoreResult<Vec<Transaction>> {
        Ok(self.db.loans().open_for_student(student_id).await?)
    }

    async fn count_renewals(&self, student_id: &str, book_id: &str) -> StoreResult<i64> {
        Ok(self.db.loans().count_renewals(student_id, book_id).await?)
    }

    async fn count_open_for_book(&self, book_id: &str) -> StoreResult<i64> {
        Ok(self.db.loans().count_open_for_book(book_id).await?)
    }

    async fn history(&self, student_id: &str, book_id: &str) -> StoreResult<Vec<Transaction>> {
        Ok(self.db.loans().history(student_id, book_id).await?)
    }

    async fn borrowed_since(
        &self,
        student_id: &str,
        book_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(self.db.loans().borrowed_since(student_id, book_id, since).await?)
    }

    async fn outstanding_fine_cents(&self, student_id: &str) -> StoreResult<i64> {
        Ok(self.db.loans().outstanding_fine_cents(student_id).await?)
    }

    async fn mark_fine_paid(&self, id: &str) -> StoreResult<bool> {
        Ok(self.db.loans().mark_fine_paid(id).await?)
    }

    async fn open_loan(
        &self,
        txn: &Transaction,
        claim: Option<&str>,
    ) -> StoreResult<OpenLoanOutcome> {
        let outcome = match self.db.loans().open_loan(txn, claim).await? {
            db::OpenLoanOutcome::Opened { claimed } => OpenLoanOutcome::Opened { claimed },
            db::OpenLoanOutcome::NoCopyAvailable => OpenLoanOutcome::NoCopyAvailable,
        };
        Ok(outcome)
    }

    async fn renew(&self, predecessor_id: &str, renewal: &Transaction) -> StoreResult<bool> {
        Ok(self.db.loans().renew(predecessor_id, renewal).await?)
    }

    async fn close_loan(&self, record: &ReturnRecord) -> StoreResult<bool> {
        let record = db::ReturnRecord {
            transaction_id: record.transaction_id.clone(),
            book_id: record.book_id.clone(),
            returned_at: record.returned_at,
            fine_cents: record.fine_cents,
            condition: record.condition,
            notes: record.notes.clone(),
        };
        Ok(self.db.loans().close_loan(&record).await?)
    }
}

#[async_trait]
impl ReservationStore for SqliteStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Reservation>> {
        Ok(self.db.reservations().get_by_id(id).await?)
    }

    async fn insert(&self, reservation: &Reservation) -> StoreResult<()> {
        Ok(self.db.reservations().insert(reservation).await?)
    }

    async fn active_for_book(&self, book_id: &str) -> StoreResult<Vec<Reservation>> {
        Ok(self.db.reservations().active_for_book(book_id).await?)
    }

    async fn fulfilled_for_book(
        &self,
        book_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Reservation>> {
        Ok(self.db.reservations().fulfilled_for_book(book_id, since).await?)
    }

    async fn count_active_for_student(&self, student_id: &str) -> StoreResult<i64> {
        Ok(self.db.reservations().count_active_for_student(student_id).await?)
    }

    async fn find_active(
        &self,
        student_id: &str,
        book_id: &str,
    ) -> StoreResult<Option<Reservation>> {
        Ok(self.db.reservations().find_active(student_id, book_id).await?)
    }

    async fn active_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Reservation>> {
        Ok(self.db.reservations().active_expired(now).await?)
    }

    async fn books_with_active(&self) -> StoreResult<Vec<String>> {
        Ok(self.db.reservations().books_with_active().await?)
    }

    async fn transition(
        &self,
        id: &str,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(self.db.reservations().transition(id, to, at).await?)
    }
}
