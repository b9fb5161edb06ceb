//! # In-Memory Adapter
//!
//! All four ports over one `tokio::sync::Mutex`. Each atomic unit holds the
//! lock for its whole body, so the guarded writes behave like the SQLite
//! transactions: a unit applies completely or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use libris_core::{
    Book, Librarian, Reservation, ReservationStatus, Student, Transaction, TransactionType,
};

use crate::error::{StoreError, StoreResult};
use crate::ports::{
    CatalogAccessor, LoanStore, OpenLoanOutcome, PersonAccessor, ReservationStore, ReturnRecord,
    Stores,
};

#[derive(Debug, Default)]
struct State {
    books: HashMap<String, Book>,
    students: HashMap<String, Student>,
    librarians: HashMap<String, Librarian>,
    /// Insertion order is chronological order.
    transactions: Vec<Transaction>,
    reservations: Vec<Reservation>,
}

impl State {
    fn open_index(&self, id: &str) -> Option<usize> {
        self.transactions
            .iter()
            .position(|t| t.id == id && t.is_open())
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    /// Reservation transitions still to fail with `StoreError::Unavailable`.
    injected_failures: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryStore::default())
    }

    /// Wraps this adapter as the engine's port bundle.
    pub fn stores(self: &Arc<Self>) -> Stores {
        Stores::from_adapter(self.clone())
    }

    // -------------------------------------------------------------------------
    // Seeding (catalog and people are owned elsewhere in production)
    // -------------------------------------------------------------------------

    pub async fn insert_book(&self, book: Book) {
        self.state.lock().await.books.insert(book.id.clone(), book);
    }

    pub async fn insert_student(&self, student: Student) {
        self.state
            .lock()
            .await
            .students
            .insert(student.id.clone(), student);
    }

    pub async fn insert_librarian(&self, librarian: Librarian) {
        self.state
            .lock()
            .await
            .librarians
            .insert(librarian.id.clone(), librarian);
    }

    pub async fn set_book_active(&self, id: &str, is_active: bool) {
        if let Some(book) = self.state.lock().await.books.get_mut(id) {
            book.is_active = is_active;
        }
    }

    pub async fn set_student_active(&self, id: &str, is_active: bool) {
        if let Some(student) = self.state.lock().await.students.get_mut(id) {
            student.is_active = is_active;
        }
    }

    /// Current snapshot of a book.
    pub async fn book(&self, id: &str) -> Option<Book> {
        self.state.lock().await.books.get(id).cloned()
    }

    /// Makes the next `n` reservation transitions fail as if storage were busy.
    pub fn fail_next_transitions(&self, n: usize) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CatalogAccessor for MemoryStore {
    async fn get_book(&self, id: &str) -> StoreResult<Option<Book>> {
        Ok(self.state.lock().await.books.get(id).cloned())
    }
}

#[async_trait]
impl PersonAccessor for MemoryStore {
    async fn get_student(&self, id: &str) -> StoreResult<Option<Student>> {
        Ok(self.state.lock().await.students.get(id).cloned())
    }

    async fn get_librarian(&self, id: &str) -> StoreResult<Option<Librarian>> {
        Ok(self.state.lock().await.librarians.get(id).cloned())
    }
}

#[async_trait]
impl LoanStore for MemoryStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Transaction>> {
        let state = self.state.lock().await;
        Ok(state.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn open_for_student(&self, student_id: &str) -> StoreResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.student_id == student_id && t.is_open())
            .cloned()
            .collect())
    }

    async fn count_renewals(&self, student_id: &str, book_id: &str) -> StoreResult<i64> {
        let state = self.state.lock().await;
        let count = state
            .transactions
            .iter()
            .filter(|t| {
                t.student_id == student_id
                    && t.book_id == book_id
                    && t.transaction_type == TransactionType::Renew
            })
            .count();
        Ok(count as i64)
    }

    async fn count_open_for_book(&self, book_id: &str) -> StoreResult<i64> {
        let state = self.state.lock().await;
        let count = state
            .transactions
            .iter()
            .filter(|t| t.book_id == book_id && t.is_open())
            .count();
        Ok(count as i64)
    }

    async fn history(&self, student_id: &str, book_id: &str) -> StoreResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.student_id == student_id && t.book_id == book_id)
            .cloned()
            .collect())
    }

    async fn borrowed_since(
        &self,
        student_id: &str,
        book_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let state = self.state.lock().await;
        Ok(state.transactions.iter().any(|t| {
            t.student_id == student_id
                && t.book_id == book_id
                && t.transaction_type == TransactionType::Borrow
                && t.transaction_date >= since
        }))
    }

    async fn outstanding_fine_cents(&self, student_id: &str) -> StoreResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.student_id == student_id)
            .map(|t| t.unpaid_fine().cents())
            .sum())
    }

    async fn mark_fine_paid(&self, id: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state
            .transactions
            .iter_mut()
            .find(|t| t.id == id && t.is_returned() && t.unpaid_fine().is_positive())
        {
            Some(txn) => {
                txn.fine_paid = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn open_loan(
        &self,
        txn: &Transaction,
        claim: Option<&str>,
    ) -> StoreResult<OpenLoanOutcome> {
        let mut state = self.state.lock().await;

        if state
            .transactions
            .iter()
            .any(|t| t.student_id == txn.student_id && t.book_id == txn.book_id && t.is_open())
        {
            return Err(StoreError::Duplicate(format!(
                "open loan '{}/{}'",
                txn.student_id, txn.book_id
            )));
        }

        let book = state
            .books
            .get_mut(&txn.book_id)
            .ok_or_else(|| StoreError::Backend(format!("unknown book {}", txn.book_id)))?;

        if book.available_copies <= 0 {
            return Ok(OpenLoanOutcome::NoCopyAvailable);
        }
        book.available_copies -= 1;
        book.updated_at = txn.transaction_date;

        let claimed = match claim {
            Some(id) => match state
                .reservations
                .iter_mut()
                .find(|r| r.id == id && r.is_active())
            {
                Some(reservation) => {
                    reservation.status = ReservationStatus::Fulfilled;
                    reservation.fulfilled_at = Some(txn.transaction_date);
                    true
                }
                None => false,
            },
            None => false,
        };

        state.transactions.push(txn.clone());
        Ok(OpenLoanOutcome::Opened { claimed })
    }

    async fn renew(&self, predecessor_id: &str, renewal: &Transaction) -> StoreResult<bool> {
        let mut state = self.state.lock().await;

        let Some(idx) = state.open_index(predecessor_id) else {
            return Ok(false);
        };
        state.transactions[idx].superseded_by = Some(renewal.id.clone());
        state.transactions.push(renewal.clone());
        Ok(true)
    }

    async fn close_loan(&self, record: &ReturnRecord) -> StoreResult<bool> {
        let mut state = self.state.lock().await;

        let Some(idx) = state.open_index(&record.transaction_id) else {
            return Ok(false);
        };

        let book = state
            .books
            .get_mut(&record.book_id)
            .ok_or_else(|| StoreError::Backend(format!("unknown book {}", record.book_id)))?;

        if book.available_copies >= book.total_copies {
            return Err(StoreError::Backend(format!(
                "available copies of book {} already at total",
                record.book_id
            )));
        }
        book.available_copies += 1;
        if record.condition.is_worse_than(book.condition) {
            book.condition = record.condition;
        }
        book.updated_at = record.returned_at;

        let txn = &mut state.transactions[idx];
        txn.returned_date = Some(record.returned_at);
        txn.fine_cents = record.fine_cents;
        txn.return_condition = Some(record.condition);
        if record.notes.is_some() {
            txn.notes = record.notes.clone();
        }
        Ok(true)
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Reservation>> {
        let state = self.state.lock().await;
        Ok(state.reservations.iter().find(|r| r.id == id).cloned())
    }

    async fn insert(&self, reservation: &Reservation) -> StoreResult<()> {
        let mut state = self.state.lock().await;

        if state.reservations.iter().any(|r| {
            r.is_active()
                && r.student_id == reservation.student_id
                && r.book_id == reservation.book_id
        }) {
            return Err(StoreError::Duplicate(format!(
                "active reservation '{}/{}'",
                reservation.student_id, reservation.book_id
            )));
        }

        state.reservations.push(reservation.clone());
        Ok(())
    }

    async fn active_for_book(&self, book_id: &str) -> StoreResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Reservation> = state
            .reservations
            .iter()
            .filter(|r| r.book_id == book_id && r.is_active())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.queue_key().cmp(&b.queue_key()));
        Ok(rows)
    }

    async fn fulfilled_for_book(
        &self,
        book_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .iter()
            .filter(|r| {
                r.book_id == book_id
                    && r.status == ReservationStatus::Fulfilled
                    && r.fulfilled_at.is_some_and(|at| at >= since)
            })
            .cloned()
            .collect())
    }

    async fn count_active_for_student(&self, student_id: &str) -> StoreResult<i64> {
        let state = self.state.lock().await;
        let count = state
            .reservations
            .iter()
            .filter(|r| r.student_id == student_id && r.is_active())
            .count();
        Ok(count as i64)
    }

    async fn find_active(
        &self,
        student_id: &str,
        book_id: &str,
    ) -> StoreResult<Option<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .iter()
            .find(|r| r.student_id == student_id && r.book_id == book_id && r.is_active())
            .cloned())
    }

    async fn active_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Reservation> = state
            .reservations
            .iter()
            .filter(|r| r.is_active() && r.expires_at < now)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.queue_key().cmp(&b.queue_key()));
        Ok(rows)
    }

    async fn books_with_active(&self) -> StoreResult<Vec<String>> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state
            .reservations
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.book_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn transition(
        &self,
        id: &str,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected failure".into()));
        }

        let mut state = self.state.lock().await;
        match state
            .reservations
            .iter_mut()
            .find(|r| r.id == id && r.is_active())
        {
            Some(reservation) => {
                reservation.status = to;
                if to == ReservationStatus::Fulfilled {
                    reservation.fulfilled_at = Some(at);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::test_support::Fixture;
    use chrono::Duration;
    use uuid::Uuid;

    fn borrow_row(student_id: &str, book_id: &str, librarian_id: &str, at: DateTime<Utc>) -> Transaction {
        Transaction {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.into(),
            book_id: book_id.into(),
            transaction_type: TransactionType::Borrow,
            transaction_date: at,
            due_date: at + Duration::days(14),
            returned_date: None,
            librarian_id: librarian_id.into(),
            fine_cents: 0,
            fine_paid: false,
            return_condition: None,
            notes: None,
            superseded_by: None,
        }
    }

    #[tokio::test]
    async fn test_open_loan_claims_only_when_a_copy_is_taken() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let student = fx.student(1).await;
        let librarian = fx.librarian().await;
        let store = fx.store.as_ref();

        let reservation = fx.queue().reserve_book(&student.id, &book.id).await.unwrap().reservation;
        let txn = borrow_row(&student.id, &book.id, &librarian.id, fx.clock.now());

        let outcome = LoanStore::open_loan(store, &txn, Some(&reservation.id)).await.unwrap();
        assert_eq!(outcome, OpenLoanOutcome::NoCopyAvailable);
        let untouched = ReservationStore::get(store, &reservation.id).await.unwrap().unwrap();
        assert!(untouched.is_active());
        assert!(untouched.fulfilled_at.is_none());
        assert!(LoanStore::get(store, &txn.id).await.unwrap().is_none());

        fx.set_available(&book.id, 1).await;
        let outcome = LoanStore::open_loan(store, &txn, Some(&reservation.id)).await.unwrap();
        assert_eq!(outcome, OpenLoanOutcome::Opened { claimed: true });
        let claimed = ReservationStore::get(store, &reservation.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, ReservationStatus::Fulfilled);
        assert_eq!(claimed.fulfilled_at, Some(txn.transaction_date));
    }

    #[tokio::test]
    async fn test_fulfilled_for_book_honours_since() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let student = fx.student(1).await;
        let store = fx.store.as_ref();

        let reservation = fx.queue().reserve_book(&student.id, &book.id).await.unwrap().reservation;
        let at = fx.clock.now();
        store
            .transition(&reservation.id, ReservationStatus::Fulfilled, at)
            .await
            .unwrap();

        let hit = store.fulfilled_for_book(&book.id, at).await.unwrap();
        assert_eq!(hit.len(), 1);
        let later = at + Duration::seconds(1);
        assert!(store.fulfilled_for_book(&book.id, later).await.unwrap().is_empty());
    }
}
