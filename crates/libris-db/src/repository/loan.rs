//! # Loan Repository
//!
//! The transaction log: borrow and renew rows, plus the three atomic units
//! that move copies.
//!
//! ## Atomic Units
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  open_loan   BEGIN                                                      │
//! │                INSERT transactions (borrow)                             │
//! │                UPDATE books available-1 WHERE available > 0             │
//! │                └── 0 rows → ROLLBACK, NoCopyAvailable                   │
//! │                UPDATE reservations fulfilled WHERE still active         │
//! │                └── only when the borrower is claiming a queue head      │
//! │              COMMIT                                                     │
//! │                                                                         │
//! │  renew       BEGIN                                                      │
//! │                UPDATE predecessor SET superseded_by WHERE still open    │
//! │                └── 0 rows → ROLLBACK, false                             │
//! │                INSERT transactions (renew)                              │
//! │              COMMIT                  (copy counts untouched)            │
//! │                                                                         │
//! │  close_loan  BEGIN                                                      │
//! │                UPDATE transactions SET returned_date WHERE still open   │
//! │                └── 0 rows → ROLLBACK, false                             │
//! │                UPDATE books available+1 WHERE available < total         │
//! │                UPDATE books condition (only if worse)                   │
//! │              COMMIT                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Each unit starts with a write so SQLite takes the write lock up front.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::repository::{book, reservation};
use libris_core::{Condition, Transaction};

const TRANSACTION_COLUMNS: &str = "id, student_id, book_id, transaction_type, transaction_date, \
     due_date, returned_date, librarian_id, fine_cents, fine_paid, return_condition, notes, \
     superseded_by";

/// Predicate for the current loan of a pair.
const OPEN: &str = "returned_date IS NULL AND superseded_by IS NULL";

/// Result of [`LoanRepository::open_loan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenLoanOutcome {
    /// Row inserted and one copy taken. `claimed` is true when the
    /// borrower's reservation was fulfilled in the same transaction.
    Opened { claimed: bool },
    /// The guarded decrement found no free copy; nothing was written.
    NoCopyAvailable,
}

/// Everything `close_loan` writes.
#[derive(Debug, Clone)]
pub struct ReturnRecord {
    pub transaction_id: String,
    pub book_id: String,
    pub returned_at: DateTime<Utc>,
    pub fine_cents: i64,
    pub condition: Condition,
    pub notes: Option<String>,
}

/// Repository for the loan event log.
#[derive(Debug, Clone)]
pub struct LoanRepository {
    pool: SqlitePool,
}

impl LoanRepository {
    /// Creates a new LoanRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LoanRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Gets a transaction by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1");
        let txn = sqlx::query_as::<_, Transaction>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(txn)
    }

    /// Open loans held by a student.
    pub async fn open_for_student(&self, student_id: &str) -> DbResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE student_id = ?1 AND {OPEN} ORDER BY due_date, id"
        );
        let loans = sqlx::query_as::<_, Transaction>(&sql)
            .bind(student_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(loans)
    }

    /// The single open row of a (student, book) pair, if any.
    pub async fn current_for_pair(
        &self,
        student_id: &str,
        book_id: &str,
    ) -> DbResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE student_id = ?1 AND book_id = ?2 AND {OPEN}"
        );
        let txn = sqlx::query_as::<_, Transaction>(&sql)
            .bind(student_id)
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(txn)
    }

    /// Number of `renew` rows ever written for a pair.
    pub async fn count_renewals(&self, student_id: &str, book_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM transactions
            WHERE student_id = ?1 AND book_id = ?2 AND transaction_type = 'renew'
            "#,
        )
        .bind(student_id)
        .bind(book_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Open loans against a book; equals `total - available` when consistent.
    pub async fn count_open_for_book(&self, book_id: &str) -> DbResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM transactions WHERE book_id = ?1 AND {OPEN}");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(book_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Every row for a pair, oldest first.
    pub async fn history(&self, student_id: &str, book_id: &str) -> DbResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE student_id = ?1 AND book_id = ?2 ORDER BY transaction_date, id"
        );
        let rows = sqlx::query_as::<_, Transaction>(&sql)
            .bind(student_id)
            .bind(book_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// True if the student opened a borrow of the book at or after `since`.
    pub async fn borrowed_since(
        &self,
        student_id: &str,
        book_id: &str,
        since: DateTime<Utc>,
    ) -> DbResult<bool> {
        let dates: Vec<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT transaction_date FROM transactions
            WHERE student_id = ?1 AND book_id = ?2 AND transaction_type = 'borrow'
            "#,
        )
        .bind(student_id)
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;

        // Compared as timestamps, not as stored text.
        Ok(dates.into_iter().any(|d| d >= since))
    }

    /// Sum of unpaid fines for a student, in cents.
    pub async fn outstanding_fine_cents(&self, student_id: &str) -> DbResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(fine_cents) FROM transactions
            WHERE student_id = ?1 AND fine_paid = 0 AND fine_cents > 0
            "#,
        )
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0))
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Marks a returned loan's fine as paid. False if nothing was owed.
    pub async fn mark_fine_paid(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET fine_paid = 1
            WHERE id = ?1 AND returned_date IS NOT NULL AND fine_cents > 0 AND fine_paid = 0
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Inserts a borrow row and takes one copy, atomically.
    ///
    /// With `claim`, the borrower's active reservation is fulfilled in the
    /// same transaction, stamped with the borrow's `transaction_date`. A
    /// reservation that already left the queue does not stop the loan.
    pub async fn open_loan(
        &self,
        txn: &Transaction,
        claim: Option<&str>,
    ) -> DbResult<OpenLoanOutcome> {
        debug!(id = %txn.id, book_id = %txn.book_id, student_id = %txn.student_id, "Opening loan");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        insert_row(&mut tx, txn).await?;

        if !book::take_copy(&mut tx, &txn.book_id).await? {
            tx.rollback()
                .await
                .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
            warn!(book_id = %txn.book_id, "Guarded decrement found no free copy");
            return Ok(OpenLoanOutcome::NoCopyAvailable);
        }

        let claimed = match claim {
            Some(reservation_id) => {
                reservation::claim(&mut tx, reservation_id, txn.transaction_date).await?
            }
            None => false,
        };

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        Ok(OpenLoanOutcome::Opened { claimed })
    }

    /// Supersedes `predecessor_id` with the renew row `renewal`, atomically.
    ///
    /// Returns false (and writes nothing) if the predecessor is no longer open.
    pub async fn renew(&self, predecessor_id: &str, renewal: &Transaction) -> DbResult<bool> {
        debug!(predecessor = %predecessor_id, id = %renewal.id, "Renewing loan");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let sql = format!("UPDATE transactions SET superseded_by = ?2 WHERE id = ?1 AND {OPEN}");
        let result = sqlx::query(&sql)
            .bind(predecessor_id)
            .bind(&renewal.id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
            return Ok(false);
        }

        insert_row(&mut tx, renewal).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        Ok(true)
    }

    /// Closes an open loan and puts its copy back, atomically.
    ///
    /// Returns false (and writes nothing) if the loan is no longer open.
    pub async fn close_loan(&self, record: &ReturnRecord) -> DbResult<bool> {
        debug!(id = %record.transaction_id, book_id = %record.book_id, "Closing loan");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let sql = format!(
            "UPDATE transactions \
             SET returned_date = ?2, fine_cents = ?3, return_condition = ?4, \
                 notes = COALESCE(?5, notes) \
             WHERE id = ?1 AND {OPEN}"
        );
        let result = sqlx::query(&sql)
            .bind(&record.transaction_id)
            .bind(record.returned_at)
            .bind(record.fine_cents)
            .bind(record.condition)
            .bind(&record.notes)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
            return Ok(false);
        }

        if !book::return_copy(&mut tx, &record.book_id).await? {
            tx.rollback()
                .await
                .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
            return Err(DbError::Internal(format!(
                "available copies of book {} already at total",
                record.book_id
            )));
        }

        book::degrade_condition(&mut tx, &record.book_id, record.condition).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        Ok(true)
    }
}

async fn insert_row(conn: &mut sqlx::SqliteConnection, txn: &Transaction) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, student_id, book_id, transaction_type,
            transaction_date, due_date, returned_date, librarian_id,
            fine_cents, fine_paid, return_condition, notes, superseded_by
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(&txn.id)
    .bind(&txn.student_id)
    .bind(&txn.book_id)
    .bind(txn.transaction_type)
    .bind(txn.transaction_date)
    .bind(txn.due_date)
    .bind(txn.returned_date)
    .bind(&txn.librarian_id)
    .bind(txn.fine_cents)
    .bind(txn.fine_paid)
    .bind(txn.return_condition)
    .bind(&txn.notes)
    .bind(&txn.superseded_by)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{sample_loan, sample_reservation, seeded_db};
    use chrono::Duration;
    use libris_core::{ReservationStatus, TransactionType};

    #[tokio::test]
    async fn test_open_loan_takes_a_copy() {
        let (db, book, student, librarian) = seeded_db(1).await;
        let loan = sample_loan(&student.id, &book.id, &librarian.id);

        let outcome = db.loans().open_loan(&loan, None).await.unwrap();
        assert_eq!(outcome, OpenLoanOutcome::Opened { claimed: false });

        let book_after = db.books().get_by_id(&book.id).await.unwrap().unwrap();
        assert_eq!(book_after.available_copies, 0);
        assert_eq!(db.loans().count_open_for_book(&book.id).await.unwrap(), 1);
        assert_eq!(db.loans().open_for_student(&student.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_loan_without_copy_writes_nothing() {
        let (db, book, student, librarian) = seeded_db(0).await;
        let loan = sample_loan(&student.id, &book.id, &librarian.id);

        let outcome = db.loans().open_loan(&loan, None).await.unwrap();
        assert_eq!(outcome, OpenLoanOutcome::NoCopyAvailable);
        assert!(db.loans().get_by_id(&loan.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_loan_fulfills_claim_at_borrow_time() {
        let (db, book, student, librarian) = seeded_db(1).await;
        let loan = sample_loan(&student.id, &book.id, &librarian.id);
        let r = sample_reservation(&student.id, &book.id, loan.transaction_date - Duration::days(1));
        db.reservations().insert(&r).await.unwrap();

        let outcome = db.loans().open_loan(&loan, Some(&r.id)).await.unwrap();
        assert_eq!(outcome, OpenLoanOutcome::Opened { claimed: true });

        let claimed = db.reservations().get_by_id(&r.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, ReservationStatus::Fulfilled);
        assert_eq!(claimed.fulfilled_at, Some(loan.transaction_date));
        // The claim is already consumed by the loan that stamped it.
        let fulfilled_at = claimed.fulfilled_at.unwrap();
        assert!(db.loans().borrowed_since(&student.id, &book.id, fulfilled_at).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_loan_without_copy_leaves_reservation_active() {
        let (db, book, student, librarian) = seeded_db(0).await;
        let loan = sample_loan(&student.id, &book.id, &librarian.id);
        let r = sample_reservation(&student.id, &book.id, loan.transaction_date);
        db.reservations().insert(&r).await.unwrap();

        let outcome = db.loans().open_loan(&loan, Some(&r.id)).await.unwrap();
        assert_eq!(outcome, OpenLoanOutcome::NoCopyAvailable);

        let still = db.reservations().get_by_id(&r.id).await.unwrap().unwrap();
        assert_eq!(still.status, ReservationStatus::Active);
        assert!(still.fulfilled_at.is_none());
        assert!(db.loans().get_by_id(&loan.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_loan_with_stale_claim_still_opens() {
        let (db, book, student, librarian) = seeded_db(1).await;
        let loan = sample_loan(&student.id, &book.id, &librarian.id);
        let r = sample_reservation(&student.id, &book.id, loan.transaction_date);
        db.reservations().insert(&r).await.unwrap();
        db.reservations()
            .transition(&r.id, ReservationStatus::Expired, loan.transaction_date)
            .await
            .unwrap();

        let outcome = db.loans().open_loan(&loan, Some(&r.id)).await.unwrap();
        assert_eq!(outcome, OpenLoanOutcome::Opened { claimed: false });
        let expired = db.reservations().get_by_id(&r.id).await.unwrap().unwrap();
        assert_eq!(expired.status, ReservationStatus::Expired);
    }

    #[tokio::test]
    async fn test_second_open_loan_for_pair_is_rejected() {
        let (db, book, student, librarian) = seeded_db(2).await;
        db.loans()
            .open_loan(&sample_loan(&student.id, &book.id, &librarian.id), None)
            .await
            .unwrap();

        let err = db
            .loans()
            .open_loan(&sample_loan(&student.id, &book.id, &librarian.id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        let book_after = db.books().get_by_id(&book.id).await.unwrap().unwrap();
        assert_eq!(book_after.available_copies, 1);
    }

    #[tokio::test]
    async fn test_renew_supersedes_predecessor() {
        let (db, book, student, librarian) = seeded_db(1).await;
        let loan = sample_loan(&student.id, &book.id, &librarian.id);
        db.loans().open_loan(&loan, None).await.unwrap();

        let mut renewal = sample_loan(&student.id, &book.id, &librarian.id);
        renewal.transaction_type = TransactionType::Renew;
        renewal.due_date = loan.due_date + Duration::days(14);

        assert!(db.loans().renew(&loan.id, &renewal).await.unwrap());
        // A second renewal through the stale id loses.
        let mut stale = renewal.clone();
        stale.id = uuid::Uuid::new_v4().to_string();
        assert!(!db.loans().renew(&loan.id, &stale).await.unwrap());

        let old = db.loans().get_by_id(&loan.id).await.unwrap().unwrap();
        assert_eq!(old.superseded_by.as_deref(), Some(renewal.id.as_str()));
        let current = db
            .loans()
            .current_for_pair(&student.id, &book.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.id, renewal.id);
        assert_eq!(db.loans().count_renewals(&student.id, &book.id).await.unwrap(), 1);
        assert_eq!(db.loans().count_open_for_book(&book.id).await.unwrap(), 1);
        assert_eq!(db.loans().history(&student.id, &book.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_close_loan_once() {
        let (db, book, student, librarian) = seeded_db(1).await;
        let loan = sample_loan(&student.id, &book.id, &librarian.id);
        db.loans().open_loan(&loan, None).await.unwrap();

        let record = ReturnRecord {
            transaction_id: loan.id.clone(),
            book_id: book.id.clone(),
            returned_at: Utc::now(),
            fine_cents: 150,
            condition: Condition::Damaged,
            notes: Some("spine cracked".into()),
        };
        assert!(db.loans().close_loan(&record).await.unwrap());
        assert!(!db.loans().close_loan(&record).await.unwrap());

        let closed = db.loans().get_by_id(&loan.id).await.unwrap().unwrap();
        assert!(closed.is_returned());
        assert_eq!(closed.fine_cents, 150);
        assert_eq!(closed.return_condition, Some(Condition::Damaged));

        let book_after = db.books().get_by_id(&book.id).await.unwrap().unwrap();
        assert_eq!(book_after.available_copies, 1);
        assert_eq!(book_after.condition, Condition::Damaged);

        assert_eq!(db.loans().outstanding_fine_cents(&student.id).await.unwrap(), 150);
        assert!(db.loans().mark_fine_paid(&loan.id).await.unwrap());
        assert!(!db.loans().mark_fine_paid(&loan.id).await.unwrap());
        assert_eq!(db.loans().outstanding_fine_cents(&student.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_borrowed_since() {
        let (db, book, student, librarian) = seeded_db(1).await;
        let loan = sample_loan(&student.id, &book.id, &librarian.id);
        db.loans().open_loan(&loan, None).await.unwrap();

        let before = loan.transaction_date - Duration::hours(1);
        let after = loan.transaction_date + Duration::hours(1);
        assert!(db.loans().borrowed_since(&student.id, &book.id, before).await.unwrap());
        assert!(!db.loans().borrowed_since(&student.id, &book.id, after).await.unwrap());
    }
}
