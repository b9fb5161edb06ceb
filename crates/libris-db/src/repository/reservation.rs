//! # Reservation Repository
//!
//! The per-book FIFO queue.
//!
//! ## Status Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 ┌──► fulfilled  (FulfillReservation)                    │
//! │   active ───────┼──► cancelled  (CancelReservation)                     │
//! │                 └──► expired    (ExpireReservations)                    │
//! │                                                                         │
//! │  Every transition is `UPDATE ... WHERE id = ? AND status = 'active'`.  │
//! │  A fulfillment racing the sweeper: exactly one sees rows_affected = 1. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Queue order is `(reserved_at, id)`. Rows are sorted again in Rust after
//! loading so ordering never depends on how timestamps compare as text.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use libris_core::{Reservation, ReservationStatus};

const RESERVATION_COLUMNS: &str =
    "id, student_id, book_id, reserved_at, expires_at, status, fulfilled_at";

/// Repository for reservation queue operations.
#[derive(Debug, Clone)]
pub struct ReservationRepository {
    pool: SqlitePool,
}

impl ReservationRepository {
    /// Creates a new ReservationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReservationRepository { pool }
    }

    /// Gets a reservation by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Reservation>> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?1");
        let reservation = sqlx::query_as::<_, Reservation>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(reservation)
    }

    /// Inserts a reservation.
    ///
    /// A second active reservation for the same pair fails with
    /// `DbError::UniqueViolation`.
    pub async fn insert(&self, reservation: &Reservation) -> DbResult<()> {
        debug!(
            id = %reservation.id,
            book_id = %reservation.book_id,
            student_id = %reservation.student_id,
            "Inserting reservation"
        );

        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, student_id, book_id, reserved_at, expires_at, status, fulfilled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&reservation.id)
        .bind(&reservation.student_id)
        .bind(&reservation.book_id)
        .bind(reservation.reserved_at)
        .bind(reservation.expires_at)
        .bind(reservation.status)
        .bind(reservation.fulfilled_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Active reservations for a book in FIFO order.
    pub async fn active_for_book(&self, book_id: &str) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE book_id = ?1 AND status = 'active' ORDER BY reserved_at, id"
        );
        let mut rows = sqlx::query_as::<_, Reservation>(&sql)
            .bind(book_id)
            .fetch_all(&self.pool)
            .await?;

        sort_fifo(&mut rows);
        Ok(rows)
    }

    /// Reservations of a book fulfilled at or after `since` (claim candidates).
    pub async fn fulfilled_for_book(
        &self,
        book_id: &str,
        since: DateTime<Utc>,
    ) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE book_id = ?1 AND status = 'fulfilled' \
               AND julianday(fulfilled_at) >= julianday(?2)"
        );
        let mut rows = sqlx::query_as::<_, Reservation>(&sql)
            .bind(book_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        rows.retain(|r| r.fulfilled_at.is_some_and(|at| at >= since));
        Ok(rows)
    }

    /// Number of active reservations held by a student.
    pub async fn count_active_for_student(&self, student_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations WHERE student_id = ?1 AND status = 'active'",
        )
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// The active reservation of a pair, if any.
    pub async fn find_active(
        &self,
        student_id: &str,
        book_id: &str,
    ) -> DbResult<Option<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE student_id = ?1 AND book_id = ?2 AND status = 'active'"
        );
        let reservation = sqlx::query_as::<_, Reservation>(&sql)
            .bind(student_id)
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(reservation)
    }

    /// Active reservations whose `expires_at` is strictly before `now`.
    pub async fn active_expired(&self, now: DateTime<Utc>) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE status = 'active' AND julianday(expires_at) <= julianday(?1)"
        );
        let mut rows = sqlx::query_as::<_, Reservation>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        // julianday rounds to the millisecond; the strict bound is exact here.
        rows.retain(|r| r.expires_at < now);
        sort_fifo(&mut rows);
        Ok(rows)
    }

    /// Distinct book IDs that have at least one active reservation.
    pub async fn books_with_active(&self) -> DbResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT book_id FROM reservations WHERE status = 'active' ORDER BY book_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Moves an active reservation to `to`. False if it was no longer active.
    ///
    /// `at` becomes `fulfilled_at` when `to` is `Fulfilled`.
    pub async fn transition(
        &self,
        id: &str,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let fulfilled_at = (to == ReservationStatus::Fulfilled).then_some(at);

        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = ?2, fulfilled_at = COALESCE(?3, fulfilled_at)
            WHERE id = ?1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(to)
        .bind(fulfilled_at)
        .execute(&self.pool)
        .await?;

        debug!(id = %id, to = %to, applied = result.rows_affected() == 1, "Reservation transition");
        Ok(result.rows_affected() == 1)
    }
}

/// Fulfills an active reservation inside a caller's transaction.
/// Returns false if it had already left the queue.
pub(crate) async fn claim(
    conn: &mut SqliteConnection,
    id: &str,
    at: DateTime<Utc>,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE reservations
        SET status = 'fulfilled', fulfilled_at = ?2
        WHERE id = ?1 AND status = 'active'
        "#,
    )
    .bind(id)
    .bind(at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn sort_fifo(rows: &mut [Reservation]) {
    rows.sort_by(|a, b| a.queue_key().cmp(&b.queue_key()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::test_support::{sample_reservation, sample_student, seeded_db};
    use chrono::Duration;

    #[tokio::test]
    async fn test_fifo_with_id_tiebreak() {
        let (db, book, first, _) = seeded_db(0).await;
        let second = sample_student(1);
        db.people().insert_student(&second).await.unwrap();

        let at = Utc::now();
        let mut a = sample_reservation(&first.id, &book.id, at);
        let mut b = sample_reservation(&second.id, &book.id, at);
        a.id = "00000000-0000-4000-8000-00000000000b".into();
        b.id = "00000000-0000-4000-8000-00000000000a".into();
        db.reservations().insert(&a).await.unwrap();
        db.reservations().insert(&b).await.unwrap();

        let queue = db.reservations().active_for_book(&book.id).await.unwrap();
        let ids: Vec<_> = queue.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, [b.id.as_str(), a.id.as_str()]);
    }

    #[tokio::test]
    async fn test_one_active_per_pair() {
        let (db, book, student, _) = seeded_db(0).await;
        let now = Utc::now();
        db.reservations()
            .insert(&sample_reservation(&student.id, &book.id, now))
            .await
            .unwrap();

        let err = db
            .reservations()
            .insert(&sample_reservation(&student.id, &book.id, now))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        assert_eq!(db.reservations().count_active_for_student(&student.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transition_only_from_active() {
        let (db, book, student, _) = seeded_db(0).await;
        let now = Utc::now();
        let r = sample_reservation(&student.id, &book.id, now);
        db.reservations().insert(&r).await.unwrap();

        assert!(db
            .reservations()
            .transition(&r.id, ReservationStatus::Fulfilled, now)
            .await
            .unwrap());
        // Sweeper loses the race.
        assert!(!db
            .reservations()
            .transition(&r.id, ReservationStatus::Expired, now)
            .await
            .unwrap());

        let loaded = db.reservations().get_by_id(&r.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ReservationStatus::Fulfilled);
        assert!(loaded.fulfilled_at.is_some());
        let since = now - Duration::minutes(1);
        assert_eq!(db.reservations().fulfilled_for_book(&book.id, since).await.unwrap().len(), 1);
        let later = now + Duration::minutes(1);
        assert!(db.reservations().fulfilled_for_book(&book.id, later).await.unwrap().is_empty());
        assert!(db.reservations().find_active(&student.id, &book.id).await.unwrap().is_none());

        // The pair may queue again once the old entry is terminal.
        db.reservations()
            .insert(&sample_reservation(&student.id, &book.id, now))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_active_expired_and_books_with_active() {
        let (db, book, student, _) = seeded_db(0).await;
        let now = Utc::now();
        let r = sample_reservation(&student.id, &book.id, now - Duration::days(8));
        db.reservations().insert(&r).await.unwrap();

        assert_eq!(db.reservations().books_with_active().await.unwrap(), vec![book.id.clone()]);
        assert_eq!(db.reservations().active_expired(now).await.unwrap().len(), 1);
        // The bound is strict.
        assert!(db.reservations().active_expired(r.expires_at).await.unwrap().is_empty());
        assert!(db
            .reservations()
            .active_expired(now - Duration::days(2))
            .await
            .unwrap()
            .is_empty());
    }
}
