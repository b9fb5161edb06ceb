//! # Book Repository
//!
//! Catalog access: book lookup and the guarded copy counters.
//!
//! ## Copy Counter Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  NEVER read-then-write the counter:                                     │
//! │                                                                         │
//! │    let b = get(id); update(id, b.available - 1)   ❌ lost update        │
//! │                                                                         │
//! │  ALWAYS a single guarded statement, then check rows_affected:          │
//! │                                                                         │
//! │    UPDATE books SET available_copies = available_copies - 1            │
//! │    WHERE id = ? AND available_copies > 0           ✅                   │
//! │                                                                         │
//! │  0 rows affected = someone else took the last copy.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! The guarded helpers take a `SqliteConnection` so they run inside the
//! loan repository's transactions.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use libris_core::{Book, Condition};

/// Repository for book database operations.
#[derive(Debug, Clone)]
pub struct BookRepository {
    pool: SqlitePool,
}

impl BookRepository {
    /// Creates a new BookRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BookRepository { pool }
    }

    /// Gets a book by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(
            r#"
            SELECT
                id, title, total_copies, available_copies,
                is_active, condition, created_at, updated_at
            FROM books
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(book)
    }

    /// Inserts a book.
    pub async fn insert(&self, book: &Book) -> DbResult<()> {
        debug!(id = %book.id, title = %book.title, "Inserting book");

        sqlx::query(
            r#"
            INSERT INTO books (
                id, title, total_copies, available_copies,
                is_active, condition, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&book.id)
        .bind(&book.title)
        .bind(book.total_copies)
        .bind(book.available_copies)
        .bind(book.is_active)
        .bind(book.condition)
        .bind(book.created_at)
        .bind(book.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Activates or deactivates a book.
    pub async fn set_active(&self, id: &str, is_active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE books SET is_active = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(is_active)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Book", id));
        }

        Ok(())
    }

    /// Counts books in the catalog.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Guarded counter updates (run inside a caller's transaction)
// =============================================================================

/// Takes one copy. Returns false if none was free.
pub(crate) async fn take_copy(conn: &mut SqliteConnection, book_id: &str) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE books
        SET available_copies = available_copies - 1, updated_at = ?2
        WHERE id = ?1 AND available_copies > 0
        "#,
    )
    .bind(book_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Puts one copy back. Returns false if the counter was already at total.
pub(crate) async fn return_copy(conn: &mut SqliteConnection, book_id: &str) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE books
        SET available_copies = available_copies + 1, updated_at = ?2
        WHERE id = ?1 AND available_copies < total_copies
        "#,
    )
    .bind(book_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Lowers the stored condition to `returned` if it is worse. Never raises it.
pub(crate) async fn degrade_condition(
    conn: &mut SqliteConnection,
    book_id: &str,
    returned: Condition,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE books
        SET condition = ?2, updated_at = ?4
        WHERE id = ?1
          AND (CASE condition
                WHEN 'excellent' THEN 4
                WHEN 'good' THEN 3
                WHEN 'fair' THEN 2
                WHEN 'poor' THEN 1
                ELSE 0
               END) > ?3
        "#,
    )
    .bind(book_id)
    .bind(returned)
    .bind(i64::from(returned.rank()))
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{sample_book, test_db};

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = test_db().await;
        let book = sample_book(2);
        db.books().insert(&book).await.unwrap();

        let loaded = db.books().get_by_id(&book.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, book.title);
        assert_eq!(loaded.available_copies, 2);
        assert_eq!(loaded.condition, Condition::Good);
        assert!(db.books().get_by_id("missing").await.unwrap().is_none());
        assert_eq!(db.books().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_guarded_counters() {
        let db = test_db().await;
        let book = sample_book(1);
        db.books().insert(&book).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(take_copy(&mut conn, &book.id).await.unwrap());
        assert!(!take_copy(&mut conn, &book.id).await.unwrap());
        assert!(return_copy(&mut conn, &book.id).await.unwrap());
        assert!(!return_copy(&mut conn, &book.id).await.unwrap());
        drop(conn);

        let loaded = db.books().get_by_id(&book.id).await.unwrap().unwrap();
        assert_eq!(loaded.available_copies, 1);
    }

    #[tokio::test]
    async fn test_condition_only_degrades() {
        let db = test_db().await;
        let book = sample_book(1);
        db.books().insert(&book).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(!degrade_condition(&mut conn, &book.id, Condition::Excellent).await.unwrap());
        assert!(!degrade_condition(&mut conn, &book.id, Condition::Good).await.unwrap());
        assert!(degrade_condition(&mut conn, &book.id, Condition::Poor).await.unwrap());
        assert!(!degrade_condition(&mut conn, &book.id, Condition::Fair).await.unwrap());
        drop(conn);

        let loaded = db.books().get_by_id(&book.id).await.unwrap().unwrap();
        assert_eq!(loaded.condition, Condition::Poor);
    }

    #[tokio::test]
    async fn test_set_active() {
        let db = test_db().await;
        let book = sample_book(1);
        db.books().insert(&book).await.unwrap();

        db.books().set_active(&book.id, false).await.unwrap();
        assert!(!db.books().get_by_id(&book.id).await.unwrap().unwrap().is_active);
        assert!(matches!(
            db.books().set_active("missing", true).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
