//! # Person Repository
//!
//! Read access to students and librarians, plus the inserts the seed binary
//! and tests need. People are owned by the surrounding system; the engine
//! only reads them.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use libris_core::{Librarian, Student};

/// Repository for student and librarian records.
#[derive(Debug, Clone)]
pub struct PersonRepository {
    pool: SqlitePool,
}

impl PersonRepository {
    /// Creates a new PersonRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PersonRepository { pool }
    }

    /// Gets a student by ID.
    pub async fn get_student(&self, id: &str) -> DbResult<Option<Student>> {
        let student = sqlx::query_as::<_, Student>(
            "SELECT id, name, is_active, year_of_study FROM students WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(student)
    }

    /// Gets a librarian by ID.
    pub async fn get_librarian(&self, id: &str) -> DbResult<Option<Librarian>> {
        let librarian = sqlx::query_as::<_, Librarian>(
            "SELECT id, name, is_active FROM librarians WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(librarian)
    }

    pub async fn insert_student(&self, student: &Student) -> DbResult<()> {
        debug!(id = %student.id, year = student.year_of_study, "Inserting student");

        sqlx::query(
            "INSERT INTO students (id, name, is_active, year_of_study) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&student.id)
        .bind(&student.name)
        .bind(student.is_active)
        .bind(student.year_of_study)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_librarian(&self, librarian: &Librarian) -> DbResult<()> {
        debug!(id = %librarian.id, "Inserting librarian");

        sqlx::query("INSERT INTO librarians (id, name, is_active) VALUES (?1, ?2, ?3)")
            .bind(&librarian.id)
            .bind(&librarian.name)
            .bind(librarian.is_active)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Activates or deactivates a student.
    pub async fn set_student_active(&self, id: &str, is_active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE students SET is_active = ?2 WHERE id = ?1")
            .bind(id)
            .bind(is_active)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Student", id));
        }

        Ok(())
    }

    /// Counts students.
    pub async fn count_students(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM students")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
