//! # Notifier
//!
//! Tells the outside world a reservation changed state. Delivery is best
//! effort: callers log a failed notification and carry on.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use libris_core::Reservation;

/// A notification could not be delivered.
#[derive(Debug, Clone, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A copy is being held for the student.
    async fn reservation_fulfilled(&self, reservation: &Reservation) -> Result<(), NotifyError>;

    /// The reservation lapsed before a copy came back.
    async fn reservation_expired(&self, reservation: &Reservation) -> Result<(), NotifyError>;
}

/// Writes every notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn reservation_fulfilled(&self, reservation: &Reservation) -> Result<(), NotifyError> {
        info!(
            reservation_id = %reservation.id,
            student_id = %reservation.student_id,
            book_id = %reservation.book_id,
            "Reservation fulfilled, copy is being held"
        );
        Ok(())
    }

    async fn reservation_expired(&self, reservation: &Reservation) -> Result<(), NotifyError> {
        info!(
            reservation_id = %reservation.id,
            student_id = %reservation.student_id,
            book_id = %reservation.book_id,
            "Reservation expired"
        );
        Ok(())
    }
}

/// Drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpNotifier;

#[async_trait]
impl Notifier for NoOpNotifier {
    async fn reservation_fulfilled(&self, _reservation: &Reservation) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn reservation_expired(&self, _reservation: &Reservation) -> Result<(), NotifyError> {
        Ok(())
    }
}
