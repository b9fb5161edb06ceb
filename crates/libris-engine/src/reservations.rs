//! # Reservation Queue Manager
//!
//! Per-book FIFO queue of students waiting for a copy.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  reserve_book ──► active ──┬──► fulfilled   (copy returned, held)      │
//! │                            ├──► cancelled   (student withdrew)         │
//! │                            └──► expired     (sweeper, expires_at < now)│
//! │                                                                         │
//! │  Terminal states never change again. Position = index in               │
//! │  active_for_book ordered by (reserved_at, id), computed on read.       │
//! │                                                                         │
//! │  A fulfilled reservation is a CLAIM while                              │
//! │    fulfilled_at + reservation_window >= now                            │
//! │    and the student has not borrowed the book since fulfilled_at        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use libris_core::eligibility::can_reserve;
use libris_core::validation::validate_uuid;
use libris_core::{CoreError, LoanPolicy, QueuedReservation, Reservation, ReservationStatus};

use crate::clock::Clock;
use crate::error::{EngineResult, StoreError};
use crate::notify::Notifier;
use crate::ports::Stores;

/// Owns every reservation state change.
#[derive(Clone)]
pub struct ReservationQueueManager {
    stores: Stores,
    policy: Arc<LoanPolicy>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl ReservationQueueManager {
    pub fn new(
        stores: Stores,
        policy: Arc<LoanPolicy>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        ReservationQueueManager {
            stores,
            policy,
            clock,
            notifier,
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Puts the student at the back of the book's queue.
    ///
    /// Only books with no free copy can be reserved.
    pub async fn reserve_book(
        &self,
        student_id: &str,
        book_id: &str,
    ) -> EngineResult<QueuedReservation> {
        let student = self
            .stores
            .people
            .get_student(student_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Student", student_id))?;
        let book = self
            .stores
            .catalog
            .get_book(book_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Book", book_id))?;

        let active = self
            .stores
            .reservations
            .count_active_for_student(student_id)
            .await?;
        let already = self
            .stores
            .reservations
            .find_active(student_id, book_id)
            .await?
            .is_some();

        can_reserve(&self.policy, &student, &book, active, already)?;

        let now = self.clock.now();
        let reservation = Reservation {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            book_id: book_id.to_string(),
            reserved_at: now,
            expires_at: self.policy.reservation_expiry(now),
            status: ReservationStatus::Active,
            fulfilled_at: None,
        };

        match self.stores.reservations.insert(&reservation).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(CoreError::reservation_conflict(
                    book_id,
                    "student already has an active reservation for this book",
                )
                .into());
            }
            Err(e) => return Err(e.into()),
        }

        let position = self
            .position_in_queue(&reservation)
            .await?
            .unwrap_or(1);

        info!(
            reservation_id = %reservation.id,
            student_id = %student_id,
            book_id = %book_id,
            position,
            "Reservation created"
        );

        Ok(QueuedReservation {
            reservation,
            position,
        })
    }

    /// Withdraws an active reservation.
    pub async fn cancel_reservation(&self, reservation_id: &str) -> EngineResult<Reservation> {
        let cancelled = self
            .transition(reservation_id, ReservationStatus::Cancelled, "cancel")
            .await?;
        info!(reservation_id = %reservation_id, book_id = %cancelled.book_id, "Reservation cancelled");
        Ok(cancelled)
    }

    /// Marks an active reservation fulfilled and notifies the student.
    pub async fn fulfill_reservation(&self, reservation_id: &str) -> EngineResult<Reservation> {
        let fulfilled = self
            .transition(reservation_id, ReservationStatus::Fulfilled, "fulfill")
            .await?;

        info!(
            reservation_id = %reservation_id,
            student_id = %fulfilled.student_id,
            book_id = %fulfilled.book_id,
            "Reservation fulfilled"
        );
        if let Err(e) = self.notifier.reservation_fulfilled(&fulfilled).await {
            warn!(reservation_id = %reservation_id, error = %e, "Fulfillment notification failed");
        }

        Ok(fulfilled)
    }

    /// Expires every active reservation whose `expires_at` has passed.
    ///
    /// Returns how many were expired by this call. Reservations that another
    /// caller fulfilled or cancelled in the meantime are skipped.
    pub async fn expire_reservations(&self) -> EngineResult<usize> {
        let now = self.clock.now();
        let candidates = self.stores.reservations.active_expired(now).await?;
        let mut expired = 0;

        for mut reservation in candidates {
            if !self
                .stores
                .reservations
                .transition(&reservation.id, ReservationStatus::Expired, now)
                .await?
            {
                debug!(reservation_id = %reservation.id, "Reservation left the active state first");
                continue;
            }

            expired += 1;
            reservation.status = ReservationStatus::Expired;
            if let Err(e) = self.notifier.reservation_expired(&reservation).await {
                warn!(reservation_id = %reservation.id, error = %e, "Expiry notification failed");
            }
        }

        if expired > 0 {
            info!(expired, "Expired reservations");
        }
        Ok(expired)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_reservation(&self, reservation_id: &str) -> EngineResult<Reservation> {
        validate_uuid("reservation_id", reservation_id)?;
        Ok(self
            .stores
            .reservations
            .get(reservation_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Reservation", reservation_id))?)
    }

    /// Head of the active queue.
    pub async fn get_next_reservation_for_book(
        &self,
        book_id: &str,
    ) -> EngineResult<Option<Reservation>> {
        let queue = self.stores.reservations.active_for_book(book_id).await?;
        Ok(queue.into_iter().next())
    }

    /// Active queue with 1-based positions.
    pub async fn list_queue(&self, book_id: &str) -> EngineResult<Vec<QueuedReservation>> {
        let queue = self.stores.reservations.active_for_book(book_id).await?;
        Ok(queue
            .into_iter()
            .enumerate()
            .map(|(idx, reservation)| QueuedReservation {
                reservation,
                position: idx + 1,
            })
            .collect())
    }

    /// 1-based position, or `None` once the reservation is terminal.
    pub async fn queue_position(&self, reservation_id: &str) -> EngineResult<Option<usize>> {
        let reservation = self.get_reservation(reservation_id).await?;
        if !reservation.is_active() {
            return Ok(None);
        }
        self.position_in_queue(&reservation).await
    }

    /// True if the student holds a live, unused claim on the book.
    pub async fn has_student_fulfilled_reservation(
        &self,
        student_id: &str,
        book_id: &str,
    ) -> EngineResult<bool> {
        let claims = self.live_claims(book_id).await?;
        Ok(claims.iter().any(|r| r.student_id == student_id))
    }

    /// Fulfilled reservations that still hold a copy for their student.
    pub(crate) async fn live_claims(&self, book_id: &str) -> EngineResult<Vec<Reservation>> {
        let now = self.clock.now();
        let since = now - self.policy.reservation_window;
        let mut claims = Vec::new();

        for reservation in self
            .stores
            .reservations
            .fulfilled_for_book(book_id, since)
            .await?
        {
            if !reservation.claim_is_live(now, self.policy.reservation_window) {
                continue;
            }
            let Some(fulfilled_at) = reservation.fulfilled_at else {
                continue;
            };
            let used = self
                .stores
                .loans
                .borrowed_since(&reservation.student_id, book_id, fulfilled_at)
                .await?;
            if !used {
                claims.push(reservation);
            }
        }

        Ok(claims)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn position_in_queue(&self, reservation: &Reservation) -> EngineResult<Option<usize>> {
        let queue = self
            .stores
            .reservations
            .active_for_book(&reservation.book_id)
            .await?;
        Ok(queue
            .iter()
            .position(|r| r.id == reservation.id)
            .map(|idx| idx + 1))
    }

    /// Guarded move out of `active`. A lost race reports the state that won.
    async fn transition(
        &self,
        reservation_id: &str,
        to: ReservationStatus,
        action: &'static str,
    ) -> EngineResult<Reservation> {
        let current = self.get_reservation(reservation_id).await?;
        if current.status.is_terminal() {
            return Err(invalid_transition(&current, action).into());
        }

        let now = self.clock.now();
        if !self
            .stores
            .reservations
            .transition(reservation_id, to, now)
            .await?
        {
            let latest = self.get_reservation(reservation_id).await?;
            return Err(invalid_transition(&latest, action).into());
        }

        let mut updated = current;
        updated.status = to;
        if to == ReservationStatus::Fulfilled {
            updated.fulfilled_at = Some(now);
        }
        Ok(updated)
    }
}

fn invalid_transition(reservation: &Reservation, action: &'static str) -> CoreError {
    CoreError::InvalidTransition {
        reservation_id: reservation.id.clone(),
        status: reservation.status.as_str().to_string(),
        action,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::test_support::Fixture;
    use chrono::Duration;

    #[tokio::test]
    async fn test_reserve_requires_no_free_copy() {
        let fx = Fixture::new();
        let book = fx.book(1, 1).await;
        let student = fx.student(1).await;

        let err = fx.queue().reserve_book(&student.id, &book.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Rule(CoreError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_reserve_positions_and_duplicate() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let a = fx.student(1).await;
        let b = fx.student(1).await;
        let queue = fx.queue();

        let first = queue.reserve_book(&a.id, &book.id).await.unwrap();
        fx.tick();
        let second = queue.reserve_book(&b.id, &book.id).await.unwrap();
        assert_eq!(first.position, 1);
        assert_eq!(second.position, 2);
        assert_eq!(
            first.reservation.expires_at,
            first.reservation.reserved_at + Duration::days(7)
        );

        let err = queue.reserve_book(&a.id, &book.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Rule(CoreError::ReservationConflict { .. })));
    }

    #[tokio::test]
    async fn test_reservation_quota() {
        let fx = Fixture::new();
        let student = fx.student(1).await;
        let queue = fx.queue();

        for _ in 0..fx.policy.max_reservations_per_student {
            let book = fx.book(1, 0).await;
            queue.reserve_book(&student.id, &book.id).await.unwrap();
        }

        let book = fx.book(1, 0).await;
        let err = queue.reserve_book(&student.id, &book.id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Rule(CoreError::QuotaExceeded {
                limit_name: "Active reservations",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_entities() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let student = fx.student(1).await;
        let queue = fx.queue();

        let missing = Uuid::new_v4().to_string();
        let err = queue.reserve_book(&missing, &book.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Rule(CoreError::NotFound { entity: "Student", .. })));

        fx.store.set_book_active(&book.id, false).await;
        let err = queue.reserve_book(&student.id, &book.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Rule(CoreError::InactiveEntity { entity: "Book", .. })));
    }

    #[tokio::test]
    async fn test_cancel_promotes_next_and_is_final() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let students = [fx.student(1).await, fx.student(1).await, fx.student(1).await];
        let queue = fx.queue();

        let mut ids = Vec::new();
        for s in &students {
            ids.push(queue.reserve_book(&s.id, &book.id).await.unwrap().reservation.id);
            fx.tick();
        }

        queue.cancel_reservation(&ids[1]).await.unwrap();
        assert_eq!(queue.queue_position(&ids[2]).await.unwrap(), Some(2));
        assert_eq!(queue.queue_position(&ids[1]).await.unwrap(), None);

        let err = queue.cancel_reservation(&ids[1]).await.unwrap_err();
        match err {
            EngineError::Rule(CoreError::InvalidTransition { status, action, .. }) => {
                assert_eq!(status, "cancelled");
                assert_eq!(action, "cancel");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let listed: Vec<_> = queue
            .list_queue(&book.id)
            .await
            .unwrap()
            .into_iter()
            .map(|q| (q.reservation.id, q.position))
            .collect();
        assert_eq!(listed, vec![(ids[0].clone(), 1), (ids[2].clone(), 2)]);
    }

    #[tokio::test]
    async fn test_expire_only_past_deadline() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let early = fx.student(1).await;
        let late = fx.student(1).await;
        let queue = fx.queue();

        let first = queue.reserve_book(&early.id, &book.id).await.unwrap().reservation;
        fx.clock.advance(Duration::days(3));
        let second = queue.reserve_book(&late.id, &book.id).await.unwrap().reservation;

        // Exactly at expires_at nothing lapses.
        fx.clock.set(first.expires_at);
        assert_eq!(queue.expire_reservations().await.unwrap(), 0);

        fx.clock.advance(Duration::seconds(1));
        assert_eq!(queue.expire_reservations().await.unwrap(), 1);
        assert_eq!(fx.notifier.expired(), vec![first.id.clone()]);

        let head = queue.get_next_reservation_for_book(&book.id).await.unwrap().unwrap();
        assert_eq!(head.id, second.id);

        let err = queue.fulfill_reservation(&first.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Rule(CoreError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_fulfilled_claim_window() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let student = fx.student(1).await;
        let queue = fx.queue();

        let r = queue.reserve_book(&student.id, &book.id).await.unwrap().reservation;
        assert!(!queue.has_student_fulfilled_reservation(&student.id, &book.id).await.unwrap());

        let fulfilled = queue.fulfill_reservation(&r.id).await.unwrap();
        assert_eq!(fulfilled.status, ReservationStatus::Fulfilled);
        assert_eq!(fx.notifier.fulfilled(), vec![r.id.clone()]);
        assert!(queue.has_student_fulfilled_reservation(&student.id, &book.id).await.unwrap());

        fx.clock.advance(Duration::days(7) + Duration::seconds(1));
        assert!(!queue.has_student_fulfilled_reservation(&student.id, &book.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_reservation_id_is_validation_error() {
        let fx = Fixture::new();
        let err = fx.queue().cancel_reservation("nope").await.unwrap_err();
        assert!(matches!(err, EngineError::Rule(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_catalog_and_person_ids_are_not_found() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let student = fx.student(1).await;
        let queue = fx.queue();

        // Catalog and people ids come from other systems and need not be UUIDs.
        let err = queue.reserve_book("S-1042", &book.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Rule(CoreError::NotFound { entity: "Student", .. })));
        let err = queue.reserve_book(&student.id, "ISBN-0156453800").await.unwrap_err();
        assert!(matches!(err, EngineError::Rule(CoreError::NotFound { entity: "Book", .. })));
    }
}
