//! # Eligibility Evaluator
//!
//! Pure decision functions over already-fetched state. Nothing here touches
//! storage or the clock; `now` is always an argument.
//!
//! ## Where These Run
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BorrowBook ─► queue_gate ─► can_borrow ─► guarded write               │
//! │  RenewBook  ─► can_renew  ─────────────► guarded write                 │
//! │  ReserveBook ─► can_reserve ───────────► guarded write                 │
//! │                                                                         │
//! │  Probes (CanStudentBorrowBook, CanBookBeRenewed) call the same         │
//! │  functions and stop before the write.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};
use crate::policy::LoanPolicy;
use crate::types::{Book, Reservation, Student, Transaction};

// =============================================================================
// Borrow
// =============================================================================

/// Every rule that blocks `student` from borrowing `book`, in rule order.
///
/// ## Rules
/// 1. Student must be active
/// 2. Book must be active
/// 3. A copy must be free
/// 4. Open loans below `max_books_per_user`
/// 5. No open loan of the same book
/// 6. No overdue open loan
pub fn borrow_violations(
    policy: &LoanPolicy,
    student: &Student,
    book: &Book,
    active_loans: &[Transaction],
    now: DateTime<Utc>,
) -> Vec<CoreError> {
    let mut violations = Vec::new();

    if !student.is_active {
        violations.push(CoreError::inactive("Student", &student.id));
    }

    if !book.is_active {
        violations.push(CoreError::inactive("Book", &book.id));
    }

    if book.available_copies <= 0 {
        violations.push(CoreError::unavailable(&book.id, "book not available"));
    }

    let open_count = active_loans.len() as i64;
    if open_count >= policy.max_books_per_user {
        violations.push(CoreError::QuotaExceeded {
            limit_name: "Active loans",
            current: open_count,
            max: policy.max_books_per_user,
        });
    }

    if active_loans.iter().any(|loan| loan.book_id == book.id) {
        violations.push(CoreError::DuplicateLoan {
            student_id: student.id.clone(),
            book_id: book.id.clone(),
        });
    }

    if let Some(overdue) = active_loans.iter().find(|loan| loan.is_overdue(now)) {
        violations.push(CoreError::OverdueBlock {
            transaction_id: overdue.id.clone(),
            reason: format!(
                "book {} was due {}; return overdue items before borrowing",
                overdue.book_id,
                overdue.due_date.format("%Y-%m-%d")
            ),
        });
    }

    violations
}

/// First rule that blocks the borrow, if any.
pub fn can_borrow(
    policy: &LoanPolicy,
    student: &Student,
    book: &Book,
    active_loans: &[Transaction],
    now: DateTime<Utc>,
) -> CoreResult<()> {
    match borrow_violations(policy, student, book, active_loans, now)
        .into_iter()
        .next()
    {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// =============================================================================
// Queue Gate (borrow side of fulfillment)
// =============================================================================

/// What the reservation queue says about a borrow request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueGate {
    /// The queue places no restriction on this borrow.
    Admit,
    /// The student holds a live claim from a fulfilled reservation.
    ClaimHonored,
    /// The student is head of the queue; fulfill this reservation, then admit.
    FulfillThenAdmit { reservation_id: String },
    /// Another student has priority.
    Blocked(CoreError),
}

/// Decides whether the queue lets `student_id` take a copy of `book`.
///
/// ## Arguments
/// * `own_claim` - student holds a live, unused fulfilled reservation
/// * `other_claims` - live, unused claims held by other students
/// * `next_active` - head of the active queue for the book
pub fn queue_gate(
    student_id: &str,
    book: &Book,
    own_claim: bool,
    other_claims: i64,
    next_active: Option<&Reservation>,
) -> QueueGate {
    if own_claim {
        return QueueGate::ClaimHonored;
    }

    // Nothing to hand out; the availability rule reports it.
    if !book.has_free_copy() {
        return QueueGate::Admit;
    }

    if other_claims > 0 && book.available_copies <= other_claims {
        return QueueGate::Blocked(CoreError::reservation_conflict(
            &book.id,
            "the free copy is held for a fulfilled reservation",
        ));
    }

    match next_active {
        Some(head) if head.student_id != student_id => {
            QueueGate::Blocked(CoreError::reservation_conflict(
                &book.id,
                "another student is first in the reservation queue; reserve the book instead",
            ))
        }
        Some(head) => QueueGate::FulfillThenAdmit {
            reservation_id: head.id.clone(),
        },
        None => QueueGate::Admit,
    }
}

// =============================================================================
// Renew
// =============================================================================

/// Decides whether `loan` may be renewed.
///
/// ## Rules
/// 1. Loan must not be returned
/// 2. Prior renewals for the pair below `max_renewals`
/// 3. Loan must not be overdue
/// 4. No other student may hold an active reservation on the book
///
/// The renewal cap is checked before the overdue rule so an exhausted pair
/// always reports `QuotaExceeded`.
pub fn can_renew(
    policy: &LoanPolicy,
    loan: &Transaction,
    renewal_count: i64,
    other_student_reserved: bool,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    if loan.is_returned() {
        return Err(CoreError::AlreadyReturned {
            transaction_id: loan.id.clone(),
        });
    }

    if renewal_count >= policy.max_renewals {
        return Err(CoreError::QuotaExceeded {
            limit_name: "Renewals",
            current: renewal_count,
            max: policy.max_renewals,
        });
    }

    if loan.is_overdue(now) {
        return Err(CoreError::OverdueBlock {
            transaction_id: loan.id.clone(),
            reason: "overdue loans must be returned, not renewed".to_string(),
        });
    }

    if other_student_reserved {
        return Err(CoreError::reservation_conflict(
            &loan.book_id,
            "another student is waiting for this book",
        ));
    }

    Ok(())
}

// =============================================================================
// Reserve
// =============================================================================

/// Decides whether `student` may join the queue for `book`.
///
/// ## Rules
/// 1. Student and book must be active
/// 2. No copy may be free (borrow it instead)
/// 3. Active reservations below `max_reservations_per_student`
/// 4. No active reservation for the same book
pub fn can_reserve(
    policy: &LoanPolicy,
    student: &Student,
    book: &Book,
    active_reservation_count: i64,
    already_reserved: bool,
) -> CoreResult<()> {
    if !student.is_active {
        return Err(CoreError::inactive("Student", &student.id));
    }

    if !book.is_active {
        return Err(CoreError::inactive("Book", &book.id));
    }

    if book.available_copies > 0 {
        return Err(CoreError::unavailable(
            &book.id,
            "book is currently available for borrowing; borrow it instead of reserving",
        ));
    }

    if active_reservation_count >= policy.max_reservations_per_student {
        return Err(CoreError::QuotaExceeded {
            limit_name: "Active reservations",
            current: active_reservation_count,
            max: policy.max_reservations_per_student,
        });
    }

    if already_reserved {
        return Err(CoreError::reservation_conflict(
            &book.id,
            "student already holds an active reservation for this book",
        ));
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, ReservationStatus, TransactionType};
    use chrono::Duration;

    fn student() -> Student {
        Student {
            id: "s1".into(),
            name: "Ada".into(),
            is_active: true,
            year_of_study: 1,
        }
    }

    fn book(available: i64) -> Book {
        Book {
            id: "b1".into(),
            title: "Dune".into(),
            total_copies: 2,
            available_copies: available,
            is_active: true,
            condition: Condition::Good,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn loan(book_id: &str, due: DateTime<Utc>) -> Transaction {
        Transaction {
            id: format!("t-{book_id}"),
            student_id: "s1".into(),
            book_id: book_id.into(),
            transaction_type: TransactionType::Borrow,
            transaction_date: due - Duration::days(14),
            due_date: due,
            returned_date: None,
            librarian_id: "l1".into(),
            fine_cents: 0,
            fine_paid: false,
            return_condition: None,
            notes: None,
            superseded_by: None,
        }
    }

    fn reservation(id: &str, student_id: &str) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: id.into(),
            student_id: student_id.into(),
            book_id: "b1".into(),
            reserved_at: now,
            expires_at: now + Duration::days(7),
            status: ReservationStatus::Active,
            fulfilled_at: None,
        }
    }

    #[test]
    fn test_can_borrow_ok() {
        let policy = LoanPolicy::default();
        assert!(can_borrow(&policy, &student(), &book(1), &[], Utc::now()).is_ok());
    }

    #[test]
    fn test_inactive_student_first() {
        let policy = LoanPolicy::default();
        let mut s = student();
        s.is_active = false;
        let err = can_borrow(&policy, &s, &book(0), &[], Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::InactiveEntity { entity: "Student", .. }));
    }

    #[test]
    fn test_no_copies() {
        let policy = LoanPolicy::default();
        let err = can_borrow(&policy, &student(), &book(0), &[], Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::Unavailable { .. }));
    }

    #[test]
    fn test_quota() {
        let policy = LoanPolicy::default();
        let due = Utc::now() + Duration::days(5);
        let loans: Vec<_> = (0..5).map(|i| loan(&format!("other-{i}"), due)).collect();
        let err = can_borrow(&policy, &student(), &book(1), &loans, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::QuotaExceeded { current: 5, max: 5, .. }));
    }

    #[test]
    fn test_duplicate_loan() {
        let policy = LoanPolicy::default();
        let loans = vec![loan("b1", Utc::now() + Duration::days(5))];
        let err = can_borrow(&policy, &student(), &book(1), &loans, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateLoan { .. }));
    }

    #[test]
    fn test_overdue_blocks_other_books() {
        let policy = LoanPolicy::default();
        let loans = vec![loan("b9", Utc::now() - Duration::days(1))];
        let err = can_borrow(&policy, &student(), &book(1), &loans, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::OverdueBlock { .. }));
    }

    #[test]
    fn test_violations_collects_everything() {
        let policy = LoanPolicy::default();
        let mut s = student();
        s.is_active = false;
        let loans = vec![loan("b1", Utc::now() - Duration::days(1))];
        let all = borrow_violations(&policy, &s, &book(0), &loans, Utc::now());
        let codes: Vec<_> = all.iter().map(CoreError::code).collect();
        assert_eq!(
            codes,
            ["INACTIVE_ENTITY", "UNAVAILABLE", "DUPLICATE_LOAN", "OVERDUE_BLOCK"]
        );
    }

    #[test]
    fn test_can_renew_rules() {
        let policy = LoanPolicy::default();
        let now = Utc::now();
        let current = loan("b1", now + Duration::days(3));
        assert!(can_renew(&policy, &current, 0, false, now).is_ok());

        let err = can_renew(&policy, &current, 2, false, now).unwrap_err();
        assert!(matches!(err, CoreError::QuotaExceeded { limit_name: "Renewals", .. }));

        let err = can_renew(&policy, &current, 0, true, now).unwrap_err();
        assert!(matches!(err, CoreError::ReservationConflict { .. }));

        let overdue = loan("b1", now - Duration::hours(1));
        let err = can_renew(&policy, &overdue, 0, false, now).unwrap_err();
        assert!(matches!(err, CoreError::OverdueBlock { .. }));

        // Exhausted AND overdue still reports the cap.
        let err = can_renew(&policy, &overdue, 2, false, now).unwrap_err();
        assert!(matches!(err, CoreError::QuotaExceeded { .. }));

        let mut returned = current.clone();
        returned.returned_date = Some(now);
        let err = can_renew(&policy, &returned, 0, false, now).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyReturned { .. }));
    }

    #[test]
    fn test_can_reserve_rules() {
        let policy = LoanPolicy::default();
        assert!(can_reserve(&policy, &student(), &book(0), 0, false).is_ok());

        let err = can_reserve(&policy, &student(), &book(1), 0, false).unwrap_err();
        assert!(matches!(err, CoreError::Unavailable { .. }));

        let err = can_reserve(&policy, &student(), &book(0), 5, false).unwrap_err();
        assert!(matches!(err, CoreError::QuotaExceeded { .. }));

        let err = can_reserve(&policy, &student(), &book(0), 1, true).unwrap_err();
        assert!(matches!(err, CoreError::ReservationConflict { .. }));

        let mut inactive = book(0);
        inactive.is_active = false;
        let err = can_reserve(&policy, &student(), &inactive, 0, false).unwrap_err();
        assert!(matches!(err, CoreError::InactiveEntity { entity: "Book", .. }));
    }

    #[test]
    fn test_queue_gate() {
        let b = book(1);
        assert_eq!(queue_gate("s1", &b, false, 0, None), QueueGate::Admit);
        assert_eq!(queue_gate("s1", &b, true, 1, None), QueueGate::ClaimHonored);

        let other = reservation("r1", "s2");
        assert!(matches!(
            queue_gate("s1", &b, false, 0, Some(&other)),
            QueueGate::Blocked(CoreError::ReservationConflict { .. })
        ));

        let mine = reservation("r2", "s1");
        assert_eq!(
            queue_gate("s1", &b, false, 0, Some(&mine)),
            QueueGate::FulfillThenAdmit {
                reservation_id: "r2".into()
            }
        );

        // One free copy, already promised to someone else's fulfilled reservation.
        assert!(matches!(
            queue_gate("s1", &b, false, 1, None),
            QueueGate::Blocked(_)
        ));
        // Two free copies, one promised: the other is up for grabs.
        assert_eq!(queue_gate("s1", &book(2), false, 1, None), QueueGate::Admit);

        // No free copy: the queue defers to the availability rule.
        assert_eq!(queue_gate("s1", &book(0), false, 0, Some(&other)), QueueGate::Admit);
    }
}
