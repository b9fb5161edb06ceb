//! # Loan Lifecycle Manager
//!
//! Borrow, return and renew, plus the read side of the loan log.
//!
//! ## Borrow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. validate notes                                                      │
//! │  2. load student, librarian (must be active), book                      │
//! │  3. queue gate ── Blocked ──► ReservationConflict                       │
//! │  4. can_borrow (inactive, unavailable, quota, duplicate, overdue)       │
//! │  5. open_loan (atomic: insert row + guarded decrement, and on           │
//! │     FulfillThenAdmit the borrower's reservation, stamped with the       │
//! │     borrow time)                                                        │
//! │       NoCopyAvailable → Unavailable   Duplicate → DuplicateLoan         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Return / Renew
//! Both accept any id in a renewal chain and follow `superseded_by` to the
//! row that is still open. Return computes the fine, closes the row, puts
//! the copy back and then signals fulfillment; renew supersedes the open
//! row with a new `renew` row and leaves copy counts alone.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use libris_core::eligibility::{can_borrow, can_renew};
use libris_core::fine;
use libris_core::validation::{validate_notes, validate_uuid};
use libris_core::{
    Condition, CopyAudit, CoreError, Librarian, LoanPolicy, Money, QueueGate, RenewalCheck,
    Transaction, TransactionType,
};

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult, StoreError};
use crate::fulfillment::{FulfillmentCoordinator, FulfillmentTrigger};
use crate::ports::{OpenLoanOutcome, ReturnRecord, Stores};

/// Longest renewal chain followed before giving up.
const MAX_CHAIN_LENGTH: usize = 256;

/// Owns every loan state change.
#[derive(Clone)]
pub struct LoanLifecycleManager {
    stores: Stores,
    policy: Arc<LoanPolicy>,
    clock: Arc<dyn Clock>,
    coordinator: FulfillmentCoordinator,
    trigger: FulfillmentTrigger,
}

impl LoanLifecycleManager {
    pub fn new(
        stores: Stores,
        policy: Arc<LoanPolicy>,
        clock: Arc<dyn Clock>,
        coordinator: FulfillmentCoordinator,
        trigger: FulfillmentTrigger,
    ) -> Self {
        LoanLifecycleManager {
            stores,
            policy,
            clock,
            coordinator,
            trigger,
        }
    }

    // =========================================================================
    // Borrow
    // =========================================================================

    /// Lends one copy of `book_id` to `student_id`.
    pub async fn borrow_book(
        &self,
        student_id: &str,
        book_id: &str,
        librarian_id: &str,
        notes: Option<&str>,
    ) -> EngineResult<Transaction> {
        let notes = validate_notes(notes)?;

        let student = self
            .stores
            .people
            .get_student(student_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Student", student_id))?;
        self.active_librarian(librarian_id).await?;
        let book = self
            .stores
            .catalog
            .get_book(book_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Book", book_id))?;

        let gate = self.coordinator.queue_gate(student_id, &book).await?;
        if let QueueGate::Blocked(err) = gate {
            warn!(student_id = %student_id, book_id = %book_id, "Borrow blocked by reservation queue");
            return Err(err.into());
        }

        let now = self.clock.now();
        let active = self.stores.loans.open_for_student(student_id).await?;
        can_borrow(&self.policy, &student, &book, &active, now)?;

        let txn = Transaction {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            book_id: book_id.to_string(),
            transaction_type: TransactionType::Borrow,
            transaction_date: now,
            due_date: self.policy.due_date(now, &student),
            returned_date: None,
            librarian_id: librarian_id.to_string(),
            fine_cents: 0,
            fine_paid: false,
            return_condition: None,
            notes,
            superseded_by: None,
        };

        let claim = match &gate {
            QueueGate::FulfillThenAdmit { reservation_id } => Some(reservation_id.as_str()),
            _ => None,
        };

        match self.stores.loans.open_loan(&txn, claim).await {
            Ok(OpenLoanOutcome::Opened { claimed }) => {
                if claimed {
                    info!(student_id = %student_id, book_id = %book_id, "Reservation fulfilled at the desk");
                } else if let Some(reservation_id) = claim {
                    debug!(reservation_id = %reservation_id, "Head reservation already left the queue");
                }
            }
            Ok(OpenLoanOutcome::NoCopyAvailable) => {
                warn!(book_id = %book_id, "Last copy went to a concurrent borrow");
                return Err(CoreError::unavailable(book_id, "book not available").into());
            }
            Err(StoreError::Duplicate(_)) => {
                return Err(CoreError::DuplicateLoan {
                    student_id: student_id.to_string(),
                    book_id: book_id.to_string(),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            transaction_id = %txn.id,
            student_id = %student_id,
            book_id = %book_id,
            due = %txn.due_date,
            "Book borrowed"
        );
        Ok(txn)
    }

    // =========================================================================
    // Return
    // =========================================================================

    /// Closes a loan, fixes its fine and hands the copy to the queue.
    pub async fn return_book(
        &self,
        transaction_id: &str,
        condition: &str,
        notes: Option<&str>,
    ) -> EngineResult<Transaction> {
        validate_uuid("transaction_id", transaction_id)?;
        let condition: Condition = condition.parse()?;
        let notes = validate_notes(notes)?;

        let current = self.resolve_open(transaction_id).await?;
        let now = self.clock.now();
        let owed = fine::fine(current.due_date, now, self.policy.fine_rate);

        let record = ReturnRecord {
            transaction_id: current.id.clone(),
            book_id: current.book_id.clone(),
            returned_at: now,
            fine_cents: owed.cents(),
            condition,
            notes: notes.clone(),
        };

        if !self.stores.loans.close_loan(&record).await? {
            return Err(CoreError::AlreadyReturned {
                transaction_id: transaction_id.to_string(),
            }
            .into());
        }

        info!(
            transaction_id = %current.id,
            book_id = %current.book_id,
            fine = %owed,
            condition = %condition,
            "Book returned"
        );

        self.trigger.book_returned(&current.book_id).await;

        let mut returned = current;
        returned.returned_date = Some(now);
        returned.fine_cents = owed.cents();
        returned.return_condition = Some(condition);
        if notes.is_some() {
            returned.notes = notes;
        }
        Ok(returned)
    }

    // =========================================================================
    // Renew
    // =========================================================================

    /// Extends a loan by superseding it with a new `renew` row.
    pub async fn renew_book(
        &self,
        transaction_id: &str,
        librarian_id: &str,
    ) -> EngineResult<Transaction> {
        validate_uuid("transaction_id", transaction_id)?;
        self.active_librarian(librarian_id).await?;

        let current = self.resolve_open(transaction_id).await?;
        let now = self.clock.now();
        self.check_renewal(&current, now).await?;

        let student = self
            .stores
            .people
            .get_student(&current.student_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Student", &current.student_id))?;

        let renewal = Transaction {
            id: Uuid::new_v4().to_string(),
            student_id: current.student_id.clone(),
            book_id: current.book_id.clone(),
            transaction_type: TransactionType::Renew,
            transaction_date: now,
            due_date: self.policy.due_date(now, &student),
            returned_date: None,
            librarian_id: librarian_id.to_string(),
            fine_cents: 0,
            fine_paid: false,
            return_condition: None,
            notes: None,
            superseded_by: None,
        };

        if !self.stores.loans.renew(&current.id, &renewal).await? {
            let latest = self.load(&current.id).await?;
            if latest.is_returned() {
                return Err(CoreError::AlreadyReturned {
                    transaction_id: transaction_id.to_string(),
                }
                .into());
            }
            return Err(StoreError::Conflict(format!(
                "transaction {} was renewed concurrently",
                current.id
            ))
            .into());
        }

        info!(
            transaction_id = %renewal.id,
            supersedes = %current.id,
            due = %renewal.due_date,
            "Loan renewed"
        );
        Ok(renewal)
    }

    /// Side-effect-free renewal check.
    pub async fn can_book_be_renewed(&self, transaction_id: &str) -> EngineResult<RenewalCheck> {
        validate_uuid("transaction_id", transaction_id)?;

        let current = match self.resolve_open(transaction_id).await {
            Ok(txn) => txn,
            Err(EngineError::Rule(e @ CoreError::AlreadyReturned { .. })) => {
                return Ok(RenewalCheck::denied(&e));
            }
            Err(e) => return Err(e),
        };

        match self.check_renewal(&current, self.clock.now()).await {
            Ok(()) => Ok(RenewalCheck::allowed()),
            Err(EngineError::Rule(e)) => Ok(RenewalCheck::denied(&e)),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Fines
    // =========================================================================

    /// Settles the fine on a returned loan.
    pub async fn pay_fine(&self, transaction_id: &str) -> EngineResult<Transaction> {
        validate_uuid("transaction_id", transaction_id)?;
        let txn = self.load(transaction_id).await?;

        if !txn.is_returned() {
            return Err(not_payable(&txn, "loan has not been returned"));
        }
        if !txn.unpaid_fine().is_positive() {
            return Err(not_payable(&txn, "no unpaid fine"));
        }
        if !self.stores.loans.mark_fine_paid(transaction_id).await? {
            return Err(not_payable(&txn, "no unpaid fine"));
        }

        info!(transaction_id = %transaction_id, fine = %txn.fine(), "Fine paid");
        let mut paid = txn;
        paid.fine_paid = true;
        Ok(paid)
    }

    /// Sum of unpaid fines.
    pub async fn outstanding_fine(&self, student_id: &str) -> EngineResult<Money> {
        let cents = self.stores.loans.outstanding_fine_cents(student_id).await?;
        Ok(Money::from_cents(cents))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_transaction(&self, transaction_id: &str) -> EngineResult<Transaction> {
        validate_uuid("transaction_id", transaction_id)?;
        self.load(transaction_id).await
    }

    /// Open loans of a student.
    pub async fn active_loans(&self, student_id: &str) -> EngineResult<Vec<Transaction>> {
        Ok(self.stores.loans.open_for_student(student_id).await?)
    }

    /// Every borrow and renew row of a pair, oldest first.
    pub async fn loan_history(
        &self,
        student_id: &str,
        book_id: &str,
    ) -> EngineResult<Vec<Transaction>> {
        Ok(self.stores.loans.history(student_id, book_id).await?)
    }

    /// Copy counters next to the number of open loans.
    pub async fn copy_audit(&self, book_id: &str) -> EngineResult<CopyAudit> {
        let book = self
            .stores
            .catalog
            .get_book(book_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Book", book_id))?;
        let open = self.stores.loans.count_open_for_book(book_id).await?;

        Ok(CopyAudit {
            total_copies: book.total_copies,
            available_copies: book.available_copies,
            open_transactions: open,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load(&self, transaction_id: &str) -> EngineResult<Transaction> {
        Ok(self
            .stores
            .loans
            .get(transaction_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Transaction", transaction_id))?)
    }

    async fn active_librarian(&self, librarian_id: &str) -> EngineResult<Librarian> {
        let librarian = self
            .stores
            .people
            .get_librarian(librarian_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Librarian", librarian_id))?;
        if !librarian.is_active {
            return Err(CoreError::inactive("Librarian", librarian_id).into());
        }
        Ok(librarian)
    }

    /// Follows `superseded_by` from `transaction_id` to the open row.
    async fn resolve_open(&self, transaction_id: &str) -> EngineResult<Transaction> {
        let mut txn = self.load(transaction_id).await?;

        for _ in 0..MAX_CHAIN_LENGTH {
            if txn.is_returned() {
                return Err(CoreError::AlreadyReturned {
                    transaction_id: transaction_id.to_string(),
                }
                .into());
            }
            match txn.superseded_by.clone() {
                None => return Ok(txn),
                Some(next) => txn = self.load(&next).await?,
            }
        }

        Err(StoreError::Backend(format!("renewal chain from {transaction_id} does not end")).into())
    }

    async fn check_renewal(
        &self,
        current: &Transaction,
        now: chrono::DateTime<chrono::Utc>,
    ) -> EngineResult<()> {
        let renewals = self
            .stores
            .loans
            .count_renewals(&current.student_id, &current.book_id)
            .await?;
        let other_reserved = self
            .stores
            .reservations
            .active_for_book(&current.book_id)
            .await?
            .iter()
            .any(|r| r.student_id != current.student_id);

        can_renew(&self.policy, current, renewals, other_reserved, now)?;
        Ok(())
    }
}

fn not_payable(txn: &Transaction, reason: &str) -> EngineError {
    CoreError::InvalidTransactionType {
        transaction_id: txn.id.clone(),
        reason: reason.to_string(),
    }
    .into()
}

// =============================================================================
// Unit Tests
// =============================================================================
