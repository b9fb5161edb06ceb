//! # Fulfillment
//!
//! Connects returns to the reservation queue.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  return_book ──commit──► FulfillmentTrigger::book_returned(book_id)    │
//! │                               │                                         │
//! │                               │ try_send (never blocks the return)      │
//! │                               ▼                                         │
//! │                     ┌─────────────────────┐                             │
//! │                     │  FulfillmentWorker  │  own tokio task             │
//! │                     │  retry + backoff    │                             │
//! │                     └─────────┬───────────┘                             │
//! │                               ▼                                         │
//! │             FulfillmentCoordinator::on_return(book_id)                  │
//! │               while free copies > live claims:                          │
//! │                 fulfill next active reservation (FIFO)                  │
//! │                               │                                         │
//! │                               ▼                                         │
//! │                  broadcast FulfillmentOutcome                           │
//! │                                                                         │
//! │  A dropped signal is recovered by reconcile() on the next sweep.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The borrow side lives here too: [`FulfillmentCoordinator::queue_gate`]
//! tells `borrow_book` whether the queue lets a student take a copy.

use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use libris_core::eligibility::{self, borrow_violations};
use libris_core::{Book, BorrowEligibility, CoreError, LoanPolicy, QueueGate, Reservation};

use crate::clock::Clock;
use crate::config::WorkerSettings;
use crate::error::{EngineError, EngineResult};
use crate::ports::Stores;
use crate::reservations::ReservationQueueManager;

// =============================================================================
// Coordinator
// =============================================================================

/// Decides who gets a copy when one is free.
#[derive(Clone)]
pub struct FulfillmentCoordinator {
    stores: Stores,
    queue: ReservationQueueManager,
    policy: Arc<LoanPolicy>,
    clock: Arc<dyn Clock>,
}

impl FulfillmentCoordinator {
    pub fn new(
        stores: Stores,
        queue: ReservationQueueManager,
        policy: Arc<LoanPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        FulfillmentCoordinator {
            stores,
            queue,
            policy,
            clock,
        }
    }

    /// Fulfills queue heads while the book has more free copies than live claims.
    ///
    /// Returns the reservations fulfilled by this call, in queue order.
    pub async fn on_return(&self, book_id: &str) -> EngineResult<Vec<Reservation>> {
        let mut book = self.load_book(book_id).await?;
        let mut held = self.queue.live_claims(book_id).await?.len() as i64;
        let mut fulfilled = Vec::new();

        for head in self.stores.reservations.active_for_book(book_id).await? {
            if book.available_copies <= held {
                break;
            }

            match self.queue.fulfill_reservation(&head.id).await {
                Ok(reservation) => {
                    held += 1;
                    fulfilled.push(reservation);
                }
                Err(EngineError::Rule(CoreError::InvalidTransition { .. })) => {
                    // Someone else moved this head; re-read what is left to hand out.
                    debug!(reservation_id = %head.id, "Queue head changed under fulfillment");
                    book = self.load_book(book_id).await?;
                    held = self.queue.live_claims(book_id).await?.len() as i64;
                }
                Err(e) => return Err(e),
            }
        }

        if fulfilled.is_empty() {
            debug!(book_id = %book_id, "Nothing to fulfill");
        }
        Ok(fulfilled)
    }

    /// Runs [`on_return`](Self::on_return) for every book with a queue.
    ///
    /// Per-book failures are logged and skipped. Returns how many
    /// reservations were fulfilled.
    pub async fn reconcile(&self) -> EngineResult<usize> {
        let mut total = 0;

        for book_id in self.stores.reservations.books_with_active().await? {
            match self.on_return(&book_id).await {
                Ok(fulfilled) => total += fulfilled.len(),
                Err(e) => warn!(book_id = %book_id, error = %e, "Reconcile failed for book"),
            }
        }

        if total > 0 {
            info!(fulfilled = total, "Reconciled reservation queues");
        }
        Ok(total)
    }

    /// What the queue says about `student_id` taking a copy of `book`.
    pub async fn queue_gate(&self, student_id: &str, book: &Book) -> EngineResult<QueueGate> {
        let claims = self.queue.live_claims(&book.id).await?;
        let own_claim = claims.iter().any(|r| r.student_id == student_id);
        let other_claims = claims.iter().filter(|r| r.student_id != student_id).count() as i64;
        let head = self.queue.get_next_reservation_for_book(&book.id).await?;

        Ok(eligibility::queue_gate(
            student_id,
            book,
            own_claim,
            other_claims,
            head.as_ref(),
        ))
    }

    /// Side-effect-free borrow check. Lists every blocking rule.
    pub async fn can_student_borrow_book(
        &self,
        student_id: &str,
        book_id: &str,
    ) -> EngineResult<BorrowEligibility> {
        let student = self
            .stores
            .people
            .get_student(student_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Student", student_id))?;
        let book = self.load_book(book_id).await?;

        let mut report = BorrowEligibility::default();
        match self.queue_gate(student_id, &book).await? {
            QueueGate::Admit => {}
            QueueGate::ClaimHonored | QueueGate::FulfillThenAdmit { .. } => {
                report.reservation_match = true;
            }
            QueueGate::Blocked(err) => {
                report.reservation_conflict = true;
                report.reasons.push(err.to_string());
            }
        }

        let active = self.stores.loans.open_for_student(student_id).await?;
        let violations = borrow_violations(&self.policy, &student, &book, &active, self.clock.now());
        report
            .reasons
            .extend(violations.iter().map(ToString::to_string));

        report.can_borrow = report.reasons.is_empty();
        Ok(report)
    }

    async fn load_book(&self, book_id: &str) -> EngineResult<Book> {
        Ok(self
            .stores
            .catalog
            .get_book(book_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Book", book_id))?)
    }
}

// =============================================================================
// Background Worker
// =============================================================================

/// Result of one fulfillment job, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    Fulfilled {
        book_id: String,
        reservation_ids: Vec<String>,
    },
    NothingToFulfill {
        book_id: String,
    },
    /// Gave up; `reconcile` will pick the book up later.
    Failed {
        book_id: String,
        attempts: u32,
        error: String,
    },
}

impl FulfillmentOutcome {
    pub fn book_id(&self) -> &str {
        match self {
            FulfillmentOutcome::Fulfilled { book_id, .. }
            | FulfillmentOutcome::NothingToFulfill { book_id }
            | FulfillmentOutcome::Failed { book_id, .. } => book_id,
        }
    }
}

/// Retry schedule for fulfillment jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Attempts per job, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings::from(&WorkerSettings::default())
    }
}

impl From<&WorkerSettings> for RetrySettings {
    fn from(settings: &WorkerSettings) -> Self {
        RetrySettings {
            max_attempts: settings.fulfillment_max_attempts,
            initial_backoff: settings.initial_backoff(),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetrySettings {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None, // bounded by max_attempts instead
            ..Default::default()
        }
    }
}

/// Runs fulfillment jobs off the request path.
pub struct FulfillmentWorker {
    coordinator: FulfillmentCoordinator,
    retry: RetrySettings,
    jobs_rx: mpsc::Receiver<String>,
    shutdown_rx: mpsc::Receiver<()>,
    outcomes_tx: broadcast::Sender<FulfillmentOutcome>,
}

/// Handle for signalling and stopping the worker.
#[derive(Clone)]
pub struct FulfillmentHandle {
    jobs_tx: mpsc::Sender<String>,
    shutdown_tx: mpsc::Sender<()>,
    outcomes_tx: broadcast::Sender<FulfillmentOutcome>,
}

impl FulfillmentHandle {
    /// Queues a fulfillment job for `book_id` without waiting.
    pub fn signal(&self, book_id: &str) -> EngineResult<()> {
        self.jobs_tx
            .try_send(book_id.to_string())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    EngineError::ChannelError("fulfillment queue full".into())
                }
                mpsc::error::TrySendError::Closed(_) => EngineError::ShuttingDown,
            })
    }

    /// Receives every outcome published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<FulfillmentOutcome> {
        self.outcomes_tx.subscribe()
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelError("Shutdown channel closed".into()))
    }
}

impl FulfillmentWorker {
    /// Creates a worker and returns its handle.
    pub fn new(
        coordinator: FulfillmentCoordinator,
        retry: RetrySettings,
        queue_capacity: usize,
    ) -> (Self, FulfillmentHandle) {
        let (jobs_tx, jobs_rx) = mpsc::channel(queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (outcomes_tx, _) = broadcast::channel(256);

        let worker = FulfillmentWorker {
            coordinator,
            retry,
            jobs_rx,
            shutdown_rx,
            outcomes_tx: outcomes_tx.clone(),
        };
        let handle = FulfillmentHandle {
            jobs_tx,
            shutdown_tx,
            outcomes_tx,
        };

        (worker, handle)
    }

    /// Runs the worker loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!("Fulfillment worker starting");

        loop {
            tokio::select! {
                Some(book_id) = self.jobs_rx.recv() => {
                    let outcome = self.process(book_id).await;
                    // No subscribers is fine.
                    let _ = self.outcomes_tx.send(outcome);
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Fulfillment worker shutting down");
                    break;
                }
            }
        }

        info!("Fulfillment worker stopped");
    }

    async fn process(&self, book_id: String) -> FulfillmentOutcome {
        let coordinator = &self.coordinator;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0u32;

        let result = backoff::future::retry_notify(
            self.retry.backoff(),
            || {
                attempts += 1;
                let attempt = attempts;
                let book_id = book_id.as_str();
                async move {
                    coordinator.on_return(book_id).await.map_err(|e| {
                        if e.is_retryable() && attempt < max_attempts {
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
                }
            },
            |e: EngineError, wait: Duration| {
                warn!(book_id = %book_id, error = %e, ?wait, "Fulfillment attempt failed, retrying");
            },
        )
        .await;

        match result {
            Ok(fulfilled) if fulfilled.is_empty() => FulfillmentOutcome::NothingToFulfill { book_id },
            Ok(fulfilled) => FulfillmentOutcome::Fulfilled {
                book_id,
                reservation_ids: fulfilled.into_iter().map(|r| r.id).collect(),
            },
            Err(e) => {
                error!(book_id = %book_id, attempts, error = %e, "Fulfillment gave up");
                FulfillmentOutcome::Failed {
                    book_id,
                    attempts,
                    error: e.to_string(),
                }
            }
        }
    }
}

// =============================================================================
// Trigger
// =============================================================================

/// How `return_book` hands a freed copy to the queue.
#[derive(Clone)]
pub enum FulfillmentTrigger {
    /// Queue a job on the background worker.
    Background(FulfillmentHandle),
    /// Run fulfillment on the caller's task after the return commits.
    Inline(FulfillmentCoordinator),
}

impl FulfillmentTrigger {
    /// Never fails the caller; problems are logged and left to `reconcile`.
    pub async fn book_returned(&self, book_id: &str) {
        match self {
            FulfillmentTrigger::Background(handle) => {
                if let Err(e) = handle.signal(book_id) {
                    warn!(book_id = %book_id, error = %e, "Fulfillment signal dropped, next sweep reconciles");
                }
            }
            FulfillmentTrigger::Inline(coordinator) => {
                if let Err(e) = coordinator.on_return(book_id).await {
                    warn!(book_id = %book_id, error = %e, "Inline fulfillment failed, next sweep reconciles");
                }
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    async fn queue_of(fx: &Fixture, book: &Book, n: usize) -> Vec<Reservation> {
        let mut out = Vec::new();
        for _ in 0..n {
            let s = fx.student(1).await;
            out.push(fx.queue().reserve_book(&s.id, &book.id).await.unwrap().reservation);
            fx.tick();
        }
        out
    }

    #[tokio::test]
    async fn test_on_return_fulfills_head_once() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let queue = queue_of(&fx, &book, 2).await;
        fx.set_available(&book.id, 1).await;

        let coordinator = fx.coordinator();
        let fulfilled = coordinator.on_return(&book.id).await.unwrap();
        assert_eq!(fulfilled.len(), 1);
        assert_eq!(fulfilled[0].id, queue[0].id);

        // The copy is already held for the head.
        assert!(coordinator.on_return(&book.id).await.unwrap().is_empty());
        assert_eq!(fx.queue().queue_position(&queue[1].id).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_two_free_copies_fulfill_two_heads() {
        let fx = Fixture::new();
        let book = fx.book(2, 0).await;
        let queue = queue_of(&fx, &book, 3).await;
        fx.set_available(&book.id, 2).await;

        let fulfilled = fx.coordinator().on_return(&book.id).await.unwrap();
        let ids: Vec<_> = fulfilled.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![queue[0].id.clone(), queue[1].id.clone()]);
    }

    #[tokio::test]
    async fn test_gate_and_eligibility_around_a_claim() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let queue = queue_of(&fx, &book, 1).await;
        let holder = queue[0].student_id.clone();
        let outsider = fx.student(1).await;
        fx.set_available(&book.id, 1).await;

        let coordinator = fx.coordinator();
        coordinator.on_return(&book.id).await.unwrap();
        let book = fx.store.book(&book.id).await.unwrap();

        assert_eq!(coordinator.queue_gate(&holder, &book).await.unwrap(), QueueGate::ClaimHonored);
        assert!(matches!(
            coordinator.queue_gate(&outsider.id, &book).await.unwrap(),
            QueueGate::Blocked(CoreError::ReservationConflict { .. })
        ));

        let report = coordinator.can_student_borrow_book(&outsider.id, &book.id).await.unwrap();
        assert!(!report.can_borrow);
        assert!(report.reservation_conflict);
        assert_eq!(report.reasons.len(), 1);

        let report = coordinator.can_student_borrow_book(&holder, &book.id).await.unwrap();
        assert!(report.can_borrow);
        assert!(report.reservation_match);
        assert!(report.reasons.is_empty());
    }

    #[tokio::test]
    async fn test_eligibility_lists_every_reason() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let student = fx.student(1).await;
        fx.store.set_student_active(&student.id, false).await;

        let report = fx
            .coordinator()
            .can_student_borrow_book(&student.id, &book.id)
            .await
            .unwrap();
        assert!(!report.can_borrow);
        assert!(!report.reservation_conflict);
        // Inactive student and no free copy.
        assert_eq!(report.reasons.len(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_recovers_missed_signal() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        queue_of(&fx, &book, 1).await;
        fx.set_available(&book.id, 1).await;

        assert_eq!(fx.coordinator().reconcile().await.unwrap(), 1);
        assert_eq!(fx.coordinator().reconcile().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_worker_publishes_outcome() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        let queue = queue_of(&fx, &book, 1).await;
        fx.set_available(&book.id, 1).await;

        let (worker, handle) = FulfillmentWorker::new(fx.coordinator(), fx.fast_retry(5), 8);
        let mut outcomes = handle.subscribe();
        let task = tokio::spawn(worker.run());

        handle.signal(&book.id).unwrap();
        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(
            outcome,
            FulfillmentOutcome::Fulfilled {
                book_id: book.id.clone(),
                reservation_ids: vec![queue[0].id.clone()],
            }
        );

        handle.signal(&book.id).unwrap();
        let outcome = outcomes.recv().await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::NothingToFulfill { .. }));

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_retries_transient_failures() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        queue_of(&fx, &book, 1).await;
        fx.set_available(&book.id, 1).await;
        fx.store.fail_next_transitions(2);

        let (worker, handle) = FulfillmentWorker::new(fx.coordinator(), fx.fast_retry(5), 8);
        let mut outcomes = handle.subscribe();
        let task = tokio::spawn(worker.run());

        handle.signal(&book.id).unwrap();
        assert!(matches!(
            outcomes.recv().await.unwrap(),
            FulfillmentOutcome::Fulfilled { .. }
        ));

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_gives_up_after_max_attempts() {
        let fx = Fixture::new();
        let book = fx.book(1, 0).await;
        queue_of(&fx, &book, 1).await;
        fx.set_available(&book.id, 1).await;
        fx.store.fail_next_transitions(10);

        let (worker, handle) = FulfillmentWorker::new(fx.coordinator(), fx.fast_retry(3), 8);
        let mut outcomes = handle.subscribe();
        let task = tokio::spawn(worker.run());

        handle.signal(&book.id).unwrap();
        match outcomes.recv().await.unwrap() {
            FulfillmentOutcome::Failed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_rejects_signal() {
        let fx = Fixture::new();
        let (_worker, handle) = FulfillmentWorker::new(fx.coordinator(), fx.fast_retry(1), 1);

        handle.signal("book-a").unwrap();
        let err = handle.signal("book-b").unwrap_err();
        assert!(matches!(err, EngineError::ChannelError(_)));
    }
}
