//! Shared fixture for the engine's unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use libris_core::{Book, Condition, Librarian, LoanPolicy, Reservation, Student};

use crate::adapters::MemoryStore;
use crate::clock::{Clock, ManualClock};
use crate::fulfillment::{FulfillmentCoordinator, FulfillmentTrigger, RetrySettings};
use crate::loans::LoanLifecycleManager;
use crate::notify::{Notifier, NotifyError};
use crate::ports::Stores;
use crate::reservations::ReservationQueueManager;

/// Remembers which reservations were announced.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    fulfilled: Mutex<Vec<String>>,
    expired: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn fulfilled(&self) -> Vec<String> {
        self.fulfilled.lock().unwrap().clone()
    }

    pub fn expired(&self) -> Vec<String> {
        self.expired.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn reservation_fulfilled(&self, reservation: &Reservation) -> Result<(), NotifyError> {
        self.fulfilled.lock().unwrap().push(reservation.id.clone());
        Ok(())
    }

    async fn reservation_expired(&self, reservation: &Reservation) -> Result<(), NotifyError> {
        self.expired.lock().unwrap().push(reservation.id.clone());
        Ok(())
    }
}

/// Moves the shared manual clock forward by `step` on every read.
struct SteppingClock {
    inner: Arc<ManualClock>,
    step: Duration,
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.advance(self.step);
        self.inner.now()
    }
}

/// Memory store, manual clock and default policy.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub policy: Arc<LoanPolicy>,
    pub notifier: Arc<RecordingNotifier>,
    /// What the managers read; `clock` itself unless the fixture steps.
    engine_clock: Arc<dyn Clock>,
}

impl Fixture {
    pub fn new() -> Self {
        let start = Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        Fixture {
            store: MemoryStore::new(),
            clock: clock.clone(),
            policy: Arc::new(LoanPolicy::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            engine_clock: clock,
        }
    }

    /// Managers see time move by `step` each time they read the clock,
    /// so no two reads within one operation agree.
    pub fn stepping(step: Duration) -> Self {
        let mut fx = Fixture::new();
        fx.engine_clock = Arc::new(SteppingClock {
            inner: fx.clock.clone(),
            step,
        });
        fx
    }

    pub fn stores(&self) -> Stores {
        self.store.stores()
    }

    pub fn queue(&self) -> ReservationQueueManager {
        ReservationQueueManager::new(
            self.stores(),
            self.policy.clone(),
            self.engine_clock.clone(),
            self.notifier.clone(),
        )
    }

    pub fn coordinator(&self) -> FulfillmentCoordinator {
        FulfillmentCoordinator::new(
            self.stores(),
            self.queue(),
            self.policy.clone(),
            self.engine_clock.clone(),
        )
    }

    /// Loan manager that fulfills inline on return.
    pub fn loans(&self) -> LoanLifecycleManager {
        let coordinator = self.coordinator();
        LoanLifecycleManager::new(
            self.stores(),
            self.policy.clone(),
            self.engine_clock.clone(),
            coordinator.clone(),
            FulfillmentTrigger::Inline(coordinator),
        )
    }

    pub fn fast_retry(&self, max_attempts: u32) -> RetrySettings {
        RetrySettings {
            max_attempts,
            initial_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(10),
        }
    }

    /// Moves the clock one minute so queue order is unambiguous.
    pub fn tick(&self) {
        self.clock.advance(Duration::minutes(1));
    }

    pub async fn book(&self, total: i64, available: i64) -> Book {
        let now = self.clock.now();
        let book = Book {
            id: Uuid::new_v4().to_string(),
            title: "Invisible Cities".into(),
            total_copies: total,
            available_copies: available,
            is_active: true,
            condition: Condition::Good,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_book(book.clone()).await;
        book
    }

    /// Overwrites the free-copy counter, as if copies came back off-system.
    pub async fn set_available(&self, book_id: &str, available: i64) {
        let mut book = self.store.book(book_id).await.unwrap();
        book.available_copies = available;
        self.store.insert_book(book).await;
    }

    pub async fn student(&self, year: i64) -> Student {
        let student = Student {
            id: Uuid::new_v4().to_string(),
            name: "Italo".into(),
            is_active: true,
            year_of_study: year,
        };
        self.store.insert_student(student.clone()).await;
        student
    }

    pub async fn librarian(&self) -> Librarian {
        let librarian = Librarian {
            id: Uuid::new_v4().to_string(),
            name: "Desk".into(),
            is_active: true,
        };
        self.store.insert_librarian(librarian.clone()).await;
        librarian
    }
}
