//! # Engine
//!
//! Wires configuration, storage, clock and notifier into the managers and
//! owns the two background tasks.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               Engine                                    │
//! │                                                                         │
//! │   LoanLifecycleManager ──return──► FulfillmentHandle ──► worker task   │
//! │            │                                                 │          │
//! │            ▼                                                 ▼          │
//! │   ReservationQueueManager ◄──── FulfillmentCoordinator ◄─────┘          │
//! │            ▲                            ▲                               │
//! │            └────────── ExpirationSweeper (sweeper task) ───────────────┘│
//! │                                                                         │
//! │   Stores (SQLite or memory) · Clock · Notifier                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use libris_db::Database;

use crate::adapters::{MemoryStore, SqliteStore};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, StoreError};
use crate::fulfillment::{
    FulfillmentCoordinator, FulfillmentHandle, FulfillmentOutcome, FulfillmentTrigger,
    FulfillmentWorker, RetrySettings,
};
use crate::loans::LoanLifecycleManager;
use crate::notify::{LogNotifier, Notifier};
use crate::ports::Stores;
use crate::reservations::ReservationQueueManager;
use crate::sweeper::{ExpirationSweeper, SweepReport, SweeperHandle};

// =============================================================================
// Builder
// =============================================================================

/// Collects the pluggable parts before the engine starts.
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        EngineBuilder {
            config,
            clock: None,
            notifier: None,
        }
    }

    /// Defaults to [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to [`LogNotifier`].
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Opens the configured SQLite database and starts on top of it.
    pub async fn open_sqlite(self) -> EngineResult<Engine> {
        self.config.validate()?;

        let db_config = self.config.db_config()?;
        if !db_config.is_in_memory() {
            if let Some(dir) = db_config.database_path.parent() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| StoreError::Unavailable(format!("{}: {}", dir.display(), e)))?;
            }
        }

        let db = Database::new(db_config).await?;
        let store = SqliteStore::new(db.clone());

        let mut engine = self.start(store.into_stores())?;
        engine.database = Some(db);
        Ok(engine)
    }

    /// Starts on the in-memory adapter.
    pub fn in_memory(self, store: &Arc<MemoryStore>) -> EngineResult<Engine> {
        self.start(store.stores())
    }

    /// Builds the managers and spawns the worker and sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self, stores: Stores) -> EngineResult<Engine> {
        self.config.validate()?;

        let config = Arc::new(self.config);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let policy = Arc::new(config.policy());

        let reservations =
            ReservationQueueManager::new(stores.clone(), policy.clone(), clock.clone(), notifier);
        let coordinator = FulfillmentCoordinator::new(
            stores.clone(),
            reservations.clone(),
            policy.clone(),
            clock.clone(),
        );

        let (worker, fulfillment) = FulfillmentWorker::new(
            coordinator.clone(),
            RetrySettings::from(&config.workers),
            config.workers.fulfillment_queue_capacity,
        );
        let (sweeper, sweeper_handle) = ExpirationSweeper::new(
            reservations.clone(),
            coordinator.clone(),
            config.workers.sweep_interval(),
        );

        let loans = LoanLifecycleManager::new(
            stores,
            policy,
            clock,
            coordinator.clone(),
            FulfillmentTrigger::Background(fulfillment.clone()),
        );

        let tasks = vec![tokio::spawn(worker.run()), tokio::spawn(sweeper.run())];

        info!(
            max_books_per_user = config.policy.max_books_per_user,
            max_renewals = config.policy.max_renewals,
            sweep_interval_secs = config.workers.sweep_interval_secs,
            "Loan engine started"
        );

        Ok(Engine {
            config,
            loans,
            reservations,
            coordinator,
            fulfillment,
            sweeper: sweeper_handle,
            tasks,
            database: None,
        })
    }
}

// =============================================================================
// Engine
// =============================================================================

/// A running loan engine.
pub struct Engine {
    config: Arc<EngineConfig>,
    loans: LoanLifecycleManager,
    reservations: ReservationQueueManager,
    coordinator: FulfillmentCoordinator,
    fulfillment: FulfillmentHandle,
    sweeper: SweeperHandle,
    tasks: Vec<JoinHandle<()>>,
    /// Set when the engine opened the pool itself.
    database: Option<Database>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// SQLite engine with the system clock and log notifications.
    pub async fn sqlite(config: EngineConfig) -> EngineResult<Self> {
        EngineBuilder::new(config).open_sqlite().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn loans(&self) -> &LoanLifecycleManager {
        &self.loans
    }

    pub fn reservations(&self) -> &ReservationQueueManager {
        &self.reservations
    }

    pub fn coordinator(&self) -> &FulfillmentCoordinator {
        &self.coordinator
    }

    /// Outcomes of background fulfillment jobs.
    pub fn fulfillment_outcomes(&self) -> broadcast::Receiver<FulfillmentOutcome> {
        self.fulfillment.subscribe()
    }

    /// Expires lapsed reservations and reconciles every queue now.
    pub async fn sweep_now(&self) -> EngineResult<SweepReport> {
        self.sweeper.sweep_now().await
    }

    /// Pool health, `true` for engines without an owned database.
    pub async fn health_check(&self) -> bool {
        match &self.database {
            Some(db) => db.health_check().await,
            None => true,
        }
    }

    /// Stops both tasks, waits for them and closes the pool.
    pub async fn shutdown(self) -> EngineResult<()> {
        info!("Shutting down loan engine");

        let mut first_error: Option<EngineError> = None;
        for result in [self.fulfillment.shutdown().await, self.sweeper.shutdown().await] {
            if let Err(e) = result {
                warn!(error = %e, "Task already stopped");
                first_error.get_or_insert(e);
            }
        }

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
                first_error.get_or_insert(EngineError::ChannelError(e.to_string()));
            }
        }

        if let Some(db) = &self.database {
            db.close().await;
        }

        info!("Loan engine stopped");
        first_error.map_or(Ok(()), Err)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    fn quick_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.workers.sweep_interval_secs = 3600;
        config
    }

    #[tokio::test]
    async fn test_return_fulfills_through_background_worker() {
        let fx = Fixture::new();
        let engine = Engine::builder(quick_config())
            .with_clock(fx.clock.clone())
            .with_notifier(fx.notifier.clone())
            .in_memory(&fx.store)
            .unwrap();

        let book = fx.book(1, 1).await;
        let holder = fx.student(1).await;
        let waiter = fx.student(1).await;
        let desk = fx.librarian().await;

        let loan = engine
            .loans()
            .borrow_book(&holder.id, &book.id, &desk.id, None)
            .await
            .unwrap();
        let queued = engine.reservations().reserve_book(&waiter.id, &book.id).await.unwrap();

        let mut outcomes = engine.fulfillment_outcomes();
        engine.loans().return_book(&loan.id, "good", None).await.unwrap();

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(
            outcome,
            FulfillmentOutcome::Fulfilled {
                book_id: book.id.clone(),
                reservation_ids: vec![queued.reservation.id.clone()],
            }
        );
        assert_eq!(fx.notifier.fulfilled(), vec![queued.reservation.id]);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_refuses_to_start() {
        let fx = Fixture::new();
        let mut config = quick_config();
        config.policy.max_books_per_user = 0;

        let result = Engine::builder(config).in_memory(&fx.store);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_sweep_now_after_shutdown_fails() {
        let fx = Fixture::new();
        let engine = Engine::builder(quick_config())
            .with_clock(fx.clock.clone())
            .in_memory(&fx.store)
            .unwrap();

        assert_eq!(engine.sweep_now().await.unwrap(), SweepReport::default());
        let sweeper = engine.sweeper.clone();
        engine.shutdown().await.unwrap();

        assert!(matches!(sweeper.sweep_now().await, Err(EngineError::ShuttingDown)));
    }
}
