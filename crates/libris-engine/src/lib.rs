//! # libris-engine: Loan Lifecycle & Reservation Engine
//!
//! The stateful half of Libris. It drives the pure rules in `libris-core`
//! against storage ports and runs the background workers.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          libris-engine                                  │
//! │                                                                         │
//! │   borrow / return / renew          reserve / cancel / expire            │
//! │            │                                  │                         │
//! │            ▼                                  ▼                         │
//! │  ┌──────────────────────┐         ┌──────────────────────────┐          │
//! │  │ LoanLifecycleManager │────────►│ FulfillmentCoordinator   │          │
//! │  │     (loans.rs)       │  gate   │   (fulfillment.rs)       │          │
//! │  └──────────┬───────────┘         └────────────┬─────────────┘          │
//! │             │                                  │                        │
//! │             │                     ┌────────────▼─────────────┐          │
//! │             │                     │ ReservationQueueManager  │          │
//! │             │                     │   (reservations.rs)      │          │
//! │             │                     └────────────┬─────────────┘          │
//! │             ▼                                  ▼                        │
//! │  ┌───────────────────────────────────────────────────────────────┐     │
//! │  │  Ports (ports.rs): Catalog · Person · LoanStore · Reservation  │     │
//! │  │    SqliteStore (libris-db)          MemoryStore (tests)        │     │
//! │  └───────────────────────────────────────────────────────────────┘     │
//! │                                                                         │
//! │  Background: FulfillmentWorker (retry + backoff), ExpirationSweeper     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - Wiring and lifecycle of the whole engine
//! - [`loans`] - Borrow, return, renew, fines
//! - [`reservations`] - FIFO reservation queue
//! - [`fulfillment`] - Queue gate, fulfillment worker
//! - [`sweeper`] - Periodic expiry and reconciliation
//! - [`ports`] / [`adapters`] - Storage seams and their implementations
//! - [`config`] - TOML + environment configuration
//! - [`clock`] / [`notify`] - Time source and notifications
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use libris_engine::{Engine, EngineConfig};
//!
//! let engine = Engine::sqlite(EngineConfig::load(None)?).await?;
//! let loan = engine.loans().borrow_book(&student_id, &book_id, &librarian_id, None).await?;
//! engine.loans().return_book(&loan.id, "good", None).await?;
//! engine.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod adapters;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod fulfillment;
pub mod loans;
pub mod notify;
pub mod ports;
pub mod reservations;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use adapters::{MemoryStore, SqliteStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, EngineResult, StoreError, StoreResult};
pub use fulfillment::{
    FulfillmentCoordinator, FulfillmentHandle, FulfillmentOutcome, FulfillmentTrigger,
    FulfillmentWorker, RetrySettings,
};
pub use loans::LoanLifecycleManager;
pub use notify::{LogNotifier, NoOpNotifier, Notifier, NotifyError};
pub use ports::Stores;
pub use reservations::ReservationQueueManager;
pub use sweeper::{ExpirationSweeper, SweepReport, SweeperHandle};
