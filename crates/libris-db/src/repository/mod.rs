//! # Repository Module
//!
//! Database repository implementations for Libris.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  libris-engine SqliteStore (port adapter)                              │
//! │       │                                                                 │
//! │       │  db.loans().open_loan(&txn)                                    │
//! │       ▼                                                                 │
//! │  LoanRepository                                                        │
//! │  ├── open_loan / renew / close_loan   (atomic units)                   │
//! │  ├── current_for_pair / open_for_student                               │
//! │  └── count_renewals / history                                          │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`BookRepository`](book::BookRepository) - Catalog lookup and guarded copy counters
//! - [`PersonRepository`](person::PersonRepository) - Students and librarians
//! - [`LoanRepository`](loan::LoanRepository) - Transaction log
//! - [`ReservationRepository`](reservation::ReservationRepository) - Reservation queue

pub mod book;
pub mod loan;
pub mod person;
pub mod reservation;
