//! # Loan Policy
//!
//! The tunable limits of the circulation rules.
//!
//! ## Loan Periods
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  year_of_study │ loan period                                            │
//! │  ──────────────┼────────────                                            │
//! │  1, 2          │ 14 days                                                │
//! │  3, 4          │ 21 days                                                │
//! │  anything else │ 28 days (graduate students)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! The table is data, not a formula, so a library can change it from config.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::fine::DEFAULT_FINE_RATE;
use crate::money::Money;
use crate::types::Student;

/// Default maximum number of open loans per student.
pub const DEFAULT_MAX_BOOKS_PER_USER: i64 = 5;

/// Default maximum renewals per (student, book) pair.
pub const DEFAULT_MAX_RENEWALS: i64 = 2;

/// Default maximum active reservations per student.
pub const DEFAULT_MAX_RESERVATIONS_PER_STUDENT: i64 = 5;

/// Default reservation window in days.
pub const DEFAULT_RESERVATION_WINDOW_DAYS: i64 = 7;

/// Loan period for years not matched by any rule.
pub const DEFAULT_FALLBACK_LOAN_DAYS: i64 = 28;

/// One row of the loan period table. Both year bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanPeriodRule {
    pub min_year: i64,
    pub max_year: i64,
    pub days: i64,
}

impl LoanPeriodRule {
    pub const fn new(min_year: i64, max_year: i64, days: i64) -> Self {
        LoanPeriodRule {
            min_year,
            max_year,
            days,
        }
    }

    #[inline]
    pub fn matches(&self, year: i64) -> bool {
        (self.min_year..=self.max_year).contains(&year)
    }
}

/// The default table.
pub fn default_loan_periods() -> Vec<LoanPeriodRule> {
    vec![LoanPeriodRule::new(1, 2, 14), LoanPeriodRule::new(3, 4, 21)]
}

/// All circulation limits in one value, passed to every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanPolicy {
    pub max_books_per_user: i64,
    pub max_renewals: i64,
    pub max_reservations_per_student: i64,
    pub reservation_window: Duration,
    pub fine_rate: Money,
    pub loan_periods: Vec<LoanPeriodRule>,
    pub fallback_loan_days: i64,
}

impl Default for LoanPolicy {
    fn default() -> Self {
        LoanPolicy {
            max_books_per_user: DEFAULT_MAX_BOOKS_PER_USER,
            max_renewals: DEFAULT_MAX_RENEWALS,
            max_reservations_per_student: DEFAULT_MAX_RESERVATIONS_PER_STUDENT,
            reservation_window: Duration::days(DEFAULT_RESERVATION_WINDOW_DAYS),
            fine_rate: DEFAULT_FINE_RATE,
            loan_periods: default_loan_periods(),
            fallback_loan_days: DEFAULT_FALLBACK_LOAN_DAYS,
        }
    }
}

impl LoanPolicy {
    /// Loan length in days for a year of study. First matching rule wins.
    pub fn loan_days(&self, year_of_study: i64) -> i64 {
        self.loan_periods
            .iter()
            .find(|rule| rule.matches(year_of_study))
            .map(|rule| rule.days)
            .unwrap_or(self.fallback_loan_days)
    }

    /// Due date for a loan (or renewal) starting at `now`.
    pub fn due_date(&self, now: DateTime<Utc>, student: &Student) -> DateTime<Utc> {
        now + Duration::days(self.loan_days(student.year_of_study))
    }

    /// `expires_at` for a reservation created at `now`.
    pub fn reservation_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.reservation_window
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
