//! # Fine Calculator
//!
//! Maps `(due_date, return_date, rate_per_day)` to a fine.
//!
//! ## Day Counting
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Both timestamps are truncated to UTC midnight before subtracting.     │
//! │                                                                         │
//! │  due        = 2026-03-10 17:00Z  → 2026-03-10 00:00Z                   │
//! │  returned   = 2026-03-11 00:01Z  → 2026-03-11 00:00Z                   │
//! │  whole days = 1                  → fine = 1 × rate                     │
//! │                                                                         │
//! │  Sub-day arrival noise never produces a fractional fine.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveTime, Utc};

use crate::money::Money;

/// Default fine: 0.50 per day.
pub const DEFAULT_FINE_RATE: Money = Money::from_cents(50);

/// Computes the fine for a loan returned at `returned`.
///
/// ## Example
/// ```rust
/// use chrono::{Duration, TimeZone, Utc};
/// use libris_core::fine::{fine, DEFAULT_FINE_RATE};
///
/// let due = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
/// assert!(fine(due, due, DEFAULT_FINE_RATE).is_zero());
/// assert_eq!(fine(due, due + Duration::days(3), DEFAULT_FINE_RATE).cents(), 150);
/// ```
pub fn fine(due: DateTime<Utc>, returned: DateTime<Utc>, rate_per_day: Money) -> Money {
    if returned <= due {
        return Money::zero();
    }

    let days = whole_days_late(due, returned);
    if days <= 0 {
        return Money::zero();
    }

    rate_per_day.times_days(days)
}

/// Whole UTC calendar days between the due date and the return date.
pub fn whole_days_late(due: DateTime<Utc>, returned: DateTime<Utc>) -> i64 {
    let due_midnight = utc_midnight(due);
    let returned_midnight = utc_midnight(returned);
    (returned_midnight - due_midnight).num_days()
}

fn utc_midnight(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_on_time_is_free() {
        assert!(fine(due(), due(), DEFAULT_FINE_RATE).is_zero());
        assert!(fine(due(), due() - Duration::days(1), DEFAULT_FINE_RATE).is_zero());
    }

    #[test]
    fn test_one_day_late() {
        let f = fine(due(), due() + Duration::days(1), DEFAULT_FINE_RATE);
        assert_eq!(f, DEFAULT_FINE_RATE);
    }

    #[test]
    fn test_partial_day_truncates() {
        let returned = due() + Duration::days(1) + Duration::minutes(1);
        assert_eq!(fine(due(), returned, DEFAULT_FINE_RATE), DEFAULT_FINE_RATE);
    }

    #[test]
    fn test_same_day_late_is_free() {
        // Due at 09:00, back at 23:59 the same UTC day.
        let due = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        let returned = Utc.with_ymd_and_hms(2026, 3, 10, 23, 59, 0).unwrap();
        assert!(fine(due, returned, DEFAULT_FINE_RATE).is_zero());
    }

    #[test]
    fn test_crossing_midnight_counts_a_day() {
        let due = Utc.with_ymd_and_hms(2026, 3, 10, 23, 59, 0).unwrap();
        let returned = Utc.with_ymd_and_hms(2026, 3, 11, 0, 1, 0).unwrap();
        assert_eq!(fine(due, returned, DEFAULT_FINE_RATE).cents(), 50);
    }

    #[test]
    fn test_custom_rate() {
        let f = fine(due(), due() + Duration::days(10), Money::from_cents(25));
        assert_eq!(f.cents(), 250);
    }
}
