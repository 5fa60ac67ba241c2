//! Calendar math for the monthly Core Memories event.
//!
//! The event is always held on the last day of the month at 5:00 PM EST.
//! The host reminder goes out at 22:30 UTC (5:30 PM EST) the same day.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

/// How often the reminder loop wakes up. Also the width of the firing window.
pub const REMINDER_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Reminder wall-clock time in UTC.
const REMINDER_HOUR: u32 = 22;
const REMINDER_MINUTE: u32 = 30;

/// Number of days in `month` of `year` (month is 1-based).
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Event day for the month containing `now`.
pub fn event_date(now: DateTime<Utc>) -> NaiveDate {
    let last = days_in_month(now.year(), now.month());
    // `with_day` only fails for days the month doesn't have.
    now.date_naive().with_day(last).unwrap_or_else(|| now.date_naive())
}

/// `"March 31, 2025 at 05:00 PM EST"`.
pub fn format_event_when(date: NaiveDate) -> String {
    date.format("%B %d, %Y at 05:00 PM EST").to_string()
}

/// Full month name of `now`, e.g. `"March"`.
pub fn month_name(now: DateTime<Utc>) -> String {
    now.format("%B").to_string()
}

/// The instant this month's reminder is due.
pub fn reminder_target(now: DateTime<Utc>) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(REMINDER_HOUR, REMINDER_MINUTE, 0).unwrap_or_default();
    Utc.from_utc_datetime(&event_date(now).and_time(time))
}

/// Whether a tick at `now` falls in `[target, target + interval)`.
pub fn in_reminder_window(now: DateTime<Utc>) -> bool {
    let target = reminder_target(now);
    let width = Duration::from_std(REMINDER_INTERVAL).unwrap_or_else(|_| Duration::minutes(5));
    target <= now && now < target + width
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    // -- days_in_month() / event_date() ------------------------------------

    #[test]
    fn february_in_leap_year_has_29_days() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2025, 2), 28);
        assert_eq!(days_in_month(2000, 2), 29);
        assert_eq!(days_in_month(1900, 2), 28);
    }

    #[test]
    fn december_rolls_into_next_year() {
        assert_eq!(days_in_month(2025, 12), 31);
    }

    #[test]
    fn event_date_is_last_day_for_every_day_of_month() {
        for day in 1..=30 {
            let date = event_date(utc(2025, 4, day, 12, 0, 0));
            assert_eq!(date, NaiveDate::from_ymd_opt(2025, 4, 30).unwrap());
        }
        assert_eq!(
            event_date(utc(2024, 2, 3, 0, 0, 0)),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }

    #[test]
    fn event_when_is_formatted_for_est() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
        assert_eq!(format_event_when(date), "March 31, 2025 at 05:00 PM EST");
        assert_eq!(month_name(utc(2025, 3, 2, 0, 0, 0)), "March");
    }

    // -- reminder window ---------------------------------------------------

    #[test]
    fn reminder_target_is_last_day_at_2230_utc() {
        assert_eq!(
            reminder_target(utc(2025, 4, 1, 0, 0, 0)),
            utc(2025, 4, 30, 22, 30, 0)
        );
    }

    #[test]
    fn fires_exactly_at_target() {
        assert!(in_reminder_window(utc(2025, 4, 30, 22, 30, 0)));
        assert!(in_reminder_window(utc(2025, 4, 30, 22, 34, 59)));
    }

    #[test]
    fn does_not_fire_one_interval_early() {
        assert!(!in_reminder_window(utc(2025, 4, 30, 22, 25, 0)));
    }

    #[test]
    fn window_is_half_open() {
        assert!(!in_reminder_window(utc(2025, 4, 30, 22, 35, 0)));
        assert!(!in_reminder_window(utc(2025, 4, 30, 22, 35, 1)));
    }

    #[test]
    fn other_days_never_fire() {
        assert!(!in_reminder_window(utc(2025, 4, 29, 22, 30, 0)));
    }
}
