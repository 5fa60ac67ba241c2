//! In-memory score ledger and reset cooldowns.
//!
//! Scores live only for the lifetime of the process; the backfill scanner
//! rebuilds an approximation on startup.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::types::Snowflake;

/// Minimum number of days between two resets by the same user.
pub const RESET_COOLDOWN_DAYS: i64 = 14;

/// Outcome of [`ScoreLedger::try_reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Score set to zero, cooldown restarted.
    Reset,
    /// Too soon; nothing changed.
    Cooldown { remaining: Duration },
}

#[derive(Debug, Default)]
pub struct ScoreLedger {
    scores: HashMap<Snowflake, i64>,
    last_reset: HashMap<Snowflake, DateTime<Utc>>,
}

impl ScoreLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to a user's score, creating it at 0. Returns the new score.
    pub fn credit(&mut self, user_id: &str, delta: i64) -> i64 {
        let score = self.scores.entry(user_id.to_string()).or_insert(0);
        *score = score.saturating_add(delta);
        *score
    }

    pub fn get(&self, user_id: &str) -> i64 {
        self.scores.get(user_id).copied().unwrap_or(0)
    }

    pub fn last_reset(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.last_reset.get(user_id).copied()
    }

    /// Zero a user's score unless they reset less than
    /// [`RESET_COOLDOWN_DAYS`] ago.
    pub fn try_reset(&mut self, user_id: &str, now: DateTime<Utc>) -> ResetOutcome {
        let cooldown = Duration::days(RESET_COOLDOWN_DAYS);
        if let Some(last) = self.last_reset.get(user_id) {
            let elapsed = now.signed_duration_since(*last);
            if elapsed < cooldown {
                return ResetOutcome::Cooldown {
                    remaining: cooldown - elapsed,
                };
            }
        }

        self.scores.insert(user_id.to_string(), 0);
        self.last_reset.insert(user_id.to_string(), now);
        ResetOutcome::Reset
    }

    /// Number of users with a score entry.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// `"{days}d {hours}h"`, where hours are the whole hours left in the partial
/// day.
pub fn format_remaining(remaining: Duration) -> String {
    let days = remaining.num_days();
    let hours = (remaining - Duration::days(days)).num_hours();
    format!("{}d {}h", days, hours)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    // -- credit() / get() --------------------------------------------------

    #[test]
    fn untouched_user_scores_zero() {
        let ledger = ScoreLedger::new();
        assert_eq!(ledger.get("alice"), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn credits_are_additive() {
        let mut ledger = ScoreLedger::new();
        ledger.credit("alice", 10);
        ledger.credit("alice", -1);
        assert_eq!(ledger.get("alice"), 9);
        assert_eq!(ledger.get("bob"), 0);
    }

    #[test]
    fn scores_go_negative() {
        let mut ledger = ScoreLedger::new();
        assert_eq!(ledger.credit("alice", -10), -10);
        assert_eq!(ledger.credit("alice", -1), -11);
    }

    #[test]
    fn credit_saturates_instead_of_overflowing() {
        let mut ledger = ScoreLedger::new();
        ledger.credit("alice", i64::MAX);
        assert_eq!(ledger.credit("alice", 1), i64::MAX);
    }

    // -- try_reset() -------------------------------------------------------

    #[test]
    fn first_reset_always_succeeds() {
        let mut ledger = ScoreLedger::new();
        ledger.credit("alice", 25);
        assert_eq!(ledger.try_reset("alice", at(1, 0)), ResetOutcome::Reset);
        assert_eq!(ledger.get("alice"), 0);
        assert_eq!(ledger.last_reset("alice"), Some(at(1, 0)));
    }

    #[test]
    fn reset_within_cooldown_is_rejected_without_mutation() {
        let mut ledger = ScoreLedger::new();
        ledger.try_reset("alice", at(1, 0));
        ledger.credit("alice", 5);

        let outcome = ledger.try_reset("alice", at(14, 0));
        assert_eq!(
            outcome,
            ResetOutcome::Cooldown {
                remaining: Duration::days(1)
            }
        );
        assert_eq!(ledger.get("alice"), 5);
        assert_eq!(ledger.last_reset("alice"), Some(at(1, 0)));
    }

    #[test]
    fn reset_at_exactly_fourteen_days_succeeds() {
        let mut ledger = ScoreLedger::new();
        ledger.try_reset("alice", at(1, 0));
        ledger.credit("alice", 5);
        assert_eq!(ledger.try_reset("alice", at(15, 0)), ResetOutcome::Reset);
        assert_eq!(ledger.get("alice"), 0);
        assert_eq!(ledger.last_reset("alice"), Some(at(15, 0)));
    }

    #[test]
    fn cooldowns_are_per_user() {
        let mut ledger = ScoreLedger::new();
        ledger.try_reset("alice", at(1, 0));
        assert_eq!(ledger.try_reset("bob", at(2, 0)), ResetOutcome::Reset);
    }

    // -- format_remaining() ------------------------------------------------

    #[test]
    fn remaining_shows_days_and_partial_hours() {
        let remaining = Duration::days(3) + Duration::hours(5) + Duration::minutes(59);
        assert_eq!(format_remaining(remaining), "3d 5h");
    }

    #[test]
    fn remaining_under_an_hour() {
        assert_eq!(format_remaining(Duration::minutes(30)), "0d 0h");
    }
}
