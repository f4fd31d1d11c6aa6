use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use sea_orm::Set;
use std::time::Duration;

use crate::db::entities::campaign;

/// Per-campaign rolling counters: one minute bucket and one UTC-day bucket.
/// Both live on the campaign row so rate caps survive process restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingWindows {
    pub minute_started_at: Option<DateTime<Utc>>,
    pub minute_count: i32,
    pub day: Option<NaiveDate>,
    pub day_count: i32,
}

impl PacingWindows {
    pub fn from_campaign(c: &campaign::Model) -> Self {
        PacingWindows {
            minute_started_at: c.pacing_minute_started_at,
            minute_count: c.pacing_minute_count,
            day: c.pacing_day,
            day_count: c.pacing_day_count,
        }
    }

    pub fn write_to(&self, active: &mut campaign::ActiveModel) {
        active.pacing_minute_started_at = Set(self.minute_started_at);
        active.pacing_minute_count = Set(self.minute_count);
        active.pacing_day = Set(self.day);
        active.pacing_day_count = Set(self.day_count);
    }

    /// Expires stale buckets: the minute bucket once 60 seconds have passed
    /// since it opened, the day bucket when the UTC calendar day changes.
    pub fn rolled(&self, now: DateTime<Utc>) -> PacingWindows {
        let (minute_started_at, minute_count) = match self.minute_started_at {
            Some(started) if now.signed_duration_since(started).num_seconds() < 60 => {
                (Some(started), self.minute_count)
            }
            _ => (Some(now), 0),
        };

        let today = now.date_naive();
        let (day, day_count) = match self.day {
            Some(day) if day == today => (Some(day), self.day_count),
            _ => (Some(today), 0),
        };

        PacingWindows { minute_started_at, minute_count, day, day_count }
    }

    pub fn record_attempt(&mut self) {
        self.minute_count += 1;
        self.day_count += 1;
    }
}

/// How many attempts the current tick may make: whatever is left of both the
/// per-minute rate and the daily cap, clipped to zero.
pub fn budget(per_minute: i32, daily_cap: i32, windows: &PacingWindows) -> u32 {
    let minute_left = per_minute - windows.minute_count;
    let day_left = daily_cap - windows.day_count;
    minute_left.min(day_left).max(0) as u32
}

/// Uniformly sampled delay between consecutive attempts in a batch. The
/// jitter is what makes the calling pattern look human instead of scripted;
/// skipping it is not an option.
pub fn jitter(delay_min: i32, delay_max: i32) -> Duration {
    let low = delay_min.max(0) as u64;
    let high = (delay_max.max(0) as u64).max(low);
    let secs = if low == high {
        low
    } else {
        rand::rng().random_range(low..=high)
    };
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fresh() -> PacingWindows {
        PacingWindows { minute_started_at: None, minute_count: 0, day: None, day_count: 0 }
    }

    #[test]
    fn test_fresh_windows_get_full_budget() {
        let windows = fresh().rolled(at(0));
        assert_eq!(budget(3, 50, &windows), 3);
    }

    #[test]
    fn test_budget_exhausts_within_minute() {
        let mut windows = fresh().rolled(at(0));
        for _ in 0..3 {
            windows.record_attempt();
        }
        // Still inside the same minute bucket: nothing left.
        let windows = windows.rolled(at(30));
        assert_eq!(budget(3, 50, &windows), 0);
    }

    #[test]
    fn test_minute_rollover_restores_budget() {
        let mut windows = fresh().rolled(at(0));
        for _ in 0..3 {
            windows.record_attempt();
        }
        let windows = windows.rolled(at(61));
        assert_eq!(windows.minute_count, 0);
        assert_eq!(budget(3, 50, &windows), 3);
        // The day bucket carried the spend across the minute boundary.
        assert_eq!(windows.day_count, 3);
    }

    #[test]
    fn test_daily_cap_binds_over_minute_rate() {
        let mut windows = fresh().rolled(at(0));
        windows.day_count = 49;
        assert_eq!(budget(3, 50, &windows), 1);
        windows.day_count = 50;
        assert_eq!(budget(3, 50, &windows), 0);
    }

    #[test]
    fn test_budget_never_negative() {
        let mut windows = fresh().rolled(at(0));
        windows.minute_count = 10;
        windows.day_count = 99;
        assert_eq!(budget(3, 50, &windows), 0);
    }

    #[test]
    fn test_day_rollover_resets_day_count() {
        let mut windows = fresh().rolled(at(0));
        for _ in 0..5 {
            windows.record_attempt();
        }
        let next_day = at(24 * 3600 + 1);
        let windows = windows.rolled(next_day);
        assert_eq!(windows.day_count, 0);
        assert_eq!(windows.day, Some(next_day.date_naive()));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for _ in 0..50 {
            let delay = jitter(15, 30);
            assert!(delay >= Duration::from_secs(15));
            assert!(delay <= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_jitter_degenerate_bounds() {
        assert_eq!(jitter(10, 10), Duration::from_secs(10));
        // Inverted or negative bounds collapse instead of panicking.
        assert_eq!(jitter(20, 10), Duration::from_secs(20));
        assert_eq!(jitter(-5, -1), Duration::from_secs(0));
    }
}
