//! Read-only aggregations over a machine's history.

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::classify::MachineStatus;

use super::MachineHistory;

/// Percentage of `start..end` the machine spent active, derived from
/// the recorded transitions.
///
/// The state before the first in-range entry is assumed to match that
/// entry, and the last recorded state extends to `end`. Unknown periods
/// count as not active. A range with no entries, or an empty range,
/// yields zero.
pub fn uptime_percentage(
    history: &MachineHistory,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> f64 {
    if end <= start {
        return 0.0;
    }

    let in_range = history.range(start, end);
    let Some(first) = in_range.first() else {
        return 0.0;
    };

    let mut active = Duration::ZERO;
    let mut current = first.status;
    let mut last_at = start;
    for entry in in_range {
        if current == MachineStatus::Active {
            active += entry.timestamp - last_at;
        }
        current = entry.status;
        last_at = entry.timestamp;
    }
    if current == MachineStatus::Active {
        active += end - last_at;
    }

    (active / (end - start)) * 100.0
}

/// One bucket of the hourly activity chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyActivity {
    /// Bucket start, e.g. `14:00`.
    pub hour: String,
    /// Uptime within the bucket, rounded to one decimal.
    pub activity_percentage: f64,
    /// Active time scaled to minutes of a full hour.
    pub active_minutes: f64,
    pub is_current_hour: bool,
}

/// Activity for the last 24 hour-aligned buckets, oldest first.
///
/// The final bucket is the in-progress hour, measured up to `now` but
/// still scored against a full hour.
pub fn hourly_activity(history: &MachineHistory, now: OffsetDateTime) -> Vec<HourlyActivity> {
    let hour_start = now
        - Duration::minutes(i64::from(now.minute()))
        - Duration::seconds(i64::from(now.second()))
        - Duration::nanoseconds(i64::from(now.nanosecond()));

    (0..24i64)
        .map(|i| {
            let bucket_start = hour_start - Duration::hours(23 - i);
            let is_current_hour = i == 23;
            let bucket_end = if is_current_hour {
                now
            } else {
                bucket_start + Duration::hours(1)
            };
            let uptime = uptime_percentage(history, bucket_start, bucket_end);
            HourlyActivity {
                hour: format!("{:02}:00", bucket_start.hour()),
                activity_percentage: round1(uptime),
                active_minutes: round1(uptime / 100.0 * 60.0),
                is_current_hour,
            }
        })
        .collect()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::history::HistoryEntry;

    fn history(entries: &[(OffsetDateTime, MachineStatus)]) -> MachineHistory {
        let mut history = MachineHistory::default();
        for &(timestamp, status) in entries {
            assert!(history.record(HistoryEntry { timestamp, status }));
        }
        history
    }

    #[test]
    fn should_report_full_uptime_for_a_machine_active_throughout() {
        let start = datetime!(2026-08-20 10:00 UTC);
        let end = datetime!(2026-08-20 11:00 UTC);
        let history = history(&[(start, MachineStatus::Active)]);

        assert_eq!(uptime_percentage(&history, start, end), 100.0);
    }

    #[test]
    fn should_split_uptime_at_a_transition() {
        let start = datetime!(2026-08-20 10:00 UTC);
        let end = datetime!(2026-08-20 11:00 UTC);
        let history = history(&[
            (start, MachineStatus::Active),
            (datetime!(2026-08-20 10:30 UTC), MachineStatus::Inactive),
        ]);

        assert_eq!(uptime_percentage(&history, start, end), 50.0);
    }

    #[test]
    fn should_backfill_the_gap_before_the_first_entry() {
        let start = datetime!(2026-08-20 10:00 UTC);
        let end = datetime!(2026-08-20 11:00 UTC);
        let history = history(&[(datetime!(2026-08-20 10:30 UTC), MachineStatus::Active)]);

        assert_eq!(uptime_percentage(&history, start, end), 100.0);
    }

    #[test]
    fn should_not_count_unknown_periods_as_active() {
        let start = datetime!(2026-08-20 10:00 UTC);
        let end = datetime!(2026-08-20 11:00 UTC);
        let history = history(&[
            (start, MachineStatus::Active),
            (datetime!(2026-08-20 10:20 UTC), MachineStatus::Unknown),
            (datetime!(2026-08-20 10:40 UTC), MachineStatus::Active),
        ]);

        let uptime = uptime_percentage(&history, start, end);
        assert!((uptime - 200.0 / 3.0).abs() < 1e-9, "got {uptime}");
    }

    #[test]
    fn should_report_zero_without_entries_in_range() {
        let start = datetime!(2026-08-20 10:00 UTC);
        let end = datetime!(2026-08-20 11:00 UTC);
        let history = history(&[(datetime!(2026-08-19 10:00 UTC), MachineStatus::Active)]);

        assert_eq!(uptime_percentage(&history, start, end), 0.0);
    }

    #[test]
    fn should_report_zero_for_an_empty_range() {
        let at = datetime!(2026-08-20 10:00 UTC);
        let history = history(&[(at, MachineStatus::Active)]);

        assert_eq!(uptime_percentage(&history, at, at), 0.0);
    }

    #[test]
    fn should_produce_twenty_four_hour_buckets() {
        let now = datetime!(2026-08-20 12:30 UTC);
        let buckets = hourly_activity(&MachineHistory::default(), now);

        assert_eq!(buckets.len(), 24);
        assert_eq!(buckets[0].hour, "13:00");
        assert_eq!(buckets[23].hour, "12:00");
        assert!(buckets[23].is_current_hour);
        assert!(buckets.iter().take(23).all(|b| !b.is_current_hour));
    }

    #[test]
    fn should_score_a_fully_active_hour() {
        let now = datetime!(2026-08-20 12:30 UTC);
        let history = history(&[
            (datetime!(2026-08-20 11:00 UTC), MachineStatus::Active),
            (datetime!(2026-08-20 11:30 UTC), MachineStatus::Active),
        ]);

        let buckets = hourly_activity(&history, now);
        let eleven = &buckets[22];
        assert_eq!(eleven.hour, "11:00");
        assert_eq!(eleven.activity_percentage, 100.0);
        assert_eq!(eleven.active_minutes, 60.0);
    }

    #[test]
    fn should_score_the_in_progress_hour_up_to_now() {
        let now = datetime!(2026-08-20 12:30 UTC);
        let history = history(&[(datetime!(2026-08-20 12:00 UTC), MachineStatus::Active)]);

        let buckets = hourly_activity(&history, now);
        let current = &buckets[23];
        assert!(current.is_current_hour);
        assert_eq!(current.activity_percentage, 100.0);
    }

    #[test]
    fn should_round_to_one_decimal() {
        let now = datetime!(2026-08-20 12:30 UTC);
        let history = history(&[
            (datetime!(2026-08-20 11:00 UTC), MachineStatus::Active),
            (datetime!(2026-08-20 11:20 UTC), MachineStatus::Inactive),
        ]);

        let buckets = hourly_activity(&history, now);
        let eleven = &buckets[22];
        assert_eq!(eleven.activity_percentage, 33.3);
        assert_eq!(eleven.active_minutes, 20.0);
    }
}
