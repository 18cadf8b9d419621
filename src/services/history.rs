//! Time-of-day averaging of historical occupancy.
//!
//! Upstream returns one row per day per time slot. For an averaging window of `n` days the
//! rows of the last `n` full days are grouped by slot label ("HH:MM:00") and each count is
//! averaged over the days that reported that slot, rounding half up.

use crate::models::occupancy::{UsageBuckets, UsageCounts};
use crate::models::occupeye::UsageRow;
use chrono::{Duration, NaiveDate, NaiveTime};
use log::warn;
use std::collections::BTreeMap;

/// Accepted averaging windows, in days.
pub const DEFAULT_WINDOWS: [u32; 3] = [1, 7, 30];

/// First and last day (inclusive) covered by a window ending the day before `today`.
pub fn window_range(today: NaiveDate, window: u32) -> (NaiveDate, NaiveDate) {
    let end = today - Duration::days(1);
    let start = today - Duration::days(i64::from(window.max(1)));
    (start, end)
}

/// Normalise "H:MM", "HH:MM" or "HH:MM:SS" to "HH:MM:00".
pub fn slot_label(raw: &str) -> Option<String> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
        .map(|t| t.format("%H:%M:00").to_string())
}

fn rounded_mean(sum: u64, n: u64) -> u64 {
    if n == 0 { 0 } else { (sum + n / 2) / n }
}

pub fn average_by_slot(rows: &[UsageRow], from: NaiveDate, to: NaiveDate) -> UsageBuckets {
    // (label, day) → counts; a repeated row for the same slot and day replaces the earlier one
    let mut per_day: BTreeMap<(String, NaiveDate), UsageCounts> = BTreeMap::new();
    for row in rows {
        if row.trigger_date < from || row.trigger_date > to {
            continue;
        }
        let Some(label) = slot_label(&row.time_slot) else {
            warn!("Skipping usage row with malformed time slot {:?}", row.time_slot);
            continue;
        };
        per_day.insert(
            (label, row.trigger_date),
            UsageCounts {
                sensors_absent: row.sensors_absent,
                sensors_occupied: row.sensors_occupied,
                sensors_total: row.sensors_total,
            },
        );
    }

    let mut sums: BTreeMap<String, (UsageCounts, u64)> = BTreeMap::new();
    for ((label, _day), counts) in per_day {
        let (acc, days) = sums.entry(label).or_default();
        acc.sensors_absent += counts.sensors_absent;
        acc.sensors_occupied += counts.sensors_occupied;
        acc.sensors_total += counts.sensors_total;
        *days += 1;
    }

    sums.into_iter()
        .map(|(label, (acc, days))| {
            (
                label,
                UsageCounts {
                    sensors_absent: rounded_mean(acc.sensors_absent, days),
                    sensors_occupied: rounded_mean(acc.sensors_occupied, days),
                    sensors_total: rounded_mean(acc.sensors_total, days),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(day: u32, slot: &str, absent: u64, occupied: u64) -> UsageRow {
        UsageRow {
            trigger_date: NaiveDate::from_ymd_opt(2024, 3, day).expect("date"),
            time_slot: slot.to_string(),
            sensors_absent: absent,
            sensors_occupied: occupied,
            sensors_total: absent + occupied,
        }
    }

    #[test]
    fn window_ends_yesterday() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 8).expect("date");
        let (from, to) = window_range(today, 7);
        assert_eq!(from, NaiveDate::from_ymd_opt(2024, 3, 1).expect("date"));
        assert_eq!(to, NaiveDate::from_ymd_opt(2024, 3, 7).expect("date"));
        assert_eq!(window_range(today, 1), (to, to));
    }

    #[test]
    fn labels_are_normalised() {
        assert_eq!(slot_label("9:10"), Some("09:10:00".to_string()));
        assert_eq!(slot_label("23:50:00"), Some("23:50:00".to_string()));
        assert_eq!(slot_label("noon"), None);
    }

    #[test]
    fn averages_per_slot_over_reporting_days() {
        let from = NaiveDate::from_ymd_opt(2024, 3, 1).expect("date");
        let to = NaiveDate::from_ymd_opt(2024, 3, 2).expect("date");
        let rows = vec![
            row(1, "09:00:00", 10, 4),
            row(2, "09:00", 11, 5),
            row(1, "09:10:00", 3, 3),
            // outside the window
            row(3, "09:00:00", 100, 100),
            row(2, "bogus", 1, 1),
        ];
        let buckets = average_by_slot(&rows, from, to);
        assert_eq!(buckets.len(), 2);
        assert_eq!(
            buckets["09:00:00"],
            UsageCounts {
                sensors_absent: 11,
                sensors_occupied: 5,
                sensors_total: 15,
            }
        );
        assert_eq!(buckets["09:10:00"].sensors_total, 6);
    }
}
