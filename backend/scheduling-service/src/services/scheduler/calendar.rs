use crate::models::TimeBucket;
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::HashSet;

pub const HOURS_PER_DAY: u32 = 24;
pub const CALENDAR_DAYS: u32 = 7;

/// Concrete posting time for a weekly bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSlot {
    pub time_bucket: TimeBucket,
    pub time_slot: DateTime<Utc>,
}

/// First full hour at or after `now`
pub fn next_full_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    match now.duration_trunc(Duration::hours(1)) {
        Ok(floor) if floor == now => floor,
        Ok(floor) => floor + Duration::hours(1),
        Err(_) => now,
    }
}

/// Each distinct bucket reachable in `[from, from + hours)`, at its first occurrence.
///
/// `from` is expected to be aligned to a full hour. At most one week of
/// buckets exists, so longer spans stop early.
pub fn candidate_slots(from: DateTime<Utc>, hours: u32) -> Vec<CandidateSlot> {
    let mut seen = HashSet::new();
    let mut slots = Vec::new();

    for offset in 0..hours {
        let time_slot = from + Duration::hours(i64::from(offset));
        let time_bucket = TimeBucket::from_datetime(&time_slot);
        if seen.insert(time_bucket) {
            slots.push(CandidateSlot {
                time_bucket,
                time_slot,
            });
        }
        if slots.len() == TimeBucket::COUNT {
            break;
        }
    }
    slots
}

/// Rolling day windows of the weekly calendar, starting at the next full hour
pub fn day_windows(now: DateTime<Utc>) -> Vec<(u32, Vec<CandidateSlot>)> {
    let start = next_full_hour(now);
    (0..CALENDAR_DAYS)
        .map(|day| {
            let from = start + Duration::hours(i64::from(day * HOURS_PER_DAY));
            (day, candidate_slots(from, HOURS_PER_DAY))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_full_hour() {
        let aligned = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        assert_eq!(next_full_hour(aligned), aligned);

        let mid = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 1).unwrap();
        assert_eq!(
            next_full_hour(mid),
            Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_candidate_slots_cover_horizon() {
        let from = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        let slots = candidate_slots(from, 5);
        assert_eq!(slots.len(), 5);
        assert_eq!(slots[0].time_slot, from);
        // 2024-03-04 is a Monday
        assert_eq!(slots[0].time_bucket, TimeBucket::new(1, 8).unwrap());
    }

    #[test]
    fn test_long_horizon_yields_each_bucket_once() {
        let from = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        let slots = candidate_slots(from, 672);
        assert_eq!(slots.len(), TimeBucket::COUNT);

        let buckets: HashSet<_> = slots.iter().map(|slot| slot.time_bucket).collect();
        assert_eq!(buckets.len(), TimeBucket::COUNT);
        assert!(slots.iter().all(|slot| slot.time_slot < from + Duration::hours(168)));
    }

    #[test]
    fn test_day_windows_are_disjoint() {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap();
        let windows = day_windows(now);
        assert_eq!(windows.len(), 7);

        let all: HashSet<_> = windows
            .iter()
            .flat_map(|(_, slots)| slots.iter().map(|slot| slot.time_slot))
            .collect();
        assert_eq!(all.len(), 7 * 24);
    }
}
