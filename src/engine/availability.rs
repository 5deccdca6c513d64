use chrono::NaiveTime;

use crate::limits::SLOT_INTERVAL_MINUTES;
use crate::model::*;

use super::conflict::has_conflict;

// ── Slot generation ───────────────────────────────────────────────

/// Candidate windows for a single table on one day.
///
/// Starts at `hours.start` and steps by [`SLOT_INTERVAL_MINUTES`] while the
/// whole window still fits before `hours.end`. A window is kept when it does
/// not overlap `booked` and, if `after` is given, its start is strictly later
/// than that time of day. Pure: tables can be computed independently.
pub fn table_slots(
    hours: TimeRange,
    booked: &[TimeRange],
    duration: Minute,
    after: Option<NaiveTime>,
) -> Vec<TimeRange> {
    let mut slots = Vec::new();
    if duration == 0 {
        return slots;
    }
    let mut start = hours.start;
    while start + duration <= hours.end {
        let end = start + duration;
        if !has_conflict(booked, start, end) && starts_after(start, after) {
            slots.push(TimeRange::new(start, end));
        }
        start += SLOT_INTERVAL_MINUTES;
    }
    slots
}

fn starts_after(start: Minute, after: Option<NaiveTime>) -> bool {
    let Some(after) = after else { return true };
    match NaiveTime::from_hms_opt(start / 60, start % 60, 0) {
        Some(t) => t > after,
        None => false,
    }
}

/// Stable sort of merged per-table slots by start time.
pub fn order_slots(slots: &mut [Slot]) {
    slots.sort_by_key(|s| s.start_time);
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Minute = 60;

    fn hm(h: u32, m: u32) -> Minute {
        h * H + m
    }

    fn starts(slots: &[TimeRange]) -> Vec<String> {
        slots.iter().map(|s| format_time(s.start)).collect()
    }

    #[test]
    fn open_table_gets_every_step() {
        let hours = TimeRange::new(hm(12, 0), hm(15, 0));
        let slots = table_slots(hours, &[], 90, None);
        assert_eq!(
            slots,
            vec![
                TimeRange::new(hm(12, 0), hm(13, 30)),
                TimeRange::new(hm(12, 30), hm(14, 0)),
                TimeRange::new(hm(13, 0), hm(14, 30)),
                TimeRange::new(hm(13, 30), hm(15, 0)),
            ]
        );
    }

    #[test]
    fn booking_in_the_middle_empties_short_day() {
        let hours = TimeRange::new(hm(12, 0), hm(15, 0));
        let booked = [TimeRange::new(hm(13, 0), hm(14, 30))];
        assert!(table_slots(hours, &booked, 90, None).is_empty());
    }

    #[test]
    fn back_to_back_slots_survive() {
        let hours = TimeRange::new(hm(12, 0), hm(18, 0));
        let booked = [TimeRange::new(hm(13, 30), hm(15, 0))];
        let slots = table_slots(hours, &booked, 90, None);
        assert_eq!(starts(&slots), vec!["12:00", "15:00", "15:30", "16:00", "16:30"]);
    }

    #[test]
    fn window_longer_than_opening_yields_nothing() {
        let hours = TimeRange::new(hm(12, 0), hm(13, 0));
        assert!(table_slots(hours, &[], 90, None).is_empty());
    }

    #[test]
    fn exact_fit_is_one_slot() {
        let hours = TimeRange::new(hm(12, 0), hm(13, 30));
        assert_eq!(table_slots(hours, &[], 90, None).len(), 1);
    }

    #[test]
    fn past_starts_are_dropped_strictly() {
        let hours = TimeRange::new(hm(12, 0), hm(15, 0));
        let now = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
        // 12:30 itself is not strictly after 12:30:00
        assert_eq!(starts(&table_slots(hours, &[], 90, Some(now))), vec!["13:00", "13:30"]);

        let now = NaiveTime::from_hms_opt(12, 29, 59).unwrap();
        assert_eq!(
            starts(&table_slots(hours, &[], 90, Some(now))),
            vec!["12:30", "13:00", "13:30"]
        );
    }

    #[test]
    fn slots_never_overlap_bookings() {
        let hours = TimeRange::new(hm(10, 0), hm(23, 0));
        let booked = [
            TimeRange::new(hm(11, 15), hm(12, 45)),
            TimeRange::new(hm(16, 0), hm(17, 0)),
            TimeRange::new(hm(19, 40), hm(21, 10)),
        ];
        for duration in [45, 60, 90, 120] {
            let slots = table_slots(hours, &booked, duration, None);
            assert!(!slots.is_empty());
            for s in &slots {
                assert!(booked.iter().all(|b| !s.overlaps(b)), "{s:?} overlaps");
                assert!(s.end <= hours.end);
                assert_eq!(s.duration(), duration);
            }
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let hours = TimeRange::new(hm(17, 0), hm(22, 0));
        let booked = [TimeRange::new(hm(19, 0), hm(20, 30))];
        assert_eq!(
            table_slots(hours, &booked, 90, None),
            table_slots(hours, &booked, 90, None)
        );
    }

    #[test]
    fn ordering_is_stable_across_tables() {
        let a = ulid::Ulid::new();
        let b = ulid::Ulid::new();
        let slot = |table_id, start| Slot {
            start_time: start,
            end_time: start + 90,
            table_id,
            table_name: String::new(),
            capacity: 4,
        };
        let mut slots = vec![slot(a, hm(13, 0)), slot(a, hm(12, 0)), slot(b, hm(12, 0)), slot(b, hm(12, 30))];
        order_slots(&mut slots);
        let order: Vec<_> = slots.iter().map(|s| (s.table_id, s.start_time)).collect();
        assert_eq!(
            order,
            vec![(a, hm(12, 0)), (b, hm(12, 0)), (b, hm(12, 30)), (a, hm(13, 0))]
        );
    }
}
