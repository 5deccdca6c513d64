use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// True when `[start, end)` shares any instant with one of `existing`.
/// Windows that only touch at an endpoint do not conflict.
pub fn has_conflict(existing: &[TimeRange], start: Minute, end: Minute) -> bool {
    existing.iter().any(|e| start < e.end && end > e.start)
}

/// Check a candidate window against a bucket, skipping `exclude` (the
/// reservation being moved). Caller holds the bucket's write lock.
pub(crate) fn check_no_conflict(
    day: &TableDay,
    window: TimeRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    if has_conflict(&day.booked_ranges(exclude), window.start, window.end) {
        tracing::debug!(
            "rejected {}-{} on table {} {}: overlaps existing booking",
            format_time(window.start),
            format_time(window.end),
            day.table_id,
            day.date
        );
        metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::slot_taken());
    }
    Ok(())
}

/// Refuse to grow a bucket past its limit.
pub(crate) fn ensure_room(day: &TableDay) -> Result<(), EngineError> {
    if day.reservations.len() >= MAX_RESERVATIONS_PER_BUCKET {
        return Err(EngineError::InvalidInput(
            "too many reservations on this table and date".into(),
        ));
    }
    Ok(())
}

/// `[start, start + duration)`, refusing windows that run past midnight.
pub(crate) fn derive_window(start: Minute, duration: Minute) -> Result<TimeRange, EngineError> {
    let end = start + duration;
    if end > MINUTES_PER_DAY {
        return Err(EngineError::InvalidInput(format!(
            "a {duration}-minute reservation starting at {} would end after midnight",
            format_time(start)
        )));
    }
    Ok(TimeRange::new(start, end))
}

pub(crate) fn parse_date_input(s: &str) -> Result<chrono::NaiveDate, EngineError> {
    parse_date(s).ok_or_else(|| EngineError::InvalidInput(format!("bad date {s:?}, expected YYYY-MM-DD")))
}

pub(crate) fn parse_time_input(s: &str) -> Result<Minute, EngineError> {
    parse_time(s).ok_or_else(|| EngineError::InvalidInput(format!("bad time {s:?}, expected HH:MM")))
}

/// Availability only needs a real party; an oversized one just finds no table.
pub(crate) fn validate_party_size(n: u32) -> Result<(), EngineError> {
    if n == 0 {
        return Err(EngineError::InvalidInput("guest count must be at least 1".into()));
    }
    Ok(())
}

/// Party size for a booking: at least one, at most the largest table the
/// catalog accepts.
pub(crate) fn validate_guest_count(n: u32) -> Result<(), EngineError> {
    validate_party_size(n)?;
    if n > MAX_GUEST_COUNT {
        return Err(EngineError::InvalidInput(format!("guest count above {MAX_GUEST_COUNT}")));
    }
    Ok(())
}

/// Non-empty after trimming and within `max` bytes.
pub(crate) fn validate_required(field: &'static str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{field} is required")));
    }
    validate_len(field, value, max)
}

pub(crate) fn validate_len(field: &'static str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::InvalidInput(format!("{field} too long")));
    }
    Ok(())
}
