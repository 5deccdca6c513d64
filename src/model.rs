use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::DEFAULT_RESERVATION_MINUTES;

/// Minutes since local midnight. The only time-of-day type.
pub type Minute = u32;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

pub fn parse_time(s: &str) -> Option<Minute> {
    NaiveTime::parse_from_str(s.trim(), TIME_FORMAT)
        .ok()
        .map(|t| t.hour() * 60 + t.minute())
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// `HH:MM`, zero padded. Values past 23:59 keep counting hours (`24:00`).
pub fn format_time(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Day of week with Sunday = 0, as stored in working-hour records.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Half-open same-day window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Minute,
    pub end: Minute,
}

impl TimeRange {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Catalog records (read-only to the engine) ─────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    /// 0 = Sunday … 6 = Saturday.
    pub day_of_week: u8,
    pub open: Minute,
    pub close: Minute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restaurant {
    pub id: Ulid,
    pub name: String,
    /// Booking length in minutes; 0 means "use the default".
    pub reservation_duration: u32,
    pub working_hours: Vec<WorkingHours>,
}

impl Restaurant {
    pub fn duration(&self) -> Minute {
        if self.reservation_duration == 0 {
            DEFAULT_RESERVATION_MINUTES
        } else {
            self.reservation_duration
        }
    }

    /// Opening window for the weekday of `date`, or None when closed.
    pub fn hours_on(&self, date: NaiveDate) -> Option<TimeRange> {
        let dow = day_of_week(date);
        self.working_hours
            .iter()
            .find(|wh| wh.day_of_week == dow)
            .map(|wh| TimeRange::new(wh.open, wh.close))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub name: String,
    pub capacity: u32,
}

// ── Reservations ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
            ReservationStatus::NoShow => "no_show",
        }
    }

    /// Whether a reservation in this status occupies its table window.
    pub fn blocks_table(&self) -> bool {
        !matches!(self, ReservationStatus::Cancelled)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" | "canceled" => Ok(ReservationStatus::Cancelled),
            "completed" => Ok(ReservationStatus::Completed),
            "no_show" | "no-show" | "noshow" => Ok(ReservationStatus::NoShow),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub table_id: Ulid,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub guest_count: u32,
    pub date: NaiveDate,
    pub start_time: Minute,
    pub end_time: Minute,
    pub status: ReservationStatus,
    pub notes: Option<String>,
    pub chat_session_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Reservation {
    pub fn window(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    pub fn bucket_key(&self) -> BucketKey {
        (self.table_id, self.date)
    }
}

/// Caller input for a new booking. Date and time stay strings until the
/// engine parses them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewReservation {
    pub restaurant_id: Ulid,
    /// None lets the engine pick a table.
    pub table_id: Option<Ulid>,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub guest_count: u32,
    pub date: String,
    pub start_time: String,
    pub notes: Option<String>,
    pub chat_session_id: Option<String>,
}

/// Partial update. `None`, empty strings and zero counts leave a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub guest_count: Option<u32>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub notes: Option<String>,
    pub status: Option<ReservationStatus>,
}

impl ReservationPatch {
    pub fn is_empty(&self) -> bool {
        *self == ReservationPatch::default()
    }
}

/// A bookable window on one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub start_time: Minute,
    pub end_time: Minute,
    pub table_id: Ulid,
    pub table_name: String,
    pub capacity: u32,
}

// ── Per-(table, date) state ───────────────────────────────────────

pub type BucketKey = (Ulid, NaiveDate);

/// All reservations of one table on one date, sorted by start time.
#[derive(Debug, Clone)]
pub struct TableDay {
    pub table_id: Ulid,
    pub date: NaiveDate,
    pub reservations: Vec<Reservation>,
}

impl TableDay {
    pub fn new(table_id: Ulid, date: NaiveDate) -> Self {
        Self {
            table_id,
            date,
            reservations: Vec::new(),
        }
    }

    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.start_time <= reservation.start_time);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Windows of every table-blocking reservation, optionally skipping one.
    pub fn booked_ranges(&self, exclude: Option<Ulid>) -> Vec<TimeRange> {
        self.reservations
            .iter()
            .filter(|r| r.status.blocks_table() && Some(r.id) != exclude)
            .map(Reservation::window)
            .collect()
    }
}

/// The event types. This is the WAL record format and the change-feed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationUpdated {
        reservation: Reservation,
    },
    StatusChanged {
        id: Ulid,
        restaurant_id: Ulid,
        status: ReservationStatus,
        at: NaiveDateTime,
    },
    ReservationDeleted {
        id: Ulid,
        restaurant_id: Ulid,
    },
}

impl Event {
    pub fn restaurant_id(&self) -> Ulid {
        match self {
            Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation } => {
                reservation.restaurant_id
            }
            Event::StatusChanged { restaurant_id, .. }
            | Event::ReservationDeleted { restaurant_id, .. } => *restaurant_id,
        }
    }
}
