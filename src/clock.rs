use chrono::{Local, NaiveDateTime};

/// Source of "now" for the engine, expressed as restaurant-local wall time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Reads the host's local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always returns the same instant. Used by tests to pin "today".
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub at: NaiveDateTime,
}

impl FixedClock {
    pub const fn new(at: NaiveDateTime) -> Self {
        Self { at }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.at
    }
}
