use ulid::Ulid;

use crate::catalog::CatalogError;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed date/time, missing field, or a value outside the limits.
    InvalidInput(String),
    /// Restaurant, table or reservation absent. Also used when a phone
    /// number does not match, so callers cannot fish for bookings.
    NotFound(String),
    /// The requested window overlaps a table-blocking reservation.
    Conflict(String),
    AlreadyCancelled(Ulid),
    /// WAL or catalog failure.
    Storage(String),
}

impl EngineError {
    pub(crate) fn reservation_not_found(id: Ulid) -> Self {
        EngineError::NotFound(format!("reservation {id}"))
    }

    pub(crate) fn slot_taken() -> Self {
        EngineError::Conflict("this time slot is already booked".into())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::Conflict(msg) => write!(f, "conflict: {msg}"),
            EngineError::AlreadyCancelled(id) => {
                write!(f, "reservation {id} is already cancelled")
            }
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<CatalogError> for EngineError {
    fn from(e: CatalogError) -> Self {
        EngineError::Storage(e.0)
    }
}
