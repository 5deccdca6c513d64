/// Minutes between consecutive candidate slot starts.
pub const SLOT_INTERVAL_MINUTES: u32 = 30;

/// Reservation length used when a restaurant has none configured.
pub const DEFAULT_RESERVATION_MINUTES: u32 = 90;

/// Party size assumed when a caller does not send one.
pub const DEFAULT_GUEST_COUNT: u32 = 2;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

pub const MAX_GUEST_COUNT: u32 = 500;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_CHAT_SESSION_LEN: usize = 128;

/// Upper bound on reservations held in one (table, date) bucket.
pub const MAX_RESERVATIONS_PER_BUCKET: usize = 1_000;
