// Hard limits on client-supplied input. Exceeding one is a `LimitExceeded` error.

/// Longest stay a single query or hold may cover.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Rooms a single hold may span.
pub const MAX_ALLOCATIONS_PER_HOLD: usize = 32;

pub const MAX_HOLD_TTL_SECS: u64 = 24 * 60 * 60;

pub const MAX_GUEST_REF_LEN: usize = 256;

pub const MAX_PAYLOAD_EXTRA_KEYS: usize = 64;

/// Holds tracked at once, active and recently resolved.
pub const MAX_ACTIVE_HOLDS: usize = 100_000;

pub const MAX_ROOMS: usize = 1024;

/// Longest request line accepted by the wire front end.
pub const MAX_LINE_LEN: usize = 64 * 1024;
