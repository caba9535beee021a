//! Hard limits. Requests exceeding these fail with `LimitExceeded` before
//! any state is touched.

use crate::model::Ms;

pub const DAY_MS: Ms = 86_400_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

pub const MAX_MARKETS: usize = 1_000;
pub const MAX_DATES_PER_MARKET: usize = 1_000;
pub const MAX_SLOTS_PER_DATE: usize = 48;
pub const MAX_MUSICIANS: usize = 100_000;
pub const MAX_MEDIA_PER_MUSICIAN: usize = 32;

/// Distinct time slots a single booking request may touch.
pub const MAX_SLOTS_PER_REQUEST: usize = 64;
pub const MAX_WAITLIST_PER_SLOT: usize = 500;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_TEXT_LEN: usize = 4_096;
pub const MAX_REASON_LEN: usize = 1_024;
pub const MAX_FILENAME_LEN: usize = 255;

/// Outbox entries kept in memory by the notification dispatcher.
pub const MAX_OUTBOX_ENTRIES: usize = 1_000;
