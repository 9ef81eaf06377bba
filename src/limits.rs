//! Hard input limits. Every externally supplied value is bounded before it
//! touches the journal.

use crate::model::Ms;

pub const MAX_EMAIL_LEN: usize = 120;
pub const MAX_NAME_LEN: usize = 64;
pub const MAX_REASON_LEN: usize = 2_000;
pub const MAX_SPECIALIZATION_LEN: usize = 128;
pub const MAX_FREE_TEXT_LEN: usize = 10_000;

pub const MAX_TITLE_LEN: usize = 128;
pub const MAX_DESCRIPTION_LEN: usize = 4_000;
pub const MAX_AUDIENCE_LEN: usize = 64;
pub const MAX_MODULES_PER_COURSE: usize = 200;
pub const MAX_MODULE_CONTENT_LEN: usize = 100_000;

pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// 2000-01-01T00:00:00Z — anything earlier is a mangled timestamp.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
