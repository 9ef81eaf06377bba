use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::error::{EngineError, RuleViolation};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as Ms
}

/// Parse an ISO-8601 start time. An explicit offset is honored and
/// normalized to UTC; a bare datetime is taken as UTC.
pub(crate) fn parse_start_time(s: &str) -> Result<Ms, EngineError> {
    let s = s.trim();
    let utc: DateTime<Utc> = if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        dt.with_timezone(&Utc)
    } else {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
            .map_err(|_| EngineError::Rule(RuleViolation::InvalidDatetimeFormat))?
            .and_utc()
    };
    let ms = utc.timestamp_millis();
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&ms) {
        return Err(EngineError::LimitExceeded("start time out of range"));
    }
    Ok(ms)
}

/// RFC3339 with explicit UTC offset, e.g. `2026-09-01T10:00:00Z`.
pub(crate) fn fmt_iso(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Reject `span` if it overlaps any confirmed appointment on the schedule.
/// Pending appointments never block — multiple requests may race for a slot
/// and the first confirmation wins. `exclude` skips the appointment being
/// re-checked on its own confirmation.
pub(crate) fn check_no_conflict(
    sched: &Schedule,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for appointment in sched.overlapping(span) {
        if appointment.status == AppointmentStatus::Confirmed && Some(appointment.id) != exclude {
            return Err(RuleViolation::AppointmentTimeConflict.into());
        }
    }
    Ok(())
}
