//! Wall-clock and duration conversions for the planning time domain.
//!
//! All solver math runs in integer minutes relative to a configured plan
//! start. This module owns the conversions in and out of that domain:
//! RFC-3339 parsing (naive timestamps are treated as UTC), minute offsets,
//! and the canonical `PT{h}H[{m}M]` duration rendering.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::PlanningError;

/// Parses an RFC-3339 timestamp, accepting a missing offset as UTC.
pub fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, PlanningError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Fall back to a naive timestamp with no offset, read as UTC.
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| PlanningError::validation(format!("invalid RFC-3339 timestamp {value:?}: {e}")))
}

/// Minutes from `plan_start` to `t`, floored.
///
/// Negative when `t` precedes the plan start; callers clamp to zero where
/// an out-of-range window should be tolerated.
pub fn minutes_from(plan_start: DateTime<Utc>, t: DateTime<Utc>) -> i64 {
    (t - plan_start).num_seconds().div_euclid(60)
}

/// Wall-clock instant `minutes` after `plan_start`.
pub fn minutes_to_datetime(plan_start: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    plan_start + chrono::Duration::minutes(minutes)
}

/// Formats a duration in hours as ISO-8601 `PT{h}H{m}M`, omitting the
/// minute part when it is zero.
pub fn format_iso_duration(hours: f64) -> String {
    let total_minutes = (hours * 60.0).round().max(0.0) as i64;
    let h = total_minutes / 60;
    let m = total_minutes % 60;
    if m == 0 {
        format!("PT{h}H")
    } else {
        format!("PT{h}H{m}M")
    }
}

/// Parses `PT{h}H[{m}M]` back into hours.
pub fn parse_iso_duration(value: &str) -> Result<f64, PlanningError> {
    let invalid =
        || PlanningError::validation(format!("invalid ISO-8601 duration {value:?}"));

    let rest = value.strip_prefix("PT").ok_or_else(invalid)?;
    let (hours_part, rest) = rest.split_once('H').ok_or_else(invalid)?;
    let hours: i64 = hours_part.parse().map_err(|_| invalid())?;

    let minutes: i64 = if rest.is_empty() {
        0
    } else {
        let minutes_part = rest.strip_suffix('M').ok_or_else(invalid)?;
        minutes_part.parse().map_err(|_| invalid())?
    };

    Ok(hours as f64 + minutes as f64 / 60.0)
}
