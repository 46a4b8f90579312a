//! Lightweight cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Field forms: *, */N, N, N-M, comma lists.
//!
//! No cron crate dependency; recurring schedules are validated up front
//! and next-run times computed by scanning forward minute by minute.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, Utc};
use sendhive_core::error::{Result, SendHiveError};

/// Validate a 5-field cron expression without computing anything.
pub fn validate(expression: &str) -> Result<()> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(SendHiveError::InvalidSchedule(format!(
            "'{expression}' (need 5 fields: MIN HOUR DOM MON DOW)"
        )));
    }
    let bounds = [(0u32, 59u32), (0, 23), (1, 31), (1, 12), (0, 6)];
    for (field, (min, max)) in parts.iter().zip(bounds) {
        if parse_field(field, min, max).is_none() {
            return Err(SendHiveError::InvalidSchedule(format!(
                "bad field '{field}' in '{expression}'"
            )));
        }
    }
    Ok(())
}

/// Parse a timezone descriptor into a fixed offset. Accepts "UTC", the
/// empty string, or "+HH:MM"/"-HH:MM".
pub fn parse_offset(timezone: &str) -> Result<FixedOffset> {
    let tz = timezone.trim();
    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") {
        return Ok(FixedOffset::east_opt(0).expect("zero offset"));
    }
    tz.parse::<FixedOffset>()
        .map_err(|_| SendHiveError::InvalidSchedule(format!("bad timezone '{timezone}'")))
}

/// Compute the next run strictly after `after`, evaluated in UTC.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    next_run_with_offset(expression, FixedOffset::east_opt(0)?, after)
}

/// Compute the next run strictly after `after`, with the cron fields
/// evaluated in the given fixed offset.
pub fn next_run_with_offset(
    expression: &str,
    offset: FixedOffset,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        tracing::warn!(
            "Invalid cron expression: '{}' (need 5 fields: MIN HOUR DOM MON DOW)",
            expression
        );
        return None;
    }

    let minutes = parse_field(parts[0], 0, 59)?;
    let hours = parse_field(parts[1], 0, 23)?;
    let doms = parse_field(parts[2], 1, 31)?;
    let months = parse_field(parts[3], 1, 12)?;
    let dows = parse_field(parts[4], 0, 6)?;

    let dom_restricted = parts[2] != "*";
    let dow_restricted = parts[4] != "*";

    let mut candidate = after.with_timezone(&offset) + Duration::minutes(1);
    candidate = candidate.with_second(0).unwrap_or(candidate);
    candidate = candidate.with_nanosecond(0).unwrap_or(candidate);

    // Scan up to 366 days ahead; anything sparser is a config mistake.
    for _ in 0..(366 * 24 * 60) {
        let m = candidate.minute();
        let h = candidate.hour();
        let dom = candidate.day();
        let month = candidate.month();
        let dow = candidate.weekday().num_days_from_sunday();

        // Standard cron rule: when both DOM and DOW are restricted, a
        // match on either is enough.
        let day_matches = match (dom_restricted, dow_restricted) {
            (true, true) => doms.contains(&dom) || dows.contains(&dow),
            _ => doms.contains(&dom) && dows.contains(&dow),
        };

        if minutes.contains(&m) && hours.contains(&h) && day_matches && months.contains(&month) {
            return Some(candidate.with_timezone(&Utc));
        }
        candidate += Duration::minutes(1);
    }

    None
}

/// Parse a cron field into the list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N — every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    // Comma-separated: "0,15,30,45" (each part may be a range)
    if field.contains(',') {
        let mut values = Vec::new();
        for part in field.split(',') {
            values.extend(parse_field(part.trim(), min, max)?);
        }
        return Some(values);
    }

    // Range: "9-17"
    if let Some((lo, hi)) = field.split_once('-') {
        let lo: u32 = lo.parse().ok()?;
        let hi: u32 = hi.parse().ok()?;
        if lo > hi || lo < min || hi > max {
            return None;
        }
        return Some((lo..=hi).collect());
    }

    // Single number
    let n: u32 = field.parse().ok()?;
    if n >= min && n <= max { Some(vec![n]) } else { None }
}
