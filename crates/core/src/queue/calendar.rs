//! Local calendar arithmetic for the operating day.
//!
//! The queue runs on a fixed UTC offset; all "day" comparisons happen on the
//! local date in that offset.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

/// Longest accepted offset, `+07:00`.
const MAX_OFFSET_LEN: usize = 6;

/// Parse a UTC offset such as `+07:00`, `-0530`, `Z` or `UTC`.
pub fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    // chrono stops after the minutes and ignores anything that follows
    if value.len() > MAX_OFFSET_LEN {
        return None;
    }
    value.parse().ok()
}

/// Calendar date of `at` in the local offset.
pub fn local_date(at: DateTime<Utc>, tz: &FixedOffset) -> NaiveDate {
    at.with_timezone(tz).date_naive()
}

/// Whether `now` falls on a later local date than `last_reset`.
pub fn is_new_day(last_reset: DateTime<Utc>, now: DateTime<Utc>, tz: &FixedOffset) -> bool {
    local_date(last_reset, tz) < local_date(now, tz)
}

/// The local midnight that began the day containing `now`.
pub fn start_of_local_day(now: DateTime<Utc>, tz: &FixedOffset) -> DateTime<Utc> {
    let since_midnight = now
        .with_timezone(tz)
        .time()
        .signed_duration_since(NaiveTime::MIN);
    now - since_midnight
}

/// The first local midnight strictly after `now`.
pub fn next_midnight_after(now: DateTime<Utc>, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    let tomorrow = local_date(now, tz).succ_opt()?;
    let midnight = tomorrow.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&midnight)
        .single()
        .map(|at| at.with_timezone(&Utc))
}
