//! Wall-clock "HH:MM" parsing and half-open interval arithmetic.

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Midnight at the end of the day. Valid only as the end of an interval.
pub const END_OF_DAY: &str = "24:00";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("invalid time format: {0:?} (expected HH:MM)")]
    InvalidFormat(String),

    #[error("invalid weekday: {0}")]
    InvalidWeekday(String),
}

/// Minutes since midnight for an "HH:MM" string.
pub fn to_minutes(time: &str) -> Result<u32, TimeError> {
    let invalid = || TimeError::InvalidFormat(time.to_string());

    let (hour, minute) = time.trim().split_once(':').ok_or_else(invalid)?;
    if hour.is_empty()
        || hour.len() > 2
        || minute.len() != 2
        || !hour.bytes().all(|b| b.is_ascii_digit())
        || !minute.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok(hour * 60 + minute)
}

/// Like `to_minutes`, but also accepts "24:00" for an interval that runs
/// until midnight.
pub fn to_end_minutes(time: &str) -> Result<u32, TimeError> {
    if time.trim() == END_OF_DAY {
        Ok(MINUTES_PER_DAY)
    } else {
        to_minutes(time)
    }
}

/// Formats the end of an interval, keeping midnight as "24:00".
pub fn format_end(minutes: u32) -> String {
    if minutes == MINUTES_PER_DAY {
        END_OF_DAY.to_string()
    } else {
        from_minutes(minutes)
    }
}

/// Formats a minute offset as "HH:MM", wrapping past midnight.
pub fn from_minutes(minutes: u32) -> String {
    let minutes = minutes % MINUTES_PER_DAY;
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Canonical zero-padded form, e.g. "9:05" -> "09:05".
pub fn normalize(time: &str) -> Result<String, TimeError> {
    to_minutes(time).map(from_minutes)
}

/// `[a_start, a_end)` and `[b_start, b_end)` share at least one minute.
pub fn minutes_overlap(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> bool {
    a_start < b_end && a_end > b_start
}

pub fn intervals_overlap(
    start_a: &str,
    end_a: &str,
    start_b: &str,
    end_b: &str,
) -> Result<bool, TimeError> {
    Ok(minutes_overlap(
        to_minutes(start_a)?,
        to_minutes(end_a)?,
        to_minutes(start_b)?,
        to_minutes(end_b)?,
    ))
}

/// Wall-clock addition modulo 24h. The day component is not tracked, so
/// "23:30" + 60 is "00:30".
pub fn add_minutes(time: &str, delta: i64) -> Result<String, TimeError> {
    let total = i64::from(to_minutes(time)?) + delta;
    let wrapped = total.rem_euclid(i64::from(MINUTES_PER_DAY));
    Ok(from_minutes(wrapped as u32))
}
