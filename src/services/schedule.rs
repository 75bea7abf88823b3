use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Timelike};

/// Polls land this many seconds after the full hour.
pub const POLL_OFFSET_SECS: i64 = 5;

/// Interval used until the first successful poll aligns the timer.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(3600);

/// Top of the next wall-clock hour plus [`POLL_OFFSET_SECS`].
///
/// When the target falls into a DST gap the poll happens one hour from `now`
/// instead.
pub fn next_poll_at<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let local = now.naive_local();
    let target = local
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .map(|t| t + TimeDelta::hours(1) + TimeDelta::seconds(POLL_OFFSET_SECS));

    target
        .and_then(|t| now.timezone().from_local_datetime(&t).earliest())
        .unwrap_or_else(|| now.clone() + TimeDelta::hours(1))
}

/// Timer interval from `now` until [`next_poll_at`].
pub fn delay_until_next_poll<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    next_poll_at(now)
        .signed_duration_since(now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
