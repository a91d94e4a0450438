//! Time parsing and calendar helpers
//!
//! All stored times are Unix seconds in UTC. Operators may type times in a
//! configured local offset; conversion happens here, once, at the edge.

use crate::{ReelcastError, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use rand::Rng;
use std::time::Instant;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Parse a schedule string into a Unix timestamp.
///
/// Accepted, in order:
/// - `now`
/// - RFC 3339: `2025-06-01T09:30:00+05:30`
/// - Naive date-times, read in `offset`: `2025-06-01 09:30`
/// - Durations from `now`: `90m`, `2h 30m`
/// - Natural language, relative to `now` in `offset`: `tomorrow 3pm`
pub fn parse_schedule(input: &str, now: i64, offset: FixedOffset) -> Result<i64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ReelcastError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if input.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp());
    }

    if let Some(ts) = parse_naive(input, offset) {
        return Ok(ts);
    }

    if let Ok(duration) = parse_duration(input) {
        return Ok(now + duration.num_seconds());
    }

    if let Ok(dt) = parse_natural_language(input, now, offset) {
        return Ok(dt.timestamp());
    }

    Err(ReelcastError::InvalidInput(format!(
        "Could not parse schedule string: {}",
        input
    )))
}

fn parse_naive(input: &str, offset: FixedOffset) -> Option<i64> {
    NAIVE_FORMATS.iter().find_map(|fmt| {
        let naive = NaiveDateTime::parse_from_str(input, fmt).ok()?;
        offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.timestamp())
    })
}

fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input)
        .map_err(|e| ReelcastError::InvalidInput(format!("Could not parse duration: {}", e)))?;

    Duration::from_std(std_duration)
        .map_err(|_| ReelcastError::InvalidInput("Duration out of range".to_string()))
}

fn parse_natural_language(input: &str, now: i64, offset: FixedOffset) -> Result<DateTime<FixedOffset>> {
    let base = offset.timestamp_opt(now, 0).single().ok_or_else(|| {
        ReelcastError::InvalidInput(format!("Timestamp out of range: {}", now))
    })?;

    chrono_english::parse_date_string(input, base, chrono_english::Dialect::Us)
        .map_err(|e| ReelcastError::InvalidInput(format!("Could not parse time: {}", e)))
}

/// Calendar date of `now` in UTC, as `YYYY-MM-DD`.
pub fn utc_date(now: i64) -> String {
    DateTime::from_timestamp(now, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// Unix timestamp of 00:00 UTC on the day containing `now`.
pub fn start_of_utc_day(now: i64) -> i64 {
    now - now.rem_euclid(86_400)
}

/// Unix timestamp of the next 00:00 UTC strictly after `now`.
pub fn next_utc_midnight(now: i64) -> i64 {
    start_of_utc_day(now) + 86_400
}

/// `now + backoff` plus a uniform random jitter in `0..=jitter` seconds.
pub fn retry_time(now: i64, backoff_secs: i64, jitter_secs: i64) -> i64 {
    let jitter = if jitter_secs > 0 {
        rand::thread_rng().gen_range(0..=jitter_secs)
    } else {
        0
    };
    now + backoff_secs + jitter
}

/// Render a stored timestamp for people, in `offset`.
pub fn format_timestamp(ts: i64, offset: FixedOffset) -> String {
    match offset.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M %:z").to_string(),
        None => ts.to_string(),
    }
}

pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Wall-clock seconds for one pass over many posts.
///
/// Starts at the pass's `now` and advances with monotonic elapsed time, so a
/// post handled late in a long pass is stamped with its own time rather than
/// the time the pass began.
#[derive(Debug, Clone, Copy)]
pub struct PassClock {
    start: i64,
    started: Instant,
}

impl PassClock {
    pub fn starting_at(start: i64) -> Self {
        Self {
            start,
            started: Instant::now(),
        }
    }

    pub fn now(&self) -> i64 {
        self.start + self.started.elapsed().as_secs() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-06-01T12:00:00Z
    const NOW: i64 = 1_748_779_200;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap()
    }

    #[test]
    fn test_parse_now() {
        assert_eq!(parse_schedule("now", NOW, utc()).unwrap(), NOW);
        assert_eq!(parse_schedule("  NOW ", NOW, utc()).unwrap(), NOW);
    }

    #[test]
    fn test_parse_rfc3339_ignores_configured_offset() {
        let ts = parse_schedule("2025-06-01T12:00:00Z", NOW, ist()).unwrap();
        assert_eq!(ts, NOW);
        let ts = parse_schedule("2025-06-01T17:30:00+05:30", NOW, utc()).unwrap();
        assert_eq!(ts, NOW);
    }

    #[test]
    fn test_parse_naive_uses_offset() {
        // 17:30 IST is 12:00 UTC
        assert_eq!(parse_schedule("2025-06-01 17:30", NOW, ist()).unwrap(), NOW);
        assert_eq!(parse_schedule("2025-06-01 12:00:00", NOW, utc()).unwrap(), NOW);
        assert_eq!(parse_schedule("2025-06-01T12:00", NOW, utc()).unwrap(), NOW);
    }

    #[test]
    fn test_parse_durations() {
        assert_eq!(parse_schedule("30m", NOW, utc()).unwrap(), NOW + 1800);
        assert_eq!(parse_schedule("2h 30m", NOW, utc()).unwrap(), NOW + 9000);
        assert_eq!(parse_schedule("1d", NOW, utc()).unwrap(), NOW + 86_400);
    }

    #[test]
    fn test_parse_natural_language() {
        let ts = parse_schedule("tomorrow", NOW, utc()).unwrap();
        assert!(ts > NOW);
        assert!(ts <= NOW + 2 * 86_400);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_schedule("", NOW, utc()).is_err());
        assert!(parse_schedule("whenever you like", NOW, utc()).is_err());
        assert!(matches!(
            parse_schedule("", NOW, utc()),
            Err(ReelcastError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_day_boundaries() {
        assert_eq!(utc_date(NOW), "2025-06-01");
        assert_eq!(start_of_utc_day(NOW), NOW - 12 * 3600);
        assert_eq!(next_utc_midnight(NOW), NOW + 12 * 3600);
        // Exactly at midnight the next midnight is a full day away
        let midnight = start_of_utc_day(NOW);
        assert_eq!(next_utc_midnight(midnight), midnight + 86_400);
        assert_eq!(utc_date(midnight - 1), "2025-05-31");
    }

    #[test]
    fn test_retry_time_bounds() {
        for _ in 0..50 {
            let at = retry_time(NOW, 60, 30);
            assert!((NOW + 60..=NOW + 90).contains(&at));
        }
        assert_eq!(retry_time(NOW, 60, 0), NOW + 60);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(NOW, utc()), "2025-06-01 12:00 +00:00");
        assert_eq!(format_timestamp(NOW, ist()), "2025-06-01 17:30 +05:30");
    }

    #[test]
    fn test_pass_clock_starts_at_pass_time() {
        let clock = PassClock::starting_at(NOW);
        let now = clock.now();
        assert!((NOW..=NOW + 1).contains(&now));
    }
}
