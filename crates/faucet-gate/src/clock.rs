//! Time source and day-window arithmetic.
//!
//! Quotas reset at local midnight in a configured fixed UTC offset. The current
//! instant is read through [`Clock`] so tests can pin it.

use crate::error::{GateError, GateResult};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Half-open `[start, end)` interval covering one local calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    /// The day window, in `offset` local time, that contains `instant`
    pub fn containing(instant: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local_midnight = instant
            .with_timezone(&offset)
            .date_naive()
            .and_time(NaiveTime::MIN);
        let start_naive = local_midnight - Duration::seconds(offset.local_minus_utc() as i64);
        let start = Utc.from_utc_datetime(&start_naive);

        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Parse a UTC offset such as `UTC`, `Z`, `+08:00`, `-0530`
pub fn parse_utc_offset(raw: &str) -> GateResult<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("utc") || raw.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(|| invalid_offset(raw));
    }

    let (sign, rest) = match raw.chars().next() {
        Some('+') => (1, &raw[1..]),
        Some('-') => (-1, &raw[1..]),
        _ => return Err(invalid_offset(raw)),
    };

    if !rest.is_ascii() {
        return Err(invalid_offset(raw));
    }

    // Only HH:MM or HHMM
    let (hh, mm) = match rest.len() {
        5 if rest.as_bytes()[2] == b':' => (&rest[..2], &rest[3..]),
        4 => (&rest[..2], &rest[2..]),
        _ => return Err(invalid_offset(raw)),
    };
    if !hh.bytes().chain(mm.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid_offset(raw));
    }

    let hours: i32 = hh.parse().map_err(|_| invalid_offset(raw))?;
    let minutes: i32 = mm.parse().map_err(|_| invalid_offset(raw))?;
    if hours > 23 || minutes > 59 {
        return Err(invalid_offset(raw));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(|| invalid_offset(raw))
}

fn invalid_offset(raw: &str) -> GateError {
    GateError::InvalidArgument(format!(
        "invalid UTC offset '{}', expected UTC or +HH:MM",
        raw
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_utc_window() {
        let offset = parse_utc_offset("UTC").unwrap();
        let window = DayWindow::containing(utc("2024-03-10T15:30:00Z"), offset);

        assert_eq!(window.start, utc("2024-03-10T00:00:00Z"));
        assert_eq!(window.end, utc("2024-03-11T00:00:00Z"));
    }

    #[test]
    fn test_positive_offset_window() {
        // 20:00 UTC on the 10th is already 04:00 on the 11th at +08:00
        let offset = parse_utc_offset("+08:00").unwrap();
        let window = DayWindow::containing(utc("2024-03-10T20:00:00Z"), offset);

        assert_eq!(window.start, utc("2024-03-10T16:00:00Z"));
        assert_eq!(window.end, utc("2024-03-11T16:00:00Z"));
    }

    #[test]
    fn test_negative_offset_window() {
        let offset = parse_utc_offset("-0500").unwrap();
        let window = DayWindow::containing(utc("2024-03-10T03:00:00Z"), offset);

        assert_eq!(window.start, utc("2024-03-09T05:00:00Z"));
        assert_eq!(window.end, utc("2024-03-10T05:00:00Z"));
    }

    #[test]
    fn test_window_is_half_open() {
        let offset = parse_utc_offset("Z").unwrap();
        let window = DayWindow::containing(utc("2024-03-10T12:00:00Z"), offset);

        assert!(window.contains(utc("2024-03-10T00:00:00Z")));
        assert!(window.contains(utc("2024-03-10T23:59:59Z")));
        assert!(!window.contains(utc("2024-03-11T00:00:00Z")));
        assert!(!window.contains(utc("2024-03-09T23:59:59Z")));
    }

    #[test]
    fn test_invalid_offsets() {
        for raw in [
            "", "8", "+8", "+25:00", "+08:61", "local", "+08:00:00", "+0:800", "+08::00", "+:0800",
            "+08-00", "+0８:00", "+0é0",
        ] {
            assert!(parse_utc_offset(raw).is_err(), "{} should be rejected", raw);
        }
    }

    #[test]
    fn test_offset_forms() {
        assert_eq!(parse_utc_offset("+08:00").unwrap().local_minus_utc(), 8 * 3600);
        assert_eq!(parse_utc_offset("+0800").unwrap().local_minus_utc(), 8 * 3600);
        assert_eq!(parse_utc_offset(" -05:30 ").unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(parse_utc_offset("utc").unwrap().local_minus_utc(), 0);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(utc("2024-03-10T12:00:00Z"));
        clock.advance(Duration::hours(13));
        assert_eq!(clock.now(), utc("2024-03-11T01:00:00Z"));

        clock.set(utc("2024-01-01T00:00:00Z"));
        assert_eq!(clock.now(), utc("2024-01-01T00:00:00Z"));
    }
}
