//! Time utilities for standbyd
//!
//! Provides monotonic time (for exemption expiry and state timers) and
//! wall-clock time (for the day/night standby condition).
//!
//! # Mock Time for Development
//!
//! In debug builds, the `STANDBY_MOCK_TIME` environment variable overrides the
//! wall clock used for day/night decisions. Mock time advances at the same
//! rate as real time.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 23:30:00`)

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "STANDBY_MOCK_TIME";

const SECONDS_PER_DAY: u32 = 86_400;

/// Offset between mock time and real time, computed once at first use.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // wraps Local::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let mock_time_str = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            let Ok(naive_dt) = NaiveDateTime::parse_from_str(&mock_time_str, "%Y-%m-%d %H:%M:%S")
            else {
                tracing::warn!(
                    mock_time = %mock_time_str,
                    expected_format = "%Y-%m-%d %H:%M:%S",
                    "Invalid mock time format"
                );
                return None;
            };
            let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() else {
                tracing::warn!(mock_time = %mock_time_str, "Failed to convert mock time to local timezone");
                return None;
            };
            let offset = mock_dt.signed_duration_since(chrono::Local::now());
            tracing::info!(
                mock_time = %mock_time_str,
                offset_secs = offset.num_seconds(),
                "Mock time enabled"
            );
            Some(offset)
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Current local time, respecting `STANDBY_MOCK_TIME` in debug builds.
#[allow(clippy::disallowed_methods)] // the one place that reads the real clock
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();
    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// A point in monotonic time, immune to wall-clock changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicInstant(Instant);

impl MonotonicInstant {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    /// Milliseconds elapsed since `origin`, as used for expiry bookkeeping.
    pub fn millis_since(&self, origin: MonotonicInstant) -> i64 {
        i64::try_from(self.0.saturating_duration_since(origin.0).as_millis()).unwrap_or(i64::MAX)
    }
}

/// Remaining milliseconds from `now_ms` until `end_ms`, clamped at zero.
pub fn remaining_millis(end_ms: i64, now_ms: i64) -> i64 {
    end_ms.saturating_sub(now_ms).max(0)
}

/// Convert a non-negative millisecond count into a `Duration`.
pub fn millis_to_duration(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

/// Wall-clock time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallClock {
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    /// Parse `HH:MM`
    pub fn parse(value: &str) -> Option<Self> {
        let time = NaiveTime::parse_from_str(value, "%H:%M").ok()?;
        Some(Self::from_naive_time(time))
    }

    pub fn from_naive_time(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    /// Returns seconds since midnight
    pub fn as_seconds_from_midnight(&self) -> u32 {
        (self.hour as u32) * 3600 + (self.minute as u32) * 60
    }
}

impl PartialOrd for WallClock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WallClock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_seconds_from_midnight()
            .cmp(&other.as_seconds_from_midnight())
    }
}

/// A window of the day that repeats every day, possibly crossing midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyWindow {
    pub start: WallClock,
    pub end: WallClock,
}

impl DailyWindow {
    pub fn new(start: WallClock, end: WallClock) -> Self {
        Self { start, end }
    }

    /// Check if the given local datetime falls within this window
    pub fn contains(&self, dt: &DateTime<Local>) -> bool {
        let secs = dt.time().num_seconds_from_midnight();
        let start = self.start.as_seconds_from_midnight();
        let end = self.end.as_seconds_from_midnight();

        if start <= end {
            secs >= start && secs < end
        } else {
            // crosses midnight (e.g. 22:00 - 06:00)
            secs >= start || secs < end
        }
    }

    /// Time until the next window edge (start or end) after `dt`.
    pub fn until_next_edge(&self, dt: &DateTime<Local>) -> Duration {
        let secs = dt.time().num_seconds_from_midnight();
        let forward = |edge: u32| -> u32 {
            if edge > secs {
                edge - secs
            } else {
                SECONDS_PER_DAY - secs + edge
            }
        };
        let next = forward(self.start.as_seconds_from_midnight())
            .min(forward(self.end.as_seconds_from_midnight()));
        Duration::from_secs(next as u64)
    }
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn night() -> DailyWindow {
        DailyWindow::new(WallClock::new(22, 0).unwrap(), WallClock::new(6, 0).unwrap())
    }

    #[test]
    fn test_wall_clock_ordering() {
        let morning = WallClock::new(8, 0).unwrap();
        let evening = WallClock::new(18, 30).unwrap();
        assert!(morning < evening);
        assert!(WallClock::new(24, 0).is_none());
    }

    #[test]
    fn test_wall_clock_parse() {
        assert_eq!(WallClock::parse("22:15"), WallClock::new(22, 15));
        assert!(WallClock::parse("25:00").is_none());
        assert!(WallClock::parse("noon").is_none());
    }

    #[test]
    fn test_window_crossing_midnight() {
        let window = night();
        let late = Local.with_ymd_and_hms(2025, 12, 25, 23, 30, 0).unwrap();
        let early = Local.with_ymd_and_hms(2025, 12, 26, 5, 59, 0).unwrap();
        let noon = Local.with_ymd_and_hms(2025, 12, 26, 12, 0, 0).unwrap();
        assert!(window.contains(&late));
        assert!(window.contains(&early));
        assert!(!window.contains(&noon));
    }

    #[test]
    fn test_window_same_day() {
        let window = DailyWindow::new(WallClock::new(1, 0).unwrap(), WallClock::new(5, 0).unwrap());
        let inside = Local.with_ymd_and_hms(2025, 12, 25, 3, 0, 0).unwrap();
        let outside = Local.with_ymd_and_hms(2025, 12, 25, 5, 0, 0).unwrap();
        assert!(window.contains(&inside));
        assert!(!window.contains(&outside));
    }

    #[test]
    fn test_until_next_edge() {
        let window = night();
        let evening = Local.with_ymd_and_hms(2025, 12, 25, 21, 0, 0).unwrap();
        assert_eq!(window.until_next_edge(&evening), Duration::from_secs(3600));

        let late = Local.with_ymd_and_hms(2025, 12, 25, 23, 0, 0).unwrap();
        assert_eq!(window.until_next_edge(&late), Duration::from_secs(7 * 3600));
    }

    #[test]
    fn test_remaining_millis_clamps() {
        assert_eq!(remaining_millis(10_000, 4_000), 6_000);
        assert_eq!(remaining_millis(4_000, 10_000), 0);
        assert_eq!(millis_to_duration(-5), Duration::ZERO);
        assert_eq!(millis_to_duration(1500), Duration::from_millis(1500));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_monotonic_instant() {
        let t1 = MonotonicInstant::now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = MonotonicInstant::now();

        assert!(t2 > t1);
        assert!(t2.millis_since(t1) >= 10);
        assert_eq!(t1.millis_since(t2), 0);
    }

    #[test]
    fn test_now_returns_time() {
        let t = now();
        assert!(t.year() >= 2020);
        assert!(t.year() <= 2100);
    }
}
