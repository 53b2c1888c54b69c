//! Quiet-hours clock: per-recipient local-time send window enforcement.
//!
//! The window is configured as `[start, end)` in wall-clock time and wraps
//! midnight when `start > end`. All public operations are deterministic given
//! a timezone and an instant, which keeps the compliance gate testable with a
//! fake clock.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::warn;

/// Fallback when neither the contact nor the location carries a timezone.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Los_Angeles;

/// Resolve the recipient timezone: contact override, then location, then the
/// platform default. Unparseable values fall through with a warning.
pub fn resolve_timezone(contact_tz: Option<&str>, location_tz: Option<&str>) -> Tz {
    for candidate in [contact_tz, location_tz].into_iter().flatten() {
        match candidate.parse::<Tz>() {
            Ok(tz) => return tz,
            Err(_) => warn!(timezone = candidate, "unparseable IANA timezone"),
        }
    }
    DEFAULT_TIMEZONE
}

/// Error raised when a configured `HH:MM` boundary cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quiet-hours boundary {value:?}: expected HH:MM")]
pub struct QuietWindowParseError {
    value: String,
}

/// Configured quiet window in recipient-local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl QuietWindow {
    /// Build a window from already-parsed boundaries.
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse `HH:MM` boundaries as read from configuration.
    pub fn parse(start: &str, end: &str) -> Result<Self, QuietWindowParseError> {
        let parse = |value: &str| {
            NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| QuietWindowParseError {
                value: value.to_string(),
            })
        };
        Ok(Self {
            start: parse(start)?,
            end: parse(end)?,
        })
    }

    /// Window membership for a local wall-clock time.
    pub fn contains(&self, local: NaiveTime) -> bool {
        if self.start > self.end {
            // Wraps midnight, e.g. 21:00 - 08:00.
            local >= self.start || local < self.end
        } else {
            self.start <= local && local < self.end
        }
    }

    /// Whether `now` falls inside the window for a recipient in `tz`.
    pub fn is_in_window(&self, tz: Tz, now: DateTime<Utc>) -> bool {
        self.contains(now.with_timezone(&tz).time())
    }

    /// The soonest instant strictly after `now` at which the window is over:
    /// the next occurrence of `end` in the recipient's zone, as UTC.
    ///
    /// Local times erased by a DST spring-forward transition roll forward to
    /// the first representable wall-clock time; ambiguous times during
    /// fall-back map to their earliest occurrence.
    pub fn window_end_after(&self, tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_date = now.with_timezone(&tz).date_naive();
        for day_offset in 0..3 {
            let date = local_date + Duration::days(day_offset);
            let candidate = resolve_local_instant(tz, date.and_time(self.end));
            if candidate > now {
                return candidate;
            }
        }
        // The end boundary recurs daily, so the three-day scan above always
        // produces a future instant; this arm is unreachable.
        now + Duration::days(1)
    }
}

/// Map a local wall-clock datetime onto UTC, resolving DST edge cases.
fn resolve_local_instant(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = local;
    // DST gaps are at most an hour wide; step past them in half-hour moves.
    for _ in 0..4 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(mapped) => return mapped.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => candidate += Duration::minutes(30),
        }
    }
    Utc.from_utc_datetime(&candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn window(start: &str, end: &str) -> QuietWindow {
        QuietWindow::parse(start, end).expect("window should parse")
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, mo, d)
            .and_then(|date| date.and_hms_opt(h, mi, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
            .expect("valid instant")
    }

    #[rstest]
    #[case::inside_evening("22:00", true)]
    #[case::inside_early_morning("06:30", true)]
    #[case::boundary_start("21:00", true)]
    #[case::boundary_end("08:00", false)]
    #[case::daytime("12:00", false)]
    fn wrapping_window_membership(#[case] local: &str, #[case] expected: bool) {
        let local = NaiveTime::parse_from_str(local, "%H:%M").expect("time");
        assert_eq!(window("21:00", "08:00").contains(local), expected);
    }

    #[rstest]
    #[case::inside("12:30", true)]
    #[case::before("11:59", false)]
    #[case::at_end("14:00", false)]
    fn non_wrapping_window_membership(#[case] local: &str, #[case] expected: bool) {
        let local = NaiveTime::parse_from_str(local, "%H:%M").expect("time");
        assert_eq!(window("12:00", "14:00").contains(local), expected);
    }

    #[rstest]
    fn pacific_evening_defers_to_next_morning() {
        let tz: Tz = "America/Los_Angeles".parse().expect("tz");
        // 2026-07-01 22:00 PDT == 2026-07-02 05:00 UTC.
        let now = utc(2026, 7, 2, 5, 0);
        let quiet = window("21:00", "08:00");

        assert!(quiet.is_in_window(tz, now));
        // Next 08:00 PDT is 15:00 UTC the same day.
        assert_eq!(quiet.window_end_after(tz, now), utc(2026, 7, 2, 15, 0));
    }

    #[rstest]
    fn end_earlier_today_rolls_to_tomorrow() {
        let tz: Tz = "America/Los_Angeles".parse().expect("tz");
        // 2026-07-01 12:00 PDT == 19:00 UTC; today's 08:00 already passed.
        let now = utc(2026, 7, 1, 19, 0);
        let quiet = window("21:00", "08:00");

        assert!(!quiet.is_in_window(tz, now));
        assert_eq!(quiet.window_end_after(tz, now), utc(2026, 7, 2, 15, 0));
    }

    #[rstest]
    fn spring_forward_gap_rolls_to_first_valid_time() {
        let tz: Tz = "America/Denver".parse().expect("tz");
        // US DST starts 2026-03-08; 02:30 local does not exist that day.
        // 01:30 MST == 08:30 UTC.
        let now = utc(2026, 3, 8, 8, 30);
        let quiet = window("20:00", "02:30");

        assert!(quiet.is_in_window(tz, now));
        // The skipped 02:30 resolves to 03:00 MDT == 09:00 UTC.
        assert_eq!(quiet.window_end_after(tz, now), utc(2026, 3, 8, 9, 0));
    }

    #[rstest]
    fn fall_back_ambiguity_uses_earliest_occurrence() {
        let tz: Tz = "America/Denver".parse().expect("tz");
        // US DST ends 2026-11-01; 01:30 local happens twice.
        // 01:00 MDT == 07:00 UTC.
        let now = utc(2026, 11, 1, 7, 0);
        let quiet = window("20:00", "01:30");

        // First 01:30 is still MDT (UTC-6): 07:30 UTC.
        assert_eq!(quiet.window_end_after(tz, now), utc(2026, 11, 1, 7, 30));
    }

    #[rstest]
    fn timezone_resolution_prefers_contact_then_location() {
        let denver: Tz = "America/Denver".parse().expect("tz");
        assert_eq!(
            resolve_timezone(Some("America/Denver"), Some("America/New_York")),
            denver
        );

        let new_york: Tz = "America/New_York".parse().expect("tz");
        assert_eq!(resolve_timezone(None, Some("America/New_York")), new_york);
        assert_eq!(resolve_timezone(Some("Mars/Olympus"), None), DEFAULT_TIMEZONE);
        assert_eq!(resolve_timezone(None, None), DEFAULT_TIMEZONE);
    }

    #[rstest]
    fn garbage_boundaries_fail_to_parse() {
        assert!(QuietWindow::parse("25:00", "08:00").is_err());
        assert!(QuietWindow::parse("21:00", "bedtime").is_err());
    }
}
