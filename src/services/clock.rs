use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// All auction scheduling is anchored to this civil zone, regardless of the
/// server's locale.
pub const AUCTION_TZ: Tz = chrono_tz::Asia::Kolkata;

/// Source of "now". Injected so the lifecycle sweep and time-remaining
/// displays are testable without a wall-clock dependency.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Resolves a civil (date, time) pair in the auction zone to an absolute
/// instant. Around a DST gap the earlier candidate is taken; the auction zone
/// currently has no DST, so this is a formality.
pub fn civil_to_instant(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    match AUCTION_TZ.from_local_datetime(&date.and_time(time)) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
        chrono::LocalResult::None => {
            // Gap: shift forward until the local time exists.
            let shifted = date.and_time(time) + Duration::hours(1);
            AUCTION_TZ
                .from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&date.and_time(time)))
        }
    }
}

/// Scheduled end of the auction window.
pub fn end_of_window(starts_at: DateTime<Utc>, duration_minutes: i32) -> DateTime<Utc> {
    starts_at + Duration::minutes(i64::from(duration_minutes))
}

/// Parses "HH:MM:SS" (seconds optional) as a civil time of day.
pub fn parse_civil_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

/// 12-hour display of an instant in the auction zone, e.g. "2:05 PM".
pub fn format_time_ampm(instant: DateTime<Utc>) -> String {
    instant
        .with_timezone(&AUCTION_TZ)
        .format("%-I:%M %p")
        .to_string()
}

/// 12-hour display of a civil time of day, e.g. "2:05 PM".
pub fn format_civil_time_ampm(time: NaiveTime) -> String {
    time.format("%-I:%M %p").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn utc(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn civil_times_resolve_in_auction_zone() {
        // 10:00 IST is 04:30 UTC
        let date = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();
        let time = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        assert_eq!(civil_to_instant(date, time), utc("2025-09-08 04:30:00"));
    }

    #[test]
    fn end_of_window_adds_duration() {
        let start = utc("2025-09-08 04:30:00");
        assert_eq!(end_of_window(start, 30), utc("2025-09-08 05:00:00"));
    }

    #[test]
    fn parses_times_with_and_without_seconds() {
        assert_eq!(
            parse_civil_time("14:30:15"),
            NaiveTime::from_hms_opt(14, 30, 15)
        );
        assert_eq!(parse_civil_time("14:30"), NaiveTime::from_hms_opt(14, 30, 0));
        assert_eq!(parse_civil_time("25:00:00"), None);
        assert_eq!(parse_civil_time("garbage"), None);
    }

    #[test]
    fn formats_twelve_hour_display() {
        // 04:30 UTC -> 10:00 AM IST
        assert_eq!(format_time_ampm(utc("2025-09-08 04:30:00")), "10:00 AM");
        // 08:35 UTC -> 2:05 PM IST
        assert_eq!(format_time_ampm(utc("2025-09-08 08:35:00")), "2:05 PM");
        assert_eq!(
            format_civil_time_ampm(NaiveTime::from_hms_opt(0, 7, 0).unwrap()),
            "12:07 AM"
        );
    }

    #[test]
    fn fixed_clock_is_deterministic() {
        let clock = FixedClock(utc("2025-01-01 00:00:00"));
        assert_eq!(clock.now(), clock.now());
    }
}
