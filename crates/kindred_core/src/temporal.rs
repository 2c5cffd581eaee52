//! Wall-clock concerns: injectable clocks, session boundaries, time-of-day bands.

use chrono::{DateTime, Duration, Local, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Source of "now". Components take an `Arc<dyn Clock>` so tests can pin time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Local>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now = *now + by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// ============================================================================
// Sessions
// ============================================================================

pub const DEFAULT_SESSION_GAP_HOURS: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl SessionType {
    /// `[5,12)` morning, `[12,17)` afternoon, `[17,22)` evening, else night.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => SessionType::Morning,
            12..=16 => SessionType::Afternoon,
            17..=21 => SessionType::Evening,
            _ => SessionType::Night,
        }
    }

    pub fn at(time: &DateTime<Local>) -> Self {
        Self::from_hour(time.hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Morning => "morning",
            SessionType::Afternoon => "afternoon",
            SessionType::Evening => "evening",
            SessionType::Night => "night",
        }
    }

    pub fn parse_str(s: &str) -> Self {
        match s {
            "morning" => SessionType::Morning,
            "afternoon" => SessionType::Afternoon,
            "evening" => SessionType::Evening,
            _ => SessionType::Night,
        }
    }
}

/// A new session starts when there is no previous message, when the calendar
/// day changed, or when the idle gap reached `gap`.
pub fn should_start_new_session(
    last_message: Option<DateTime<Local>>,
    now: DateTime<Local>,
    gap: Duration,
) -> bool {
    match last_message {
        None => true,
        Some(last) => last.date_naive() != now.date_naive() || now - last >= gap,
    }
}

/// Human-readable time context passed to the Judge and the prompt builder.
pub fn time_context(now: &DateTime<Local>) -> String {
    format!(
        "{} ({}), {}",
        now.format("%H:%M, %A %d/%m/%Y"),
        SessionType::at(now).as_str(),
        if now.hour() >= 23 || now.hour() < 5 { "late" } else { "normal hours" }
    )
}

pub fn describe_gap(gap: Duration) -> String {
    let minutes = gap.num_minutes();
    match minutes {
        m if m < 1 => "just now".to_string(),
        m if m < 60 => format!("{} minutes ago", m),
        m if m < 60 * 24 => format!("{} hours ago", m / 60),
        m => format!("{} days ago", m / (60 * 24)),
    }
}

pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_day_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, d, h, m, 0).single().unwrap()
    }

    fn gap() -> Duration {
        Duration::hours(DEFAULT_SESSION_GAP_HOURS)
    }

    #[test]
    fn test_no_previous_message_starts_session() {
        assert!(should_start_new_session(None, at(12, 10, 0), gap()));
    }

    #[test]
    fn test_gap_boundary() {
        let last = at(12, 8, 0);
        assert!(!should_start_new_session(Some(last), at(12, 11, 59), gap()));
        assert!(should_start_new_session(Some(last), at(12, 12, 0), gap()));
    }

    #[test]
    fn test_midnight_crossing_starts_session() {
        let last = at(12, 23, 59);
        assert!(should_start_new_session(Some(last), at(13, 0, 0), gap()));
    }

    #[test]
    fn test_session_type_bands() {
        assert_eq!(SessionType::from_hour(4), SessionType::Night);
        assert_eq!(SessionType::from_hour(5), SessionType::Morning);
        assert_eq!(SessionType::from_hour(11), SessionType::Morning);
        assert_eq!(SessionType::from_hour(12), SessionType::Afternoon);
        assert_eq!(SessionType::from_hour(17), SessionType::Evening);
        assert_eq!(SessionType::from_hour(21), SessionType::Evening);
        assert_eq!(SessionType::from_hour(22), SessionType::Night);
        assert_eq!(SessionType::from_hour(0), SessionType::Night);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(at(12, 9, 0));
        clock.advance(Duration::hours(20));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 6, 13).unwrap());
    }

    #[test]
    fn test_describe_gap() {
        assert_eq!(describe_gap(Duration::seconds(10)), "just now");
        assert_eq!(describe_gap(Duration::minutes(45)), "45 minutes ago");
        assert_eq!(describe_gap(Duration::hours(5)), "5 hours ago");
        assert_eq!(describe_gap(Duration::days(3)), "3 days ago");
    }

    #[test]
    fn test_day_key_roundtrip() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        assert_eq!(day_key(d), "2024-01-09");
        assert_eq!(parse_day_key("2024-01-09"), Some(d));
        assert_eq!(parse_day_key("garbage"), None);
    }
}
