//! UTC trading sessions. Positions are never carried across a session end.

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

const MINUTES_PER_DAY: u32 = 24 * 60;
/// Positions are force-closed this close to the session end
pub const CLOSING_ALERT_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradingSession {
    Asian,
    European,
    American,
}

/// Window in minutes since midnight; `end` is exclusive and may wrap.
#[derive(Debug, Clone, Copy)]
struct Window {
    start: u32,
    end: u32,
}

impl Window {
    const fn hm(start_h: u32, start_m: u32, end_h: u32, end_m: u32) -> Self {
        Self {
            start: start_h * 60 + start_m,
            end: end_h * 60 + end_m,
        }
    }

    fn contains(&self, minute: u32) -> bool {
        if self.start <= self.end {
            minute >= self.start && minute < self.end
        } else {
            minute >= self.start || minute < self.end
        }
    }

    fn minutes_until_end(&self, minute: u32) -> i64 {
        if minute < self.end {
            (self.end - minute) as i64
        } else {
            (self.end + MINUTES_PER_DAY - minute) as i64
        }
    }
}

impl TradingSession {
    /// Checked in this order; the first match is the active session.
    pub const ALL: [TradingSession; 3] = [
        TradingSession::Asian,
        TradingSession::European,
        TradingSession::American,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TradingSession::Asian => "ASIAN",
            TradingSession::European => "EUROPEAN",
            TradingSession::American => "AMERICAN",
        }
    }

    fn window(&self) -> Window {
        match self {
            TradingSession::Asian => Window::hm(21, 0, 6, 0),
            TradingSession::European => Window::hm(7, 0, 16, 0),
            TradingSession::American => Window::hm(13, 0, 22, 0),
        }
    }

    fn opening_window(&self) -> Window {
        match self {
            TradingSession::Asian => Window::hm(21, 0, 22, 0),
            TradingSession::European => Window::hm(8, 0, 9, 0),
            TradingSession::American => Window::hm(13, 30, 14, 30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub active: Option<TradingSession>,
    /// Minutes until the active session ends
    pub minutes_to_close: Option<i64>,
    pub closing_soon: bool,
    pub opening_hour: bool,
}

impl SessionStatus {
    pub fn is_off_hours(&self) -> bool {
        self.active.is_none()
    }

    pub fn describe(&self) -> String {
        match (self.active, self.minutes_to_close) {
            (Some(session), Some(left)) => format!("{} ({} min to close)", session.name(), left),
            _ => "OFF_HOURS".to_string(),
        }
    }
}

fn minute_of_day(now: DateTime<Utc>) -> u32 {
    now.hour() * 60 + now.minute()
}

pub fn active_session(now: DateTime<Utc>) -> Option<TradingSession> {
    let minute = minute_of_day(now);
    TradingSession::ALL
        .into_iter()
        .find(|s| s.window().contains(minute))
}

pub fn session_status(now: DateTime<Utc>) -> SessionStatus {
    let minute = minute_of_day(now);
    match active_session(now) {
        Some(session) => {
            let left = session.window().minutes_until_end(minute);
            SessionStatus {
                active: Some(session),
                minutes_to_close: Some(left),
                closing_soon: left <= CLOSING_ALERT_MINUTES,
                opening_hour: session.opening_window().contains(minute),
            }
        }
        None => SessionStatus {
            active: None,
            minutes_to_close: None,
            closing_soon: false,
            opening_hour: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn asian_session_wraps_midnight() {
        let late = session_status(at(23, 30));
        assert_eq!(late.active, Some(TradingSession::Asian));
        assert_eq!(late.minutes_to_close, Some(390));

        let early = session_status(at(5, 45));
        assert_eq!(early.active, Some(TradingSession::Asian));
        assert_eq!(early.minutes_to_close, Some(15));
        assert!(early.closing_soon);
    }

    #[test]
    fn gap_between_asian_and_european_is_off_hours() {
        let status = session_status(at(6, 30));
        assert!(status.is_off_hours());
        assert_eq!(status.describe(), "OFF_HOURS");
    }

    #[test]
    fn first_matching_session_wins_on_overlap() {
        // 14:00 is inside both European and American windows
        assert_eq!(active_session(at(14, 0)), Some(TradingSession::European));
        // 21:30 is inside both American and Asian windows
        assert_eq!(active_session(at(21, 30)), Some(TradingSession::Asian));
        assert_eq!(active_session(at(17, 0)), Some(TradingSession::American));
    }

    #[test]
    fn closing_alert_and_opening_hour() {
        let status = session_status(at(15, 30));
        assert_eq!(status.active, Some(TradingSession::European));
        assert!(status.closing_soon);

        let status = session_status(at(15, 29));
        assert!(!status.closing_soon);

        assert!(session_status(at(8, 15)).opening_hour);
        assert!(!session_status(at(10, 0)).opening_hour);
    }

    #[test]
    fn window_end_is_exclusive() {
        assert_eq!(active_session(at(16, 0)), Some(TradingSession::American));
        assert_eq!(active_session(at(6, 0)), None);
    }
}
