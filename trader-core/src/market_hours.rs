//! Market-Hours Gate: keeps signals and ticks outside the configured
//! session window from reaching any Symbol Machine.
//!
//! Epoch milliseconds are the clock's native unit everywhere else in this
//! crate; this is the one seam that needs a timezone-aware wall-clock time,
//! so the conversion lives entirely inside this module.

use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A single daily trading session, e.g. NSE equity/derivatives cash hours
/// (09:15-15:30 IST), plus the weekday/holiday calendar it runs on and a
/// pair of manual overrides for drills and incident response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketHoursGate {
    #[serde(with = "tz_serde")]
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
    /// Trading days, 0 = Monday .. 6 = Sunday.
    market_days: Vec<u8>,
    holidays: Vec<NaiveDate>,
    /// Forces `is_open` to `true` regardless of clock/calendar. Checked
    /// before `force_closed`.
    force_open: bool,
    /// Forces `is_open` to `false` regardless of clock/calendar.
    force_closed: bool,
}

impl MarketHoursGate {
    pub fn new(
        tz: Tz,
        open: NaiveTime,
        close: NaiveTime,
        market_days: Vec<Weekday>,
        holidays: Vec<NaiveDate>,
        force_open: bool,
        force_closed: bool,
    ) -> Self {
        Self {
            tz,
            open,
            close,
            market_days: market_days.iter().map(|d| d.num_days_from_monday() as u8).collect(),
            holidays,
            force_open,
            force_closed,
        }
    }

    /// `true` if `now_ms` (epoch milliseconds, UTC) falls within the
    /// session window on its local trading day, the day is in
    /// `market_days`, and the local date isn't a configured holiday.
    /// `force_closed` wins over `force_open`, which wins over the clock.
    pub fn is_open(&self, now_ms: i64) -> bool {
        if self.force_closed {
            return false;
        }
        if self.force_open {
            return true;
        }
        let Some(utc) = chrono::Utc.timestamp_millis_opt(now_ms).single() else {
            return false;
        };
        let local = utc.with_timezone(&self.tz);
        let day_idx = local.weekday().num_days_from_monday() as u8;
        if !self.market_days.contains(&day_idx) {
            return false;
        }
        if self.holidays.contains(&local.date_naive()) {
            return false;
        }
        let t = local.time();
        t >= self.open && t <= self.close
    }
}

/// Parses a weekday name (case-insensitive, full or three-letter) the way
/// config files spell them. Doesn't rely on `Weekday::FromStr`'s own
/// parsing rules, which accept different spellings than this crate's
/// config surface wants to promise.
pub fn parse_weekday(s: &str) -> Option<Weekday> {
    match s.to_lowercase().as_str() {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

mod tz_serde {
    use chrono_tz::Tz;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error> {
        tz.name().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Tz, D::Error> {
        let name = String::deserialize(deserializer)?;
        Tz::from_str(&name).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weekdays() -> Vec<Weekday> {
        vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
    }

    fn nse() -> MarketHoursGate {
        MarketHoursGate::new(
            chrono_tz::Asia::Kolkata,
            NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            weekdays(),
            Vec::new(),
            false,
            false,
        )
    }

    fn ist_ms(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        chrono_tz::Asia::Kolkata
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&chrono::Utc)
            .timestamp_millis()
    }

    #[test]
    fn open_during_session() {
        // Wed 2024-06-05, 10:00 IST
        assert!(nse().is_open(ist_ms(2024, 6, 5, 10, 0)));
    }

    #[test]
    fn closed_before_open() {
        assert!(!nse().is_open(ist_ms(2024, 6, 5, 9, 0)));
    }

    #[test]
    fn open_at_close() {
        assert!(nse().is_open(ist_ms(2024, 6, 5, 15, 30)));
    }

    #[test]
    fn closed_on_weekend() {
        // Sat 2024-06-08
        assert!(!nse().is_open(ist_ms(2024, 6, 8, 10, 0)));
    }

    #[test]
    fn closed_on_configured_holiday() {
        let mut gate = nse();
        gate.holidays.push(NaiveDate::from_ymd_opt(2024, 6, 5).unwrap());
        assert!(!gate.is_open(ist_ms(2024, 6, 5, 10, 0)));
    }

    #[test]
    fn force_open_overrides_weekend() {
        let mut gate = nse();
        gate.force_open = true;
        assert!(gate.is_open(ist_ms(2024, 6, 8, 3, 0)));
    }

    #[test]
    fn force_closed_overrides_session_hours() {
        let mut gate = nse();
        gate.force_closed = true;
        assert!(!gate.is_open(ist_ms(2024, 6, 5, 10, 0)));
    }

    #[test]
    fn parse_weekday_accepts_short_and_long_forms_case_insensitively() {
        assert_eq!(parse_weekday("Mon"), Some(Weekday::Mon));
        assert_eq!(parse_weekday("SUNDAY"), Some(Weekday::Sun));
        assert_eq!(parse_weekday("nope"), None);
    }

    #[test]
    fn roundtrips_through_config_serde() {
        let gate = nse();
        let json = serde_json::to_string(&gate).unwrap();
        let back: MarketHoursGate = serde_json::from_str(&json).unwrap();
        assert_eq!(back.is_open(ist_ms(2024, 6, 5, 10, 0)), true);
    }
}
