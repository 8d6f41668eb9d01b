//! US equity options session calendar in Eastern time.
//!
//! Conversion is explicit: US daylight saving runs from the second Sunday
//! of March at 02:00 local (07:00 UTC) to the first Sunday of November at
//! 02:00 local (06:00 UTC). Every session comparison happens on the
//! converted Eastern wall clock, never on UTC or the host timezone.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc,
    Weekday,
};

const EST_OFFSET_SECS: i32 = -5 * 3600;
const EDT_OFFSET_SECS: i32 = -4 * 3600;

/// Regular session open, Eastern.
pub const SESSION_OPEN: (u32, u32) = (9, 30);
/// Regular session close, Eastern.
pub const SESSION_CLOSE: (u32, u32) = (16, 0);
/// Early-close session end, Eastern.
pub const HALF_DAY_CLOSE: (u32, u32) = (13, 0);

/// Parse an `HH:MM` wall-clock time.
pub fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .with_context(|| format!("invalid HH:MM time {value:?}"))
}

fn nth_sunday(year: i32, month: u32, n: u32) -> NaiveDate {
    NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Sun, n as u8)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default())
}

/// Whether US daylight saving is in effect at `utc`.
pub fn is_eastern_dst(utc: DateTime<Utc>) -> bool {
    let year = utc.year();
    let start = nth_sunday(year, 3, 2)
        .and_hms_opt(7, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive));
    let end = nth_sunday(year, 11, 1)
        .and_hms_opt(6, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive));
    match (start, end) {
        (Some(start), Some(end)) => utc >= start && utc < end,
        _ => false,
    }
}

/// Eastern UTC offset in effect at `utc`.
pub fn eastern_offset(utc: DateTime<Utc>) -> FixedOffset {
    let secs = if is_eastern_dst(utc) {
        EDT_OFFSET_SECS
    } else {
        EST_OFFSET_SECS
    };
    FixedOffset::east_opt(secs).unwrap_or_else(|| Utc.fix())
}

/// Convert a UTC instant to the Eastern wall clock.
pub fn to_eastern(utc: DateTime<Utc>) -> DateTime<FixedOffset> {
    utc.with_timezone(&eastern_offset(utc))
}

/// Trading calendar with configured holidays and early closes.
#[derive(Debug, Clone, Default)]
pub struct MarketCalendar {
    holidays: BTreeSet<NaiveDate>,
    half_days: BTreeSet<NaiveDate>,
}

impl MarketCalendar {
    pub fn new(
        holidays: impl IntoIterator<Item = NaiveDate>,
        half_days: impl IntoIterator<Item = NaiveDate>,
    ) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
            half_days: half_days.into_iter().collect(),
        }
    }

    /// Build from `YYYY-MM-DD` strings (as found in config).
    pub fn from_strings(holidays: &[String], half_days: &[String]) -> Result<Self> {
        let parse = |s: &String| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("invalid calendar date {s:?}"))
        };
        Ok(Self::new(
            holidays.iter().map(parse).collect::<Result<Vec<_>>>()?,
            half_days.iter().map(parse).collect::<Result<Vec<_>>>()?,
        ))
    }

    /// Eastern calendar date at `utc`.
    pub fn eastern_date(&self, utc: DateTime<Utc>) -> NaiveDate {
        to_eastern(utc).date_naive()
    }

    /// Whether `date` has a regular or shortened session.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Session close (Eastern wall time) for a trading day.
    pub fn session_close(&self, date: NaiveDate) -> NaiveTime {
        let (h, m) = if self.half_days.contains(&date) {
            HALF_DAY_CLOSE
        } else {
            SESSION_CLOSE
        };
        NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
    }

    fn session_open_time() -> NaiveTime {
        NaiveTime::from_hms_opt(SESSION_OPEN.0, SESSION_OPEN.1, 0).unwrap_or(NaiveTime::MIN)
    }

    /// Whether the regular session is open at `utc`.
    pub fn is_open(&self, utc: DateTime<Utc>) -> bool {
        let local = to_eastern(utc);
        let date = local.date_naive();
        if !self.is_trading_day(date) {
            return false;
        }
        let t = local.time();
        t >= Self::session_open_time() && t < self.session_close(date)
    }

    /// Whether the Eastern wall clock at `utc` is at or after `at`.
    pub fn is_after(&self, utc: DateTime<Utc>, at: NaiveTime) -> bool {
        to_eastern(utc).time() >= at
    }

    /// Minutes until today's close, or `None` while closed.
    pub fn minutes_until_close(&self, utc: DateTime<Utc>) -> Option<i64> {
        if !self.is_open(utc) {
            return None;
        }
        let local = to_eastern(utc);
        let close = self.session_close(local.date_naive());
        Some((close - local.time()).num_minutes())
    }

    /// Start of the next session that opens after `utc`.
    pub fn next_open(&self, utc: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = to_eastern(utc);
        let mut date = local.date_naive();
        if local.time() >= Self::session_open_time() {
            date = date.succ_opt()?;
        }
        for _ in 0..14 {
            if self.is_trading_day(date) {
                return Some(eastern_to_utc(date, Self::session_open_time()));
            }
            date = date.succ_opt()?;
        }
        None
    }
}

/// Convert an Eastern wall-clock time on `date` to UTC.
///
/// Uses the offset in effect at noon UTC on that date, which matches the
/// session hours on both sides of a transition (switches happen at 2 AM).
pub fn eastern_to_utc(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let noon_time = NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN);
    let noon = Utc.from_utc_datetime(&date.and_time(noon_time));
    let offset = eastern_offset(noon);
    let naive = date.and_time(time) - Duration::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&naive)
}
