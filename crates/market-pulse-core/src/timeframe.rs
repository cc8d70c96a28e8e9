use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::MarketDataError;

/// Bar interval that intraday ingestion runs on and analytics buckets are counted in.
pub const BASE_TIMEFRAME: Timeframe = Timeframe::FiveMin;

/// A named bar interval. The name is the stable key bars are stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1min")]
    OneMin,
    #[serde(rename = "5min")]
    FiveMin,
    #[serde(rename = "15min")]
    FifteenMin,
    #[serde(rename = "30min")]
    ThirtyMin,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHour,
    #[serde(rename = "4h")]
    FourHour,
    #[serde(rename = "1day")]
    OneDay,
}

impl Timeframe {
    /// Interval name as the provider expects it.
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::OneMin => "1min",
            Timeframe::FiveMin => "5min",
            Timeframe::FifteenMin => "15min",
            Timeframe::ThirtyMin => "30min",
            Timeframe::OneHour => "1h",
            Timeframe::TwoHour => "2h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1day",
        }
    }

    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::OneMin => 1,
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::ThirtyMin => 30,
            Timeframe::OneHour => 60,
            Timeframe::TwoHour => 120,
            Timeframe::FourHour => 240,
            Timeframe::OneDay => 1440,
        }
    }

    pub fn duration(self) -> TimeDelta {
        TimeDelta::minutes(self.minutes())
    }

    pub fn is_intraday(self) -> bool {
        self != Timeframe::OneDay
    }

    /// Round a wall-clock instant down to the start of the bar containing it.
    /// Boundaries are counted from midnight, seconds are dropped.
    pub fn floor(self, at: NaiveDateTime) -> NaiveDateTime {
        let step = self.minutes();
        let minute_of_day = i64::from(at.hour()) * 60 + i64::from(at.minute());
        let floored = minute_of_day / step * step;
        at.date().and_time(NaiveTime::MIN) + TimeDelta::minutes(floored)
    }

    /// Timestamp of the most recent bar that has fully closed at `now`: round down to the
    /// bar boundary, then step back one interval so a still-forming bar is never requested.
    pub fn last_closed_bar(self, now: NaiveDateTime) -> NaiveDateTime {
        self.floor(now) - self.duration()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1min" => Ok(Timeframe::OneMin),
            "5min" => Ok(Timeframe::FiveMin),
            "15min" => Ok(Timeframe::FifteenMin),
            "30min" => Ok(Timeframe::ThirtyMin),
            "1h" | "1hour" => Ok(Timeframe::OneHour),
            "2h" | "2hour" => Ok(Timeframe::TwoHour),
            "4h" | "4hour" => Ok(Timeframe::FourHour),
            "1day" | "1d" => Ok(Timeframe::OneDay),
            other => Err(MarketDataError::InvalidTimeframe(other.to_string())),
        }
    }
}

/// Lookback bucket for RVOL and RS/RW, expressed as a count of base-interval bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bucket {
    #[serde(rename = "15min")]
    FifteenMin,
    #[serde(rename = "30min")]
    ThirtyMin,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHour,
    #[serde(rename = "4h")]
    FourHour,
}

impl Bucket {
    pub const ALL: [Bucket; 5] = [
        Bucket::FifteenMin,
        Bucket::ThirtyMin,
        Bucket::OneHour,
        Bucket::TwoHour,
        Bucket::FourHour,
    ];

    /// Number of base-interval bars in the bucket, as-of bar included.
    pub fn bar_count(self) -> i64 {
        match self {
            Bucket::FifteenMin => 3,
            Bucket::ThirtyMin => 6,
            Bucket::OneHour => 12,
            Bucket::TwoHour => 24,
            Bucket::FourHour => 48,
        }
    }

    /// Timestamp of the first bar in the bucket ending at `as_of`.
    pub fn window_start(self, as_of: NaiveDateTime) -> NaiveDateTime {
        as_of - BASE_TIMEFRAME.duration() * (self.bar_count() - 1) as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::FifteenMin => "15min",
            Bucket::ThirtyMin => "30min",
            Bucket::OneHour => "1h",
            Bucket::TwoHour => "2h",
            Bucket::FourHour => "4h",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive time range requested from the provider for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl RunWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// A window covering exactly one bar.
    pub fn single(at: NaiveDateTime) -> Self {
        Self { start: at, end: at }
    }

    /// Default window for a scheduled run: the last fully closed bar at `now`.
    pub fn for_run(timeframe: Timeframe, now: NaiveDateTime) -> Self {
        Self::single(timeframe.last_closed_bar(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn parse_known_timeframes() {
        assert_eq!("5min".parse::<Timeframe>().unwrap(), Timeframe::FiveMin);
        assert_eq!("15Min".parse::<Timeframe>().unwrap(), Timeframe::FifteenMin);
        assert_eq!("1hour".parse::<Timeframe>().unwrap(), Timeframe::OneHour);
        assert_eq!("1day".parse::<Timeframe>().unwrap(), Timeframe::OneDay);
    }

    #[test]
    fn names_round_trip() {
        for tf in [
            Timeframe::OneMin,
            Timeframe::FiveMin,
            Timeframe::FifteenMin,
            Timeframe::ThirtyMin,
            Timeframe::OneHour,
            Timeframe::TwoHour,
            Timeframe::FourHour,
            Timeframe::OneDay,
        ] {
            assert_eq!(tf.to_string().parse::<Timeframe>().unwrap(), tf);
        }
        assert_eq!(" 1HOUR ".parse::<Timeframe>().unwrap(), Timeframe::OneHour);
    }

    #[test]
    fn parse_unknown_timeframe_fails() {
        let err = "7min".parse::<Timeframe>().unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidTimeframe(_)));
    }

    #[test]
    fn floor_rounds_down_to_boundary() {
        assert_eq!(Timeframe::FiveMin.floor(at(10, 7, 42)), at(10, 5, 0));
        assert_eq!(Timeframe::FiveMin.floor(at(10, 5, 0)), at(10, 5, 0));
        assert_eq!(Timeframe::FifteenMin.floor(at(10, 44, 59)), at(10, 30, 0));
        assert_eq!(Timeframe::OneDay.floor(at(10, 44, 59)), at(0, 0, 0));
    }

    #[test]
    fn last_closed_bar_steps_back_one_interval() {
        // At 10:07:42 the 10:05 bar is still forming, so the 10:00 bar is the last closed one.
        assert_eq!(Timeframe::FiveMin.last_closed_bar(at(10, 7, 42)), at(10, 0, 0));
        assert_eq!(
            RunWindow::for_run(Timeframe::FiveMin, at(10, 10, 3)),
            RunWindow::single(at(10, 0, 0))
        );
    }

    #[test]
    fn bucket_window_start_counts_base_bars() {
        assert_eq!(Bucket::FifteenMin.window_start(at(10, 0, 0)), at(9, 50, 0));
        assert_eq!(Bucket::ThirtyMin.window_start(at(10, 0, 0)), at(9, 35, 0));
        assert_eq!(Bucket::FourHour.window_start(at(15, 55, 0)), at(12, 0, 0));
    }
}
