use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;

/// Convert a UTC instant to the exchange-local (New York) wall clock that stored bar
/// timestamps use.
pub fn exchange_local(instant: DateTime<Utc>) -> NaiveDateTime {
    instant.with_timezone(&New_York).naive_local()
}

pub fn exchange_now() -> NaiveDateTime {
    exchange_local(Utc::now())
}

fn minute_of_day(local: &NaiveDateTime) -> u32 {
    local.hour() * 60 + local.minute()
}

/// Whether a scheduled intraday ingestion run should proceed at `local`.
///
/// Runs cover weekdays from 9:35 ET, when the 9:30 bar has closed, through 16:04 ET, when
/// the 15:55 bar has.
pub fn in_ingestion_hours(local: &NaiveDateTime) -> bool {
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    (575..965).contains(&minute_of_day(local))
}
