//! Relative volume: a bucket's volume today against the same time-of-day window on
//! preceding days.

use chrono::{NaiveDateTime, TimeDelta};
use rust_decimal::Decimal;

use super::series::BarSeries;
use crate::timeframe::Bucket;

/// Number of non-zero historical days collected before the search stops.
pub const RVOL_TARGET_DAYS: usize = 15;
/// Calendar days searched backwards for historical windows.
pub const RVOL_MAX_DAYS_CHECKED: i64 = 30;
/// Fixed divisor applied to the summed historical volume.
pub const RVOL_AVERAGE_DIVISOR: u32 = 14;

/// Tunable constants of the RVOL average.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RvolPolicy {
    pub target_days: usize,
    pub max_days_checked: i64,
    pub average_divisor: u32,
    /// Discard the oldest collected day before averaging.
    pub drop_oldest: bool,
}

impl Default for RvolPolicy {
    fn default() -> Self {
        Self {
            target_days: RVOL_TARGET_DAYS,
            max_days_checked: RVOL_MAX_DAYS_CHECKED,
            average_divisor: RVOL_AVERAGE_DIVISOR,
            drop_oldest: true,
        }
    }
}

impl RvolPolicy {
    /// Average volume of the `[start, end]` time-of-day window over preceding days, or zero
    /// when no day traded.
    pub fn historical_average(
        &self,
        series: &BarSeries,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Decimal {
        let mut volumes = Vec::with_capacity(self.target_days);
        for offset in 1..=self.max_days_checked {
            if volumes.len() >= self.target_days {
                break;
            }
            let shift = TimeDelta::days(offset);
            let volume = series.volume_between(start - shift, end - shift);
            if volume > Decimal::ZERO {
                volumes.push(volume);
            }
        }

        // Collected newest first, so the oldest is last.
        if self.drop_oldest {
            volumes.pop();
        }

        let total: Decimal = volumes.iter().sum();
        total
            .checked_div(Decimal::from(self.average_divisor))
            .unwrap_or(Decimal::ZERO)
    }
}

/// RVOL of `bucket` ending at `as_of`, as a percentage rounded to 2 places.
///
/// `None` when the series has no bar at the bucket's first timestamp or no historical volume
/// to compare against.
pub fn relative_volume(
    series: &BarSeries,
    as_of: NaiveDateTime,
    bucket: Bucket,
    policy: &RvolPolicy,
) -> Option<Decimal> {
    let start = bucket.window_start(as_of);
    series.get(start)?;

    let today = series.volume_between(start, as_of);
    let average = policy.historical_average(series, start, as_of);
    if average.is_zero() {
        return None;
    }

    let ratio = today.checked_div(average)?;
    Some((ratio * Decimal::ONE_HUNDRED).round_dp(2))
}
