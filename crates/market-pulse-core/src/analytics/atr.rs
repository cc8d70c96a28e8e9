//! Average True Range over a run of bars.

use rust_decimal::Decimal;

use crate::bar::PriceBar;

/// Lookback, in daily bars, for the persisted daily ATR.
pub const ATR_PERIOD: usize = 14;

/// `max(high - low, |high - prev_close|, |low - prev_close|)`
pub fn true_range(bar: &PriceBar, prev_close: Decimal) -> Decimal {
    let high_low = bar.high - bar.low;
    let high_close = (bar.high - prev_close).abs();
    let low_close = (bar.low - prev_close).abs();
    high_low.max(high_close).max(low_close)
}

/// Arithmetic mean of the true ranges of a time-ordered bar run.
///
/// The first bar has no previous close and only seeds the second one's true range, so at
/// least two bars are required.
pub fn average_true_range(bars: &[PriceBar]) -> Option<Decimal> {
    if bars.len() < 2 {
        return None;
    }
    let total: Decimal = bars
        .windows(2)
        .map(|pair| true_range(&pair[1], pair[0].close))
        .sum();
    total.checked_div(Decimal::from(bars.len() - 1))
}

/// ATR over the last `period` true ranges, i.e. the trailing `period + 1` bars.
pub fn trailing_atr(bars: &[PriceBar], period: usize) -> Option<Decimal> {
    let take = period + 1;
    let start = bars.len().saturating_sub(take);
    average_true_range(&bars[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::InstrumentId;
    use crate::timeframe::Timeframe;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn bar(day: u32, high: Decimal, low: Decimal, close: Decimal) -> PriceBar {
        PriceBar {
            instrument_id: InstrumentId(1),
            timeframe: Timeframe::OneDay,
            timestamp: NaiveDate::from_ymd_opt(2025, 1, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: close,
            high,
            low,
            close,
            volume: dec!(1000),
        }
    }

    #[test]
    fn atr_is_mean_of_high_low_when_it_dominates() {
        // Each close sits inside the next bar's range, so high - low wins every time.
        let bars = vec![
            bar(13, dec!(101), dec!(99), dec!(100)),
            bar(14, dec!(103), dec!(98), dec!(101)),
            bar(15, dec!(104), dec!(100), dec!(102)),
        ];
        // (5 + 4) / 2
        assert_eq!(average_true_range(&bars), Some(dec!(4.5)));
    }

    #[test]
    fn true_range_uses_gap_from_previous_close() {
        // Gap up: previous close 90, bar trades 100..102.
        let b = bar(14, dec!(102), dec!(100), dec!(101));
        assert_eq!(true_range(&b, dec!(90)), dec!(12));
    }

    #[test]
    fn atr_needs_two_bars() {
        assert_eq!(average_true_range(&[]), None);
        assert_eq!(
            average_true_range(&[bar(13, dec!(101), dec!(99), dec!(100))]),
            None
        );
    }

    #[test]
    fn trailing_atr_uses_last_period_plus_one_bars() {
        let bars = vec![
            bar(10, dec!(200), dec!(100), dec!(150)), // excluded
            bar(13, dec!(101), dec!(99), dec!(100)),
            bar(14, dec!(103), dec!(98), dec!(101)),
            bar(15, dec!(104), dec!(100), dec!(102)),
        ];
        assert_eq!(trailing_atr(&bars, 2), Some(dec!(4.5)));
        assert_eq!(trailing_atr(&bars[1..], ATR_PERIOD), Some(dec!(4.5)));
    }
}
