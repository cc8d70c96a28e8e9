//! Relative strength / weakness against a benchmark, with each side's move normalized by
//! its own ATR.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use super::series::BarSeries;
use crate::timeframe::Bucket;

/// `((close - open) / open) / atr`, or `None` when `open` or `atr` is zero.
pub fn normalized_move(open: Decimal, close: Decimal, atr: Decimal) -> Option<Decimal> {
    let movement = (close - open).checked_div(open)?;
    movement.checked_div(atr)
}

/// Combine the instrument's and the benchmark's normalized moves.
///
/// Same sign: plain ratio. Opposite signs (or a flat side): ratio of each side's share of
/// the total magnitude, negative when the instrument fell, so an instrument rising against
/// a falling benchmark always scores positive.
pub fn combine(instrument: Decimal, benchmark: Decimal) -> Option<Decimal> {
    let same_sign = (instrument > Decimal::ZERO && benchmark > Decimal::ZERO)
        || (instrument < Decimal::ZERO && benchmark < Decimal::ZERO);

    let strength = if same_sign {
        instrument.checked_div(benchmark)?
    } else {
        let total = instrument.abs() + benchmark.abs();
        if total.is_zero() {
            return Some(Decimal::ZERO);
        }
        let instrument_share = instrument.abs().checked_div(total)?;
        let benchmark_share = benchmark.abs().checked_div(total)?;
        let ratio = instrument_share.checked_div(benchmark_share)?;
        if instrument.is_sign_negative() {
            -ratio
        } else {
            ratio
        }
    };
    Some(strength.round_dp(2))
}

/// RS/RW of `bucket` ending at `as_of`.
///
/// Both series need a bar at the bucket's first timestamp and at `as_of`, and both ATRs must
/// be known and non-zero.
pub fn relative_strength(
    series: &BarSeries,
    benchmark: &BarSeries,
    as_of: NaiveDateTime,
    bucket: Bucket,
    atr: Option<Decimal>,
    benchmark_atr: Option<Decimal>,
) -> Option<Decimal> {
    let start = bucket.window_start(as_of);

    let open = series.get(start)?.open;
    let close = series.get(as_of)?.close;
    let benchmark_open = benchmark.get(start)?.open;
    let benchmark_close = benchmark.get(as_of)?.close;

    let instrument_move = normalized_move(open, close, atr?)?;
    let benchmark_move = normalized_move(benchmark_open, benchmark_close, benchmark_atr?)?;
    combine(instrument_move, benchmark_move)
}
