use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::instrument::InstrumentId;
use crate::timeframe::Timeframe;

/// One OHLCV interval for one instrument.
///
/// `timestamp` is the bar's open time on the exchange-local (New York) wall clock, exactly as
/// the provider reports it. A bar is identified by its timeframe, instrument and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBar {
    pub instrument_id: InstrumentId,
    pub timeframe: Timeframe,
    pub timestamp: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl PriceBar {
    /// Identity key, ordered so one timeframe's bars sort together.
    pub fn key(&self) -> (Timeframe, InstrumentId, NaiveDateTime) {
        (self.timeframe, self.instrument_id, self.timestamp)
    }
}
