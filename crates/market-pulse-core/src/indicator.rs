use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::instrument::InstrumentId;

/// Daily ATR for one instrument. The whole set is replaced on every daily-indicator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyIndicator {
    pub instrument_id: InstrumentId,
    pub date: NaiveDate,
    pub atr: Decimal,
}
