use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use crate::bar::PriceBar;

/// One instrument's bars indexed by timestamp.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    bars: BTreeMap<NaiveDateTime, PriceBar>,
}

impl BarSeries {
    pub fn new(bars: impl IntoIterator<Item = PriceBar>) -> Self {
        Self {
            bars: bars.into_iter().map(|b| (b.timestamp, b)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// The bar stamped exactly `timestamp`.
    pub fn get(&self, timestamp: NaiveDateTime) -> Option<&PriceBar> {
        self.bars.get(&timestamp)
    }

    pub fn latest(&self) -> Option<&PriceBar> {
        self.bars.values().next_back()
    }

    /// Sum of volume over bars with `start <= timestamp <= end`.
    pub fn volume_between(&self, start: NaiveDateTime, end: NaiveDateTime) -> Decimal {
        if start > end {
            return Decimal::ZERO;
        }
        self.bars.range(start..=end).map(|(_, b)| b.volume).sum()
    }
}
