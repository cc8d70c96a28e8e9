use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use crate::bar::PriceBar;
use crate::error::MarketDataError;
use crate::indicator::DailyIndicator;
use crate::instrument::{Instrument, InstrumentId};
use crate::ledger::RetryLedgerEntry;
use crate::store::{MarketStore, latest_atrs};
use crate::timeframe::Timeframe;

#[derive(Default)]
struct Tables {
    instruments: Vec<Instrument>,
    bars: BTreeMap<(Timeframe, InstrumentId, NaiveDateTime), PriceBar>,
    indicators: Vec<DailyIndicator>,
    ledger: BTreeMap<(NaiveDateTime, InstrumentId), RetryLedgerEntry>,
}

/// Process-local store used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instruments(instruments: Vec<Instrument>) -> Self {
        let store = Self::new();
        store.tables().instruments = instruments;
        store
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every stored bar, in key order.
    pub fn all_bars(&self) -> Vec<PriceBar> {
        self.tables().bars.values().cloned().collect()
    }
}

impl MarketStore for MemoryStore {
    fn active_instruments(&self) -> Result<Vec<Instrument>, MarketDataError> {
        Ok(self
            .tables()
            .instruments
            .iter()
            .filter(|i| i.active)
            .cloned()
            .collect())
    }

    fn upsert_bars(&self, bars: &[PriceBar]) -> Result<usize, MarketDataError> {
        let mut tables = self.tables();
        for bar in bars {
            tables.bars.insert(bar.key(), bar.clone());
        }
        Ok(bars.len())
    }

    fn truncate_bars(&self, timeframe: Timeframe) -> Result<(), MarketDataError> {
        self.tables().bars.retain(|(tf, _, _), _| *tf != timeframe);
        Ok(())
    }

    fn bars_between(
        &self,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<PriceBar>, MarketDataError> {
        Ok(self
            .tables()
            .bars
            .values()
            .filter(|b| b.timeframe == timeframe && b.timestamp >= start && b.timestamp <= end)
            .cloned()
            .collect())
    }

    fn replace_daily_indicators(
        &self,
        indicators: &[DailyIndicator],
    ) -> Result<(), MarketDataError> {
        self.tables().indicators = indicators.to_vec();
        Ok(())
    }

    fn daily_atrs(&self) -> Result<HashMap<InstrumentId, Decimal>, MarketDataError> {
        Ok(latest_atrs(&self.tables().indicators))
    }

    fn insert_retry_if_absent(&self, entry: &RetryLedgerEntry) -> Result<bool, MarketDataError> {
        let mut tables = self.tables();
        let key = (entry.timestamp, entry.instrument_id);
        if tables.ledger.contains_key(&key) {
            return Ok(false);
        }
        tables.ledger.insert(key, entry.clone());
        Ok(true)
    }

    fn delete_retry(
        &self,
        instrument_id: InstrumentId,
        timestamp: NaiveDateTime,
    ) -> Result<bool, MarketDataError> {
        Ok(self
            .tables()
            .ledger
            .remove(&(timestamp, instrument_id))
            .is_some())
    }

    fn list_retries(&self) -> Result<Vec<RetryLedgerEntry>, MarketDataError> {
        Ok(self.tables().ledger.values().cloned().collect())
    }

    fn clear_retries(&self) -> Result<(), MarketDataError> {
        self.tables().ledger.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn ledger_never_holds_duplicates() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store
                .insert_retry_if_absent(&RetryLedgerEntry::new(InstrumentId(529), at(10), "null"))
                .unwrap();
        }
        store
            .insert_retry_if_absent(&RetryLedgerEntry::new(InstrumentId(1), at(10), "null"))
            .unwrap();
        assert_eq!(store.list_retries().unwrap().len(), 2);
    }

    #[test]
    fn bars_between_filters_timeframe() {
        let store = MemoryStore::new();
        let bar = PriceBar {
            instrument_id: InstrumentId(1),
            timeframe: Timeframe::FiveMin,
            timestamp: at(10),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            volume: Decimal::ONE,
        };
        let mut daily = bar.clone();
        daily.timeframe = Timeframe::OneDay;
        store.upsert_bars(&[bar, daily]).unwrap();

        let bars = store
            .bars_between(Timeframe::FiveMin, at(0), at(23))
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timeframe, Timeframe::FiveMin);
    }

    #[test]
    fn upsert_replaces_bar_with_same_key() {
        let store = MemoryStore::new();
        let mut bar = PriceBar {
            instrument_id: InstrumentId(1),
            timeframe: Timeframe::FiveMin,
            timestamp: at(10),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            volume: Decimal::ONE,
        };
        store.upsert_bars(std::slice::from_ref(&bar)).unwrap();
        bar.close = Decimal::TWO;
        store.upsert_bars(std::slice::from_ref(&bar)).unwrap();

        let bars = store.all_bars();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, Decimal::TWO);

        store.truncate_bars(Timeframe::FiveMin).unwrap();
        assert!(store.all_bars().is_empty());
    }
}
