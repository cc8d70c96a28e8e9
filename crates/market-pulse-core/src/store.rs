use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tracing::debug;

use crate::bar::PriceBar;
use crate::error::MarketDataError;
use crate::indicator::DailyIndicator;
use crate::instrument::{Instrument, InstrumentId};
use crate::ledger::RetryLedgerEntry;
use crate::schema;
use crate::timeframe::Timeframe;

/// Persistence operations the ingestion pipeline and analytics engine rely on.
pub trait MarketStore: Send + Sync {
    /// All instruments flagged active.
    fn active_instruments(&self) -> Result<Vec<Instrument>, MarketDataError>;

    /// Insert bars, overwriting any stored bar with the same key. Returns the number written.
    fn upsert_bars(&self, bars: &[PriceBar]) -> Result<usize, MarketDataError>;

    /// Remove every stored bar of a timeframe.
    fn truncate_bars(&self, timeframe: Timeframe) -> Result<(), MarketDataError>;

    /// Bars of a timeframe with `start <= timestamp <= end`, sorted by instrument then time.
    fn bars_between(
        &self,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<PriceBar>, MarketDataError>;

    /// Replace the whole daily indicator set.
    fn replace_daily_indicators(&self, indicators: &[DailyIndicator])
    -> Result<(), MarketDataError>;

    /// Latest ATR per instrument.
    fn daily_atrs(&self) -> Result<HashMap<InstrumentId, Decimal>, MarketDataError>;

    /// Insert unless an entry for the same `(instrument_id, timestamp)` exists.
    /// Returns whether an entry was inserted.
    fn insert_retry_if_absent(&self, entry: &RetryLedgerEntry) -> Result<bool, MarketDataError>;

    /// Delete the entry for `(instrument_id, timestamp)`. Returns whether one existed.
    fn delete_retry(
        &self,
        instrument_id: InstrumentId,
        timestamp: NaiveDateTime,
    ) -> Result<bool, MarketDataError>;

    /// Every ledger entry, sorted by timestamp then instrument.
    fn list_retries(&self) -> Result<Vec<RetryLedgerEntry>, MarketDataError>;

    fn clear_retries(&self) -> Result<(), MarketDataError>;
}

/// Reduce a daily indicator set to the most recent ATR per instrument.
pub fn latest_atrs(indicators: &[DailyIndicator]) -> HashMap<InstrumentId, Decimal> {
    let mut latest: HashMap<InstrumentId, &DailyIndicator> = HashMap::new();
    for indicator in indicators {
        latest
            .entry(indicator.instrument_id)
            .and_modify(|current| {
                if indicator.date >= current.date {
                    *current = indicator;
                }
            })
            .or_insert(indicator);
    }
    latest
        .into_iter()
        .map(|(id, indicator)| (id, indicator.atr))
        .collect()
}

fn sort_ledger(entries: &mut [RetryLedgerEntry]) {
    entries.sort_by_key(|e| (e.timestamp, e.instrument_id));
}

/// Filesystem-backed store: bars in Parquet, instruments in JSON.
///
/// Directory layout under `root`:
///
/// ```text
/// instruments.json
/// bars/{TIMEFRAME}/{INSTRUMENT_ID}/{YYYY}/{MM}/{YYYY-MM-DD}.parquet
/// daily_indicators.parquet
/// retry_ledger.parquet
/// ```
pub struct ParquetStore {
    root: PathBuf,
    ledger_lock: Mutex<()>,
}

impl ParquetStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            ledger_lock: Mutex::new(()),
        }
    }

    pub fn instruments_path(&self) -> PathBuf {
        self.root.join("instruments.json")
    }

    fn timeframe_dir(&self, timeframe: Timeframe) -> PathBuf {
        self.root.join("bars").join(timeframe.as_str())
    }

    /// Path to the Parquet file holding one instrument's bars for one day.
    pub fn bar_file_path(
        &self,
        timeframe: Timeframe,
        instrument_id: InstrumentId,
        date: NaiveDate,
    ) -> PathBuf {
        self.timeframe_dir(timeframe)
            .join(instrument_id.to_string())
            .join(date.format("%Y").to_string())
            .join(date.format("%m").to_string())
            .join(format!("{}.parquet", date.format("%Y-%m-%d")))
    }

    fn indicators_path(&self) -> PathBuf {
        self.root.join("daily_indicators.parquet")
    }

    fn ledger_path(&self) -> PathBuf {
        self.root.join("retry_ledger.parquet")
    }

    /// Overwrite the instrument list. Instruments are administered outside the engine; this
    /// exists for provisioning a data directory.
    pub fn write_instruments(&self, instruments: &[Instrument]) -> Result<(), MarketDataError> {
        std::fs::create_dir_all(&self.root)?;
        let json = serde_json::to_string_pretty(instruments)?;
        std::fs::write(self.instruments_path(), json)?;
        Ok(())
    }

    fn read_all_instruments(&self) -> Result<Vec<Instrument>, MarketDataError> {
        let path = self.instruments_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn read_bar_file(
        &self,
        timeframe: Timeframe,
        instrument_id: InstrumentId,
        date: NaiveDate,
    ) -> Result<Vec<PriceBar>, MarketDataError> {
        let path = self.bar_file_path(timeframe, instrument_id, date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut bars = Vec::new();
        for batch in schema::read_parquet(&path)? {
            bars.extend(schema::record_batch_to_bars(&batch, instrument_id, timeframe)?);
        }
        Ok(bars)
    }

    /// Instrument ids that have a bar directory for the timeframe.
    fn stored_instruments(
        &self,
        timeframe: Timeframe,
    ) -> Result<Vec<InstrumentId>, MarketDataError> {
        let dir = self.timeframe_dir(timeframe);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(id) = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.parse::<i32>().ok())
            {
                ids.push(InstrumentId(id));
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn read_ledger(&self) -> Result<Vec<RetryLedgerEntry>, MarketDataError> {
        let path = self.ledger_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for batch in schema::read_parquet(&path)? {
            entries.extend(schema::record_batch_to_ledger(&batch)?);
        }
        Ok(entries)
    }

    fn write_ledger(&self, entries: &[RetryLedgerEntry]) -> Result<(), MarketDataError> {
        std::fs::create_dir_all(&self.root)?;
        let batch = schema::ledger_to_record_batch(entries)?;
        schema::write_parquet(&self.ledger_path(), &batch)
    }

    fn read_indicators(&self) -> Result<Vec<DailyIndicator>, MarketDataError> {
        let path = self.indicators_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut indicators = Vec::new();
        for batch in schema::read_parquet(&path)? {
            indicators.extend(schema::record_batch_to_indicators(&batch)?);
        }
        Ok(indicators)
    }
}

impl MarketStore for ParquetStore {
    fn active_instruments(&self) -> Result<Vec<Instrument>, MarketDataError> {
        Ok(self
            .read_all_instruments()?
            .into_iter()
            .filter(|i| i.active)
            .collect())
    }

    fn upsert_bars(&self, bars: &[PriceBar]) -> Result<usize, MarketDataError> {
        let mut by_file: BTreeMap<(Timeframe, InstrumentId, NaiveDate), Vec<&PriceBar>> =
            BTreeMap::new();
        for bar in bars {
            by_file
                .entry((bar.timeframe, bar.instrument_id, bar.timestamp.date()))
                .or_default()
                .push(bar);
        }

        for ((timeframe, instrument_id, date), new_bars) in by_file {
            let path = self.bar_file_path(timeframe, instrument_id, date);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut merged: BTreeMap<NaiveDateTime, PriceBar> = self
                .read_bar_file(timeframe, instrument_id, date)?
                .into_iter()
                .map(|b| (b.timestamp, b))
                .collect();
            for bar in new_bars {
                merged.insert(bar.timestamp, bar.clone());
            }

            let day: Vec<PriceBar> = merged.into_values().collect();
            schema::write_parquet(&path, &schema::bars_to_record_batch(&day)?)?;
            debug!(%timeframe, %instrument_id, %date, bars = day.len(), "wrote bar file");
        }

        Ok(bars.len())
    }

    fn truncate_bars(&self, timeframe: Timeframe) -> Result<(), MarketDataError> {
        let dir = self.timeframe_dir(timeframe);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    fn bars_between(
        &self,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<PriceBar>, MarketDataError> {
        let mut all_bars = Vec::new();
        if start > end {
            return Ok(all_bars);
        }

        for instrument_id in self.stored_instruments(timeframe)? {
            for date in start.date().iter_days().take_while(|d| *d <= end.date()) {
                let bars = self.read_bar_file(timeframe, instrument_id, date)?;
                all_bars.extend(
                    bars.into_iter()
                        .filter(|b| b.timestamp >= start && b.timestamp <= end),
                );
            }
        }

        all_bars.sort_by_key(|b| (b.instrument_id, b.timestamp));
        Ok(all_bars)
    }

    fn replace_daily_indicators(
        &self,
        indicators: &[DailyIndicator],
    ) -> Result<(), MarketDataError> {
        std::fs::create_dir_all(&self.root)?;
        let batch = schema::indicators_to_record_batch(indicators)?;
        schema::write_parquet(&self.indicators_path(), &batch)
    }

    fn daily_atrs(&self) -> Result<HashMap<InstrumentId, Decimal>, MarketDataError> {
        Ok(latest_atrs(&self.read_indicators()?))
    }

    fn insert_retry_if_absent(&self, entry: &RetryLedgerEntry) -> Result<bool, MarketDataError> {
        let _guard = self.ledger_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.read_ledger()?;
        if entries.iter().any(|e| e.key() == entry.key()) {
            return Ok(false);
        }
        entries.push(entry.clone());
        sort_ledger(&mut entries);
        self.write_ledger(&entries)?;
        Ok(true)
    }

    fn delete_retry(
        &self,
        instrument_id: InstrumentId,
        timestamp: NaiveDateTime,
    ) -> Result<bool, MarketDataError> {
        let _guard = self.ledger_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.read_ledger()?;
        let before = entries.len();
        entries.retain(|e| e.key() != (instrument_id, timestamp));
        if entries.len() == before {
            return Ok(false);
        }
        self.write_ledger(&entries)?;
        Ok(true)
    }

    fn list_retries(&self) -> Result<Vec<RetryLedgerEntry>, MarketDataError> {
        let _guard = self.ledger_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.read_ledger()?;
        sort_ledger(&mut entries);
        Ok(entries)
    }

    fn clear_retries(&self) -> Result<(), MarketDataError> {
        let _guard = self.ledger_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.ledger_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
