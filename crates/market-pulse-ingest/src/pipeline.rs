use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDateTime;
use market_pulse_core::bar::PriceBar;
use market_pulse_core::clock::exchange_now;
use market_pulse_core::instrument::{Instrument, InstrumentId};
use market_pulse_core::ledger::RetryLedgerEntry;
use market_pulse_core::store::MarketStore;
use market_pulse_core::timeframe::{BASE_TIMEFRAME, RunWindow, Timeframe};
use market_pulse_providers::client::{ProviderClient, SeriesBySymbol, SymbolSeries};
use market_pulse_providers::notify::{Notification, Notifier};
use market_pulse_providers::provider::{SeriesProvider, SeriesValue};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{FAILURE_PRIORITY, FAILURE_TITLE, IngestConfig};
use crate::error::IngestError;

/// Full account of one ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionReport {
    pub success: bool,
    pub timeframe: Timeframe,
    pub window: RunWindow,
    /// Bars persisted from the window fetch.
    pub imported_count: usize,
    /// Symbols with no data in this run's window.
    pub failed_symbols: Vec<String>,
    /// Ledger entries recovered by the drain.
    pub recovered_count: usize,
    /// Symbols still in the ledger after every drain attempt.
    pub unrecovered_symbols: Vec<String>,
    /// False when fewer symbols than requested returned data, or any bar had no volume.
    pub healthy: bool,
}

/// Flat result handed to schedulers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionOutcome {
    pub success: bool,
    pub imported_count: usize,
    pub failed_symbols: Vec<String>,
}

impl From<IngestionReport> for IngestionOutcome {
    fn from(report: IngestionReport) -> Self {
        Self {
            success: report.success,
            imported_count: report.imported_count,
            failed_symbols: report.failed_symbols,
        }
    }
}

#[derive(Debug, Default)]
struct DrainSummary {
    recovered: usize,
    unrecovered: Vec<String>,
}

pub(crate) fn to_price_bar(
    instrument_id: InstrumentId,
    timeframe: Timeframe,
    value: &SeriesValue,
) -> PriceBar {
    PriceBar {
        instrument_id,
        timeframe,
        timestamp: value.datetime,
        open: value.open,
        high: value.high,
        low: value.low,
        close: value.close,
        volume: value.volume,
    }
}

/// Bars a provider must return to cover `window` at `timeframe`.
fn output_size_for(window: &RunWindow, timeframe: Timeframe) -> u32 {
    let span = (window.end - window.start).num_minutes().max(0);
    (span / timeframe.minutes() + 1).clamp(1, u32::MAX as i64) as u32
}

/// Sleep for `delay` unless cancelled first.
async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), IngestError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Fetches the latest bars for every active instrument, recovering earlier misses from the
/// retry ledger first.
///
/// Runs for the same timeframe are serialized; different timeframes may overlap.
pub struct IngestionPipeline {
    pub(crate) store: Arc<dyn MarketStore>,
    pub(crate) client: ProviderClient,
    notifier: Arc<dyn Notifier>,
    pub(crate) config: IngestConfig,
    locks: Mutex<HashMap<Timeframe, Arc<tokio::sync::Mutex<()>>>>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn MarketStore>,
        provider: Arc<dyn SeriesProvider>,
        notifier: Arc<dyn Notifier>,
        config: IngestConfig,
    ) -> Self {
        let client = ProviderClient::new(provider).with_chunk_size(config.chunk_size);
        Self {
            store,
            client,
            notifier,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn timeframe_lock(&self, timeframe: Timeframe) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(timeframe).or_default().clone()
    }

    /// Run one ingestion and flatten the result. Never fails; errors are logged and reported
    /// as `success = false`.
    pub async fn run_ingestion(
        &self,
        timeframe: Timeframe,
        window: Option<RunWindow>,
        cancel: &CancellationToken,
    ) -> IngestionOutcome {
        match self.run(timeframe, window, cancel).await {
            Ok(report) => report.into(),
            Err(e) => {
                error!(timeframe = %timeframe, "ingestion failed: {e}");
                IngestionOutcome {
                    success: false,
                    imported_count: 0,
                    failed_symbols: Vec::new(),
                }
            }
        }
    }

    /// Drain the ledger, fetch the window, persist, requeue misses and alert on anything the
    /// drain could not recover.
    ///
    /// `window` defaults to the last closed bar on the exchange clock. The retry ledger only
    /// tracks base-timeframe bars, so other timeframes skip the drain and requeue steps.
    pub async fn run(
        &self,
        timeframe: Timeframe,
        window: Option<RunWindow>,
        cancel: &CancellationToken,
    ) -> Result<IngestionReport, IngestError> {
        let lock = self.timeframe_lock(timeframe);
        let _guard = lock.lock().await;

        let window = window.unwrap_or_else(|| RunWindow::for_run(timeframe, exchange_now()));
        let instruments = self.store.active_instruments()?;
        let uses_ledger = timeframe == BASE_TIMEFRAME;

        info!(
            timeframe = %timeframe,
            start = %window.start,
            end = %window.end,
            count = instruments.len(),
            "starting ingestion"
        );

        let drain = if uses_ledger {
            self.drain_ledger(timeframe, &instruments, cancel).await?
        } else {
            DrainSummary::default()
        };

        let symbols: Vec<String> = instruments.iter().map(|i| i.symbol.clone()).collect();
        let fetched = self
            .client
            .fetch_series(
                &symbols,
                timeframe,
                Some(window.start),
                Some(window.end),
                output_size_for(&window, timeframe),
                cancel,
            )
            .await
            .ok_or(IngestError::Cancelled)?;

        let (bars, failed) = collect_bars(&instruments, timeframe, &fetched);
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let imported_count = self.store.upsert_bars(&bars)?;

        let healthy = self.detect_gaps(timeframe, &instruments, &failed, &bars);

        if uses_ledger {
            for instrument in &failed {
                let reason = match fetched.get(&instrument.symbol) {
                    Some(SymbolSeries::Missing(reason)) => reason.clone(),
                    _ => "no data returned".to_string(),
                };
                let entry = RetryLedgerEntry::new(instrument.id, window.end, reason);
                if self.store.insert_retry_if_absent(&entry)? {
                    debug!(
                        symbol = %instrument.symbol,
                        timestamp = %window.end,
                        "queued for retry"
                    );
                }
            }
        }

        if !drain.unrecovered.is_empty() {
            self.notify_unrecovered(&drain.unrecovered).await;
        }

        let failed_symbols: Vec<String> = failed.iter().map(|i| i.symbol.clone()).collect();
        info!(
            timeframe = %timeframe,
            imported = imported_count,
            failed = failed_symbols.len(),
            recovered = drain.recovered,
            unrecovered = drain.unrecovered.len(),
            "ingestion complete"
        );

        Ok(IngestionReport {
            success: true,
            timeframe,
            window,
            imported_count,
            failed_symbols,
            recovered_count: drain.recovered,
            unrecovered_symbols: drain.unrecovered,
            healthy,
        })
    }

    /// Re-fetch every ledger entry at its own timestamp, up to `drain_attempts` passes.
    /// Recovered bars are persisted before their entries are deleted.
    async fn drain_ledger(
        &self,
        timeframe: Timeframe,
        instruments: &[Instrument],
        cancel: &CancellationToken,
    ) -> Result<DrainSummary, IngestError> {
        let entries = self.store.list_retries()?;
        if entries.is_empty() {
            return Ok(DrainSummary::default());
        }

        let by_id: HashMap<InstrumentId, &Instrument> =
            instruments.iter().map(|i| (i.id, i)).collect();

        let mut pending: Vec<(RetryLedgerEntry, &Instrument)> = Vec::new();
        for entry in entries {
            match by_id.get(&entry.instrument_id) {
                Some(instrument) => pending.push((entry, *instrument)),
                None => warn!(
                    instrument_id = %entry.instrument_id,
                    timestamp = %entry.timestamp,
                    "retry entry for inactive instrument left in ledger"
                ),
            }
        }

        info!(count = pending.len(), "draining retry ledger");

        let mut recovered = 0;
        for attempt in 1..=self.config.drain_attempts {
            if pending.is_empty() {
                break;
            }
            if attempt > 1 {
                debug!(attempt, remaining = pending.len(), "waiting before next drain attempt");
                pause(self.config.drain_delay, cancel).await?;
            }

            let mut by_timestamp: BTreeMap<NaiveDateTime, Vec<(RetryLedgerEntry, &Instrument)>> =
                BTreeMap::new();
            for (entry, instrument) in pending.drain(..) {
                by_timestamp
                    .entry(entry.timestamp)
                    .or_default()
                    .push((entry, instrument));
            }

            for (timestamp, group) in by_timestamp {
                let symbols: Vec<String> = group.iter().map(|(_, i)| i.symbol.clone()).collect();
                let fetched = self
                    .client
                    .fetch_series(&symbols, timeframe, Some(timestamp), Some(timestamp), 1, cancel)
                    .await
                    .ok_or(IngestError::Cancelled)?;

                let mut bars = Vec::new();
                let mut done = Vec::new();
                for (entry, instrument) in group {
                    let value = match fetched.get(&instrument.symbol) {
                        Some(SymbolSeries::Present(values)) => {
                            values.iter().find(|v| v.datetime == timestamp)
                        }
                        _ => None,
                    };
                    match value {
                        Some(value) => {
                            bars.push(to_price_bar(instrument.id, timeframe, value));
                            done.push(entry);
                        }
                        None => pending.push((entry, instrument)),
                    }
                }

                if done.is_empty() {
                    continue;
                }
                if cancel.is_cancelled() {
                    return Err(IngestError::Cancelled);
                }
                self.store.upsert_bars(&bars)?;
                for entry in &done {
                    self.store.delete_retry(entry.instrument_id, entry.timestamp)?;
                }
                recovered += done.len();
                info!(timestamp = %timestamp, count = done.len(), "recovered ledger entries");
            }
        }

        let mut unrecovered: Vec<String> =
            pending.iter().map(|(_, i)| i.symbol.clone()).collect();
        unrecovered.sort();
        unrecovered.dedup();
        if !unrecovered.is_empty() {
            warn!(symbols = ?unrecovered, "ledger entries exhausted their drain attempts");
        }

        Ok(DrainSummary {
            recovered,
            unrecovered,
        })
    }

    fn detect_gaps(
        &self,
        timeframe: Timeframe,
        instruments: &[Instrument],
        failed: &[&Instrument],
        bars: &[PriceBar],
    ) -> bool {
        let with_data = instruments.len() - failed.len();
        let empty_volume = bars.iter().filter(|b| b.volume <= Decimal::ZERO).count();
        let healthy = with_data == instruments.len() && empty_volume == 0;
        if !healthy {
            warn!(
                timeframe = %timeframe,
                expected = instruments.len(),
                with_data,
                empty_volume,
                "ingestion gaps detected"
            );
        }
        healthy
    }

    async fn notify_unrecovered(&self, symbols: &[String]) {
        let notification = Notification::new(symbols.join(", "))
            .with_title(FAILURE_TITLE)
            .with_priority(FAILURE_PRIORITY);
        match self.notifier.send_notification(&notification).await {
            Ok(true) => {}
            Ok(false) => warn!("failure notification was not accepted"),
            Err(e) => error!("failed to send failure notification: {e}"),
        }
    }
}

/// Map every present series to bars; instruments without data are returned as failed.
pub(crate) fn collect_bars<'a>(
    instruments: &'a [Instrument],
    timeframe: Timeframe,
    fetched: &SeriesBySymbol,
) -> (Vec<PriceBar>, Vec<&'a Instrument>) {
    let mut bars = Vec::new();
    let mut failed = Vec::new();
    for instrument in instruments {
        match fetched.get(&instrument.symbol) {
            Some(SymbolSeries::Present(values)) => bars.extend(
                values
                    .iter()
                    .map(|v| to_price_bar(instrument.id, timeframe, v)),
            ),
            _ => failed.push(instrument),
        }
    }
    (bars, failed)
}
