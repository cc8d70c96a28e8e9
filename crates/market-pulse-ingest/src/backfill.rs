use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use market_pulse_core::clock::exchange_now;
use market_pulse_core::timeframe::{BASE_TIMEFRAME, RunWindow, Timeframe};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::BACKFILL_LOOKBACK_DAYS;
use crate::error::IngestError;
use crate::pipeline::{IngestionPipeline, collect_bars};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub timeframe: Timeframe,
    pub window: RunWindow,
    pub imported_count: usize,
    pub missing_symbols: Vec<String>,
}

/// Default historical window at `now`: the regular-session open `BACKFILL_LOOKBACK_DAYS` ago
/// through the most recent `timeframe` boundary.
pub fn backfill_window(timeframe: Timeframe, now: NaiveDateTime) -> RunWindow {
    let open = NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN);
    let start = (now.date() - TimeDelta::days(BACKFILL_LOOKBACK_DAYS)).and_time(open);
    RunWindow::new(start, timeframe.floor(now))
}

impl IngestionPipeline {
    /// Replace all stored bars of `timeframe` with a fresh fetch of `window` for every active
    /// instrument. A base-timeframe backfill also clears the retry ledger, which only tracks
    /// base-timeframe bars.
    ///
    /// The fetch completes before anything is truncated. Symbols without data are reported
    /// but never queued for retry.
    pub async fn backfill(
        &self,
        timeframe: Timeframe,
        window: Option<RunWindow>,
        output_size: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<BackfillReport, IngestError> {
        let lock = self.timeframe_lock(timeframe);
        let _guard = lock.lock().await;

        let window = window.unwrap_or_else(|| backfill_window(timeframe, exchange_now()));
        let output_size = output_size.unwrap_or(self.config.backfill_output_size);
        let instruments = self.store.active_instruments()?;

        info!(
            timeframe = %timeframe,
            start = %window.start,
            end = %window.end,
            count = instruments.len(),
            "starting backfill"
        );

        let symbols: Vec<String> = instruments.iter().map(|i| i.symbol.clone()).collect();
        let fetched = self
            .client
            .fetch_series(
                &symbols,
                timeframe,
                Some(window.start),
                Some(window.end),
                output_size,
                cancel,
            )
            .await
            .ok_or(IngestError::Cancelled)?;

        let (bars, missing) = collect_bars(&instruments, timeframe, &fetched);
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        self.store.truncate_bars(timeframe)?;
        if timeframe == BASE_TIMEFRAME {
            self.store.clear_retries()?;
        }
        let imported_count = self.store.upsert_bars(&bars)?;

        let missing_symbols: Vec<String> = missing.iter().map(|i| i.symbol.clone()).collect();
        if !missing_symbols.is_empty() {
            warn!(symbols = ?missing_symbols, "backfill returned no data for some symbols");
        }
        info!(timeframe = %timeframe, imported = imported_count, "backfill complete");

        Ok(BackfillReport {
            timeframe,
            window,
            imported_count,
            missing_symbols,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::testing::{FakeProvider, RecordingNotifier, value};
    use chrono::NaiveDate;
    use market_pulse_core::bar::PriceBar;
    use market_pulse_core::instrument::{Instrument, InstrumentId};
    use market_pulse_core::ledger::RetryLedgerEntry;
    use market_pulse_core::memory::MemoryStore;
    use market_pulse_core::store::MarketStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn default_window_spans_thirty_days() {
        let window = backfill_window(Timeframe::FiveMin, at(31, 10, 7));
        assert_eq!(window.start, at(1, 9, 30));
        assert_eq!(window.end, at(31, 10, 5));

        let window = backfill_window(Timeframe::FifteenMin, at(31, 10, 7));
        assert_eq!(window.end, at(31, 10, 0));
    }

    #[tokio::test]
    async fn backfill_replaces_bars_and_clears_ledger() {
        let store = Arc::new(MemoryStore::with_instruments(vec![
            Instrument::new(1, "AAPL"),
            Instrument::new(529, "SPY"),
        ]));
        store
            .upsert_bars(&[PriceBar {
                instrument_id: InstrumentId(1),
                timeframe: Timeframe::FiveMin,
                timestamp: at(2, 9, 35),
                open: dec!(1),
                high: dec!(1),
                low: dec!(1),
                close: dec!(1),
                volume: dec!(1),
            }])
            .unwrap();
        store
            .insert_retry_if_absent(&RetryLedgerEntry::new(
                InstrumentId(529),
                at(2, 9, 35),
                "x",
            ))
            .unwrap();

        let provider = Arc::new(FakeProvider::with_bars([(
            "AAPL",
            vec![
                value(at(14, 9, 35), dec!(10), dec!(100)),
                value(at(14, 9, 40), dec!(11), dec!(100)),
            ],
        )]));
        let pipeline = IngestionPipeline::new(
            store.clone(),
            provider.clone(),
            Arc::new(RecordingNotifier::default()),
            IngestConfig::default(),
        );

        let report = pipeline
            .backfill(
                Timeframe::FiveMin,
                Some(RunWindow::new(at(14, 9, 30), at(14, 16, 0))),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.imported_count, 2);
        assert_eq!(report.missing_symbols, vec!["SPY"]);
        // Missing symbols are not queued, and the old ledger is gone.
        assert!(store.list_retries().unwrap().is_empty());

        let timestamps: Vec<_> = store.all_bars().iter().map(|b| b.timestamp).collect();
        assert_eq!(timestamps, vec![at(14, 9, 35), at(14, 9, 40)]);
        assert_eq!(provider.requests.lock().unwrap()[0].output_size, 5000);
    }

    #[tokio::test]
    async fn hourly_backfill_keeps_base_ledger() {
        let store = Arc::new(MemoryStore::with_instruments(vec![Instrument::new(529, "SPY")]));
        store
            .insert_retry_if_absent(&RetryLedgerEntry::new(
                InstrumentId(529),
                at(14, 9, 35),
                "null",
            ))
            .unwrap();
        let provider = Arc::new(FakeProvider::with_bars([(
            "SPY",
            vec![value(at(14, 10, 0), dec!(590), dec!(1000))],
        )]));
        let pipeline = IngestionPipeline::new(
            store.clone(),
            provider,
            Arc::new(RecordingNotifier::default()),
            IngestConfig::default(),
        );

        let report = pipeline
            .backfill(
                Timeframe::OneHour,
                Some(RunWindow::new(at(14, 9, 30), at(14, 16, 0))),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.imported_count, 1);
        let entries = store.list_retries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timestamp, at(14, 9, 35));
        assert!(
            store
                .bars_between(Timeframe::FiveMin, at(14, 0, 0), at(14, 23, 0))
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn cancelled_backfill_keeps_existing_data() {
        let store = Arc::new(MemoryStore::with_instruments(vec![Instrument::new(1, "AAPL")]));
        store
            .insert_retry_if_absent(&RetryLedgerEntry::new(InstrumentId(1), at(2, 9, 35), "x"))
            .unwrap();
        let pipeline = IngestionPipeline::new(
            store.clone(),
            Arc::new(FakeProvider::default()),
            Arc::new(RecordingNotifier::default()),
            IngestConfig::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pipeline
            .backfill(Timeframe::FiveMin, None, Some(10), &cancel)
            .await;
        assert!(matches!(result, Err(IngestError::Cancelled)));
        assert_eq!(store.list_retries().unwrap().len(), 1);
    }
}
