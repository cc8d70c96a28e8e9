use market_pulse_core::analytics::atr::{ATR_PERIOD, trailing_atr};
use market_pulse_core::bar::PriceBar;
use market_pulse_core::indicator::DailyIndicator;
use market_pulse_core::timeframe::Timeframe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::pipeline::{IngestionPipeline, collect_bars};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyImportReport {
    pub bar_count: usize,
    pub indicator_count: usize,
    pub missing_symbols: Vec<String>,
}

/// One indicator per instrument from its daily bars, dated by its latest bar. Bars must be
/// grouped by instrument and ascending in time.
fn indicators_from_bars(bars: &[PriceBar]) -> Vec<DailyIndicator> {
    bars.chunk_by(|a, b| a.instrument_id == b.instrument_id)
        .filter_map(|run| {
            let latest = run.last()?;
            match trailing_atr(run, ATR_PERIOD) {
                Some(atr) => Some(DailyIndicator {
                    instrument_id: latest.instrument_id,
                    date: latest.timestamp.date(),
                    atr,
                }),
                None => {
                    debug!(
                        instrument_id = %latest.instrument_id,
                        bars = run.len(),
                        "too few daily bars for ATR"
                    );
                    None
                }
            }
        })
        .collect()
}

impl IngestionPipeline {
    /// Refresh daily bars for every active instrument and rebuild the daily ATR set.
    pub async fn import_daily_indicators(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DailyImportReport, IngestError> {
        let lock = self.timeframe_lock(Timeframe::OneDay);
        let _guard = lock.lock().await;

        let instruments = self.store.active_instruments()?;
        let symbols: Vec<String> = instruments.iter().map(|i| i.symbol.clone()).collect();
        info!(count = instruments.len(), "importing daily indicators");

        let fetched = self
            .client
            .fetch_series(
                &symbols,
                Timeframe::OneDay,
                None,
                None,
                (ATR_PERIOD + 1) as u32,
                cancel,
            )
            .await
            .ok_or(IngestError::Cancelled)?;

        let (mut bars, missing) = collect_bars(&instruments, Timeframe::OneDay, &fetched);
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        bars.sort_by_key(|b| (b.instrument_id, b.timestamp));

        let bar_count = self.store.upsert_bars(&bars)?;
        let indicators = indicators_from_bars(&bars);
        self.store.replace_daily_indicators(&indicators)?;

        let missing_symbols: Vec<String> = missing.iter().map(|i| i.symbol.clone()).collect();
        if !missing_symbols.is_empty() {
            warn!(symbols = ?missing_symbols, "no daily bars for some symbols");
        }
        info!(
            bars = bar_count,
            indicators = indicators.len(),
            "daily indicator import complete"
        );

        Ok(DailyImportReport {
            bar_count,
            indicator_count: indicators.len(),
            missing_symbols,
        })
    }
}
