use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use super::rsrw::relative_strength;
use super::rvol::{RvolPolicy, relative_volume};
use super::series::BarSeries;
use crate::bar::PriceBar;
use crate::clock;
use crate::error::MarketDataError;
use crate::instrument::{Instrument, InstrumentId, find_by_symbol};
use crate::store::MarketStore;
use crate::timeframe::{BASE_TIMEFRAME, Bucket};

pub const DEFAULT_BENCHMARK_SYMBOL: &str = "SPY";
/// Calendar days of base-interval history searched by one statistics run. Loading starts at
/// midnight one day earlier, so a window on the oldest day is never cut off.
pub const HISTORY_LOOKBACK_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub benchmark_symbol: String,
    pub lookback_days: i64,
    pub buckets: Vec<Bucket>,
    pub rvol: RvolPolicy,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            benchmark_symbol: DEFAULT_BENCHMARK_SYMBOL.to_string(),
            lookback_days: HISTORY_LOOKBACK_DAYS,
            buckets: Bucket::ALL.to_vec(),
            rvol: RvolPolicy::default(),
        }
    }
}

/// RVOL and RS/RW for one bucket. `None` means "not computable", e.g. too little history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketStatistics {
    pub rvol: Option<Decimal>,
    pub rsrw: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub instrument_id: InstrumentId,
    pub symbol: String,
    pub atr: Option<Decimal>,
    pub last_price: Decimal,
    pub last_timestamp: NaiveDateTime,
    pub buckets: BTreeMap<Bucket, BucketStatistics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsReport {
    pub snapshots: Vec<StatisticsSnapshot>,
    pub success: bool,
    pub count: usize,
}

impl StatisticsReport {
    fn failed() -> Self {
        Self {
            snapshots: Vec::new(),
            success: false,
            count: 0,
        }
    }
}

/// Read-only inputs for one statistics run.
pub struct Dataset {
    series: HashMap<InstrumentId, BarSeries>,
    atrs: HashMap<InstrumentId, Decimal>,
}

impl Dataset {
    pub fn new(bars: Vec<PriceBar>, atrs: HashMap<InstrumentId, Decimal>) -> Self {
        let mut grouped: HashMap<InstrumentId, Vec<PriceBar>> = HashMap::new();
        for bar in bars {
            grouped.entry(bar.instrument_id).or_default().push(bar);
        }
        Self {
            series: grouped
                .into_iter()
                .map(|(id, bars)| (id, BarSeries::new(bars)))
                .collect(),
            atrs,
        }
    }

    pub fn series(&self, id: InstrumentId) -> Option<&BarSeries> {
        self.series.get(&id).filter(|s| !s.is_empty())
    }

    pub fn atr(&self, id: InstrumentId) -> Option<Decimal> {
        self.atrs.get(&id).copied()
    }
}

pub struct AnalyticsEngine {
    config: AnalyticsConfig,
}

impl AnalyticsEngine {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self { config }
    }

    /// Snapshot every instrument that has bars in `dataset`, in parallel.
    ///
    /// Instruments without bars are left out. `benchmark` is the instrument RS/RW is measured
    /// against; without it every RS/RW is `None`.
    pub fn compute(
        &self,
        instruments: &[Instrument],
        dataset: &Dataset,
        benchmark: Option<InstrumentId>,
    ) -> Vec<StatisticsSnapshot> {
        let empty = BarSeries::default();
        let benchmark_series = benchmark
            .and_then(|id| dataset.series(id))
            .unwrap_or(&empty);
        let benchmark_atr = benchmark.and_then(|id| dataset.atr(id));

        let mut snapshots: Vec<StatisticsSnapshot> = instruments
            .par_iter()
            .filter_map(|instrument| {
                self.snapshot(
                    instrument,
                    dataset.series(instrument.id)?,
                    dataset.atr(instrument.id),
                    benchmark_series,
                    benchmark_atr,
                )
            })
            .collect();

        snapshots.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        snapshots
    }

    fn snapshot(
        &self,
        instrument: &Instrument,
        series: &BarSeries,
        atr: Option<Decimal>,
        benchmark: &BarSeries,
        benchmark_atr: Option<Decimal>,
    ) -> Option<StatisticsSnapshot> {
        let last = series.latest()?;
        let (last_price, last_timestamp) = (last.close, last.timestamp);

        let buckets = self
            .config
            .buckets
            .iter()
            .map(|&bucket| {
                let stats = BucketStatistics {
                    rvol: relative_volume(series, last_timestamp, bucket, &self.config.rvol),
                    rsrw: relative_strength(
                        series,
                        benchmark,
                        last_timestamp,
                        bucket,
                        atr,
                        benchmark_atr,
                    ),
                };
                (bucket, stats)
            })
            .collect();

        Some(StatisticsSnapshot {
            instrument_id: instrument.id,
            symbol: instrument.symbol.clone(),
            atr: atr.map(|a| a.round_dp(2)),
            last_price,
            last_timestamp,
            buckets,
        })
    }

    /// Statistics as of `as_of` (now when `None`) for active instruments, optionally limited
    /// to `tickers`. Store failures give `success = false` and no snapshots.
    pub fn compute_statistics(
        &self,
        store: &dyn MarketStore,
        as_of: Option<NaiveDateTime>,
        tickers: Option<&[String]>,
    ) -> StatisticsReport {
        match self.load_and_compute(store, as_of, tickers) {
            Ok(snapshots) => {
                info!(count = snapshots.len(), "computed market statistics");
                StatisticsReport {
                    count: snapshots.len(),
                    snapshots,
                    success: true,
                }
            }
            Err(e) => {
                error!("failed to compute market statistics: {e}");
                StatisticsReport::failed()
            }
        }
    }

    fn load_and_compute(
        &self,
        store: &dyn MarketStore,
        as_of: Option<NaiveDateTime>,
        tickers: Option<&[String]>,
    ) -> Result<Vec<StatisticsSnapshot>, MarketDataError> {
        let end = as_of.unwrap_or_else(clock::exchange_now);
        let start = (end - TimeDelta::days(self.config.lookback_days + 1))
            .date()
            .and_time(NaiveTime::MIN);

        let active = store.active_instruments()?;
        let benchmark = find_by_symbol(&active, &self.config.benchmark_symbol).map(|i| i.id);
        if benchmark.is_none() {
            warn!(
                benchmark = %self.config.benchmark_symbol,
                "benchmark instrument is not active; RS/RW will be empty"
            );
        }

        let selected: Vec<Instrument> = match tickers {
            Some(list) if !list.is_empty() => active
                .into_iter()
                .filter(|i| list.iter().any(|t| t.eq_ignore_ascii_case(&i.symbol)))
                .collect(),
            _ => active,
        };

        let bars = store.bars_between(BASE_TIMEFRAME, start, end)?;
        let dataset = Dataset::new(bars, store.daily_atrs()?);

        Ok(self.compute(&selected, &dataset, benchmark))
    }
}

impl Default for AnalyticsEngine {
    fn default() -> Self {
        Self::new(AnalyticsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::DailyIndicator;
    use crate::memory::MemoryStore;
    use crate::timeframe::Timeframe;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn day_bars(
        id: i32,
        date: NaiveDate,
        open: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Vec<PriceBar> {
        let first = date.and_time(NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        (0..78)
            .map(|i| PriceBar {
                instrument_id: InstrumentId(id),
                timeframe: Timeframe::FiveMin,
                timestamp: first + TimeDelta::minutes(5 * i),
                open,
                high: open.max(close),
                low: open.min(close),
                close,
                volume,
            })
            .collect()
    }

    fn history(id: i32, volume: Decimal) -> Vec<PriceBar> {
        (0..=30)
            .flat_map(|d| day_bars(id, today() - TimeDelta::days(d), dec!(100), dec!(100), volume))
            .collect()
    }

    fn store_with(
        instruments: Vec<Instrument>,
        bars: Vec<PriceBar>,
        atrs: &[(i32, Decimal)],
    ) -> MemoryStore {
        let store = MemoryStore::with_instruments(instruments);
        store.upsert_bars(&bars).unwrap();
        let indicators: Vec<DailyIndicator> = atrs
            .iter()
            .map(|&(id, atr)| DailyIndicator {
                instrument_id: InstrumentId(id),
                date: today(),
                atr,
            })
            .collect();
        store.replace_daily_indicators(&indicators).unwrap();
        store
    }

    fn as_of() -> NaiveDateTime {
        today().and_hms_opt(16, 0, 0).unwrap()
    }

    #[test]
    fn snapshots_cover_every_bucket() {
        let mut bars = history(1, dec!(500));
        bars.extend(history(529, dec!(9000)));
        let store = store_with(
            vec![Instrument::new(1, "AAPL"), Instrument::new(529, "SPY")],
            bars,
            &[(1, dec!(3.456)), (529, dec!(5))],
        );

        let report = AnalyticsEngine::default().compute_statistics(&store, Some(as_of()), None);
        assert!(report.success);
        assert_eq!(report.count, 2);

        let aapl = &report.snapshots[0];
        assert_eq!(aapl.symbol, "AAPL");
        assert_eq!(aapl.atr, Some(dec!(3.46)));
        assert_eq!(aapl.last_price, dec!(100));
        assert_eq!(aapl.last_timestamp, today().and_hms_opt(15, 55, 0).unwrap());
        assert_eq!(aapl.buckets.len(), Bucket::ALL.len());
        for stats in aapl.buckets.values() {
            assert_eq!(stats.rvol, Some(dec!(100)));
            // Flat prices on both sides.
            assert_eq!(stats.rsrw, Some(Decimal::ZERO));
        }
    }

    #[test]
    fn instruments_without_bars_are_excluded() {
        let store = store_with(
            vec![
                Instrument::new(1, "AAPL"),
                Instrument::new(2, "MSFT"),
                Instrument::new(529, "SPY"),
            ],
            history(1, dec!(500)),
            &[],
        );

        let report = AnalyticsEngine::default().compute_statistics(&store, Some(as_of()), None);
        assert!(report.success);
        let symbols: Vec<&str> = report.snapshots.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL"]);
    }

    #[test]
    fn missing_benchmark_and_atr_yield_null_rsrw_only() {
        let store = store_with(vec![Instrument::new(1, "AAPL")], history(1, dec!(500)), &[]);

        let report = AnalyticsEngine::default().compute_statistics(&store, Some(as_of()), None);
        let aapl = &report.snapshots[0];
        assert_eq!(aapl.atr, None);
        for stats in aapl.buckets.values() {
            assert_eq!(stats.rvol, Some(dec!(100)));
            assert_eq!(stats.rsrw, None);
        }
    }

    #[test]
    fn ticker_filter_limits_output_but_keeps_benchmark() {
        let mut bars = history(1, dec!(500));
        bars.extend(history(2, dec!(500)));
        bars.extend(history(529, dec!(500)));
        let store = store_with(
            vec![
                Instrument::new(1, "AAPL"),
                Instrument::new(2, "MSFT"),
                Instrument::new(529, "SPY"),
            ],
            bars,
            &[(2, dec!(1)), (529, dec!(1))],
        );

        let filter = vec!["msft".to_string()];
        let report =
            AnalyticsEngine::default().compute_statistics(&store, Some(as_of()), Some(&filter));
        assert_eq!(report.count, 1);
        assert_eq!(report.snapshots[0].symbol, "MSFT");
        assert!(
            report.snapshots[0]
                .buckets
                .values()
                .all(|s| s.rsrw.is_some())
        );
    }

    #[test]
    fn historical_as_of_ignores_later_bars() {
        let store = store_with(vec![Instrument::new(1, "AAPL")], history(1, dec!(500)), &[]);
        let earlier = (today() - TimeDelta::days(1)).and_hms_opt(12, 2, 0).unwrap();

        let report = AnalyticsEngine::default().compute_statistics(&store, Some(earlier), None);
        assert_eq!(
            report.snapshots[0].last_timestamp,
            (today() - TimeDelta::days(1)).and_hms_opt(12, 0, 0).unwrap()
        );
    }

    #[test]
    fn oldest_searched_day_counts_toward_rvol() {
        // Today plus exactly fifteen earlier days, the oldest thirty days back.
        let bars: Vec<PriceBar> = std::iter::once(0)
            .chain(16..=30)
            .flat_map(|d| {
                day_bars(1, today() - TimeDelta::days(d), dec!(100), dec!(100), dec!(500))
            })
            .collect();
        let store = store_with(vec![Instrument::new(1, "AAPL")], bars, &[]);

        let report = AnalyticsEngine::default().compute_statistics(&store, Some(as_of()), None);
        let stats = &report.snapshots[0].buckets;
        for bucket in Bucket::ALL {
            assert_eq!(stats[&bucket].rvol, Some(dec!(100)), "{bucket:?}");
        }
    }

    #[test]
    fn short_history_yields_nulls_not_failure() {
        let bars = day_bars(1, today(), dec!(100), dec!(101), dec!(500))
            .into_iter()
            .take(4)
            .collect();
        let store = store_with(vec![Instrument::new(1, "AAPL")], bars, &[]);

        let report = AnalyticsEngine::default().compute_statistics(&store, Some(as_of()), None);
        assert!(report.success);
        let stats = &report.snapshots[0].buckets;
        assert_eq!(stats[&Bucket::FifteenMin].rvol, None);
        assert_eq!(stats[&Bucket::FourHour].rvol, None);
    }
}
