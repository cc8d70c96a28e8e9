use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::future::join_all;
use market_pulse_core::timeframe::Timeframe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::method::Method;
use crate::provider::{SeriesProvider, SeriesRequest, SeriesValue};

/// Symbols per provider call.
pub const DEFAULT_CHUNK_SIZE: usize = 5;

/// Per-symbol result of a fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolSeries {
    /// Bars ascending by timestamp; never empty.
    Present(Vec<SeriesValue>),
    /// No usable data, with the reason.
    Missing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Complete,
    /// At least one symbol is missing; the present ones are still usable.
    PartialSuccess,
}

/// Merged result of one fetch across all chunks, one entry per requested symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesBySymbol {
    pub series: BTreeMap<String, SymbolSeries>,
    pub status: FetchStatus,
    /// Provider calls issued.
    pub requests: usize,
}

impl SeriesBySymbol {
    pub fn get(&self, symbol: &str) -> Option<&SymbolSeries> {
        self.series.get(symbol)
    }

    pub fn missing_symbols(&self) -> Vec<String> {
        self.series
            .iter()
            .filter(|(_, series)| matches!(series, SymbolSeries::Missing(_)))
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }
}

/// Splits a symbol list into bounded provider calls, runs them concurrently, and merges the
/// answers. A failed chunk marks only its own symbols missing.
pub struct ProviderClient {
    provider: Arc<dyn SeriesProvider>,
    chunk_size: usize,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn SeriesProvider>) -> Self {
        Self {
            provider,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Symbols per call; zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Fetch `symbols` over `[start, end]` (either bound may be open).
    ///
    /// `None` when `cancel` fires first. Provider failures never fail the fetch; they surface
    /// as `Missing` entries.
    pub async fn fetch_series(
        &self,
        symbols: &[String],
        timeframe: Timeframe,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        output_size: u32,
        cancel: &CancellationToken,
    ) -> Option<SeriesBySymbol> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = symbols
            .iter()
            .filter(|s| seen.insert(s.to_ascii_uppercase()))
            .cloned()
            .collect();

        if unique.is_empty() {
            return Some(SeriesBySymbol {
                series: BTreeMap::new(),
                status: FetchStatus::Complete,
                requests: 0,
            });
        }

        let requests: Vec<SeriesRequest> = unique
            .chunks(self.chunk_size)
            .map(|chunk| SeriesRequest {
                symbols: chunk.to_vec(),
                timeframe,
                start,
                end,
                output_size,
                methods: vec![Method::time_series()],
            })
            .collect();

        info!(
            provider = self.provider.name(),
            symbols = unique.len(),
            chunks = requests.len(),
            interval = %timeframe,
            "fetching series"
        );

        let calls = requests.iter().map(|request| self.provider.fetch_chunk(request));
        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            results = join_all(calls) => results,
        };

        let mut series = BTreeMap::new();
        for (request, result) in requests.iter().zip(results) {
            match result {
                Ok(answers) => {
                    for answer in answers {
                        let Some(symbol) = request
                            .symbols
                            .iter()
                            .find(|s| s.eq_ignore_ascii_case(&answer.symbol))
                        else {
                            debug!(symbol = %answer.symbol, "ignoring unrequested symbol");
                            continue;
                        };
                        let entry = match answer.values {
                            Some(values) if !values.is_empty() => SymbolSeries::Present(values),
                            Some(_) => SymbolSeries::Missing("no values returned".into()),
                            None => SymbolSeries::Missing(
                                answer.message.unwrap_or_else(|| "provider reported error".into()),
                            ),
                        };
                        series.insert(symbol.clone(), entry);
                    }
                    for symbol in &request.symbols {
                        series.entry(symbol.clone()).or_insert_with(|| {
                            SymbolSeries::Missing("absent from response".into())
                        });
                    }
                }
                Err(e) => {
                    warn!(symbols = ?request.symbols, "chunk failed: {e}");
                    for symbol in &request.symbols {
                        series.insert(symbol.clone(), SymbolSeries::Missing(e.to_string()));
                    }
                }
            }
        }

        let status = if series
            .values()
            .any(|s| matches!(s, SymbolSeries::Missing(_)))
        {
            FetchStatus::PartialSuccess
        } else {
            FetchStatus::Complete
        };

        let result = SeriesBySymbol {
            series,
            status,
            requests: requests.len(),
        };
        if result.status == FetchStatus::PartialSuccess {
            debug!(missing = ?result.missing_symbols(), "fetch partially succeeded");
        }
        Some(result)
    }
}
