use async_trait::async_trait;
use chrono::NaiveDateTime;
use market_pulse_core::timeframe::Timeframe;
use rust_decimal::Decimal;

use crate::error::ProviderError;
use crate::method::Method;

/// Wire format of `start_date` / `end_date`.
pub const REQUEST_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One provider call for a bounded group of symbols.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRequest {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub output_size: u32,
    pub methods: Vec<Method>,
}

/// One bar as the provider reported it, timestamp on the exchange-local clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesValue {
    pub datetime: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A provider's answer for one symbol. `values: None` is a per-symbol failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSeries {
    pub symbol: String,
    pub values: Option<Vec<SeriesValue>>,
    pub message: Option<String>,
}

/// Source of time-series data for many symbols per call.
#[async_trait]
pub trait SeriesProvider: Send + Sync {
    /// Provider name (for logging/display).
    fn name(&self) -> &str;

    /// Fetch one chunk. Returns one entry per symbol the provider answered for; symbols it
    /// ignored are simply absent.
    async fn fetch_chunk(&self, request: &SeriesRequest)
    -> Result<Vec<ProviderSeries>, ProviderError>;
}
