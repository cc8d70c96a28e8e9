use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::method::Method;
use crate::provider::{
    ProviderSeries, REQUEST_DATETIME_FORMAT, SeriesProvider, SeriesRequest, SeriesValue,
};

const TWELVEDATA_BASE_URL: &str = "https://api.twelvedata.com";

/// Per-call timeout; a full chunk of intraday history can be slow to assemble upstream.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(300);

/// Twelve Data `complex_data` provider.
/// Authenticates via the `apikey` query parameter.
pub struct TwelveDataProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TwelveDataProvider {
    /// Create from environment variable `TWELVEDATA_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("TWELVEDATA_API_KEY")
            .map_err(|_| ProviderError::Config("TWELVEDATA_API_KEY not set".into()))?;
        Self::new(api_key, None)
    }

    /// Create with an explicit key and optional base URL override.
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(PROVIDER_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| TWELVEDATA_BASE_URL.to_string()),
        })
    }
}

#[derive(Debug, Serialize)]
struct ComplexDataRequest<'a> {
    symbols: &'a [String],
    intervals: [&'static str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date: Option<String>,
    outputsize: u32,
    methods: &'a [Method],
}

impl<'a> ComplexDataRequest<'a> {
    fn from_request(request: &'a SeriesRequest) -> Self {
        Self {
            symbols: &request.symbols,
            intervals: [request.timeframe.as_str()],
            start_date: request
                .start
                .map(|ts| ts.format(REQUEST_DATETIME_FORMAT).to_string()),
            end_date: request
                .end
                .map(|ts| ts.format(REQUEST_DATETIME_FORMAT).to_string()),
            outputsize: request.output_size,
            methods: &request.methods,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ComplexDataResponse {
    #[serde(default)]
    data: Vec<Option<TwelveDataSeries>>,
    status: Option<String>,
    code: Option<u16>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwelveDataSeries {
    meta: Option<TwelveDataMeta>,
    values: Option<Vec<TwelveDataValue>>,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct TwelveDataMeta {
    symbol: String,
    interval: Option<String>,
    currency: Option<String>,
    exchange_timezone: Option<String>,
    exchange: Option<String>,
    mic_code: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Every numeric field arrives as a string.
#[derive(Debug, Deserialize)]
struct TwelveDataValue {
    datetime: String,
    open: Option<String>,
    high: Option<String>,
    low: Option<String>,
    close: Option<String>,
    volume: Option<String>,
}

/// Parse `YYYY-MM-DD HH:MM:SS` (intraday) or `YYYY-MM-DD` (daily, midnight).
fn parse_datetime(raw: &str) -> Result<NaiveDateTime, ProviderError> {
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, REQUEST_DATETIME_FORMAT) {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| ProviderError::Parse(format!("invalid datetime '{raw}'")))
}

fn parse_price(field: &str, raw: Option<&str>) -> Result<Decimal, ProviderError> {
    let raw = raw.ok_or_else(|| ProviderError::Parse(format!("missing {field}")))?;
    Decimal::from_str(raw)
        .map_err(|e| ProviderError::Parse(format!("invalid {field} '{raw}': {e}")))
}

impl TwelveDataValue {
    fn to_series_value(&self) -> Result<SeriesValue, ProviderError> {
        // Instruments without traded volume (indices, FX) omit the field.
        let volume = match self.volume.as_deref() {
            Some(raw) => parse_price("volume", Some(raw))?,
            None => Decimal::ZERO,
        };
        Ok(SeriesValue {
            datetime: parse_datetime(&self.datetime)?,
            open: parse_price("open", self.open.as_deref())?,
            high: parse_price("high", self.high.as_deref())?,
            low: parse_price("low", self.low.as_deref())?,
            close: parse_price("close", self.close.as_deref())?,
            volume,
        })
    }
}

impl TwelveDataSeries {
    fn into_provider_series(self) -> Option<ProviderSeries> {
        let Some(meta) = self.meta else {
            warn!("twelvedata: series without meta, skipping");
            return None;
        };

        let failed = self.status.as_deref() == Some("error");
        let values = match self.values {
            Some(rows) if !failed => {
                let mut parsed = Vec::with_capacity(rows.len());
                for row in &rows {
                    match row.to_series_value() {
                        Ok(value) => parsed.push(value),
                        Err(e) => warn!(symbol = %meta.symbol, "twelvedata: skipping row: {e}"),
                    }
                }
                parsed.sort_by_key(|v| v.datetime);
                Some(parsed)
            }
            _ => None,
        };

        Some(ProviderSeries {
            symbol: meta.symbol,
            values,
            message: self.message,
        })
    }
}

impl ComplexDataResponse {
    fn into_series(self) -> Result<Vec<ProviderSeries>, ProviderError> {
        if self.status.as_deref() == Some("error") {
            let status = self.code.unwrap_or(500);
            let message = self.message.unwrap_or_else(|| "unknown error".into());
            if status == 429 {
                return Err(ProviderError::RateLimited {
                    retry_after_secs: 60,
                });
            }
            return Err(ProviderError::Api { status, message });
        }

        Ok(self
            .data
            .into_iter()
            .flatten()
            .filter_map(TwelveDataSeries::into_provider_series)
            .collect())
    }
}

#[async_trait]
impl SeriesProvider for TwelveDataProvider {
    fn name(&self) -> &str {
        "twelvedata"
    }

    async fn fetch_chunk(
        &self,
        request: &SeriesRequest,
    ) -> Result<Vec<ProviderSeries>, ProviderError> {
        debug!(
            symbols = request.symbols.len(),
            interval = %request.timeframe,
            "twelvedata: complex_data request"
        );

        let response = self
            .client
            .post(format!("{}/complex_data", self.base_url))
            .query(&[("apikey", self.api_key.as_str())])
            .json(&ComplexDataRequest::from_request(request))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ProviderError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status,
                message: body,
            });
        }

        let body: ComplexDataResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(format!("failed to parse response: {e}")))?;

        body.into_series()
    }
}
