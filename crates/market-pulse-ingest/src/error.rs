use market_pulse_core::error::MarketDataError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] MarketDataError),

    #[error("Ingestion cancelled")]
    Cancelled,
}
