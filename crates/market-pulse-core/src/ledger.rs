use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::instrument::InstrumentId;

/// A symbol/timestamp pair whose fetch failed and is waiting to be retried.
///
/// The ledger holds at most one entry per `(instrument_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryLedgerEntry {
    pub instrument_id: InstrumentId,
    pub timestamp: NaiveDateTime,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl RetryLedgerEntry {
    pub fn new(
        instrument_id: InstrumentId,
        timestamp: NaiveDateTime,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            instrument_id,
            timestamp,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> (InstrumentId, NaiveDateTime) {
        (self.instrument_id, self.timestamp)
    }
}
