use std::env;
use std::time::Duration;

use market_pulse_providers::client::DEFAULT_CHUNK_SIZE;

pub const DEFAULT_DRAIN_ATTEMPTS: u32 = 3;
pub const DEFAULT_DRAIN_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKFILL_OUTPUT_SIZE: u32 = 5000;

/// Days of history a default backfill reaches back.
pub const BACKFILL_LOOKBACK_DAYS: i64 = 30;

/// Title of the operator alert sent when ledger entries cannot be recovered.
pub const FAILURE_TITLE: &str = "Failure - Time Series Import";
pub const FAILURE_PRIORITY: i8 = 1;

/// Ingestion tuning, from environment variables with built-in defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    /// Symbols per provider call.
    pub chunk_size: usize,
    /// Drain passes over the retry ledger per run.
    pub drain_attempts: u32,
    /// Fixed pause between drain passes.
    pub drain_delay: Duration,
    pub backfill_output_size: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            drain_attempts: DEFAULT_DRAIN_ATTEMPTS,
            drain_delay: DEFAULT_DRAIN_DELAY,
            backfill_output_size: DEFAULT_BACKFILL_OUTPUT_SIZE,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl IngestConfig {
    /// Reads `MARKET_PULSE_CHUNK_SIZE`, `MARKET_PULSE_DRAIN_ATTEMPTS`,
    /// `MARKET_PULSE_DRAIN_DELAY_SECS` and `MARKET_PULSE_BACKFILL_OUTPUT_SIZE`. Unset or
    /// unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: (env_u64("MARKET_PULSE_CHUNK_SIZE", defaults.chunk_size as u64) as usize)
                .max(1),
            drain_attempts: env_u64("MARKET_PULSE_DRAIN_ATTEMPTS", defaults.drain_attempts as u64)
                as u32,
            drain_delay: Duration::from_secs(env_u64(
                "MARKET_PULSE_DRAIN_DELAY_SECS",
                defaults.drain_delay.as_secs(),
            )),
            backfill_output_size: env_u64(
                "MARKET_PULSE_BACKFILL_OUTPUT_SIZE",
                defaults.backfill_output_size as u64,
            ) as u32,
        }
    }
}
