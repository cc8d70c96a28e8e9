use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use market_pulse_core::analytics::{AnalyticsConfig, AnalyticsEngine};
use market_pulse_core::clock::{exchange_now, in_ingestion_hours};
use market_pulse_core::store::{MarketStore, ParquetStore};
use market_pulse_core::timeframe::{RunWindow, Timeframe};
use market_pulse_ingest::config::IngestConfig;
use market_pulse_ingest::pipeline::IngestionPipeline;
use market_pulse_providers::notify::{NoopNotifier, Notifier, PushoverNotifier};
use market_pulse_providers::twelvedata::TwelveDataProvider;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "market-pulse",
    about = "Intraday bar ingestion and relative volume / strength statistics"
)]
struct Cli {
    /// Root directory for data storage (default: current directory)
    #[arg(long, env = "MARKET_PULSE_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the latest closed bar for every active instrument
    Ingest {
        /// Bar interval (1min, 5min, 15min, 30min, 1h, 2h, 4h, 1day)
        #[arg(short, long, default_value = "5min", value_parser = parse_timeframe)]
        timeframe: Timeframe,

        /// Window start, exchange-local (YYYY-MM-DD HH:MM); defaults to the last closed bar
        #[arg(long, value_parser = parse_local_datetime, requires = "end")]
        start: Option<NaiveDateTime>,

        /// Window end, exchange-local (YYYY-MM-DD HH:MM)
        #[arg(long, value_parser = parse_local_datetime, requires = "start")]
        end: Option<NaiveDateTime>,

        /// Run even outside regular ingestion hours
        #[arg(long)]
        force: bool,
    },

    /// Replace a timeframe's stored bars with a fresh historical fetch
    Backfill {
        #[arg(short, long, default_value = "5min", value_parser = parse_timeframe)]
        timeframe: Timeframe,

        /// Window start, exchange-local; defaults to 30 days back at 09:30
        #[arg(long, value_parser = parse_local_datetime, requires = "end")]
        start: Option<NaiveDateTime>,

        /// Window end, exchange-local; defaults to the latest bar boundary
        #[arg(long, value_parser = parse_local_datetime, requires = "start")]
        end: Option<NaiveDateTime>,

        /// Bars requested per symbol
        #[arg(long)]
        output_size: Option<u32>,
    },

    /// Refresh daily bars and the 14-day ATR per instrument
    DailyIndicators,

    /// Print RVOL and RS/RW per bucket as JSON
    Stats {
        /// As-of instant, exchange-local (defaults to now)
        #[arg(long, value_parser = parse_local_datetime)]
        as_of: Option<NaiveDateTime>,

        /// Symbols to include (all active if omitted, comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,

        /// Benchmark symbol for RS/RW
        #[arg(long, default_value = "SPY")]
        benchmark: String,
    },

    /// Show the retry ledger
    Retries {
        /// Remove every entry
        #[arg(long)]
        clear: bool,
    },
}

fn parse_timeframe(s: &str) -> Result<Timeframe, String> {
    s.parse::<Timeframe>().map_err(|e| e.to_string())
}

/// Accepts `YYYY-MM-DD HH:MM[:SS]`, the same with a `T` separator, or a bare date (midnight).
fn parse_local_datetime(s: &str) -> Result<NaiveDateTime, String> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ];
    for format in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("invalid date/time '{s}', expected YYYY-MM-DD HH:MM"))
}

fn window(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Result<Option<RunWindow>> {
    match (start, end) {
        (Some(start), Some(end)) => {
            anyhow::ensure!(start <= end, "--start {start} is after --end {end}");
            Ok(Some(RunWindow::new(start, end)))
        }
        _ => Ok(None),
    }
}

fn create_notifier() -> Arc<dyn Notifier> {
    match PushoverNotifier::from_env() {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            info!("push notifications disabled: {e}");
            Arc::new(NoopNotifier)
        }
    }
}

fn create_pipeline(store: Arc<dyn MarketStore>) -> Result<IngestionPipeline> {
    let provider =
        TwelveDataProvider::from_env().context("failed to create Twelve Data provider")?;
    Ok(IngestionPipeline::new(
        store,
        Arc::new(provider),
        create_notifier(),
        IngestConfig::from_env(),
    ))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            token.cancel();
        }
    });
}

async fn cmd_ingest(
    store: Arc<dyn MarketStore>,
    timeframe: Timeframe,
    window: Option<RunWindow>,
    force: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    if window.is_none() && !force && timeframe.is_intraday() {
        let now = exchange_now();
        if !in_ingestion_hours(&now) {
            info!(at = %now, "outside ingestion hours, skipping (use --force to override)");
            return Ok(());
        }
    }

    let pipeline = create_pipeline(store)?;
    let outcome = pipeline.run_ingestion(timeframe, window, cancel).await;

    println!(
        "{timeframe}: imported {} bar(s), {} symbol(s) failed",
        outcome.imported_count,
        outcome.failed_symbols.len()
    );
    if !outcome.failed_symbols.is_empty() {
        println!("failed: {}", outcome.failed_symbols.join(", "));
    }
    anyhow::ensure!(outcome.success, "ingestion run failed");
    Ok(())
}

async fn cmd_backfill(
    store: Arc<dyn MarketStore>,
    timeframe: Timeframe,
    window: Option<RunWindow>,
    output_size: Option<u32>,
    cancel: &CancellationToken,
) -> Result<()> {
    let pipeline = create_pipeline(store)?;
    let report = pipeline
        .backfill(timeframe, window, output_size, cancel)
        .await
        .context("backfill failed")?;

    println!(
        "{timeframe}: {} to {}: imported {} bar(s)",
        report.window.start, report.window.end, report.imported_count
    );
    if !report.missing_symbols.is_empty() {
        println!("no data: {}", report.missing_symbols.join(", "));
    }
    Ok(())
}

async fn cmd_daily_indicators(
    store: Arc<dyn MarketStore>,
    cancel: &CancellationToken,
) -> Result<()> {
    let pipeline = create_pipeline(store)?;
    let report = pipeline
        .import_daily_indicators(cancel)
        .await
        .context("daily indicator import failed")?;

    println!(
        "imported {} daily bar(s), {} ATR value(s)",
        report.bar_count, report.indicator_count
    );
    if !report.missing_symbols.is_empty() {
        println!("no data: {}", report.missing_symbols.join(", "));
    }
    Ok(())
}

fn cmd_stats(
    store: &dyn MarketStore,
    as_of: Option<NaiveDateTime>,
    symbols: Option<&[String]>,
    benchmark: &str,
) -> Result<()> {
    let engine = AnalyticsEngine::new(AnalyticsConfig {
        benchmark_symbol: benchmark.to_uppercase(),
        ..AnalyticsConfig::default()
    });
    let report = engine.compute_statistics(store, as_of, symbols);
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to serialize statistics")?
    );
    anyhow::ensure!(report.success, "statistics computation failed");
    Ok(())
}

fn cmd_retries(store: &dyn MarketStore, clear: bool) -> Result<()> {
    let entries = store.list_retries().context("failed to read retry ledger")?;

    if clear {
        store.clear_retries().context("failed to clear retry ledger")?;
        println!("Removed {} ledger entries.", entries.len());
        return Ok(());
    }

    if entries.is_empty() {
        println!("Retry ledger is empty.");
        return Ok(());
    }

    let instruments = store.active_instruments().context("failed to list instruments")?;
    for entry in &entries {
        let symbol = instruments
            .iter()
            .find(|i| i.id == entry.instrument_id)
            .map_or("<inactive>", |i| i.symbol.as_str());
        println!(
            "{} {symbol} (id {}): {} [queued {}]",
            entry.timestamp,
            entry.instrument_id,
            entry.reason,
            entry.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("{} ledger entries.", entries.len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let store: Arc<dyn MarketStore> = Arc::new(ParquetStore::new(&cli.data_dir));
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    match cli.command {
        Commands::Ingest {
            timeframe,
            start,
            end,
            force,
        } => {
            cmd_ingest(store, timeframe, window(start, end)?, force, &cancel).await?;
        }
        Commands::Backfill {
            timeframe,
            start,
            end,
            output_size,
        } => {
            cmd_backfill(store, timeframe, window(start, end)?, output_size, &cancel).await?;
        }
        Commands::DailyIndicators => {
            cmd_daily_indicators(store, &cancel).await?;
        }
        Commands::Stats {
            as_of,
            symbols,
            benchmark,
        } => {
            cmd_stats(store.as_ref(), as_of, symbols.as_deref(), &benchmark)?;
        }
        Commands::Retries { clear } => {
            cmd_retries(store.as_ref(), clear)?;
        }
    }

    Ok(())
}
