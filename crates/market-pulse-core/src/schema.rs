use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Date32Array, Int32Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;

use crate::bar::PriceBar;
use crate::error::MarketDataError;
use crate::indicator::DailyIndicator;
use crate::instrument::InstrumentId;
use crate::ledger::RetryLedgerEntry;
use crate::timeframe::Timeframe;

/// Days from 0001-01-01 (CE) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Bars are stored one file per (timeframe, instrument, day), so the key columns live in the
/// path and only the time and values are stored. Decimals are stored as strings.
pub fn bar_schema() -> Schema {
    Schema::new(vec![
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        ),
        Field::new("open", DataType::Utf8, false),
        Field::new("high", DataType::Utf8, false),
        Field::new("low", DataType::Utf8, false),
        Field::new("close", DataType::Utf8, false),
        Field::new("volume", DataType::Utf8, false),
    ])
}

pub fn daily_indicator_schema() -> Schema {
    Schema::new(vec![
        Field::new("instrument_id", DataType::Int32, false),
        Field::new("date", DataType::Date32, false),
        Field::new("atr", DataType::Utf8, false),
    ])
}

pub fn retry_ledger_schema() -> Schema {
    Schema::new(vec![
        Field::new("instrument_id", DataType::Int32, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        ),
        Field::new("reason", DataType::Utf8, false),
        Field::new(
            "created_at",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
    ])
}

fn naive_micros(ts: &NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_micros()
}

fn naive_from_micros(micros: i64) -> Result<NaiveDateTime, MarketDataError> {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| MarketDataError::InvalidData(format!("invalid timestamp: {micros}")))
}

fn decimal_array(values: impl Iterator<Item = Decimal>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values.map(|d| d.to_string())))
}

fn column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    index: usize,
    name: &str,
) -> Result<&'a T, MarketDataError> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| MarketDataError::InvalidData(format!("expected {name} column")))
}

fn parse_decimal(array: &StringArray, row: usize, name: &str) -> Result<Decimal, MarketDataError> {
    array
        .value(row)
        .parse()
        .map_err(|e| MarketDataError::InvalidData(format!("invalid {name}: {e}")))
}

pub fn bars_to_record_batch(bars: &[PriceBar]) -> Result<RecordBatch, MarketDataError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(TimestampMicrosecondArray::from(
            bars.iter().map(|b| naive_micros(&b.timestamp)).collect::<Vec<_>>(),
        )),
        decimal_array(bars.iter().map(|b| b.open)),
        decimal_array(bars.iter().map(|b| b.high)),
        decimal_array(bars.iter().map(|b| b.low)),
        decimal_array(bars.iter().map(|b| b.close)),
        decimal_array(bars.iter().map(|b| b.volume)),
    ];

    Ok(RecordBatch::try_new(Arc::new(bar_schema()), columns)?)
}

pub fn record_batch_to_bars(
    batch: &RecordBatch,
    instrument_id: InstrumentId,
    timeframe: Timeframe,
) -> Result<Vec<PriceBar>, MarketDataError> {
    let timestamps = column::<TimestampMicrosecondArray>(batch, 0, "timestamp")?;
    let opens = column::<StringArray>(batch, 1, "open")?;
    let highs = column::<StringArray>(batch, 2, "high")?;
    let lows = column::<StringArray>(batch, 3, "low")?;
    let closes = column::<StringArray>(batch, 4, "close")?;
    let volumes = column::<StringArray>(batch, 5, "volume")?;

    let mut bars = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        bars.push(PriceBar {
            instrument_id,
            timeframe,
            timestamp: naive_from_micros(timestamps.value(i))?,
            open: parse_decimal(opens, i, "open")?,
            high: parse_decimal(highs, i, "high")?,
            low: parse_decimal(lows, i, "low")?,
            close: parse_decimal(closes, i, "close")?,
            volume: parse_decimal(volumes, i, "volume")?,
        });
    }

    Ok(bars)
}

pub fn indicators_to_record_batch(
    indicators: &[DailyIndicator],
) -> Result<RecordBatch, MarketDataError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from(
            indicators.iter().map(|d| d.instrument_id.0).collect::<Vec<_>>(),
        )),
        Arc::new(Date32Array::from(
            indicators
                .iter()
                .map(|d| d.date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
                .collect::<Vec<_>>(),
        )),
        decimal_array(indicators.iter().map(|d| d.atr)),
    ];

    Ok(RecordBatch::try_new(
        Arc::new(daily_indicator_schema()),
        columns,
    )?)
}

pub fn record_batch_to_indicators(
    batch: &RecordBatch,
) -> Result<Vec<DailyIndicator>, MarketDataError> {
    let ids = column::<Int32Array>(batch, 0, "instrument_id")?;
    let dates = column::<Date32Array>(batch, 1, "date")?;
    let atrs = column::<StringArray>(batch, 2, "atr")?;

    let mut indicators = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let days = dates.value(i);
        let date = NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
            .ok_or_else(|| MarketDataError::InvalidData(format!("invalid date: {days}")))?;
        indicators.push(DailyIndicator {
            instrument_id: InstrumentId(ids.value(i)),
            date,
            atr: parse_decimal(atrs, i, "atr")?,
        });
    }

    Ok(indicators)
}

pub fn ledger_to_record_batch(
    entries: &[RetryLedgerEntry],
) -> Result<RecordBatch, MarketDataError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from(
            entries.iter().map(|e| e.instrument_id.0).collect::<Vec<_>>(),
        )),
        Arc::new(TimestampMicrosecondArray::from(
            entries.iter().map(|e| naive_micros(&e.timestamp)).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from_iter_values(
            entries.iter().map(|e| e.reason.as_str()),
        )),
        Arc::new(
            TimestampMicrosecondArray::from(
                entries
                    .iter()
                    .map(|e| e.created_at.timestamp_micros())
                    .collect::<Vec<_>>(),
            )
            .with_timezone("UTC"),
        ),
    ];

    Ok(RecordBatch::try_new(Arc::new(retry_ledger_schema()), columns)?)
}

pub fn record_batch_to_ledger(
    batch: &RecordBatch,
) -> Result<Vec<RetryLedgerEntry>, MarketDataError> {
    let ids = column::<Int32Array>(batch, 0, "instrument_id")?;
    let timestamps = column::<TimestampMicrosecondArray>(batch, 1, "timestamp")?;
    let reasons = column::<StringArray>(batch, 2, "reason")?;
    let created = column::<TimestampMicrosecondArray>(batch, 3, "created_at")?;

    let mut entries = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let micros = created.value(i);
        let created_at: DateTime<Utc> = DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| MarketDataError::InvalidData(format!("invalid created_at: {micros}")))?;
        entries.push(RetryLedgerEntry {
            instrument_id: InstrumentId(ids.value(i)),
            timestamp: naive_from_micros(timestamps.value(i))?,
            reason: reasons.value(i).to_string(),
            created_at,
        });
    }

    Ok(entries)
}

/// Write a batch to `path`, going through a temporary sibling file so readers never see a
/// half-written file.
pub fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<(), MarketDataError> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let tmp_path = path.with_extension("parquet.tmp");
    let file = std::fs::File::create(&tmp_path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    std::fs::rename(&tmp_path, path)?;

    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>, MarketDataError> {
    let file = std::fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn sample_bars() -> Vec<PriceBar> {
        vec![
            PriceBar {
                instrument_id: InstrumentId(1),
                timeframe: Timeframe::FiveMin,
                timestamp: ts(9, 30),
                open: dec!(150.1234),
                high: dec!(151.5678),
                low: dec!(149.0001),
                close: dec!(150.9999),
                volume: dec!(1000),
            },
            PriceBar {
                instrument_id: InstrumentId(1),
                timeframe: Timeframe::FiveMin,
                timestamp: ts(9, 35),
                open: dec!(150.9999),
                high: dec!(152.00),
                low: dec!(150.50),
                close: dec!(151.75),
                volume: dec!(2000.5),
            },
        ]
    }

    #[test]
    fn bar_parquet_file_roundtrip() {
        let bars = sample_bars();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.parquet");

        write_parquet(&path, &bars_to_record_batch(&bars).unwrap()).unwrap();
        let mut result = Vec::new();
        for batch in read_parquet(&path).unwrap() {
            result.extend(
                record_batch_to_bars(&batch, InstrumentId(1), Timeframe::FiveMin).unwrap(),
            );
        }

        assert_eq!(result, bars);
        assert!(!path.with_extension("parquet.tmp").exists());
    }

    #[test]
    fn indicator_dates_survive_date32_encoding() {
        let indicators = vec![DailyIndicator {
            instrument_id: InstrumentId(529),
            date: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            atr: dec!(4.1234),
        }];
        let batch = indicators_to_record_batch(&indicators).unwrap();
        assert_eq!(record_batch_to_indicators(&batch).unwrap(), indicators);
    }

    #[test]
    fn ledger_batch_keeps_created_at_utc() {
        let entries = vec![RetryLedgerEntry {
            instrument_id: InstrumentId(7),
            timestamp: ts(10, 0),
            reason: "values missing".to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 1, 15, 15, 0, 1).unwrap(),
        }];
        let batch = ledger_to_record_batch(&entries).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(record_batch_to_ledger(&batch).unwrap(), entries);
    }

    #[test]
    fn wrong_column_type_is_invalid_data() {
        let batch = ledger_to_record_batch(&[]).unwrap();
        let err = record_batch_to_indicators(&batch).unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidData(_)));
    }
}
