//! In-process provider and notifier doubles for pipeline tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use market_pulse_providers::error::{NotifyError, ProviderError};
use market_pulse_providers::notify::{Notification, Notifier};
use market_pulse_providers::provider::{
    ProviderSeries, SeriesProvider, SeriesRequest, SeriesValue,
};
use rust_decimal::Decimal;

pub fn value(datetime: NaiveDateTime, close: Decimal, volume: Decimal) -> SeriesValue {
    SeriesValue {
        datetime,
        open: close,
        high: close,
        low: close,
        close,
        volume,
    }
}

/// Serves canned bars per symbol, honouring the request window and output size. Symbols
/// without canned bars get a null series. The first `failing_calls` calls error out.
#[derive(Default)]
pub struct FakeProvider {
    pub bars: HashMap<String, Vec<SeriesValue>>,
    pub failing_calls: AtomicUsize,
    pub requests: Mutex<Vec<SeriesRequest>>,
}

impl FakeProvider {
    pub fn with_bars(bars: impl IntoIterator<Item = (&'static str, Vec<SeriesValue>)>) -> Self {
        Self {
            bars: bars
                .into_iter()
                .map(|(symbol, values)| (symbol.to_string(), values))
                .collect(),
            ..Default::default()
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl SeriesProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_chunk(
        &self,
        request: &SeriesRequest,
    ) -> Result<Vec<ProviderSeries>, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());

        let remaining = self.failing_calls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_calls.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Api {
                status: 503,
                message: "unavailable".into(),
            });
        }

        Ok(request
            .symbols
            .iter()
            .map(|symbol| {
                let values = self.bars.get(symbol).map(|all| {
                    let mut selected: Vec<SeriesValue> = all
                        .iter()
                        .filter(|v| request.start.is_none_or(|s| v.datetime >= s))
                        .filter(|v| request.end.is_none_or(|e| v.datetime <= e))
                        .cloned()
                        .collect();
                    let keep = request.output_size as usize;
                    if selected.len() > keep {
                        selected.drain(..selected.len() - keep);
                    }
                    selected
                });
                ProviderSeries {
                    symbol: symbol.clone(),
                    message: values.is_none().then(|| "no data".to_string()),
                    values,
                }
            })
            .collect())
    }
}

/// Holds every call open for `delay` before delegating, tracking the most calls in flight.
pub struct SlowProvider {
    pub inner: FakeProvider,
    delay: Duration,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl SlowProvider {
    pub fn new(inner: FakeProvider, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SeriesProvider for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }

    async fn fetch_chunk(
        &self,
        request: &SeriesRequest,
    ) -> Result<Vec<ProviderSeries>, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.fetch_chunk(request).await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification(&self, notification: &Notification) -> Result<bool, NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(true)
    }
}

/// Always fails, to prove alerts are best effort.
pub struct BrokenNotifier;

#[async_trait]
impl Notifier for BrokenNotifier {
    async fn send_notification(&self, _: &Notification) -> Result<bool, NotifyError> {
        Err(NotifyError::Rejected {
            status: 500,
            message: "down".into(),
        })
    }
}
