//! The shared `ProcessingChannel` contract and the bookkeeping
//! (`ChannelCore`) common to all three typed realizations.

pub mod fmv;
pub mod ohlcv;
pub mod tick;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::ChannelConfig;
use crate::error::CoreError;
use crate::metrics::{ChannelMetrics, CircuitBreaker, MetricsSnapshot};
use crate::model::{Event, RawMarketItem};
use crate::sink::DownstreamEventSink;

pub use fmv::FmvChannel;
pub use ohlcv::OhlcvChannel;
pub use tick::TickChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Initializing,
    Active,
    Paused,
    Error,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Tick,
    Ohlcv,
    Fmv,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Tick => "tick",
            ChannelType::Ohlcv => "ohlcv",
            ChannelType::Fmv => "fmv",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub events: Vec<Event>,
    pub errors: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub processing_time_ms: f64,
}

impl ProcessingResult {
    pub fn ok(events: Vec<Event>) -> Self {
        Self {
            success: true,
            events,
            errors: Vec::new(),
            metadata: serde_json::Map::new(),
            processing_time_ms: 0.0,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            events: Vec::new(),
            errors: vec![error.into()],
            metadata: serde_json::Map::new(),
            processing_time_ms: 0.0,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Operations shared by the three typed channels. Each implementor
/// composes a `ChannelCore` (exposed via `core()`) that tracks queue
/// occupancy, circuit-breaker state, and metrics, and supplies its own
/// per-record pipeline through `process_one`.
#[async_trait]
pub trait ProcessingChannel: Send + Sync {
    fn name(&self) -> &str;
    fn channel_type(&self) -> ChannelType;
    fn core(&self) -> &ChannelCore;

    /// Subclass hook: the per-record pipeline (coerce, update state, run
    /// detectors, return events). Never panics; validation failures return
    /// `ProcessingResult::failed`.
    async fn process_one(&self, data: RawMarketItem) -> ProcessingResult;

    async fn start(&self) -> Result<(), CoreError> {
        self.core().set_status(ChannelStatus::Active);
        Ok(())
    }

    async fn stop(&self) -> Result<(), CoreError> {
        self.core().shutdown.store(true, Ordering::Release);
        self.core().set_status(ChannelStatus::Shutdown);
        self.core().metrics.mark_stopped();
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.core().status()
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.core().metrics.snapshot()
    }

    fn latency_percentile(&self, p: f64) -> f64 {
        self.core().metrics.percentile(p)
    }

    fn queue_size(&self) -> usize {
        self.core().queue_len.load(Ordering::Acquire)
    }

    fn max_queue_size(&self) -> usize {
        self.core().config.max_queue_size
    }

    fn is_healthy(&self) -> bool {
        self.core().is_healthy()
    }

    /// `submit(data) -> bool`. Immediate-strategy channels process
    /// synchronously here; batched channels enqueue for a background
    /// worker.
    async fn submit(&self, data: RawMarketItem) -> bool {
        if self.core().status() != ChannelStatus::Active || self.core().circuit_breaker.is_open() {
            return false;
        }
        if self.core().is_immediate() {
            let result = self.process_with_metrics(data).await;
            result.success
        } else {
            self.core().enqueue(data)
        }
    }

    /// `processWithMetrics(data) -> ProcessingResult`: the common
    /// increment/CB-check/dispatch/metrics-update envelope around
    /// `process_one`.
    async fn process_with_metrics(&self, data: RawMarketItem) -> ProcessingResult {
        let core = self.core();
        if core.circuit_breaker.is_open() {
            core.metrics.record_circuit_rejection();
            return ProcessingResult::failed("circuit_breaker").with_metadata("circuit_breaker", true);
        }

        let started = Instant::now();
        let result = self.process_one(data).await;
        let elapsed = started.elapsed();

        if result.success {
            core.metrics.record_success(elapsed, result.events.len() as u64);
            if core.circuit_breaker.record_success() {
                core.metrics.record_circuit_close();
            }
        } else {
            core.metrics.record_failure(elapsed);
            if core.circuit_breaker.record_failure() {
                core.metrics.record_circuit_open();
            }
        }

        let mut result = result;
        result.processing_time_ms = elapsed.as_secs_f64() * 1000.0;
        result
    }
}

/// Bookkeeping shared by every `ProcessingChannel` implementor: queue
/// occupancy, status, circuit breaker, and metrics. Owned by composition,
/// not inheritance — each concrete channel embeds one and adds its own
/// per-symbol state alongside it.
pub struct ChannelCore {
    name: String,
    pub config: ChannelConfig,
    pub metrics: ChannelMetrics,
    pub circuit_breaker: CircuitBreaker,
    status: RwLock<ChannelStatus>,
    queue_tx: mpsc::Sender<RawMarketItem>,
    queue_rx: tokio::sync::Mutex<Option<mpsc::Receiver<RawMarketItem>>>,
    queue_len: Arc<AtomicUsize>,
    pub shutdown: Arc<AtomicBool>,
    pub sink: Arc<dyn DownstreamEventSink>,
}

impl ChannelCore {
    pub fn new(name: impl Into<String>, config: ChannelConfig, sink: Arc<dyn DownstreamEventSink>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.max_queue_size);
        let threshold = config.circuit_breaker_threshold;
        let timeout = Duration::from_secs(config.circuit_breaker_timeout_seconds);
        Self {
            name: name.into(),
            config,
            metrics: ChannelMetrics::new(),
            circuit_breaker: CircuitBreaker::new(threshold, timeout),
            status: RwLock::new(ChannelStatus::Initializing),
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(Some(queue_rx)),
            queue_len: Arc::new(AtomicUsize::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: ChannelStatus) {
        *self.status.write() = status;
    }

    fn is_immediate(&self) -> bool {
        matches!(self.config.batching.strategy, crate::config::BatchingStrategy::Immediate)
    }

    fn enqueue(&self, data: RawMarketItem) -> bool {
        match self.queue_tx.try_send(data) {
            Ok(()) => {
                self.queue_len.fetch_add(1, Ordering::AcqRel);
                true
            }
            Err(_) => {
                self.metrics.record_queue_overflow();
                false
            }
        }
    }

    /// Taken once by the owning channel's background worker at `start()`.
    pub async fn take_receiver(&self) -> Option<mpsc::Receiver<RawMarketItem>> {
        self.queue_rx.lock().await.take()
    }

    /// Called by the owning channel's worker once it pulls an item off the
    /// queue, so `queue_len` tracks live occupancy rather than a cumulative
    /// submit count.
    pub fn dequeue(&self) {
        self.queue_len.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn is_healthy(&self) -> bool {
        if !matches!(self.status(), ChannelStatus::Active | ChannelStatus::Paused) {
            return false;
        }
        if self.circuit_breaker.is_open() {
            return false;
        }
        let snapshot = self.metrics.snapshot();
        if snapshot.error_rate > 0.10 {
            return false;
        }
        if snapshot.ema_latency_ms > 5000.0 {
            return false;
        }
        let utilization = self.queue_len.load(Ordering::Acquire) as f64 / self.config.max_queue_size as f64;
        if utilization > 0.90 {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::sink::CollectingEventSink;

    #[tokio::test]
    async fn immediate_channels_reject_when_circuit_open() {
        let sink = Arc::new(CollectingEventSink::new());
        let core = ChannelCore::new("t", ChannelConfig::tick_defaults(), sink);
        core.set_status(ChannelStatus::Active);
        for _ in 0..core.config.circuit_breaker_threshold {
            core.circuit_breaker.record_failure();
        }
        assert!(core.circuit_breaker.is_open());
        assert!(!core.is_healthy());
    }
}
