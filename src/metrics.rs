//! Per-channel metrics: monotonic counters, EMA latency, and a bounded
//! 1000-sample latency ring for percentile queries (p50/p95/p99 report 0
//! until at least 10 samples have accumulated). Grounded in the same
//! lock-one-struct-then-copy-out-primitives discipline as
//! `performance::latency::LatencyHistogram`.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

const LATENCY_RING_CAP: usize = 1000;
const MIN_PERCENTILE_SAMPLES: usize = 10;

/// EMA smoothing factor applied on every latency sample.
const EMA_ALPHA: f64 = 0.2;

#[derive(Debug)]
struct Inner {
    processed: u64,
    errors: u64,
    events_generated: u64,
    last_latency_ms: f64,
    ema_latency_ms: f64,
    min_latency_ms: f64,
    max_latency_ms: f64,
    latency_ring: Vec<f64>,
    latency_ring_pos: usize,
    batches_processed: u64,
    batches_failed: u64,
    queue_overflows: u64,
    cb_opens: u64,
    cb_closes: u64,
    cb_rejections: u64,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    last_activity: Option<Instant>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            processed: 0,
            errors: 0,
            events_generated: 0,
            last_latency_ms: 0.0,
            ema_latency_ms: 0.0,
            min_latency_ms: f64::MAX,
            max_latency_ms: 0.0,
            latency_ring: Vec::with_capacity(LATENCY_RING_CAP),
            latency_ring_pos: 0,
            batches_processed: 0,
            batches_failed: 0,
            queue_overflows: 0,
            cb_opens: 0,
            cb_closes: 0,
            cb_rejections: 0,
            started_at: None,
            stopped_at: None,
            last_activity: None,
        }
    }
}

/// Thread-safe counters and latency tracking for a single channel instance.
/// Shared between the channel that mutates it and any aggregator that only
/// reads snapshots.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    inner: Mutex<Inner>,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        let metrics = Self::default();
        metrics.inner.lock().started_at = Some(Instant::now());
        metrics
    }

    pub fn record_success(&self, latency: Duration, events_generated: u64) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let mut inner = self.inner.lock();
        inner.processed += 1;
        inner.events_generated += events_generated;
        Self::record_latency(&mut inner, latency_ms);
        inner.last_activity = Some(Instant::now());
    }

    pub fn record_failure(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let mut inner = self.inner.lock();
        inner.processed += 1;
        inner.errors += 1;
        Self::record_latency(&mut inner, latency_ms);
        inner.last_activity = Some(Instant::now());
    }

    fn record_latency(inner: &mut Inner, latency_ms: f64) {
        inner.last_latency_ms = latency_ms;
        inner.ema_latency_ms = if inner.processed <= 1 {
            latency_ms
        } else {
            EMA_ALPHA * latency_ms + (1.0 - EMA_ALPHA) * inner.ema_latency_ms
        };
        inner.min_latency_ms = inner.min_latency_ms.min(latency_ms);
        inner.max_latency_ms = inner.max_latency_ms.max(latency_ms);

        if inner.latency_ring.len() < LATENCY_RING_CAP {
            inner.latency_ring.push(latency_ms);
        } else {
            inner.latency_ring[inner.latency_ring_pos] = latency_ms;
        }
        inner.latency_ring_pos = (inner.latency_ring_pos + 1) % LATENCY_RING_CAP;
    }

    pub fn record_batch_processed(&self) {
        self.inner.lock().batches_processed += 1;
    }

    pub fn record_batch_failed(&self) {
        self.inner.lock().batches_failed += 1;
    }

    pub fn record_queue_overflow(&self) {
        self.inner.lock().queue_overflows += 1;
    }

    pub fn record_circuit_open(&self) {
        self.inner.lock().cb_opens += 1;
    }

    pub fn record_circuit_close(&self) {
        self.inner.lock().cb_closes += 1;
    }

    pub fn record_circuit_rejection(&self) {
        self.inner.lock().cb_rejections += 1;
    }

    pub fn mark_stopped(&self) {
        self.inner.lock().stopped_at = Some(Instant::now());
    }

    pub fn error_rate(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.processed == 0 {
            0.0
        } else {
            inner.errors as f64 / inner.processed as f64
        }
    }

    pub fn percentile(&self, p: f64) -> f64 {
        let inner = self.inner.lock();
        if inner.latency_ring.len() < MIN_PERCENTILE_SAMPLES {
            return 0.0;
        }
        let mut sorted = inner.latency_ring.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = (((p / 100.0) * sorted.len() as f64).ceil() as usize)
            .saturating_sub(1)
            .min(sorted.len() - 1);
        sorted[idx]
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        MetricsSnapshot {
            processed: inner.processed,
            errors: inner.errors,
            events_generated: inner.events_generated,
            last_latency_ms: inner.last_latency_ms,
            ema_latency_ms: inner.ema_latency_ms,
            min_latency_ms: if inner.min_latency_ms == f64::MAX {
                0.0
            } else {
                inner.min_latency_ms
            },
            max_latency_ms: inner.max_latency_ms,
            batches_processed: inner.batches_processed,
            batches_failed: inner.batches_failed,
            queue_overflows: inner.queue_overflows,
            cb_opens: inner.cb_opens,
            cb_closes: inner.cb_closes,
            cb_rejections: inner.cb_rejections,
            error_rate: if inner.processed == 0 {
                0.0
            } else {
                inner.errors as f64 / inner.processed as f64
            },
            uptime_seconds: inner
                .started_at
                .map(|s| s.elapsed().as_secs_f64())
                .unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub errors: u64,
    pub events_generated: u64,
    pub last_latency_ms: f64,
    pub ema_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub batches_processed: u64,
    pub batches_failed: u64,
    pub queue_overflows: u64,
    pub cb_opens: u64,
    pub cb_closes: u64,
    pub cb_rejections: u64,
    pub error_rate: f64,
    pub uptime_seconds: f64,
}

/// Consecutive-error-threshold circuit breaker shared by router and channel.
/// Grounded in `route_quality::mitigation::CircuitBreaker`.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    inner: Mutex<CircuitInner>,
}

#[derive(Debug, Default)]
struct CircuitInner {
    consecutive_errors: u32,
    open: bool,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            threshold,
            timeout,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    /// Auto-closes an open breaker past its timeout, then reports status.
    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() > self.timeout {
                    inner.open = false;
                    inner.consecutive_errors = 0;
                    inner.opened_at = None;
                }
            }
        }
        inner.open
    }

    pub fn record_success(&self) -> bool {
        let mut inner = self.inner.lock();
        let was_open = inner.open;
        inner.consecutive_errors = 0;
        inner.open = false;
        inner.opened_at = None;
        was_open
    }

    /// Returns true if this failure just tripped the breaker open.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.consecutive_errors += 1;
        if !inner.open && inner.consecutive_errors >= self.threshold {
            inner.open = true;
            inner.opened_at = Some(Instant::now());
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_tracks_first_sample_exactly() {
        let metrics = ChannelMetrics::new();
        metrics.record_success(Duration::from_millis(10), 1);
        assert!((metrics.snapshot().ema_latency_ms - 10.0).abs() < 1e-9);
    }

    #[test]
    fn error_rate_reflects_failures() {
        let metrics = ChannelMetrics::new();
        metrics.record_success(Duration::from_millis(1), 0);
        metrics.record_failure(Duration::from_millis(1));
        assert!((metrics.error_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn circuit_breaker_opens_after_threshold() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!cb.record_failure());
        assert!(!cb.record_failure());
        assert!(cb.record_failure());
        assert!(cb.is_open());
    }

    #[test]
    fn circuit_breaker_resets_on_success() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.record_failure();
        cb.record_success();
        assert!(!cb.record_failure());
        assert!(!cb.is_open());
    }

    #[test]
    fn percentile_is_zero_with_no_samples() {
        let metrics = ChannelMetrics::new();
        assert_eq!(metrics.percentile(95.0), 0.0);
    }
}
