//! Composition root: owns the enabled channels, the router, the
//! persistence worker, and the monitor, and exposes the single
//! `submit`/`status`/`ready` surface a binary drives.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::channel::{ChannelType, FmvChannel, OhlcvChannel, ProcessingChannel, TickChannel};
use crate::config::SystemConfig;
use crate::error::CoreError;
use crate::model::RawMarketItem;
use crate::monitor::{ChannelMonitor, DashboardSnapshot};
use crate::persistence::OhlcvPersistence;
use crate::router::ChannelRouter;
use crate::sink::{ChannelEventSink, DownstreamEventSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    Initializing,
    Ready,
    Processing,
    Degraded,
    Shutdown,
    Error,
}

#[derive(Debug, Default)]
struct IntegrationMetrics {
    total_processed: AtomicU64,
    tick_processed: AtomicU64,
    ohlcv_processed: AtomicU64,
    fmv_processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    ema_latency_bits: parking_lot::Mutex<f64>,
    current_window_count: AtomicU64,
    current_window_started: parking_lot::Mutex<Instant>,
    peak_throughput: parking_lot::Mutex<f64>,
    current_throughput: parking_lot::Mutex<f64>,
}

const EMA_ALPHA: f64 = 0.2;

impl IntegrationMetrics {
    fn new() -> Self {
        Self {
            current_window_started: parking_lot::Mutex::new(Instant::now()),
            ..Default::default()
        }
    }

    fn record(&self, channel_type: Option<ChannelType>, success: bool, latency_ms: f64) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
        match channel_type {
            Some(ChannelType::Tick) => self.tick_processed.fetch_add(1, Ordering::Relaxed),
            Some(ChannelType::Ohlcv) => self.ohlcv_processed.fetch_add(1, Ordering::Relaxed),
            Some(ChannelType::Fmv) => self.fmv_processed.fetch_add(1, Ordering::Relaxed),
            None => 0,
        };
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let mut ema = self.ema_latency_bits.lock();
        *ema = if self.total_processed.load(Ordering::Relaxed) <= 1 {
            latency_ms
        } else {
            EMA_ALPHA * latency_ms + (1.0 - EMA_ALPHA) * *ema
        };

        self.current_window_count.fetch_add(1, Ordering::Relaxed);
        let mut started = self.current_window_started.lock();
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            let count = self.current_window_count.swap(0, Ordering::Relaxed);
            let throughput = count as f64 / elapsed;
            *self.current_throughput.lock() = throughput;
            let mut peak = self.peak_throughput.lock();
            if throughput > *peak {
                *peak = throughput;
            }
            *started = Instant::now();
        }
    }

    fn snapshot(&self) -> IntegrationMetricsSnapshot {
        IntegrationMetricsSnapshot {
            total_processed: self.total_processed.load(Ordering::Relaxed),
            tick_processed: self.tick_processed.load(Ordering::Relaxed),
            ohlcv_processed: self.ohlcv_processed.load(Ordering::Relaxed),
            fmv_processed: self.fmv_processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            ema_latency_ms: *self.ema_latency_bits.lock(),
            peak_throughput_per_sec: *self.peak_throughput.lock(),
            current_throughput_per_sec: *self.current_throughput.lock(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrationMetricsSnapshot {
    pub total_processed: u64,
    pub tick_processed: u64,
    pub ohlcv_processed: u64,
    pub fmv_processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub ema_latency_ms: f64,
    pub peak_throughput_per_sec: f64,
    pub current_throughput_per_sec: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceTargets {
    pub latency_met: bool,
    pub success_rate_met: bool,
    pub channels_healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub state: SystemState,
    pub metrics: IntegrationMetricsSnapshot,
    pub targets: PerformanceTargets,
    pub router_counters: crate::router::RouterCountersSnapshot,
}

pub struct MultiChannelSystem {
    config: SystemConfig,
    state: RwLock<SystemState>,
    channels: Vec<Arc<dyn ProcessingChannel>>,
    router: ChannelRouter,
    persistence: Arc<OhlcvPersistence>,
    monitor: Arc<ChannelMonitor>,
    metrics: IntegrationMetrics,
    shutdown: Arc<AtomicBool>,
}

impl MultiChannelSystem {
    /// Startup order: persistence, then the enabled channels, then the
    /// router (which registers those channels), then the monitor.
    pub fn new(config: SystemConfig) -> Result<Arc<Self>, CoreError> {
        let persistence = OhlcvPersistence::spawn(config.persistence.clone())
            .map_err(|err| CoreError::PersistenceDbError(err.to_string()))?;

        let sink: Arc<dyn DownstreamEventSink> = Arc::new(ChannelEventSink::new(4096));
        let mut channels: Vec<Arc<dyn ProcessingChannel>> = Vec::new();
        let mut router = ChannelRouter::new(config.router.clone());

        if config.tick_enabled {
            let tick = TickChannel::new(
                config.tick_channel.clone(),
                config.detection.high_low.clone(),
                config.detection.trend.clone(),
                config.detection.surge.clone(),
                sink.clone(),
            );
            tick.core().set_status(crate::channel::ChannelStatus::Active);
            tick.spawn_cleanup();
            router.register(ChannelType::Tick, tick.clone());
            channels.push(tick);
        }

        if config.ohlcv_enabled {
            let ohlcv = OhlcvChannel::new(
                config.ohlcv_channel.clone(),
                config.detection.volume_surge_multiplier,
                config.detection.significant_move_threshold,
                persistence.clone(),
                sink.clone(),
            );
            ohlcv.core().set_status(crate::channel::ChannelStatus::Active);
            ohlcv.spawn_worker();
            ohlcv.spawn_cleanup();
            router.register(ChannelType::Ohlcv, ohlcv.clone());
            channels.push(ohlcv);
        }

        if config.fmv_enabled {
            let fmv = FmvChannel::new(
                config.fmv_channel.clone(),
                config.detection.fmv_confidence_threshold,
                config.detection.fmv_deviation_threshold,
                sink.clone(),
            );
            fmv.core().set_status(crate::channel::ChannelStatus::Active);
            fmv.spawn_worker();
            fmv.spawn_cleanup();
            router.register(ChannelType::Fmv, fmv.clone());
            channels.push(fmv);
        }

        let monitor = Arc::new(ChannelMonitor::new(config.monitor.clone(), channels.clone()));
        let shutdown = Arc::new(AtomicBool::new(false));
        monitor.clone().spawn(shutdown.clone());

        info!(
            tick = config.tick_enabled,
            ohlcv = config.ohlcv_enabled,
            fmv = config.fmv_enabled,
            "multi-channel system initialized"
        );

        let system = Arc::new(Self {
            config,
            state: RwLock::new(SystemState::Ready),
            channels,
            router,
            persistence,
            monitor,
            metrics: IntegrationMetrics::new(),
            shutdown,
        });
        Ok(system)
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub async fn submit(&self, data: RawMarketItem) -> bool {
        self.set_state_if_ready(SystemState::Processing);

        let started = Instant::now();
        let channel_type = match &data {
            RawMarketItem::Tick(_) => Some(ChannelType::Tick),
            RawMarketItem::Ohlcv(_) => Some(ChannelType::Ohlcv),
            RawMarketItem::Fmv(_) => Some(ChannelType::Fmv),
            RawMarketItem::Untyped(_) => None,
        };

        let result = self.router.route(data).await;
        let success = result.as_ref().map(|r| r.success).unwrap_or(false);
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record(channel_type, success, latency_ms);

        self.refresh_degradation();
        success
    }

    fn set_state_if_ready(&self, next: SystemState) {
        let mut state = self.state.write();
        if *state == SystemState::Ready {
            *state = next;
        }
    }

    fn refresh_degradation(&self) {
        let issues = self.channels.iter().filter(|c| !c.is_healthy()).count()
            + if self.router.is_healthy() { 0 } else { 1 }
            + if self.persistence.is_healthy() { 0 } else { 1 };

        let mut state = self.state.write();
        if issues >= 3 {
            *state = SystemState::Degraded;
        } else if *state == SystemState::Degraded {
            *state = SystemState::Processing;
        }
    }

    pub fn status(&self) -> SystemStatus {
        let metrics = self.metrics.snapshot();
        let channels_healthy = self.channels.iter().all(|c| c.is_healthy());
        let success_rate = if metrics.total_processed == 0 {
            1.0
        } else {
            metrics.succeeded as f64 / metrics.total_processed as f64
        };
        let targets = PerformanceTargets {
            latency_met: metrics.ema_latency_ms <= self.config.monitor.max_latency_ms,
            success_rate_met: success_rate >= self.config.monitor.min_success_rate,
            channels_healthy,
        };
        SystemStatus {
            state: *self.state.read(),
            metrics,
            targets,
            router_counters: self.router.counters(),
        }
    }

    pub fn dashboard(&self) -> DashboardSnapshot {
        self.monitor.dashboard_snapshot()
    }

    pub fn ready(&self) -> bool {
        !self.channels.is_empty() && self.channels.iter().all(|c| c.is_healthy())
    }

    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        *self.state.write() = SystemState::Shutdown;
        for channel in &self.channels {
            let _ = channel.stop().await;
        }
        self.persistence.shutdown().await;
        info!("multi-channel system shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TickRecord;

    fn test_config(db_path: String) -> SystemConfig {
        let mut config = SystemConfig::default();
        config.fmv_enabled = false;
        config.ohlcv_enabled = false;
        config.persistence.db_path = db_path;
        config
    }

    #[tokio::test]
    async fn submits_tick_and_reports_ready() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("t.db").to_string_lossy().to_string();
        let system = MultiChannelSystem::new(test_config(db_path)).unwrap();
        assert!(system.ready());

        let tick = RawMarketItem::Tick(TickRecord::new("AAPL", 150.0, 1000, 1.0).unwrap());
        assert!(system.submit(tick).await);

        let status = system.status();
        assert_eq!(status.metrics.total_processed, 1);
        assert_eq!(status.metrics.succeeded, 1);
    }

    #[tokio::test]
    async fn dashboard_reflects_registered_channels() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("t.db").to_string_lossy().to_string();
        let system = MultiChannelSystem::new(test_config(db_path)).unwrap();
        let dashboard = system.dashboard();
        assert_eq!(dashboard.overview.channel_count, 1);
    }
}
