//! Periodic health sampling across registered channels: threshold-based
//! alerting with cooldown, and a dashboard snapshot. Memory/CPU figures
//! are sourced via `sysinfo`, matching `performance::memory::system_memory`'s
//! cached-`System` pattern but sampled on the monitor interval rather than
//! per-submit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sysinfo::System;
use tracing::info;

use crate::channel::ProcessingChannel;
use crate::config::MonitorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ChannelFailure,
    PerformanceDegradation,
    HighLatency,
    LowSuccessRate,
    MemoryUsage,
    QueueOverflow,
    RoutingErrors,
    SystemHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub details: serde_json::Map<String, serde_json::Value>,
    pub channel_name: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemOverview {
    pub channel_count: usize,
    pub healthy_channel_count: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub cpu_usage_percent: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelDetail {
    pub name: String,
    pub status: String,
    pub healthy: bool,
    pub queue_size: usize,
    pub max_queue_size: usize,
    pub error_rate: f64,
    pub ema_latency_ms: f64,
    pub percentile_p50_ms: f64,
    pub percentile_p95_ms: f64,
    pub percentile_p99_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorThresholds {
    pub max_latency_ms: f64,
    pub min_success_rate: f64,
    pub max_memory_gb: f64,
    pub max_queue_utilization: f64,
    pub max_error_rate: f64,
    pub max_processing_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub overview: SystemOverview,
    pub channels: Vec<ChannelDetail>,
    pub active_alerts: Vec<Alert>,
    pub recent_alerts: Vec<Alert>,
    pub thresholds: MonitorThresholds,
    pub config: MonitorConfig,
}

pub struct ChannelMonitor {
    config: MonitorConfig,
    channels: Vec<Arc<dyn ProcessingChannel>>,
    system: Mutex<System>,
    last_alert_at: Mutex<HashMap<(AlertType, String), Instant>>,
    alert_history: RwLock<Vec<Alert>>,
}

const ALERT_HISTORY_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

impl ChannelMonitor {
    pub fn new(config: MonitorConfig, channels: Vec<Arc<dyn ProcessingChannel>>) -> Self {
        Self {
            config,
            channels,
            system: Mutex::new(System::new()),
            last_alert_at: Mutex::new(HashMap::new()),
            alert_history: RwLock::new(Vec::new()),
        }
    }

    pub fn spawn(self: Arc<Self>, shutdown: Arc<std::sync::atomic::AtomicBool>) {
        let interval = Duration::from_secs(self.config.sample_interval_seconds);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if shutdown.load(std::sync::atomic::Ordering::Acquire) {
                    break;
                }
                self.sample();
            }
        });
    }

    fn sample(&self) {
        for channel in &self.channels {
            let snapshot = channel.metrics_snapshot();
            if snapshot.ema_latency_ms > self.config.max_latency_ms {
                self.raise(
                    AlertType::HighLatency,
                    AlertSeverity::Warning,
                    channel.name(),
                    format!("ema latency {:.1}ms exceeds {:.1}ms", snapshot.ema_latency_ms, self.config.max_latency_ms),
                );
            }
            let success_rate = if snapshot.processed == 0 {
                1.0
            } else {
                1.0 - snapshot.error_rate
            };
            if success_rate < self.config.min_success_rate {
                self.raise(
                    AlertType::LowSuccessRate,
                    AlertSeverity::Error,
                    channel.name(),
                    format!("success rate {:.3} below {:.3}", success_rate, self.config.min_success_rate),
                );
            }
            let utilization = channel.queue_size() as f64 / channel.max_queue_size().max(1) as f64;
            if utilization > self.config.max_queue_utilization {
                self.raise(
                    AlertType::QueueOverflow,
                    AlertSeverity::Warning,
                    channel.name(),
                    format!("queue utilization {:.2} exceeds {:.2}", utilization, self.config.max_queue_utilization),
                );
            }
            if snapshot.error_rate > self.config.max_error_rate {
                self.raise(
                    AlertType::PerformanceDegradation,
                    AlertSeverity::Error,
                    channel.name(),
                    format!("error rate {:.3} exceeds {:.3}", snapshot.error_rate, self.config.max_error_rate),
                );
            }
            let p99 = channel.latency_percentile(99.0);
            if p99 > self.config.max_processing_ms {
                self.raise(
                    AlertType::PerformanceDegradation,
                    AlertSeverity::Warning,
                    channel.name(),
                    format!("p99 processing time {:.1}ms exceeds {:.1}ms", p99, self.config.max_processing_ms),
                );
            }
            if !channel.is_healthy() {
                self.raise(
                    AlertType::ChannelFailure,
                    AlertSeverity::Critical,
                    channel.name(),
                    "channel reports unhealthy".to_string(),
                );
            }
        }

        if !self.channels.is_empty() {
            let mut system = self.system.lock();
            system.refresh_memory();
            let used_gb = system.used_memory() as f64 / 1024.0 / 1024.0 / 1024.0;
            if used_gb > self.config.max_memory_gb {
                self.raise(
                    AlertType::MemoryUsage,
                    AlertSeverity::Warning,
                    "system",
                    format!("memory usage {:.2}GB exceeds {:.2}GB", used_gb, self.config.max_memory_gb),
                );
            }

            let unhealthy = self.channels.iter().filter(|c| !c.is_healthy()).count();
            if unhealthy * 2 >= self.channels.len() {
                self.raise(
                    AlertType::SystemHealth,
                    AlertSeverity::Critical,
                    "system",
                    format!("{unhealthy}/{} channels unhealthy", self.channels.len()),
                );
            }
        }

        let mut history = self.alert_history.write();
        history.retain(|alert| {
            crate::time::now_unix_seconds() - alert.timestamp <= ALERT_HISTORY_RETENTION.as_secs_f64()
        });
    }

    fn raise(&self, alert_type: AlertType, severity: AlertSeverity, channel: &str, message: String) {
        let key = (alert_type, channel.to_string());
        let now = Instant::now();
        {
            let mut last_alert_at = self.last_alert_at.lock();
            if let Some(last) = last_alert_at.get(&key) {
                if now.duration_since(*last) < Duration::from_secs(self.config.alert_cooldown_seconds) {
                    return;
                }
            }
            last_alert_at.insert(key, now);
        }

        let alert = Alert {
            alert_type,
            severity,
            message: message.clone(),
            details: serde_json::Map::new(),
            channel_name: channel.to_string(),
            timestamp: crate::time::now_unix_seconds(),
        };
        info!(channel, message = %message, "monitor alert raised");
        self.alert_history.write().push(alert);
    }

    pub fn dashboard_snapshot(&self) -> DashboardSnapshot {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu_usage();

        let total_processed: u64 = self.channels.iter().map(|c| c.metrics_snapshot().processed).sum();
        let total_errors: u64 = self.channels.iter().map(|c| c.metrics_snapshot().errors).sum();
        let success_rate = if total_processed == 0 {
            1.0
        } else {
            1.0 - (total_errors as f64 / total_processed as f64)
        };
        let avg_latency = if self.channels.is_empty() {
            0.0
        } else {
            self.channels.iter().map(|c| c.metrics_snapshot().ema_latency_ms).sum::<f64>()
                / self.channels.len() as f64
        };
        let healthy_count = self.channels.iter().filter(|c| c.is_healthy()).count();

        let overview = SystemOverview {
            channel_count: self.channels.len(),
            healthy_channel_count: healthy_count,
            success_rate,
            avg_latency_ms: avg_latency,
            memory_used_bytes: system.used_memory(),
            memory_total_bytes: system.total_memory(),
            cpu_usage_percent: system.global_cpu_usage(),
        };

        let channels = self
            .channels
            .iter()
            .map(|c| {
                let snapshot = c.metrics_snapshot();
                ChannelDetail {
                    name: c.name().to_string(),
                    status: format!("{:?}", c.status()),
                    healthy: c.is_healthy(),
                    queue_size: c.queue_size(),
                    max_queue_size: c.max_queue_size(),
                    error_rate: snapshot.error_rate,
                    ema_latency_ms: snapshot.ema_latency_ms,
                    percentile_p50_ms: c.latency_percentile(50.0),
                    percentile_p95_ms: c.latency_percentile(95.0),
                    percentile_p99_ms: c.latency_percentile(99.0),
                }
            })
            .collect();

        let history = self.alert_history.read();
        let recent_alerts = history.clone();
        let cooldown = Duration::from_secs(self.config.alert_cooldown_seconds);
        let last_alert_at = self.last_alert_at.lock();
        let now = Instant::now();
        let active_alerts = recent_alerts
            .iter()
            .filter(|alert| {
                last_alert_at
                    .get(&(alert.alert_type, alert.channel_name.clone()))
                    .map(|last| now.duration_since(*last) < cooldown)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        drop(last_alert_at);

        DashboardSnapshot {
            overview,
            channels,
            active_alerts,
            recent_alerts,
            thresholds: MonitorThresholds {
                max_latency_ms: self.config.max_latency_ms,
                min_success_rate: self.config.min_success_rate,
                max_memory_gb: self.config.max_memory_gb,
                max_queue_utilization: self.config.max_queue_utilization,
                max_error_rate: self.config.max_error_rate,
                max_processing_ms: self.config.max_processing_ms,
            },
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelStatus, TickChannel};
    use crate::config::ChannelConfig;
    use crate::detectors::{HighLowConfig, SurgeConfig, TrendConfig};
    use crate::sink::CollectingEventSink;

    #[test]
    fn dashboard_snapshot_reports_registered_channels() {
        let sink = Arc::new(CollectingEventSink::new());
        let ch = TickChannel::new(
            ChannelConfig::tick_defaults(),
            HighLowConfig::default(),
            TrendConfig::default(),
            SurgeConfig::default(),
            sink,
        );
        ch.core().set_status(ChannelStatus::Active);

        let monitor = ChannelMonitor::new(MonitorConfig::default(), vec![ch]);
        let snapshot = monitor.dashboard_snapshot();
        assert_eq!(snapshot.overview.channel_count, 1);
    }
}
