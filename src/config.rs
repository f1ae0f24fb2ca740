//! Configuration surface. Every struct implements `Default` with the
//! literal defaults named in the module docs plus a `from_env()`
//! constructor reading `MARKET_CORE_*` variables, falling back to the
//! default on absence or parse failure. Per-channel and per-detector
//! structs expose the override as `apply_env()`/`from_env()` over their
//! own scalar fields and leave structural sub-configs (batching shape,
//! individual detector tunings) at their compiled default.

use serde::{Deserialize, Serialize};

use crate::detectors::{HighLowConfig, SurgeConfig, TrendConfig};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    RoundRobin,
    LeastLoad,
    ConsistentHash,
    HealthScore,
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        RoutingStrategy::HealthScore
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub routing_strategy: RoutingStrategy,
    pub routing_timeout_ms: u64,
    pub enable_fallback_routing: bool,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_seconds: u64,
    pub health_check_interval_seconds: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            routing_strategy: RoutingStrategy::default(),
            routing_timeout_ms: 50,
            enable_fallback_routing: true,
            circuit_breaker_threshold: 10,
            circuit_breaker_timeout_seconds: 60,
            health_check_interval_seconds: 30,
        }
    }
}

impl RouterConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        let routing_strategy = match std::env::var("MARKET_CORE_ROUTING_STRATEGY").as_deref() {
            Ok("round_robin") => RoutingStrategy::RoundRobin,
            Ok("least_load") => RoutingStrategy::LeastLoad,
            Ok("consistent_hash") => RoutingStrategy::ConsistentHash,
            Ok("health_score") => RoutingStrategy::HealthScore,
            _ => default.routing_strategy,
        };
        Self {
            routing_strategy,
            routing_timeout_ms: env_or("MARKET_CORE_ROUTING_TIMEOUT_MS", default.routing_timeout_ms),
            enable_fallback_routing: env_or(
                "MARKET_CORE_ENABLE_FALLBACK_ROUTING",
                default.enable_fallback_routing,
            ),
            circuit_breaker_threshold: env_or(
                "MARKET_CORE_ROUTER_CB_THRESHOLD",
                default.circuit_breaker_threshold,
            ),
            circuit_breaker_timeout_seconds: env_or(
                "MARKET_CORE_ROUTER_CB_TIMEOUT_SECONDS",
                default.circuit_breaker_timeout_seconds,
            ),
            health_check_interval_seconds: env_or(
                "MARKET_CORE_HEALTH_CHECK_INTERVAL_SECONDS",
                default.health_check_interval_seconds,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchingStrategy {
    Immediate,
    SizeBased,
    TimeBased,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowAction {
    DropOldest,
    RejectNew,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    pub strategy: BatchingStrategy,
    pub max_batch_size: usize,
    pub max_wait_time_ms: u64,
    pub overflow_action: OverflowAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub priority: u32,
    pub max_queue_size: usize,
    pub processing_timeout_ms: u64,
    pub max_concurrent_processing: usize,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_seconds: u64,
    pub error_threshold: f64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub batching: BatchingConfig,
}

impl ChannelConfig {
    /// Overrides the fields common to every channel from `MARKET_CORE_{PREFIX}_*`
    /// variables, leaving batching strategy/shape (which is structural, not
    /// tunable per-deployment) at its compiled-in default.
    fn apply_env(self, prefix: &str) -> Self {
        Self {
            enabled: env_or(&format!("MARKET_CORE_{prefix}_ENABLED"), self.enabled),
            max_queue_size: env_or(&format!("MARKET_CORE_{prefix}_MAX_QUEUE_SIZE"), self.max_queue_size),
            processing_timeout_ms: env_or(
                &format!("MARKET_CORE_{prefix}_PROCESSING_TIMEOUT_MS"),
                self.processing_timeout_ms,
            ),
            circuit_breaker_threshold: env_or(
                &format!("MARKET_CORE_{prefix}_CB_THRESHOLD"),
                self.circuit_breaker_threshold,
            ),
            circuit_breaker_timeout_seconds: env_or(
                &format!("MARKET_CORE_{prefix}_CB_TIMEOUT_SECONDS"),
                self.circuit_breaker_timeout_seconds,
            ),
            error_threshold: env_or(&format!("MARKET_CORE_{prefix}_ERROR_THRESHOLD"), self.error_threshold),
            retry_attempts: env_or(&format!("MARKET_CORE_{prefix}_RETRY_ATTEMPTS"), self.retry_attempts),
            retry_delay_ms: env_or(&format!("MARKET_CORE_{prefix}_RETRY_DELAY_MS"), self.retry_delay_ms),
            ..self
        }
    }

    pub fn tick_defaults() -> Self {
        Self {
            enabled: true,
            priority: 0,
            max_queue_size: 10_000,
            processing_timeout_ms: 50,
            max_concurrent_processing: 1,
            circuit_breaker_threshold: 10,
            circuit_breaker_timeout_seconds: 60,
            error_threshold: 0.10,
            retry_attempts: 0,
            retry_delay_ms: 0,
            batching: BatchingConfig {
                strategy: BatchingStrategy::Immediate,
                max_batch_size: 1,
                max_wait_time_ms: 0,
                overflow_action: OverflowAction::RejectNew,
            },
        }
    }

    pub fn ohlcv_defaults() -> Self {
        Self {
            enabled: true,
            priority: 1,
            max_queue_size: 10_000,
            processing_timeout_ms: 100,
            max_concurrent_processing: 1,
            circuit_breaker_threshold: 10,
            circuit_breaker_timeout_seconds: 60,
            error_threshold: 0.10,
            retry_attempts: 0,
            retry_delay_ms: 0,
            batching: BatchingConfig {
                strategy: BatchingStrategy::SizeBased,
                max_batch_size: 100,
                max_wait_time_ms: 100,
                overflow_action: OverflowAction::RejectNew,
            },
        }
    }

    pub fn fmv_defaults() -> Self {
        Self {
            enabled: true,
            priority: 2,
            max_queue_size: 10_000,
            processing_timeout_ms: 500,
            max_concurrent_processing: 1,
            circuit_breaker_threshold: 10,
            circuit_breaker_timeout_seconds: 60,
            error_threshold: 0.10,
            retry_attempts: 0,
            retry_delay_ms: 0,
            batching: BatchingConfig {
                strategy: BatchingStrategy::Hybrid,
                max_batch_size: 50,
                max_wait_time_ms: 500,
                overflow_action: OverflowAction::RejectNew,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub db_path: String,
    pub batch_size: usize,
    pub flush_interval_seconds: u64,
    pub queue_capacity: usize,
    pub min_connections: usize,
    pub max_connections: usize,
    pub connect_timeout_seconds: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: "./market_core.db".to_string(),
            batch_size: 100,
            flush_interval_seconds: 5,
            queue_capacity: 1000,
            min_connections: 1,
            max_connections: 5,
            connect_timeout_seconds: 10,
        }
    }
}

impl PersistenceConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            db_path: env_or_string("MARKET_CORE_DB_PATH", &default.db_path),
            batch_size: env_or("MARKET_CORE_PERSISTENCE_BATCH_SIZE", default.batch_size),
            flush_interval_seconds: env_or(
                "MARKET_CORE_PERSISTENCE_FLUSH_INTERVAL_SECONDS",
                default.flush_interval_seconds,
            ),
            queue_capacity: env_or("MARKET_CORE_PERSISTENCE_QUEUE_CAPACITY", default.queue_capacity),
            min_connections: env_or("MARKET_CORE_PERSISTENCE_MIN_CONNECTIONS", default.min_connections),
            max_connections: env_or("MARKET_CORE_PERSISTENCE_MAX_CONNECTIONS", default.max_connections),
            connect_timeout_seconds: env_or(
                "MARKET_CORE_PERSISTENCE_CONNECT_TIMEOUT_SECONDS",
                default.connect_timeout_seconds,
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub sample_interval_seconds: u64,
    pub max_latency_ms: f64,
    pub min_success_rate: f64,
    pub max_memory_gb: f64,
    pub max_queue_utilization: f64,
    pub max_error_rate: f64,
    pub max_processing_ms: f64,
    pub alert_cooldown_seconds: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_seconds: 10,
            max_latency_ms: 50.0,
            min_success_rate: 0.95,
            max_memory_gb: 2.0,
            max_queue_utilization: 0.80,
            max_error_rate: 0.05,
            max_processing_ms: 100.0,
            alert_cooldown_seconds: 300,
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            sample_interval_seconds: env_or(
                "MARKET_CORE_MONITOR_SAMPLE_INTERVAL_SECONDS",
                default.sample_interval_seconds,
            ),
            max_latency_ms: env_or("MARKET_CORE_MONITOR_MAX_LATENCY_MS", default.max_latency_ms),
            min_success_rate: env_or(
                "MARKET_CORE_MONITOR_MIN_SUCCESS_RATE",
                default.min_success_rate,
            ),
            max_memory_gb: env_or("MARKET_CORE_MONITOR_MAX_MEMORY_GB", default.max_memory_gb),
            max_queue_utilization: env_or(
                "MARKET_CORE_MONITOR_MAX_QUEUE_UTILIZATION",
                default.max_queue_utilization,
            ),
            max_error_rate: env_or("MARKET_CORE_MONITOR_MAX_ERROR_RATE", default.max_error_rate),
            max_processing_ms: env_or(
                "MARKET_CORE_MONITOR_MAX_PROCESSING_MS",
                default.max_processing_ms,
            ),
            alert_cooldown_seconds: env_or(
                "MARKET_CORE_MONITOR_ALERT_COOLDOWN_SECONDS",
                default.alert_cooldown_seconds,
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub high_low: HighLowConfig,
    pub trend: TrendConfig,
    pub surge: SurgeConfig,
    pub volume_surge_multiplier: f64,
    pub significant_move_threshold: f64,
    pub fmv_confidence_threshold: f64,
    pub fmv_deviation_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            high_low: HighLowConfig::default(),
            trend: TrendConfig::default(),
            surge: SurgeConfig::default(),
            volume_surge_multiplier: 3.0,
            significant_move_threshold: 2.0,
            fmv_confidence_threshold: 0.8,
            fmv_deviation_threshold: 1.0,
        }
    }
}

impl DetectionConfig {
    /// Overrides the cross-detector scalar thresholds from the environment;
    /// the nested `high_low`/`trend`/`surge` configs stay at their compiled-in
    /// defaults since they're tuned as a unit, not field-by-field per deploy.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            volume_surge_multiplier: env_or(
                "MARKET_CORE_DETECTION_VOLUME_SURGE_MULTIPLIER",
                default.volume_surge_multiplier,
            ),
            significant_move_threshold: env_or(
                "MARKET_CORE_DETECTION_SIGNIFICANT_MOVE_THRESHOLD",
                default.significant_move_threshold,
            ),
            fmv_confidence_threshold: env_or(
                "MARKET_CORE_DETECTION_FMV_CONFIDENCE_THRESHOLD",
                default.fmv_confidence_threshold,
            ),
            fmv_deviation_threshold: env_or(
                "MARKET_CORE_DETECTION_FMV_DEVIATION_THRESHOLD",
                default.fmv_deviation_threshold,
            ),
            ..default
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub tick_enabled: bool,
    pub ohlcv_enabled: bool,
    pub fmv_enabled: bool,
    pub router: RouterConfig,
    pub tick_channel: ChannelConfig,
    pub ohlcv_channel: ChannelConfig,
    pub fmv_channel: ChannelConfig,
    pub detection: DetectionConfig,
    pub persistence: PersistenceConfig,
    pub monitor: MonitorConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            tick_enabled: true,
            ohlcv_enabled: true,
            fmv_enabled: true,
            router: RouterConfig::default(),
            tick_channel: ChannelConfig::tick_defaults(),
            ohlcv_channel: ChannelConfig::ohlcv_defaults(),
            fmv_channel: ChannelConfig::fmv_defaults(),
            detection: DetectionConfig::default(),
            persistence: PersistenceConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl SystemConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let default = Self::default();
        Self {
            tick_enabled: env_or("MARKET_CORE_TICK_ENABLED", default.tick_enabled),
            ohlcv_enabled: env_or("MARKET_CORE_OHLCV_ENABLED", default.ohlcv_enabled),
            fmv_enabled: env_or("MARKET_CORE_FMV_ENABLED", default.fmv_enabled),
            router: RouterConfig::from_env(),
            tick_channel: default.tick_channel.apply_env("TICK"),
            ohlcv_channel: default.ohlcv_channel.apply_env("OHLCV"),
            fmv_channel: default.fmv_channel.apply_env("FMV"),
            detection: DetectionConfig::from_env(),
            persistence: PersistenceConfig::from_env(),
            monitor: MonitorConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_literals() {
        let router = RouterConfig::default();
        assert_eq!(router.routing_timeout_ms, 50);
        assert_eq!(router.circuit_breaker_threshold, 10);

        let persistence = PersistenceConfig::default();
        assert_eq!(persistence.batch_size, 100);
        assert_eq!(persistence.queue_capacity, 1000);

        let monitor = MonitorConfig::default();
        assert_eq!(monitor.alert_cooldown_seconds, 300);
    }
}
