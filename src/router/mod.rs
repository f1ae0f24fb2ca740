//! Classifies, selects, and dispatches to a processing channel, racing a
//! routing deadline against the channel invocation. Never propagates
//! exceptions past `route()`.

pub mod load_balancer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::channel::{ChannelType, ProcessingChannel, ProcessingResult};
use crate::config::RouterConfig;
use crate::identifier::DataIdentifier;
use crate::metrics::CircuitBreaker;
use crate::model::{DataType, RawMarketItem};

pub use load_balancer::LoadBalancer;

#[derive(Debug, Default)]
pub struct RouterCounters {
    pub routed: AtomicU64,
    pub routing_errors: AtomicU64,
    pub routing_timeouts: AtomicU64,
    pub fallback_routes: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RouterCountersSnapshot {
    pub routed: u64,
    pub routing_errors: u64,
    pub routing_timeouts: u64,
    pub fallback_routes: u64,
}

pub struct ChannelRouter {
    config: RouterConfig,
    identifier: DataIdentifier,
    load_balancer: LoadBalancer,
    circuit_breaker: CircuitBreaker,
    channels: HashMap<ChannelType, Vec<Arc<dyn ProcessingChannel>>>,
    counters: RouterCounters,
}

impl ChannelRouter {
    pub fn new(config: RouterConfig) -> Self {
        let threshold = config.circuit_breaker_threshold;
        let timeout = Duration::from_secs(config.circuit_breaker_timeout_seconds);
        Self {
            config,
            identifier: DataIdentifier::default(),
            load_balancer: LoadBalancer::new(),
            circuit_breaker: CircuitBreaker::new(threshold, timeout),
            channels: HashMap::new(),
            counters: RouterCounters::default(),
        }
    }

    pub fn register(&mut self, channel_type: ChannelType, channel: Arc<dyn ProcessingChannel>) {
        self.channels.entry(channel_type).or_default().push(channel);
    }

    pub fn counters(&self) -> RouterCountersSnapshot {
        RouterCountersSnapshot {
            routed: self.counters.routed.load(Ordering::Relaxed),
            routing_errors: self.counters.routing_errors.load(Ordering::Relaxed),
            routing_timeouts: self.counters.routing_timeouts.load(Ordering::Relaxed),
            fallback_routes: self.counters.fallback_routes.load(Ordering::Relaxed),
        }
    }

    pub fn all_channels(&self) -> impl Iterator<Item = &Arc<dyn ProcessingChannel>> {
        self.channels.values().flatten()
    }

    pub fn is_healthy(&self) -> bool {
        !self.circuit_breaker.is_open()
    }

    /// `route(data)`: identify, select channel type, pick instance, dispatch
    /// under a deadline, forward the result. Returns `None` only for
    /// `UnknownDataType` or `NoAvailableChannel`; all other failures are
    /// folded into a failed `ProcessingResult`.
    pub async fn route(&self, data: RawMarketItem) -> Option<ProcessingResult> {
        if self.circuit_breaker.is_open() {
            return Some(ProcessingResult::failed("router_circuit_open"));
        }

        let data_type = self.identifier.identify(&data);
        let channel_type = match data_type {
            DataType::Tick => ChannelType::Tick,
            DataType::Ohlcv => ChannelType::Ohlcv,
            DataType::Fmv => ChannelType::Fmv,
            DataType::Unknown => {
                self.counters.routing_errors.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let candidates = match self.channels.get(&channel_type) {
            Some(list) if !list.is_empty() => list,
            _ => {
                self.counters.routing_errors.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let selected = self
            .load_balancer
            .select(self.config.routing_strategy, candidates)?;

        let mut target = selected;
        if !selected.is_healthy() && self.config.enable_fallback_routing {
            self.counters.fallback_routes.fetch_add(1, Ordering::Relaxed);
            if let Some(peer) = candidates.iter().find(|c| c.is_healthy()) {
                target = peer;
            }
        }

        let target_name = target.name().to_string();
        let target = Arc::clone(target);
        let deadline = Duration::from_millis(self.config.routing_timeout_ms);

        // Spawn rather than wrap the future in `timeout` directly: on a
        // deadline miss the channel keeps running to completion (and its
        // own metrics still update) instead of being dropped mid-update.
        let handle = tokio::spawn(async move { target.process_with_metrics(data).await });

        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(result)) => {
                self.counters.routed.fetch_add(1, Ordering::Relaxed);
                if result.success {
                    self.circuit_breaker.record_success();
                } else if self.circuit_breaker.record_failure() {
                    warn!(channel = %target_name, "router circuit breaker opened");
                }
                Some(result)
            }
            Ok(Err(join_err)) => {
                self.counters.routing_errors.fetch_add(1, Ordering::Relaxed);
                self.circuit_breaker.record_failure();
                Some(
                    ProcessingResult::failed(join_err.to_string())
                        .with_metadata("channel", target_name),
                )
            }
            Err(_) => {
                self.counters.routing_timeouts.fetch_add(1, Ordering::Relaxed);
                self.circuit_breaker.record_failure();
                Some(
                    ProcessingResult::failed("timeout")
                        .with_metadata("error_type", "timeout")
                        .with_metadata("channel", target_name),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelCore, ChannelStatus, TickChannel};
    use crate::config::ChannelConfig;
    use crate::detectors::{HighLowConfig, SurgeConfig, TrendConfig};
    use crate::model::TickRecord;
    use crate::sink::CollectingEventSink;

    fn tick_channel() -> Arc<dyn ProcessingChannel> {
        let sink = Arc::new(CollectingEventSink::new());
        let ch = TickChannel::new(
            ChannelConfig::tick_defaults(),
            HighLowConfig::default(),
            TrendConfig::default(),
            SurgeConfig::default(),
            sink,
        );
        ch.core().set_status(ChannelStatus::Active);
        ch
    }

    #[tokio::test]
    async fn routes_tick_data_to_registered_channel() {
        let mut router = ChannelRouter::new(RouterConfig::default());
        router.register(ChannelType::Tick, tick_channel());

        let tick = RawMarketItem::Tick(TickRecord::new("AAPL", 150.0, 1000, 1.0).unwrap());
        let result = router.route(tick).await.unwrap();
        assert!(result.success);
        assert_eq!(router.counters().routed, 1);
    }

    #[tokio::test]
    async fn unknown_type_with_no_channel_returns_none() {
        let router = ChannelRouter::new(RouterConfig::default());
        let unknown = RawMarketItem::Untyped(serde_json::json!({"nonsense": true}));
        assert!(router.route(unknown).await.is_none());
        assert_eq!(router.counters().routing_errors, 1);
    }

    #[tokio::test]
    async fn missing_channel_type_returns_none() {
        let mut router = ChannelRouter::new(RouterConfig::default());
        router.register(ChannelType::Tick, tick_channel());
        let fmv = RawMarketItem::Untyped(serde_json::json!({"fmv": 1.0}));
        assert!(router.route(fmv).await.is_none());
    }

    #[tokio::test]
    async fn unhealthy_sole_channel_is_fallback_routed_to_itself() {
        let mut config = RouterConfig::default();
        config.enable_fallback_routing = true;
        let mut router = ChannelRouter::new(config);

        let ch = tick_channel();
        ch.core().set_status(ChannelStatus::Error);
        router.register(ChannelType::Tick, ch);

        let tick = RawMarketItem::Tick(TickRecord::new("AAPL", 150.0, 1000, 1.0).unwrap());
        let result = router.route(tick).await;
        assert!(result.is_some());
        assert_eq!(router.counters().fallback_routes, 1);
    }

    struct SlowChannel {
        core: ChannelCore,
    }

    #[async_trait::async_trait]
    impl ProcessingChannel for SlowChannel {
        fn name(&self) -> &str {
            "slow"
        }

        fn channel_type(&self) -> ChannelType {
            ChannelType::Tick
        }

        fn core(&self) -> &ChannelCore {
            &self.core
        }

        async fn process_one(&self, _data: RawMarketItem) -> ProcessingResult {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ProcessingResult::ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn routing_deadline_elapsed_reports_timeout() {
        let mut config = RouterConfig::default();
        config.routing_timeout_ms = 1;
        let mut router = ChannelRouter::new(config);

        let sink = Arc::new(CollectingEventSink::new());
        let slow = Arc::new(SlowChannel {
            core: ChannelCore::new("slow", ChannelConfig::tick_defaults(), sink),
        });
        slow.core().set_status(ChannelStatus::Active);
        router.register(ChannelType::Tick, slow);

        let tick = RawMarketItem::Tick(TickRecord::new("AAPL", 150.0, 1000, 1.0).unwrap());
        let result = router.route(tick).await.unwrap();
        assert!(!result.success);
        assert_eq!(
            result.metadata.get("error_type").and_then(|v| v.as_str()),
            Some("timeout")
        );
        assert_eq!(router.counters().routing_timeouts, 1);
    }
}
