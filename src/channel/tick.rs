//! Immediate-strategy channel for per-trade/per-second ticks: maintains
//! per-symbol state and runs the HighLow/Trend/Surge detectors inline on
//! every submit.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::config::ChannelConfig;
use crate::detectors::{highlow, surge, trend, HighLowConfig, SurgeConfig, TrendConfig, TrendTracker};
use crate::error::CoreError;
use crate::model::{RawMarketItem, SymbolTickState, TickRecord};
use crate::sink::DownstreamEventSink;

use super::{ChannelCore, ChannelType, ProcessingChannel, ProcessingResult};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const IDLE_EVICTION_SECONDS: f64 = 60.0 * 60.0;

pub struct TickChannel {
    core: ChannelCore,
    state: DashMap<String, SymbolTickState>,
    trend_trackers: DashMap<String, TrendTracker>,
    high_low_config: HighLowConfig,
    trend_config: TrendConfig,
    surge_config: SurgeConfig,
}

impl TickChannel {
    pub fn new(
        config: ChannelConfig,
        high_low_config: HighLowConfig,
        trend_config: TrendConfig,
        surge_config: SurgeConfig,
        sink: Arc<dyn DownstreamEventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: ChannelCore::new("tick", config, sink),
            state: DashMap::new(),
            trend_trackers: DashMap::new(),
            high_low_config,
            trend_config,
            surge_config,
        })
    }

    fn coerce(&self, data: RawMarketItem) -> Result<TickRecord, CoreError> {
        match data {
            RawMarketItem::Tick(record) => Ok(record),
            RawMarketItem::Untyped(value) => TickRecord::from_wire(&value),
            other => Err(CoreError::InvalidData(format!(
                "tick channel received non-tick item: {other:?}"
            ))),
        }
    }

    pub fn spawn_cleanup(self: &Arc<Self>) {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CLEANUP_INTERVAL).await;
                if channel.core.shutdown.load(Ordering::Acquire) {
                    break;
                }
                channel.evict_idle_state();
            }
        });
    }

    fn evict_idle_state(&self) {
        let now = crate::time::now_unix_seconds();
        self.state
            .retain(|_, state| now - state.last_update <= IDLE_EVICTION_SECONDS);
    }
}

#[async_trait]
impl ProcessingChannel for TickChannel {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Tick
    }

    fn core(&self) -> &ChannelCore {
        &self.core
    }

    async fn process_one(&self, data: RawMarketItem) -> ProcessingResult {
        let record = match self.coerce(data) {
            Ok(record) => record,
            Err(err) => return ProcessingResult::failed(err.to_string()),
        };

        let mut state = self
            .state
            .entry(record.ticker.clone())
            .or_insert_with(|| SymbolTickState::new(record.ticker.clone()));

        let prior_high = state.session_high;
        let prior_low = state.session_low;
        state.update(&record);

        let highlow_events = highlow::detect(&self.high_low_config, &record, prior_high, prior_low, &mut state);

        let mut tracker = self
            .trend_trackers
            .entry(record.ticker.clone())
            .or_insert_with(TrendTracker::default);
        let trend_events = trend::detect(&self.trend_config, &record, &state, &mut tracker);

        let surge_events = surge::detect(&self.surge_config, &record, &state);

        let detectors_ran = serde_json::json!(["highlow", "trend", "surge"]);
        let mut events = highlow_events;
        events.extend(trend_events);
        events.extend(surge_events);

        let events_generated = events.len();
        for event in &events {
            self.core.sink.publish(event.clone()).await;
        }

        ProcessingResult::ok(events)
            .with_metadata("ticker", record.ticker.clone())
            .with_metadata("price", record.price)
            .with_metadata("events_generated", events_generated as u64)
            .with_metadata("detectors_ran", detectors_ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelStatus;
    use crate::sink::CollectingEventSink;

    fn channel() -> Arc<TickChannel> {
        let sink = Arc::new(CollectingEventSink::new());
        let ch = TickChannel::new(
            ChannelConfig::tick_defaults(),
            HighLowConfig::default(),
            TrendConfig::default(),
            SurgeConfig::default(),
            sink,
        );
        ch.core.set_status(ChannelStatus::Active);
        ch
    }

    #[tokio::test]
    async fn submit_processes_immediately_and_emits_session_high() {
        let ch = channel();
        let first = RawMarketItem::Tick(TickRecord::new("AAPL", 150.00, 1000, 0.0).unwrap());
        assert!(ch.submit(first).await);

        let second = RawMarketItem::Tick(TickRecord::new("AAPL", 150.60, 1000, 2.0).unwrap());
        assert!(ch.submit(second).await);

        assert_eq!(ch.core.metrics.snapshot().processed, 2);
    }

    #[tokio::test]
    async fn rejects_invalid_wire_payload() {
        let ch = channel();
        let bad = RawMarketItem::Untyped(serde_json::json!({"not": "a tick"}));
        let result = ch.process_with_metrics(bad).await;
        assert!(!result.success);
    }
}
