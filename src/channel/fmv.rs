//! Hybrid-batching channel for fair-market-value estimates: filters low
//! confidence records, tracks a rolling deviation history per symbol, and
//! emits deviation/high-confidence/trend events.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::config::ChannelConfig;
use crate::error::CoreError;
use crate::model::{Event, FmvRecord, RawMarketItem, ValuationHistory};
use crate::sink::DownstreamEventSink;

use super::{ChannelCore, ChannelType, ProcessingChannel, ProcessingResult};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);
const IDLE_EVICTION_SECONDS: f64 = 4.0 * 60.0 * 60.0;
const TREND_WINDOW: usize = 5;
const TREND_SHARE: f64 = 0.80;

pub struct FmvChannel {
    core: ChannelCore,
    histories: DashMap<String, ValuationHistory>,
    confidence_threshold: f64,
    deviation_threshold: f64,
}

impl FmvChannel {
    pub fn new(
        config: ChannelConfig,
        confidence_threshold: f64,
        deviation_threshold: f64,
        sink: Arc<dyn DownstreamEventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: ChannelCore::new("fmv", config, sink),
            histories: DashMap::new(),
            confidence_threshold,
            deviation_threshold,
        })
    }

    fn coerce(&self, data: RawMarketItem) -> Result<FmvRecord, CoreError> {
        match data {
            RawMarketItem::Fmv(record) => Ok(record),
            RawMarketItem::Untyped(value) => FmvRecord::from_wire(&value),
            other => Err(CoreError::InvalidData(format!(
                "fmv channel received non-fmv item: {other:?}"
            ))),
        }
    }

    pub fn spawn_worker(self: &Arc<Self>) {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            let Some(mut rx) = channel.core.take_receiver().await else {
                return;
            };
            let batch_size = channel.core.config.batching.max_batch_size;
            let max_wait = Duration::from_millis(channel.core.config.batching.max_wait_time_ms.max(1));
            let mut buffer = Vec::with_capacity(batch_size);
            let mut last_flush = tokio::time::Instant::now();

            loop {
                tokio::select! {
                    item = rx.recv() => {
                        match item {
                            Some(data) => {
                                channel.core.dequeue();
                                buffer.push(data);
                                if buffer.len() >= batch_size || last_flush.elapsed() >= max_wait {
                                    channel.drain_buffer(&mut buffer).await;
                                    last_flush = tokio::time::Instant::now();
                                }
                            }
                            None => {
                                channel.drain_buffer(&mut buffer).await;
                                return;
                            }
                        }
                    }
                    _ = tokio::time::sleep(max_wait) => {
                        if !buffer.is_empty() {
                            channel.drain_buffer(&mut buffer).await;
                            last_flush = tokio::time::Instant::now();
                        }
                    }
                }
                if channel.core.shutdown.load(Ordering::Acquire) && buffer.is_empty() {
                    return;
                }
            }
        });
    }

    async fn drain_buffer(self: &Arc<Self>, buffer: &mut Vec<RawMarketItem>) {
        for item in buffer.drain(..) {
            self.process_with_metrics(item).await;
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
                let now = crate::time::now_unix_seconds();
                channel
                    .histories
                    .retain(|_, history| now - history.last_update <= IDLE_EVICTION_SECONDS);
            }
        });
    }
}

#[async_trait]
impl ProcessingChannel for FmvChannel {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Fmv
    }

    fn core(&self) -> &ChannelCore {
        &self.core
    }

    async fn process_one(&self, data: RawMarketItem) -> ProcessingResult {
        let record = match self.coerce(data) {
            Ok(record) => record,
            Err(err) => return ProcessingResult::failed(err.to_string()),
        };

        if !record.is_high_confidence(self.confidence_threshold) {
            return ProcessingResult::ok(Vec::new()).with_metadata("status", "filtered_low_confidence");
        }

        let mut history = self
            .histories
            .entry(record.ticker.clone())
            .or_insert_with(|| ValuationHistory::new(record.ticker.clone()));
        history.push(&record);

        let mut events = Vec::new();

        if record.is_significant_deviation(self.deviation_threshold) {
            events.push(Event::FmvDeviation {
                ticker: record.ticker.clone(),
                price: record.market_price,
                time: record.timestamp,
                label: "fmv_deviation".to_string(),
                fmv_price: record.fmv,
                market_price: record.market_price,
                deviation_percent: record.deviation_percent,
                is_undervalued: record.is_undervalued(),
            });
        }

        let signal_strength = record.signal_strength();
        if signal_strength >= 0.7 {
            events.push(Event::FmvHighConfidence {
                ticker: record.ticker.clone(),
                price: record.market_price,
                time: record.timestamp,
                label: "fmv_high_confidence".to_string(),
                confidence: record.confidence,
                signal_strength,
            });
        }

        if history.consistent_direction(TREND_WINDOW, TREND_SHARE) {
            events.push(Event::FmvTrend {
                ticker: record.ticker.clone(),
                price: record.market_price,
                time: record.timestamp,
                label: "fmv_trend".to_string(),
                is_undervalued: record.is_undervalued(),
            });
        }

        for event in &events {
            self.core.sink.publish(event.clone()).await;
        }

        ProcessingResult::ok(events)
            .with_metadata("ticker", record.ticker.clone())
            .with_metadata("deviation_percent", record.deviation_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelStatus;
    use crate::sink::CollectingEventSink;

    fn channel() -> Arc<FmvChannel> {
        let sink = Arc::new(CollectingEventSink::new());
        let ch = FmvChannel::new(ChannelConfig::fmv_defaults(), 0.8, 1.0, sink);
        ch.core.set_status(ChannelStatus::Active);
        ch
    }

    #[tokio::test]
    async fn filters_low_confidence_and_then_emits_deviation() {
        let ch = channel();

        let low_confidence = FmvRecord::new("AAPL", 1.0, 150.0, 150.0, 0.5).unwrap();
        let result = ch.process_with_metrics(RawMarketItem::Fmv(low_confidence)).await;
        assert!(result.success);
        assert!(result.events.is_empty());
        assert_eq!(
            result.metadata.get("status").and_then(|v| v.as_str()),
            Some("filtered_low_confidence")
        );

        let deviating = FmvRecord::new("AAPL", 2.0, 160.0, 150.0, 0.9).unwrap();
        let result = ch.process_with_metrics(RawMarketItem::Fmv(deviating)).await;
        assert!(result.events.iter().any(|e| matches!(e, Event::FmvDeviation { is_undervalued: true, .. })));
    }
}
