//! Size-based batching channel for minute OHLCV aggregates: maintains a
//! rolling per-symbol bar buffer, runs the volume/move/rolling-close
//! analyses, and forwards a derived minute-truncated record to
//! persistence.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::config::ChannelConfig;
use crate::error::CoreError;
use crate::model::{Direction, Event, OhlcvRecord, SymbolBarBuffer};
use crate::persistence::OhlcvPersistence;
use crate::sink::DownstreamEventSink;

use super::{ChannelCore, ChannelType, ProcessingChannel, ProcessingResult};
use crate::model::RawMarketItem;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const IDLE_EVICTION_SECONDS: f64 = 2.0 * 60.0 * 60.0;

pub struct OhlcvChannel {
    core: ChannelCore,
    buffers: DashMap<String, SymbolBarBuffer>,
    persistence: Arc<OhlcvPersistence>,
    volume_surge_multiplier: f64,
    significant_move_threshold: f64,
}

impl OhlcvChannel {
    pub fn new(
        config: ChannelConfig,
        volume_surge_multiplier: f64,
        significant_move_threshold: f64,
        persistence: Arc<OhlcvPersistence>,
        sink: Arc<dyn DownstreamEventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: ChannelCore::new("ohlcv", config, sink),
            buffers: DashMap::new(),
            persistence,
            volume_surge_multiplier,
            significant_move_threshold,
        })
    }

    fn coerce(&self, data: RawMarketItem) -> Result<OhlcvRecord, CoreError> {
        match data {
            RawMarketItem::Ohlcv(record) => Ok(record),
            RawMarketItem::Untyped(value) => OhlcvRecord::from_wire(&value),
            other => Err(CoreError::InvalidData(format!(
                "ohlcv channel received non-ohlcv item: {other:?}"
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
                                if buffer.len() >= batch_size {
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
                        if !buffer.is_empty() && last_flush.elapsed() >= max_wait {
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
                    .buffers
                    .retain(|_, buf| now - buf.last_update <= IDLE_EVICTION_SECONDS);
            }
        });
    }
}

#[async_trait]
impl ProcessingChannel for OhlcvChannel {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Ohlcv
    }

    fn core(&self) -> &ChannelCore {
        &self.core
    }

    async fn process_one(&self, data: RawMarketItem) -> ProcessingResult {
        let record = match self.coerce(data) {
            Ok(record) => record,
            Err(err) => return ProcessingResult::failed(err.to_string()),
        };

        let mut buffer = self
            .buffers
            .entry(record.ticker.clone())
            .or_insert_with(|| SymbolBarBuffer::new(record.ticker.clone()));

        let baseline_volume = buffer.volume_baseline;
        buffer.push(record.clone());

        let mut events = Vec::new();
        if record.is_volume_surge(baseline_volume, self.volume_surge_multiplier) {
            events.push(Event::AggregateVolumeSurge {
                ticker: record.ticker.clone(),
                price: record.close,
                time: record.timestamp,
                label: "aggregate_volume_surge".to_string(),
                volume: record.volume,
                volume_ratio: record.volume as f64 / baseline_volume.max(1.0),
            });
        }
        if record.is_significant_move(self.significant_move_threshold) {
            let direction = if record.percent_change >= 0.0 { Direction::Up } else { Direction::Down };
            events.push(Event::AggregateMove {
                ticker: record.ticker.clone(),
                price: record.close,
                time: record.timestamp,
                label: "aggregate_move".to_string(),
                direction,
                percent_change: record.percent_change,
            });
        }

        let recent_closes = buffer.recent_closes(10);
        if let Some(max_close) = recent_closes.iter().cloned().fold(None, |acc: Option<f64>, c| {
            Some(acc.map_or(c, |m| m.max(c)))
        }) {
            if (record.close - max_close).abs() < 1e-9 {
                events.push(Event::AggregateHighClose {
                    ticker: record.ticker.clone(),
                    price: record.close,
                    time: record.timestamp,
                    label: "aggregate_high_close".to_string(),
                });
            }
        }
        if let Some(min_close) = recent_closes.iter().cloned().fold(None, |acc: Option<f64>, c| {
            Some(acc.map_or(c, |m| m.min(c)))
        }) {
            if (record.close - min_close).abs() < 1e-9 {
                events.push(Event::AggregateLowClose {
                    ticker: record.ticker.clone(),
                    price: record.close,
                    time: record.timestamp,
                    label: "aggregate_low_close".to_string(),
                });
            }
        }

        let pattern = buffer.classify_pattern();

        if !self.persistence.submit(record.clone()) {
            self.core.metrics.record_queue_overflow();
        }

        for event in &events {
            self.core.sink.publish(event.clone()).await;
        }

        ProcessingResult::ok(events)
            .with_metadata("ticker", record.ticker.clone())
            .with_metadata("volume_baseline", baseline_volume)
            .with_metadata("price_baseline", buffer.price_baseline)
            .with_metadata("pattern", pattern.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelStatus;
    use crate::config::PersistenceConfig;
    use crate::sink::CollectingEventSink;

    async fn channel() -> Arc<OhlcvChannel> {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("t.db").to_string_lossy().to_string();
        let persistence = OhlcvPersistence::spawn(PersistenceConfig {
            db_path,
            ..PersistenceConfig::default()
        })
        .unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let ch = OhlcvChannel::new(ChannelConfig::ohlcv_defaults(), 3.0, 2.0, persistence, sink);
        ch.core.set_status(ChannelStatus::Active);
        ch
    }

    #[tokio::test]
    async fn volume_surge_emits_after_baseline_established() {
        let ch = channel().await;
        for i in 0..10 {
            let record = OhlcvRecord::new("NVDA", 60.0 * (i as f64 + 1.0), 100.0, 101.0, 99.0, 100.0, 1_000_000, 1_000_000.0).unwrap();
            ch.process_with_metrics(RawMarketItem::Ohlcv(record)).await;
        }
        let spike = OhlcvRecord::new("NVDA", 60.0 * 11.0, 100.0, 101.0, 99.5, 100.5, 3_500_000, 1_000_000.0).unwrap();
        let result = ch.process_with_metrics(RawMarketItem::Ohlcv(spike)).await;
        assert!(result.events.iter().any(|e| matches!(e, Event::AggregateVolumeSurge { .. })));
        assert!(!result.events.iter().any(|e| matches!(e, Event::AggregateMove { .. })));
    }
}
