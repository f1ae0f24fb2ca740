//! The downstream event-processor interface: channels forward generated
//! events here rather than calling consumers directly, keeping channel
//! ownership decoupled from whoever ultimately drains events.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::model::Event;

#[async_trait]
pub trait DownstreamEventSink: Send + Sync {
    async fn publish(&self, event: Event);
}

/// Broadcasts events to any number of subscribers (e.g. a priority-queue
/// feeder for a WebSocket publisher). Lagging subscribers drop old events
/// rather than block producers, matching the channel's non-blocking
/// backpressure posture.
pub struct ChannelEventSink {
    sender: broadcast::Sender<Event>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl DownstreamEventSink for ChannelEventSink {
    async fn publish(&self, event: Event) {
        // No subscribers is a normal steady state; ignore the send error.
        let _ = self.sender.send(event);
    }
}

/// Collects events in-process. Used by tests that need to assert on
/// exactly what a channel emitted without standing up a broadcast
/// subscriber.
#[derive(Default)]
pub struct CollectingEventSink {
    events: parking_lot::Mutex<Vec<Event>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock())
    }
}

#[async_trait]
impl DownstreamEventSink for CollectingEventSink {
    async fn publish(&self, event: Event) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collecting_sink_retains_published_events() {
        let sink = CollectingEventSink::new();
        sink.publish(Event::SessionHigh {
            ticker: "AAPL".to_string(),
            price: 1.0,
            time: 1.0,
            label: "session_high".to_string(),
        })
        .await;
        assert_eq!(sink.drain().len(), 1);
        assert!(sink.drain().is_empty());
    }

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscriber() {
        let sink = ChannelEventSink::new(16);
        let mut rx = sink.subscribe();
        sink.publish(Event::SessionLow {
            ticker: "AAPL".to_string(),
            price: 1.0,
            time: 1.0,
            label: "session_low".to_string(),
        })
        .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.ticker(), "AAPL");
    }
}
