//! Per-trade / per-second tick record and the rolling per-symbol state a
//! `TickChannel` maintains across calls.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const PRICE_HISTORY_CAP: usize = 100;
const VOLUME_HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketStatus {
    Premarket,
    Regular,
    Afterhours,
}

impl Default for MarketStatus {
    fn default() -> Self {
        MarketStatus::Regular
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// Aggregate-per-second
    A,
    /// Trade
    T,
    /// Quote
    Q,
}

impl Default for EventType {
    fn default() -> Self {
        EventType::A
    }
}

/// Standardized tick data from any source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub ticker: String,
    pub price: f64,
    pub volume: u64,
    pub timestamp: f64,
    pub source: String,
    pub event_type: EventType,
    pub market_status: MarketStatus,

    pub bid: Option<f64>,
    pub ask: Option<f64>,

    pub tick_open: Option<f64>,
    pub tick_high: Option<f64>,
    pub tick_low: Option<f64>,
    pub tick_close: Option<f64>,

    pub day_high: Option<f64>,
    pub day_low: Option<f64>,

    pub tick_vwap: Option<f64>,
    pub vwap: Option<f64>,

    pub accumulated_volume: Option<u64>,
}

impl TickRecord {
    pub fn new(ticker: impl Into<String>, price: f64, volume: u64, timestamp: f64) -> Result<Self, CoreError> {
        let mut record = Self {
            ticker: ticker.into(),
            price,
            volume,
            timestamp,
            source: "unknown".to_string(),
            event_type: EventType::A,
            market_status: MarketStatus::Regular,
            bid: None,
            ask: None,
            tick_open: None,
            tick_high: None,
            tick_low: None,
            tick_close: None,
            day_high: None,
            day_low: None,
            tick_vwap: None,
            vwap: None,
            accumulated_volume: None,
        };
        record.normalize();
        record.validate()?;
        Ok(record)
    }

    /// Fill in defaulted fields the way the original dataclass's
    /// `__post_init__` did (tick_close defaults to price).
    pub fn normalize(&mut self) {
        if self.tick_close.is_none() {
            self.tick_close = Some(self.price);
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.ticker.is_empty() {
            return Err(CoreError::InvalidData("empty ticker".into()));
        }
        if self.price <= 0.0 {
            return Err(CoreError::InvalidData(format!("invalid price: {}", self.price)));
        }
        if self.timestamp <= 0.0 {
            return Err(CoreError::InvalidData(format!("invalid timestamp: {}", self.timestamp)));
        }
        Ok(())
    }

    /// Parse the wire shape `{sym, p, v, t (ms), ev, b?, a?, vw?, s?}`.
    pub fn from_wire(value: &serde_json::Value) -> Result<Self, CoreError> {
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::InvalidData("tick wire payload must be an object".into()))?;

        let ticker = obj
            .get("sym")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::InvalidData("missing sym".into()))?
            .to_string();
        let price = obj
            .get("p")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| CoreError::InvalidData("missing p".into()))?;
        let volume = obj.get("v").and_then(|v| v.as_u64()).unwrap_or(0);
        let timestamp_ms = obj
            .get("t")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| CoreError::InvalidData("missing t".into()))?;

        let mut record = Self::new(ticker, price, volume, timestamp_ms / 1000.0)?;
        record.event_type = match obj.get("ev").and_then(|v| v.as_str()) {
            Some("T") => EventType::T,
            Some("Q") => EventType::Q,
            _ => EventType::A,
        };
        record.bid = obj.get("b").and_then(|v| v.as_f64());
        record.ask = obj.get("a").and_then(|v| v.as_f64());
        record.tick_vwap = obj.get("vw").and_then(|v| v.as_f64());
        record.source = "wire".to_string();
        record.validate()?;
        Ok(record)
    }
}

/// Rolling per-symbol state maintained exclusively by `TickChannel`.
#[derive(Debug, Clone)]
pub struct SymbolTickState {
    pub ticker: String,
    pub last_price: f64,
    pub last_update: f64,
    pub session_high: Option<f64>,
    pub session_low: Option<f64>,
    pub day_high: Option<f64>,
    pub day_low: Option<f64>,
    pub price_history: VecDeque<(f64, f64)>, // (timestamp, price)
    pub volume_history: VecDeque<(f64, u64)>, // (timestamp, volume)
    pub last_event_at: std::collections::HashMap<&'static str, f64>,
    pub session_open_at: Option<f64>,
}

impl SymbolTickState {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            last_price: 0.0,
            last_update: 0.0,
            session_high: None,
            session_low: None,
            day_high: None,
            day_low: None,
            price_history: VecDeque::with_capacity(PRICE_HISTORY_CAP),
            volume_history: VecDeque::with_capacity(VOLUME_HISTORY_CAP),
            last_event_at: std::collections::HashMap::new(),
            session_open_at: None,
        }
    }

    pub fn update(&mut self, tick: &TickRecord) {
        self.last_price = tick.price;
        self.last_update = tick.timestamp;

        if self.session_open_at.is_none() && tick.market_status == MarketStatus::Regular {
            self.session_open_at = Some(tick.timestamp);
        }

        self.day_high = Some(self.day_high.map_or(tick.price, |h| h.max(tick.price)));
        self.day_low = Some(self.day_low.map_or(tick.price, |l| l.min(tick.price)));

        self.price_history.push_back((tick.timestamp, tick.price));
        if self.price_history.len() > PRICE_HISTORY_CAP {
            self.price_history.pop_front();
        }
        self.volume_history.push_back((tick.timestamp, tick.volume));
        if self.volume_history.len() > VOLUME_HISTORY_CAP {
            self.volume_history.pop_front();
        }
    }

    pub fn seconds_since_session_open(&self, now: f64) -> Option<f64> {
        self.session_open_at.map(|open| now - open)
    }

    pub fn cooldown_elapsed(&self, kind: &'static str, now: f64, cooldown_seconds: f64) -> bool {
        match self.last_event_at.get(kind) {
            Some(last) => now - last >= cooldown_seconds,
            None => true,
        }
    }

    pub fn mark_event(&mut self, kind: &'static str, now: f64) {
        self.last_event_at.insert(kind, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_close_defaults_to_price() {
        let t = TickRecord::new("AAPL", 150.0, 1000, 1.0).unwrap();
        assert_eq!(t.tick_close, Some(150.0));
    }

    #[test]
    fn rejects_non_positive_price() {
        assert!(TickRecord::new("AAPL", 0.0, 1000, 1.0).is_err());
    }

    #[test]
    fn rejects_empty_ticker() {
        assert!(TickRecord::new("", 150.0, 1000, 1.0).is_err());
    }

    #[test]
    fn wire_format_converts_ms_to_seconds() {
        let payload = serde_json::json!({"sym": "AAPL", "p": 150.25, "v": 500, "t": 1700.0 * 1000.0});
        let record = TickRecord::from_wire(&payload).unwrap();
        assert_eq!(record.ticker, "AAPL");
        assert!((record.timestamp - 1700.0).abs() < 1e-9);
    }
}
