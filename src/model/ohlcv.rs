//! OHLCV (open/high/low/close/volume) aggregate record and the per-symbol
//! ring buffer an `OHLCVChannel` maintains.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const BAR_BUFFER_CAP: usize = 100;
const BASELINE_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    S1,
    S5,
    S15,
    S30,
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::M1
    }
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::S1 => "1s",
            Timeframe::S5 => "5s",
            Timeframe::S15 => "15s",
            Timeframe::S30 => "30s",
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketSession {
    Pre,
    Regular,
    Post,
}

impl Default for MarketSession {
    fn default() -> Self {
        MarketSession::Regular
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRecord {
    pub ticker: String,
    pub timestamp: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub avg_volume: f64,
    pub percent_change: f64,
    pub vwap: Option<f64>,
    pub daily_open: Option<f64>,
    pub accumulated_volume: Option<u64>,
    pub trade_count: Option<u64>,
    pub timeframe: Timeframe,
    pub market_session: MarketSession,
    pub source: String,
}

impl OhlcvRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ticker: impl Into<String>,
        timestamp: f64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
        avg_volume: f64,
    ) -> Result<Self, CoreError> {
        let mut record = Self {
            ticker: ticker.into(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            avg_volume,
            percent_change: 0.0,
            vwap: None,
            daily_open: None,
            accumulated_volume: None,
            trade_count: None,
            timeframe: Timeframe::M1,
            market_session: MarketSession::Regular,
            source: "unknown".to_string(),
        };
        record.normalize();
        record.validate()?;
        Ok(record)
    }

    pub fn normalize(&mut self) {
        if self.percent_change == 0.0 && self.open > 0.0 {
            self.percent_change = (self.close - self.open) / self.open * 100.0;
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.ticker.is_empty() {
            return Err(CoreError::InvalidData("empty ticker".into()));
        }
        if self.timestamp <= 0.0 {
            return Err(CoreError::InvalidData(format!("invalid timestamp: {}", self.timestamp)));
        }
        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if value <= 0.0 {
                return Err(CoreError::InvalidData(format!("invalid {name}: {value}")));
            }
        }
        if self.high < self.open.max(self.close) {
            return Err(CoreError::InvalidData(format!(
                "high {} must be >= max(open {}, close {})",
                self.high, self.open, self.close
            )));
        }
        if self.low > self.open.min(self.close) {
            return Err(CoreError::InvalidData(format!(
                "low {} must be <= min(open {}, close {})",
                self.low, self.open, self.close
            )));
        }
        if self.avg_volume <= 0.0 {
            return Err(CoreError::InvalidData(format!("invalid avg_volume: {}", self.avg_volume)));
        }
        Ok(())
    }

    /// Minute-aligned (floor to 60s) copy of this record's timestamp.
    pub fn minute_timestamp(&self) -> i64 {
        (self.timestamp as i64 / 60) * 60
    }

    pub fn is_volume_surge(&self, baseline: f64, multiplier: f64) -> bool {
        baseline > 0.0 && self.volume as f64 / baseline >= multiplier
    }

    pub fn is_significant_move(&self, threshold_percent: f64) -> bool {
        self.percent_change.abs() >= threshold_percent
    }

    /// Parse `{ticker, time, minute_open, minute_high, minute_low,
    /// minute_close, minute_volume, minute_vwap?, accumulated_volume?,
    /// timeframe?}`.
    pub fn from_wire(value: &serde_json::Value) -> Result<Self, CoreError> {
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::InvalidData("ohlcv wire payload must be an object".into()))?;

        let get_f64 = |key: &str| obj.get(key).and_then(|v| v.as_f64());
        let ticker = obj
            .get("ticker")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::InvalidData("missing ticker".into()))?
            .to_string();
        let timestamp = get_f64("time").ok_or_else(|| CoreError::InvalidData("missing time".into()))?;
        let open = get_f64("minute_open").ok_or_else(|| CoreError::InvalidData("missing minute_open".into()))?;
        let high = get_f64("minute_high").ok_or_else(|| CoreError::InvalidData("missing minute_high".into()))?;
        let low = get_f64("minute_low").ok_or_else(|| CoreError::InvalidData("missing minute_low".into()))?;
        let close = get_f64("minute_close").ok_or_else(|| CoreError::InvalidData("missing minute_close".into()))?;
        let volume = obj.get("minute_volume").and_then(|v| v.as_u64()).unwrap_or(0);
        let avg_volume = obj.get("avg_volume").and_then(|v| v.as_f64()).unwrap_or(volume.max(1) as f64);

        let mut record = Self::new(ticker, timestamp, open, high, low, close, volume, avg_volume)?;
        record.vwap = get_f64("minute_vwap");
        record.accumulated_volume = obj.get("accumulated_volume").and_then(|v| v.as_u64());
        record.source = "wire".to_string();
        record.validate()?;
        Ok(record)
    }
}

/// Classification of the last five percent changes observed for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarPattern {
    StrongUptrend,
    WeakUptrend,
    Sideways,
    WeakDowntrend,
    StrongDowntrend,
}

impl BarPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarPattern::StrongUptrend => "strong_uptrend",
            BarPattern::WeakUptrend => "weak_uptrend",
            BarPattern::Sideways => "sideways",
            BarPattern::WeakDowntrend => "weak_downtrend",
            BarPattern::StrongDowntrend => "strong_downtrend",
        }
    }
}

/// Ring buffer of recent bars for a symbol plus rolling baselines,
/// mutated only by `OHLCVChannel`.
#[derive(Debug, Clone)]
pub struct SymbolBarBuffer {
    pub ticker: String,
    pub bars: VecDeque<OhlcvRecord>,
    pub volume_baseline: f64,
    pub price_baseline: f64,
    pub last_update: f64,
}

impl SymbolBarBuffer {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            bars: VecDeque::with_capacity(BAR_BUFFER_CAP),
            volume_baseline: 0.0,
            price_baseline: 0.0,
            last_update: 0.0,
        }
    }

    pub fn push(&mut self, record: OhlcvRecord) {
        self.last_update = record.timestamp;
        self.bars.push_back(record);
        if self.bars.len() > BAR_BUFFER_CAP {
            self.bars.pop_front();
        }
        self.recompute_baselines();
    }

    fn recompute_baselines(&mut self) {
        if self.bars.len() < BASELINE_WINDOW {
            return;
        }
        let window: Vec<&OhlcvRecord> = self.bars.iter().rev().take(BASELINE_WINDOW).collect();
        let volume_sum: u64 = window.iter().map(|b| b.volume).sum();
        let price_sum: f64 = window.iter().map(|b| b.close).sum();
        self.volume_baseline = volume_sum as f64 / BASELINE_WINDOW as f64;
        self.price_baseline = price_sum / BASELINE_WINDOW as f64;
    }

    pub fn recent_closes(&self, n: usize) -> Vec<f64> {
        self.bars.iter().rev().take(n).map(|b| b.close).collect()
    }

    pub fn classify_pattern(&self) -> BarPattern {
        let changes: Vec<f64> = self.bars.iter().rev().take(5).map(|b| b.percent_change).collect();
        if changes.is_empty() {
            return BarPattern::Sideways;
        }
        let mean = changes.iter().sum::<f64>() / changes.len() as f64;
        let positive = changes.iter().filter(|c| **c > 0.0).count();
        let negative = changes.iter().filter(|c| **c < 0.0).count();

        if positive >= 4 && mean >= 1.0 {
            BarPattern::StrongUptrend
        } else if negative >= 4 && mean <= -1.0 {
            BarPattern::StrongDowntrend
        } else if positive > negative && mean > 0.0 {
            BarPattern::WeakUptrend
        } else if negative > positive && mean < 0.0 {
            BarPattern::WeakDowntrend
        } else {
            BarPattern::Sideways
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_change_auto_derives() {
        let r = OhlcvRecord::new("MSFT", 60.0, 300.0, 301.0, 299.0, 303.0, 1000, 1_000_000.0).unwrap();
        assert!((r.percent_change - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_high_below_max_open_close() {
        assert!(OhlcvRecord::new("MSFT", 60.0, 300.0, 300.0, 299.0, 303.0, 1000, 1_000_000.0).is_err());
    }

    #[test]
    fn rejects_low_above_min_open_close() {
        assert!(OhlcvRecord::new("MSFT", 60.0, 300.0, 303.0, 300.0, 303.0, 1000, 1_000_000.0).is_err());
    }

    #[test]
    fn minute_timestamp_floors_to_60s() {
        let r = OhlcvRecord::new("MSFT", 125.0, 300.0, 301.0, 299.0, 300.0, 1000, 1_000_000.0).unwrap();
        assert_eq!(r.minute_timestamp(), 120);
    }
}
