//! Fair-market-value record and the bounded per-symbol valuation history an
//! `FMVChannel` maintains.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const HISTORY_CAP: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FmvRecord {
    pub ticker: String,
    pub timestamp: f64,
    pub fmv: f64,
    pub market_price: f64,
    pub confidence: f64,
    pub deviation_percent: f64,
    pub valuation_model: String,
    pub model_inputs: serde_json::Map<String, serde_json::Value>,
    pub volatility_adjustment: Option<f64>,
    pub liquidity_adjustment: Option<f64>,
    pub sector_correlation: Option<f64>,
    pub source: String,
}

impl FmvRecord {
    pub fn new(
        ticker: impl Into<String>,
        timestamp: f64,
        fmv: f64,
        market_price: f64,
        confidence: f64,
    ) -> Result<Self, CoreError> {
        let mut record = Self {
            ticker: ticker.into(),
            timestamp,
            fmv,
            market_price,
            confidence,
            deviation_percent: 0.0,
            valuation_model: "unknown".to_string(),
            model_inputs: serde_json::Map::new(),
            volatility_adjustment: None,
            liquidity_adjustment: None,
            sector_correlation: None,
            source: "unknown".to_string(),
        };
        record.normalize();
        record.validate()?;
        Ok(record)
    }

    pub fn normalize(&mut self) {
        if self.deviation_percent == 0.0 && self.market_price > 0.0 {
            self.deviation_percent = (self.fmv - self.market_price) / self.market_price * 100.0;
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.ticker.is_empty() {
            return Err(CoreError::InvalidData("empty ticker".into()));
        }
        if self.timestamp <= 0.0 {
            return Err(CoreError::InvalidData(format!("invalid timestamp: {}", self.timestamp)));
        }
        if self.fmv <= 0.0 {
            return Err(CoreError::InvalidData(format!("invalid fmv: {}", self.fmv)));
        }
        if self.market_price <= 0.0 {
            return Err(CoreError::InvalidData(format!("invalid market_price: {}", self.market_price)));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(CoreError::InvalidData(format!(
                "invalid confidence: {} (must be 0.0-1.0)",
                self.confidence
            )));
        }
        Ok(())
    }

    pub fn is_high_confidence(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }

    pub fn is_significant_deviation(&self, threshold_percent: f64) -> bool {
        self.deviation_percent.abs() >= threshold_percent
    }

    pub fn signal_strength(&self) -> f64 {
        let deviation_strength = (self.deviation_percent.abs() / 10.0).min(1.0);
        self.confidence * deviation_strength
    }

    pub fn is_undervalued(&self) -> bool {
        self.deviation_percent > 0.0
    }

    /// Parse `{ticker, time, fmv_price|fmv, market_price, confidence,
    /// fmv_vs_market_pct?, valuation_model?}`.
    pub fn from_wire(value: &serde_json::Value) -> Result<Self, CoreError> {
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::InvalidData("fmv wire payload must be an object".into()))?;

        let ticker = obj
            .get("ticker")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::InvalidData("missing ticker".into()))?
            .to_string();
        let timestamp = obj
            .get("time")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| CoreError::InvalidData("missing time".into()))?;
        let fmv = obj
            .get("fmv_price")
            .or_else(|| obj.get("fmv"))
            .and_then(|v| v.as_f64())
            .ok_or_else(|| CoreError::InvalidData("missing fmv_price/fmv".into()))?;
        let market_price = obj
            .get("market_price")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| CoreError::InvalidData("missing market_price".into()))?;
        let confidence = obj
            .get("confidence")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| CoreError::InvalidData("missing confidence".into()))?;

        let mut record = Self::new(ticker, timestamp, fmv, market_price, confidence)?;
        if let Some(dev) = obj.get("fmv_vs_market_pct").and_then(|v| v.as_f64()) {
            record.deviation_percent = dev;
        }
        if let Some(model) = obj.get("valuation_model").and_then(|v| v.as_str()) {
            record.valuation_model = model.to_string();
        }
        record.source = "wire".to_string();
        record.validate()?;
        Ok(record)
    }
}

/// Bounded ring of recent FMV observations for a symbol.
#[derive(Debug, Clone)]
pub struct ValuationHistory {
    pub ticker: String,
    pub deviations: VecDeque<f64>,
    pub confidences: VecDeque<f64>,
    pub last_update: f64,
}

impl ValuationHistory {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            deviations: VecDeque::with_capacity(HISTORY_CAP),
            confidences: VecDeque::with_capacity(HISTORY_CAP),
            last_update: 0.0,
        }
    }

    pub fn push(&mut self, record: &FmvRecord) {
        self.last_update = record.timestamp;
        self.deviations.push_back(record.deviation_percent);
        if self.deviations.len() > HISTORY_CAP {
            self.deviations.pop_front();
        }
        self.confidences.push_back(record.confidence);
        if self.confidences.len() > HISTORY_CAP {
            self.confidences.pop_front();
        }
    }

    /// True if at least `share` of the last `n` deviations share the sign of
    /// the latest one.
    pub fn consistent_direction(&self, n: usize, share: f64) -> bool {
        if self.deviations.len() < n {
            return false;
        }
        let recent: Vec<f64> = self.deviations.iter().rev().take(n).copied().collect();
        let latest_sign = recent[0].signum();
        if latest_sign == 0.0 {
            return false;
        }
        let matching = recent.iter().filter(|d| d.signum() == latest_sign).count();
        matching as f64 / n as f64 >= share
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deviation_auto_derives() {
        let r = FmvRecord::new("AAPL", 1.0, 160.0, 150.0, 0.9).unwrap();
        assert!((r.deviation_percent - 6.666_666_666_666_667).abs() < 1e-6);
        assert!(r.is_undervalued());
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        assert!(FmvRecord::new("AAPL", 1.0, 160.0, 150.0, 1.5).is_err());
    }

    #[test]
    fn signal_strength_caps_deviation_contribution() {
        let r = FmvRecord::new("AAPL", 1.0, 300.0, 150.0, 1.0).unwrap();
        assert!((r.signal_strength() - 1.0).abs() < 1e-9);
    }
}
