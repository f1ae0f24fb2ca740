//! The event sum type emitted by detectors and forwarded to the downstream
//! event processor.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

/// Immutable once emitted. Each variant carries the kind-specific fields
/// named in the external-interface contract (`{kind, ticker, price, time,
/// label}` plus payload fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    SessionHigh {
        ticker: String,
        price: f64,
        time: f64,
        label: String,
    },
    SessionLow {
        ticker: String,
        price: f64,
        time: f64,
        label: String,
    },
    Trend {
        ticker: String,
        price: f64,
        time: f64,
        label: String,
        direction: Direction,
        strength: f64,
    },
    Surge {
        ticker: String,
        price: f64,
        time: f64,
        label: String,
        volume_ratio: f64,
        percent_change: f64,
    },
    AggregateVolumeSurge {
        ticker: String,
        price: f64,
        time: f64,
        label: String,
        volume: u64,
        volume_ratio: f64,
    },
    AggregateMove {
        ticker: String,
        price: f64,
        time: f64,
        label: String,
        direction: Direction,
        percent_change: f64,
    },
    AggregateHighClose {
        ticker: String,
        price: f64,
        time: f64,
        label: String,
    },
    AggregateLowClose {
        ticker: String,
        price: f64,
        time: f64,
        label: String,
    },
    FmvDeviation {
        ticker: String,
        price: f64,
        time: f64,
        label: String,
        fmv_price: f64,
        market_price: f64,
        deviation_percent: f64,
        is_undervalued: bool,
    },
    FmvHighConfidence {
        ticker: String,
        price: f64,
        time: f64,
        label: String,
        confidence: f64,
        signal_strength: f64,
    },
    FmvTrend {
        ticker: String,
        price: f64,
        time: f64,
        label: String,
        is_undervalued: bool,
    },
}

impl Event {
    pub fn ticker(&self) -> &str {
        match self {
            Event::SessionHigh { ticker, .. }
            | Event::SessionLow { ticker, .. }
            | Event::Trend { ticker, .. }
            | Event::Surge { ticker, .. }
            | Event::AggregateVolumeSurge { ticker, .. }
            | Event::AggregateMove { ticker, .. }
            | Event::AggregateHighClose { ticker, .. }
            | Event::AggregateLowClose { ticker, .. }
            | Event::FmvDeviation { ticker, .. }
            | Event::FmvHighConfidence { ticker, .. }
            | Event::FmvTrend { ticker, .. } => ticker,
        }
    }
}
