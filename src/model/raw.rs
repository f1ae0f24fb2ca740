//! The untyped ingest boundary: a `RawMarketItem` is either an already-typed
//! record or a raw JSON object the identifier must classify.

use serde::{Deserialize, Serialize};

use super::fmv::FmvRecord;
use super::ohlcv::OhlcvRecord;
use super::tick::TickRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RawMarketItem {
    Tick(TickRecord),
    Ohlcv(OhlcvRecord),
    Fmv(FmvRecord),
    Untyped(serde_json::Value),
}

impl RawMarketItem {
    pub fn from_json(value: serde_json::Value) -> Self {
        RawMarketItem::Untyped(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Tick,
    Ohlcv,
    Fmv,
    Unknown,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Tick => "tick",
            DataType::Ohlcv => "ohlcv",
            DataType::Fmv => "fmv",
            DataType::Unknown => "unknown",
        }
    }
}
