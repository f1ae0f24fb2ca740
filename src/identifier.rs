//! Classifies incoming data into one of {Tick, OHLCV, FMV, Unknown}.
//!
//! A small bounded LRU, keyed by a stable "shape signature" (sorted key
//! tuple for untyped JSON, or a fixed tag for already-typed records), caches
//! classifications so repeated shapes skip the structural scan.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::model::{DataType, RawMarketItem};

const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Bounded least-recently-used cache from shape signature to classification.
/// Hand-rolled rather than pulling in a dedicated crate: the working set is
/// tiny (a handful of distinct shapes in practice) and the eviction policy
/// is a simple move-to-back on touch.
struct ShapeCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: std::collections::HashMap<String, DataType>,
}

impl ShapeCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: std::collections::HashMap::with_capacity(capacity),
        }
    }

    fn get(&mut self, key: &str) -> Option<DataType> {
        if let Some(value) = self.entries.get(key).copied() {
            if let Some(pos) = self.order.iter().position(|k| k == key) {
                let k = self.order.remove(pos).unwrap();
                self.order.push_back(k);
            }
            Some(value)
        } else {
            None
        }
    }

    fn put(&mut self, key: String, value: DataType) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key.clone(), value);
            if let Some(pos) = self.order.iter().position(|k| k == &key) {
                let k = self.order.remove(pos).unwrap();
                self.order.push_back(k);
            }
            return;
        }

        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }
}

pub struct DataIdentifier {
    cache: Mutex<ShapeCache>,
}

impl Default for DataIdentifier {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl DataIdentifier {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: Mutex::new(ShapeCache::new(cache_capacity)),
        }
    }

    pub fn identify(&self, item: &RawMarketItem) -> DataType {
        match item {
            RawMarketItem::Tick(_) => DataType::Tick,
            RawMarketItem::Ohlcv(_) => DataType::Ohlcv,
            RawMarketItem::Fmv(_) => DataType::Fmv,
            RawMarketItem::Untyped(value) => self.identify_untyped(value),
        }
    }

    fn identify_untyped(&self, value: &serde_json::Value) -> DataType {
        let Some(obj) = value.as_object() else {
            return DataType::Unknown;
        };

        let signature = shape_signature(obj);
        if let Some(cached) = self.cache.lock().get(&signature) {
            return cached;
        }

        let classified = classify_shape(obj);
        self.cache.lock().put(signature, classified);
        classified
    }
}

fn shape_signature(obj: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut keys: Vec<&str> = obj.keys().map(|k| k.as_str()).collect();
    keys.sort_unstable();
    keys.join(",")
}

fn classify_shape(obj: &serde_json::Map<String, serde_json::Value>) -> DataType {
    let has_any = |keys: &[&str]| keys.iter().any(|k| obj.contains_key(*k));
    let has_all = |keys: &[&str]| keys.iter().all(|k| obj.contains_key(*k));

    if has_any(&["fmv", "fmv_price", "fair_market_value"]) {
        return DataType::Fmv;
    }
    if has_all(&["open", "high", "low", "close"]) || has_all(&["o", "h", "l", "c", "v"]) {
        return DataType::Ohlcv;
    }
    if has_all(&["ticker", "price", "timestamp"]) {
        return DataType::Tick;
    }
    DataType::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_typed_records_directly() {
        let identifier = DataIdentifier::default();
        let tick = crate::model::TickRecord::new("AAPL", 150.0, 1000, 1.0).unwrap();
        assert_eq!(identifier.identify(&RawMarketItem::Tick(tick)), DataType::Tick);
    }

    #[test]
    fn classifies_untyped_fmv_before_ohlcv() {
        let identifier = DataIdentifier::default();
        let value = serde_json::json!({"fmv": 1.0, "open": 1, "high": 1, "low": 1, "close": 1});
        assert_eq!(
            identifier.identify(&RawMarketItem::Untyped(value)),
            DataType::Fmv
        );
    }

    #[test]
    fn classifies_untyped_tick() {
        let identifier = DataIdentifier::default();
        let value = serde_json::json!({"ticker": "AAPL", "price": 150.0, "timestamp": 1.0});
        assert_eq!(
            identifier.identify(&RawMarketItem::Untyped(value)),
            DataType::Tick
        );
    }

    #[test]
    fn unknown_shape_classifies_unknown() {
        let identifier = DataIdentifier::default();
        let value = serde_json::json!({"foo": "bar"});
        assert_eq!(
            identifier.identify(&RawMarketItem::Untyped(value)),
            DataType::Unknown
        );
    }

    #[test]
    fn classification_is_deterministic_across_repeated_calls() {
        let identifier = DataIdentifier::default();
        let value = serde_json::json!({"ticker": "AAPL", "price": 150.0, "timestamp": 1.0});
        let item = RawMarketItem::Untyped(value);
        let first = identifier.identify(&item);
        let second = identifier.identify(&item);
        assert_eq!(first, second);
    }

    #[test]
    fn cache_evicts_oldest_entry_past_capacity() {
        let identifier = DataIdentifier::new(2);
        let a = serde_json::json!({"ticker": "A", "price": 1.0, "timestamp": 1.0});
        let b = serde_json::json!({"ticker": "B", "price": 1.0, "timestamp": 1.0, "extra": true});
        let c = serde_json::json!({"ticker": "C", "price": 1.0, "timestamp": 1.0, "more": true, "still_more": true});

        identifier.identify(&RawMarketItem::Untyped(a));
        identifier.identify(&RawMarketItem::Untyped(b));
        identifier.identify(&RawMarketItem::Untyped(c));

        assert_eq!(identifier.cache.lock().entries.len(), 2);
    }
}
