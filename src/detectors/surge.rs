//! Surge detector: flags a burst of volume coinciding with a fast price
//! move within a short rolling interval.

use serde::{Deserialize, Serialize};

use crate::model::{Event, SymbolTickState, TickRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurgeConfig {
    pub volume_threshold: f64,
    pub price_threshold_percent: f64,
    pub interval_seconds: f64,
    pub global_sensitivity: f64,
    pub min_data_points: usize,
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            volume_threshold: 3.0,
            price_threshold_percent: 4.0,
            interval_seconds: 20.0,
            global_sensitivity: 0.4,
            min_data_points: 8,
        }
    }
}

pub fn detect(config: &SurgeConfig, tick: &TickRecord, state: &SymbolTickState) -> Vec<Event> {
    let window_start = tick.timestamp - config.interval_seconds;

    let volumes_in_window: Vec<u64> = state
        .volume_history
        .iter()
        .filter(|(t, _)| *t >= window_start)
        .map(|(_, v)| *v)
        .collect();
    let prices_in_window: Vec<(f64, f64)> = state
        .price_history
        .iter()
        .filter(|(t, _)| *t >= window_start)
        .copied()
        .collect();

    if volumes_in_window.len() < config.min_data_points || prices_in_window.len() < config.min_data_points {
        return Vec::new();
    }

    let average_volume =
        volumes_in_window.iter().sum::<u64>() as f64 / volumes_in_window.len() as f64;
    if average_volume <= 0.0 {
        return Vec::new();
    }
    let current_volume = volumes_in_window.last().copied().unwrap_or(0) as f64;
    let volume_ratio = current_volume / average_volume;

    let first_price = prices_in_window.first().map(|(_, p)| *p).unwrap_or(tick.price);
    let percent_change = if first_price != 0.0 {
        (tick.price - first_price) / first_price * 100.0
    } else {
        0.0
    };

    let effective_price_threshold = config.price_threshold_percent * config.global_sensitivity;

    if volume_ratio >= config.volume_threshold && percent_change.abs() >= effective_price_threshold {
        return vec![Event::Surge {
            ticker: tick.ticker.clone(),
            price: tick.price,
            time: tick.timestamp,
            label: "surge".to_string(),
            volume_ratio,
            percent_change,
        }];
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_emission_with_insufficient_samples() {
        let config = SurgeConfig::default();
        let mut state = SymbolTickState::new("AAPL");
        let t = TickRecord::new("AAPL", 100.0, 1000, 0.0).unwrap();
        state.update(&t);
        assert!(detect(&config, &t, &state).is_empty());
    }

    #[test]
    fn surge_emits_on_volume_and_price_spike() {
        let config = SurgeConfig::default();
        let mut state = SymbolTickState::new("AAPL");

        for i in 0..7 {
            let t = TickRecord::new("AAPL", 100.0, 1000, i as f64).unwrap();
            state.update(&t);
        }
        let spike = TickRecord::new("AAPL", 110.0, 10_000, 7.0).unwrap();
        state.update(&spike);
        let events = detect(&config, &spike, &state);
        assert_eq!(events.len(), 1);
    }
}
