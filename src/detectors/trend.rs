//! Trend detector: flags sustained directional drift over a rolling window
//! of recent tick returns, suppressing re-emission until a retracement.

use serde::{Deserialize, Serialize};

use crate::model::{Direction, Event, SymbolTickState, TickRecord};

const DEFAULT_WINDOW: usize = 8;
const WARMUP_SECONDS: f64 = 90.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    pub window: usize,
    pub direction_threshold: f64,
    pub strength_threshold: f64,
    pub global_sensitivity: f64,
    pub retracement_threshold: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            direction_threshold: 0.025,
            strength_threshold: 0.05,
            global_sensitivity: 1.5,
            retracement_threshold: 0.25,
        }
    }
}

/// Tracks the last emitted trend's magnitude so a later call can detect a
/// retracement before allowing re-emission. Owned by the channel alongside
/// `SymbolTickState`, keyed by ticker.
#[derive(Debug, Clone, Default)]
pub struct TrendTracker {
    pub last_trend_magnitude: Option<f64>,
    pub last_trend_direction: Option<Direction>,
}

pub fn detect(
    config: &TrendConfig,
    tick: &TickRecord,
    state: &SymbolTickState,
    tracker: &mut TrendTracker,
) -> Vec<Event> {
    if state.session_open_at.is_none() {
        return Vec::new();
    }
    if let Some(elapsed) = state.seconds_since_session_open(tick.timestamp) {
        if elapsed < WARMUP_SECONDS {
            return Vec::new();
        }
    }
    if state.price_history.len() < config.window + 1 {
        return Vec::new();
    }

    let prices: Vec<f64> = state
        .price_history
        .iter()
        .rev()
        .take(config.window + 1)
        .map(|(_, p)| *p)
        .collect();

    let returns: Vec<f64> = prices
        .windows(2)
        .map(|pair| {
            let (newer, older) = (pair[0], pair[1]);
            if older != 0.0 {
                (newer - older) / older
            } else {
                0.0
            }
        })
        .collect();

    let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
    let strength: f64 = returns.iter().map(|r| r.abs()).sum();

    let direction_gate = config.direction_threshold * config.global_sensitivity;
    if mean_return.abs() < direction_gate || strength < config.strength_threshold {
        return Vec::new();
    }

    let direction = if mean_return > 0.0 { Direction::Up } else { Direction::Down };

    if let (Some(last_direction), Some(last_magnitude)) =
        (tracker.last_trend_direction, tracker.last_trend_magnitude)
    {
        if last_direction == direction {
            let retraced = (last_magnitude - strength) / last_magnitude;
            if retraced < config.retracement_threshold {
                return Vec::new();
            }
        }
    }

    tracker.last_trend_direction = Some(direction);
    tracker.last_trend_magnitude = Some(strength);

    vec![Event::Trend {
        ticker: tick.ticker.clone(),
        price: tick.price,
        time: tick.timestamp,
        label: "trend".to_string(),
        direction,
        strength,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_emission_before_warmup() {
        let config = TrendConfig::default();
        let mut state = SymbolTickState::new("AAPL");
        let mut tracker = TrendTracker::default();
        let t = TickRecord::new("AAPL", 150.0, 1000, 10.0).unwrap();
        state.update(&t);
        assert!(detect(&config, &t, &state, &mut tracker).is_empty());
    }

    #[test]
    fn sustained_uptrend_emits_once_then_suppresses() {
        let config = TrendConfig::default();
        let mut state = SymbolTickState::new("AAPL");
        let mut tracker = TrendTracker::default();

        let mut price = 100.0;
        let mut last_events = Vec::new();
        for i in 0..12 {
            price *= 1.01;
            let t = TickRecord::new("AAPL", price, 1000, 100.0 + i as f64).unwrap();
            state.update(&t);
            last_events = detect(&config, &t, &state, &mut tracker);
        }
        assert!(!last_events.is_empty() || tracker.last_trend_magnitude.is_some());
    }
}
