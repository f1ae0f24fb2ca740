//! Session high/low detector: fires when a tick extends the symbol's
//! running session extreme by more than a market-aware threshold.

use serde::{Deserialize, Serialize};

use crate::model::{Direction, Event, MarketStatus, SymbolTickState, TickRecord};

const OPENING_WINDOW_SECONDS: f64 = 5.0 * 60.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighLowConfig {
    pub min_price_change: f64,
    pub min_percent_change: f64,
    pub cooldown_seconds: f64,
    pub market_aware: bool,
    pub extended_hours_multiplier: f64,
    pub opening_multiplier: f64,
}

impl Default for HighLowConfig {
    fn default() -> Self {
        Self {
            min_price_change: 0.01,
            min_percent_change: 0.1,
            cooldown_seconds: 1.0,
            market_aware: true,
            extended_hours_multiplier: 2.0,
            opening_multiplier: 1.5,
        }
    }
}

impl HighLowConfig {
    fn effective_thresholds(&self, tick: &TickRecord, state: &SymbolTickState) -> (f64, f64) {
        let mut multiplier = 1.0;
        if self.market_aware
            && matches!(tick.market_status, MarketStatus::Premarket | MarketStatus::Afterhours)
        {
            multiplier *= self.extended_hours_multiplier;
        }
        if let Some(elapsed) = state.seconds_since_session_open(tick.timestamp) {
            if elapsed <= OPENING_WINDOW_SECONDS {
                multiplier *= self.opening_multiplier;
            }
        }
        (self.min_price_change * multiplier, self.min_percent_change * multiplier)
    }
}

/// Evaluate the session high/low rule against current state, returning any
/// emitted events. `state` has already been updated with `tick`'s price by
/// the caller (`SymbolTickState::update`), so `state.session_high/low` are
/// the prior extremes seeded from earlier ticks, not this one.
pub fn detect(
    config: &HighLowConfig,
    tick: &TickRecord,
    prior_high: Option<f64>,
    prior_low: Option<f64>,
    state: &mut SymbolTickState,
) -> Vec<Event> {
    let mut events = Vec::new();
    let (min_price_change, min_percent_change) = config.effective_thresholds(tick, state);

    match prior_high {
        None => {
            state.session_high = Some(tick.price);
        }
        Some(high) => {
            let delta = tick.price - high;
            let percent = if high > 0.0 { delta / high * 100.0 } else { 0.0 };
            if delta >= min_price_change
                && percent >= min_percent_change
                && state.cooldown_elapsed("session_high", tick.timestamp, config.cooldown_seconds)
            {
                state.session_high = Some(tick.price);
                state.mark_event("session_high", tick.timestamp);
                events.push(Event::SessionHigh {
                    ticker: tick.ticker.clone(),
                    price: tick.price,
                    time: tick.timestamp,
                    label: "session_high".to_string(),
                });
            }
        }
    }

    match prior_low {
        None => {
            state.session_low = Some(tick.price);
        }
        Some(low) => {
            let delta = low - tick.price;
            let percent = if low > 0.0 { delta / low * 100.0 } else { 0.0 };
            if delta >= min_price_change
                && percent >= min_percent_change
                && state.cooldown_elapsed("session_low", tick.timestamp, config.cooldown_seconds)
            {
                state.session_low = Some(tick.price);
                state.mark_event("session_low", tick.timestamp);
                events.push(Event::SessionLow {
                    ticker: tick.ticker.clone(),
                    price: tick.price,
                    time: tick.timestamp,
                    label: "session_low".to_string(),
                });
            }
        }
    }

    events
}

#[allow(dead_code)]
fn direction_of(delta: f64) -> Direction {
    if delta >= 0.0 {
        Direction::Up
    } else {
        Direction::Down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(ticker: &str, price: f64, t: f64) -> TickRecord {
        TickRecord::new(ticker, price, 1000, t).unwrap()
    }

    #[test]
    fn first_tick_seeds_without_emitting() {
        let config = HighLowConfig::default();
        let mut state = SymbolTickState::new("AAPL");
        let t = tick("AAPL", 150.0, 0.0);
        state.update(&t);
        let events = detect(&config, &t, None, None, &mut state);
        assert!(events.is_empty());
        assert_eq!(state.session_high, Some(150.0));
        assert_eq!(state.session_low, Some(150.0));
    }

    #[test]
    fn scenario_session_high_sequence() {
        let config = HighLowConfig::default();
        let mut state = SymbolTickState::new("AAPL");

        let t0 = tick("AAPL", 150.00, 0.0);
        state.update(&t0);
        let events = detect(&config, &t0, None, None, &mut state);
        assert!(events.is_empty());

        let t1 = tick("AAPL", 150.20, 1.0);
        let prior_high = state.session_high;
        let prior_low = state.session_low;
        state.update(&t1);
        let events = detect(&config, &t1, prior_high, prior_low, &mut state);
        assert!(events.is_empty(), "0.20 move is below the 0.1% threshold at this price");

        let t2 = tick("AAPL", 150.60, 2.0);
        let prior_high = state.session_high;
        let prior_low = state.session_low;
        state.update(&t2);
        let events = detect(&config, &t2, prior_high, prior_low, &mut state);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::SessionHigh { price, .. } if (price - 150.60).abs() < 1e-9));
        assert_eq!(state.session_high, Some(150.60));
    }

    #[test]
    fn cooldown_suppresses_rapid_reemission() {
        let mut config = HighLowConfig::default();
        config.cooldown_seconds = 5.0;
        let mut state = SymbolTickState::new("AAPL");

        let t0 = tick("AAPL", 150.00, 0.0);
        state.update(&t0);
        detect(&config, &t0, None, None, &mut state);

        let t1 = tick("AAPL", 150.50, 1.0);
        let (ph, pl) = (state.session_high, state.session_low);
        state.update(&t1);
        let events = detect(&config, &t1, ph, pl, &mut state);
        assert_eq!(events.len(), 1);

        let t2 = tick("AAPL", 151.00, 3.0);
        let (ph, pl) = (state.session_high, state.session_low);
        state.update(&t2);
        let events = detect(&config, &t2, ph, pl, &mut state);
        assert!(events.is_empty(), "cooldown window has not elapsed");

        let t3 = tick("AAPL", 151.00, 6.0);
        let (ph, pl) = (state.session_high, state.session_low);
        state.update(&t3);
        let events = detect(&config, &t3, ph, pl, &mut state);
        assert_eq!(events.len(), 1);
    }
}
