//! Small wall-clock helper shared by the channels, persistence worker, and
//! monitor for idle-eviction and flush-interval bookkeeping.

pub fn now_unix_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
