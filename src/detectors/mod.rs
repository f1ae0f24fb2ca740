pub mod highlow;
pub mod surge;
pub mod trend;

pub use highlow::HighLowConfig;
pub use surge::SurgeConfig;
pub use trend::{TrendConfig, TrendTracker};
