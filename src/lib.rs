//! market-core: a multi-channel market-data processing pipeline.
//!
//! Ticks, minute OHLCV bars, and fair-market-value estimates each flow
//! through a dedicated channel with its own batching strategy, detector
//! set, and circuit breaker; a router classifies and dispatches incoming
//! records, a background writer persists OHLCV aggregates to SQLite, and
//! a monitor samples channel health on a fixed interval.

pub mod channel;
pub mod config;
pub mod detectors;
pub mod error;
pub mod identifier;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod persistence;
pub mod router;
pub mod sink;
pub mod system;
pub mod time;

pub use channel::{
    ChannelStatus, ChannelType, FmvChannel, OhlcvChannel, ProcessingChannel, ProcessingResult,
    TickChannel,
};
pub use config::SystemConfig;
pub use error::CoreError;
pub use identifier::DataIdentifier;
pub use model::{DataType, Event, RawMarketItem};
pub use router::ChannelRouter;
pub use system::MultiChannelSystem;
