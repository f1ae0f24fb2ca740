pub mod event;
pub mod fmv;
pub mod ohlcv;
pub mod raw;
pub mod tick;

pub use event::{Direction, Event};
pub use fmv::{FmvRecord, ValuationHistory};
pub use ohlcv::{BarPattern, MarketSession, OhlcvRecord, SymbolBarBuffer, Timeframe};
pub use raw::{DataType, RawMarketItem};
pub use tick::{EventType, MarketStatus, SymbolTickState, TickRecord};
