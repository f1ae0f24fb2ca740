//! Error taxonomy for the market-data core.
//!
//! Mirrors the failure kinds a caller of `submit` can observe (see the
//! channel/router/persistence modules for where each variant is raised).
//! Library code returns `CoreError`; binaries and composition code wrap it in
//! `anyhow::Result` with `.context(...)`, matching the rest of this crate.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Validation failure on a typed record or raw item. Never retried.
    InvalidData(String),
    /// The data identifier could not classify the item.
    UnknownDataType,
    /// No channel instance was available for a data type and fallback was
    /// disabled (or no channel of that type is registered at all).
    NoAvailableChannel { channel_type: String },
    /// The channel (or router) circuit breaker is open.
    CircuitOpen { name: String },
    /// The channel was selected but is not currently healthy.
    ChannelUnhealthy { name: String },
    /// The routing deadline elapsed before the channel produced a result.
    Timeout { channel: String, deadline_ms: u64 },
    /// An unexpected failure inside channel processing logic.
    ProcessingException { channel: String, detail: String },
    /// The persistence queue was full; the record was dropped.
    PersistenceQueueFull,
    /// The persistence store returned an error while flushing a batch.
    PersistenceDbError(String),
    /// The router itself rejected work because its own circuit breaker is open.
    RouterUnavailable,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            CoreError::UnknownDataType => write!(f, "unknown data type"),
            CoreError::NoAvailableChannel { channel_type } => {
                write!(f, "no available channel for type {channel_type}")
            }
            CoreError::CircuitOpen { name } => write!(f, "circuit breaker open for {name}"),
            CoreError::ChannelUnhealthy { name } => write!(f, "channel unhealthy: {name}"),
            CoreError::Timeout {
                channel,
                deadline_ms,
            } => write!(f, "timeout after {deadline_ms}ms routing to {channel}"),
            CoreError::ProcessingException { channel, detail } => {
                write!(f, "processing exception in {channel}: {detail}")
            }
            CoreError::PersistenceQueueFull => write!(f, "persistence queue full"),
            CoreError::PersistenceDbError(msg) => write!(f, "persistence db error: {msg}"),
            CoreError::RouterUnavailable => write!(f, "router unavailable (circuit open)"),
        }
    }
}

impl std::error::Error for CoreError {}
