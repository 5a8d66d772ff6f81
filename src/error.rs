//! Error taxonomy for the placement engine.
//!
//! Every rejection an API caller can see carries a machine-checkable kind
//! alongside the human-readable message.

use thiserror::Error;

use crate::registry::layer::{LayerId, Tier};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown layer id {0}")]
    UnknownLayer(LayerId),

    #[error("tier {0} is unavailable")]
    TierUnavailable(Tier),

    #[error("capacity exceeded on {tier}: requested {requested} bytes, {available} available")]
    CapacityExceeded {
        tier: Tier,
        requested: u64,
        available: u64,
    },

    #[error("transfer queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("engine is shutting down, no longer accepting transfers")]
    ShuttingDown,

    #[error("layer id {0} is already registered")]
    DuplicateLayer(LayerId),

    #[error("I/O failure on {tier}: {source}")]
    Io {
        tier: Tier,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Stable identifier for API payloads and test assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnknownLayer(_) => "unknown_layer",
            EngineError::TierUnavailable(_) => "tier_unavailable",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::QueueFull { .. } => "queue_full",
            EngineError::ShuttingDown => "shutting_down",
            EngineError::DuplicateLayer(_) => "duplicate_layer",
            EngineError::Io { .. } => "io_failure",
        }
    }

    pub(crate) fn io(tier: Tier, source: std::io::Error) -> Self {
        EngineError::Io { tier, source }
    }
}
