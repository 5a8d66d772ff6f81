//! tensor-tier: Tiered layer placement and transfer engine for LLM weights.
//!
//! Tracks where every model layer lives across a hierarchy of storage tiers:
//!   Accelerator VRAM (hot) → Host RAM (warm) → RAM-disk (cool) → NVMe (cold)
//!
//! Layers move between tiers through a bounded priority queue drained by an
//! async worker pool, with per-tier capacity budgets enforced before any
//! bytes move. A management HTTP API exposes placement, hardware, and
//! transfer status.

pub mod config;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod status;
pub mod store;
pub mod transfer;

pub use engine::PlacementEngine;
pub use error::EngineError;
