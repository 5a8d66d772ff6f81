//! Layer metadata registry.
//!
//! - [`layer`]: Tier, DType, LayerLocation, LayerMetadata definitions
//! - [`arena`]: the registry arena, one inline lock per layer record

pub mod arena;
pub mod layer;

pub use arena::{LayerDescriptor, LayerRecord, LayerRegistry};
pub use layer::{DType, LayerId, LayerLocation, LayerMetadata, LayerSummary, Tier};
