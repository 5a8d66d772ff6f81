//! Model-runtime boundary.
//!
//! The engine does not manage accelerator memory or host weight buffers
//! itself; it reads and writes them through this interface. Production
//! deployments inject their runtime; [`HostBufferRuntime`] is an in-memory
//! implementation for CPU-only deployments and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::EngineError;
use crate::registry::layer::{LayerId, LayerLocation, Tier};

/// Access to accelerator- and host-resident layer buffers.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Read the payload bytes of a layer the runtime currently holds.
    async fn read_layer_buffer(&self, layer_id: LayerId) -> Result<Bytes, EngineError>;

    /// Hand a layer's payload to the runtime for the given memory tier.
    /// Returns the resulting location (the runtime picks the device).
    async fn write_layer_buffer(
        &self,
        layer_id: LayerId,
        tier: Tier,
        data: Bytes,
    ) -> Result<LayerLocation, EngineError>;
}

/// In-memory runtime: all "accelerator" and host buffers live in a map.
#[derive(Default)]
pub struct HostBufferRuntime {
    buffers: RwLock<HashMap<LayerId, Bytes>>,
}

impl HostBufferRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload a buffer, as a model loader would after reading weights.
    pub fn preload(&self, layer_id: LayerId, data: Bytes) {
        let mut buffers = self.buffers.write().unwrap_or_else(|e| e.into_inner());
        buffers.insert(layer_id, data);
    }
}

#[async_trait]
impl ModelRuntime for HostBufferRuntime {
    async fn read_layer_buffer(&self, layer_id: LayerId) -> Result<Bytes, EngineError> {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        buffers.get(&layer_id).cloned().ok_or_else(|| {
            EngineError::io(
                Tier::HostMemory,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no resident buffer for layer {layer_id}"),
                ),
            )
        })
    }

    async fn write_layer_buffer(
        &self,
        layer_id: LayerId,
        tier: Tier,
        data: Bytes,
    ) -> Result<LayerLocation, EngineError> {
        let mut buffers = self.buffers.write().unwrap_or_else(|e| e.into_inner());
        buffers.insert(layer_id, data);
        Ok(match tier {
            // Single simulated device in the in-memory runtime.
            Tier::Accelerator => LayerLocation::Accelerator { device_id: 0 },
            _ => LayerLocation::HostBuffer,
        })
    }
}
