//! The layer registry: an arena of layer records addressed by stable index.
//!
//! Each record carries its own lock inline, so there is no separate id→lock
//! map to keep consistent. The lock guards all mutable metadata fields and
//! must be held across any read-modify-write; readers wanting a consistent
//! multi-field view either take the lock or read the published summary.

use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::EngineError;
use crate::registry::layer::{
    DType, LayerId, LayerLocation, LayerMetadata, LayerSummary, Tier,
};

/// Everything needed to register a new layer.
#[derive(Debug, Clone)]
pub struct LayerDescriptor {
    pub name: String,
    pub size_bytes: u64,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub tier: Tier,
    pub location: LayerLocation,
}

/// One arena slot: the metadata lock plus a lock-free reporting snapshot.
///
/// The published summary is refreshed at every commit point, so status
/// reporting can proceed while a transfer holds the metadata lock across
/// its I/O. It is eventually consistent and used for reporting only.
pub struct LayerRecord {
    pub id: LayerId,
    meta: Mutex<LayerMetadata>,
    published: RwLock<LayerSummary>,
}

impl LayerRecord {
    fn new(meta: LayerMetadata) -> Self {
        let published = RwLock::new(meta.summary());
        Self {
            id: meta.id,
            meta: Mutex::new(meta),
            published,
        }
    }

    /// Acquire the per-layer lock.
    pub async fn lock(&self) -> MutexGuard<'_, LayerMetadata> {
        self.meta.lock().await
    }

    /// Refresh the published summary. Call while holding the metadata lock,
    /// after any mutation.
    pub fn publish(&self, meta: &LayerMetadata) {
        if let Ok(mut slot) = self.published.write() {
            *slot = meta.summary();
        }
    }

    /// Best-effort summary: fresh if the lock is free, last published
    /// otherwise. Never blocks on an in-flight transfer.
    pub fn try_summary(&self) -> LayerSummary {
        if let Ok(meta) = self.meta.try_lock() {
            return meta.summary();
        }
        self.published
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

/// Authoritative store of all layer records for the loaded model.
#[derive(Default)]
pub struct LayerRegistry {
    records: RwLock<Vec<Option<Arc<LayerRecord>>>>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layer under a fresh monotonically increasing id.
    pub fn register(&self, desc: LayerDescriptor) -> LayerId {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let id = records.len() as LayerId;
        records.push(Some(Arc::new(LayerRecord::new(Self::metadata(id, desc)))));
        debug!(layer_id = id, "Registered layer");
        id
    }

    /// Register a layer under an externally chosen id.
    pub fn register_with_id(&self, id: LayerId, desc: LayerDescriptor) -> Result<LayerId, EngineError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let idx = id as usize;
        if records.len() <= idx {
            records.resize(idx + 1, None);
        }
        if records[idx].is_some() {
            return Err(EngineError::DuplicateLayer(id));
        }
        records[idx] = Some(Arc::new(LayerRecord::new(Self::metadata(id, desc))));
        debug!(layer_id = id, "Registered layer (explicit id)");
        Ok(id)
    }

    fn metadata(id: LayerId, desc: LayerDescriptor) -> LayerMetadata {
        LayerMetadata {
            id,
            name: desc.name,
            original_size_bytes: desc.size_bytes,
            shape: desc.shape,
            original_dtype: desc.dtype,
            current_tier: desc.tier,
            current_size_bytes: desc.size_bytes,
            current_dtype: desc.dtype,
            compression_kind: None,
            quantization_kind: None,
            quantization_params: Default::default(),
            location: desc.location,
            access_count: 0,
            last_access: None,
            last_access_unix: 0.0,
        }
    }

    /// Lookup. Returns `None` for ids that were never registered.
    pub fn get(&self, id: LayerId) -> Option<Arc<LayerRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(id as usize).and_then(|slot| slot.clone())
    }

    /// All live records, in id order.
    pub fn list(&self) -> Vec<Arc<LayerRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically move a layer's recorded location. Capacity validation is
    /// the transfer coordinator's job; this only commits the metadata.
    ///
    /// Entry point for an embedding model runtime that relocates buffers
    /// itself; the transfer coordinator commits inline under the guard it
    /// already holds and does not come through here.
    pub async fn update_location(
        &self,
        id: LayerId,
        tier: Tier,
        location: LayerLocation,
        new_size_bytes: u64,
    ) -> Result<(), EngineError> {
        let record = self.get(id).ok_or(EngineError::UnknownLayer(id))?;
        let mut meta = record.lock().await;
        debug_assert!(location.matches_tier(tier));
        meta.current_tier = tier;
        meta.location = location;
        meta.current_size_bytes = new_size_bytes;
        record.publish(&meta);
        Ok(())
    }

    /// Bump access stats for a layer. Called by the embedding model runtime
    /// on every buffer read it serves outside a transfer.
    pub async fn record_access(&self, id: LayerId) -> Result<(), EngineError> {
        let record = self.get(id).ok_or(EngineError::UnknownLayer(id))?;
        let mut meta = record.lock().await;
        meta.touch();
        record.publish(&meta);
        Ok(())
    }
}
