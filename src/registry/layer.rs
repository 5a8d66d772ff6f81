//! Layer types: tiers, dtypes, locations, and per-layer metadata.
//!
//! A layer is one weight buffer of a model, individually relocatable between
//! storage tiers. Metadata records where the layer currently lives and under
//! which compression/quantization scheme; the schemes themselves are applied
//! elsewhere.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a layer (stable arena index).
pub type LayerId = u64;

/// Storage tiers ordered by access latency.
///
/// Serialized names match the original server's wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Accelerator (GPU) memory — fastest.
    #[serde(rename = "gpu")]
    Accelerator,
    /// Host system RAM.
    #[serde(rename = "cpu")]
    HostMemory,
    /// RAM-backed filesystem (tmpfs).
    #[serde(rename = "ramdisk")]
    RamDisk,
    /// NVMe-backed filesystem — slowest, largest.
    #[serde(rename = "nvme")]
    Nvme,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Accelerator, Tier::HostMemory, Tier::RamDisk, Tier::Nvme];

    /// Numeric latency level (lower = faster).
    pub fn level(&self) -> usize {
        match self {
            Tier::Accelerator => 0,
            Tier::HostMemory => 1,
            Tier::RamDisk => 2,
            Tier::Nvme => 3,
        }
    }

    /// Whether layer payloads in this tier live as files on a filesystem.
    pub fn is_file_backed(&self) -> bool {
        matches!(self, Tier::RamDisk | Tier::Nvme)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Accelerator => write!(f, "gpu"),
            Tier::HostMemory => write!(f, "cpu"),
            Tier::RamDisk => write!(f, "ramdisk"),
            Tier::Nvme => write!(f, "nvme"),
        }
    }
}

/// Element type of a layer's weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F16,
    BF16,
    I8,
}

impl DType {
    pub fn bytes_per_element(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
            DType::I8 => 1,
        }
    }
}

/// Where a layer's payload currently lives.
///
/// Exactly one variant is meaningful at a time and it is determined by
/// `current_tier`: `Accelerator` iff the tier is accelerator, `HostBuffer`
/// iff host memory, `File` iff a file-backed tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerLocation {
    Accelerator { device_id: usize },
    HostBuffer,
    File(PathBuf),
}

impl LayerLocation {
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            LayerLocation::File(p) => Some(p),
            _ => None,
        }
    }

    pub fn device_id(&self) -> Option<usize> {
        match self {
            LayerLocation::Accelerator { device_id } => Some(*device_id),
            _ => None,
        }
    }

    /// Whether this location shape is valid for the given tier.
    pub fn matches_tier(&self, tier: Tier) -> bool {
        match (self, tier) {
            (LayerLocation::Accelerator { .. }, Tier::Accelerator) => true,
            (LayerLocation::HostBuffer, Tier::HostMemory) => true,
            (LayerLocation::File(_), Tier::RamDisk | Tier::Nvme) => true,
            _ => false,
        }
    }
}

/// Per-layer metadata. All mutable fields are guarded by the record's lock.
#[derive(Debug, Clone)]
pub struct LayerMetadata {
    // Immutable after registration.
    pub id: LayerId,
    pub name: String,
    pub original_size_bytes: u64,
    pub shape: Vec<usize>,
    pub original_dtype: DType,

    // Mutable, guarded by the per-layer lock.
    pub current_tier: Tier,
    pub current_size_bytes: u64,
    pub current_dtype: DType,
    pub compression_kind: Option<String>,
    pub quantization_kind: Option<String>,
    pub quantization_params: HashMap<String, serde_json::Value>,
    pub location: LayerLocation,
    pub access_count: u64,
    pub last_access: Option<Instant>,
    pub last_access_unix: f64,
}

impl LayerMetadata {
    /// Record one access to this layer.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_access = Some(Instant::now());
        self.last_access_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
    }

    /// Snapshot of the reporting fields.
    pub fn summary(&self) -> LayerSummary {
        LayerSummary {
            id: self.id,
            name: self.name.clone(),
            original_size_bytes: self.original_size_bytes,
            current_size_bytes: self.current_size_bytes,
            tier: self.current_tier,
            device_id: self.location.device_id(),
            path: self.location.path().map(|p| p.display().to_string()),
            compression_kind: self.compression_kind.clone(),
            quantization_kind: self.quantization_kind.clone(),
            access_count: self.access_count,
            last_access_unix: self.last_access_unix,
        }
    }
}

/// Read-only per-layer view for reporting. Never exposes the internal lock.
#[derive(Debug, Clone, Serialize)]
pub struct LayerSummary {
    pub id: LayerId,
    pub name: String,
    pub original_size_bytes: u64,
    pub current_size_bytes: u64,
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantization_kind: Option<String>,
    pub access_count: u64,
    pub last_access_unix: f64,
}
