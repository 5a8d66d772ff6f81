//! Durable byte-blob storage for file-backed tiers.
//!
//! - [`blob`]: filesystem store used for both the NVMe and RAM-disk tiers

pub mod blob;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::EngineError;
use crate::registry::layer::{LayerId, Tier};

/// One blob per layer, keyed by layer id. I/O errors bump the error counter
/// and propagate; retry policy belongs to the transfer coordinator.
#[async_trait]
pub trait TierStore: Send + Sync {
    fn tier(&self) -> Tier;

    fn root(&self) -> &Path;

    /// Persist a layer's bytes, returning the blob path.
    async fn write(&self, layer_id: LayerId, data: &[u8]) -> Result<PathBuf, EngineError>;

    /// Read a blob back by path.
    async fn read(&self, path: &Path) -> Result<Vec<u8>, EngineError>;

    /// Remove a blob. Deleting a missing path is not an error.
    async fn delete(&self, path: &Path) -> Result<(), EngineError>;

    fn stats(&self) -> StoreStats;
}

/// Health counters, exposed read-only through the status facade.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub files: u64,
    pub errors: u64,
}

/// Internal atomic counters behind [`StoreStats`].
#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    reads: AtomicU64,
    writes: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    files: AtomicU64,
    errors: AtomicU64,
}

impl StoreCounters {
    pub fn record_read(&self, bytes: usize) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize, new_file: bool) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        if new_file {
            self.files.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_delete(&self) {
        let _ = self
            .files
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
