//! Filesystem blob store backing the NVMe and RAM-disk tiers.
//!
//! Uses tokio's async file I/O. Paths are deterministic per layer id, so a
//! re-written layer overwrites its previous blob in place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::error::EngineError;
use crate::registry::layer::{LayerId, Tier};
use crate::store::{StoreCounters, StoreStats, TierStore};

pub struct BlobStore {
    tier: Tier,
    root: PathBuf,
    counters: StoreCounters,
}

impl BlobStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub async fn new(tier: Tier, root: PathBuf) -> Result<Self, EngineError> {
        fs::create_dir_all(&root)
            .await
            .map_err(|e| EngineError::io(tier, e))?;
        Ok(Self {
            tier,
            root,
            counters: StoreCounters::default(),
        })
    }

    fn blob_path(&self, layer_id: LayerId) -> PathBuf {
        self.root.join(format!("layer_{layer_id:06}.bin"))
    }
}

#[async_trait]
impl TierStore for BlobStore {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn root(&self) -> &Path {
        &self.root
    }

    async fn write(&self, layer_id: LayerId, data: &[u8]) -> Result<PathBuf, EngineError> {
        let path = self.blob_path(layer_id);
        let new_file = !path.exists();

        if let Err(e) = fs::write(&path, data).await {
            self.counters.record_error();
            return Err(EngineError::io(self.tier, e));
        }

        self.counters.record_write(data.len(), new_file);
        debug!(
            layer_id,
            path = %path.display(),
            size = data.len(),
            tier = %self.tier,
            "Wrote layer blob"
        );
        Ok(path)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, EngineError> {
        match fs::read(path).await {
            Ok(data) => {
                self.counters.record_read(data.len());
                debug!(
                    path = %path.display(),
                    size = data.len(),
                    tier = %self.tier,
                    "Read layer blob"
                );
                Ok(data)
            }
            Err(e) => {
                self.counters.record_error();
                Err(EngineError::io(self.tier, e))
            }
        }
    }

    async fn delete(&self, path: &Path) -> Result<(), EngineError> {
        if !path.exists() {
            return Ok(());
        }
        if let Err(e) = fs::remove_file(path).await {
            self.counters.record_error();
            return Err(EngineError::io(self.tier, e));
        }
        self.counters.record_delete();
        debug!(path = %path.display(), tier = %self.tier, "Deleted layer blob");
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }
}
