//! OS-mount collaborator for the RAM-backed filesystem tier.
//!
//! Mounting is best-effort with a bounded timeout: a failed tmpfs mount
//! falls back to using the path as a plain directory when it is writable,
//! and a hard failure only degrades the tier — it never aborts startup.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

#[async_trait]
pub trait RamDiskMounter: Send + Sync {
    /// Mount a RAM-backed filesystem of `size_bytes` at `path`.
    async fn mount_ram_backed_fs(&self, path: &Path, size_bytes: u64) -> bool;

    /// Unmount a previously mounted path.
    async fn unmount(&self, path: &Path) -> bool;
}

/// Mounts tmpfs via the system `mount` command (Linux).
pub struct SystemMounter {
    timeout: Duration,
}

impl SystemMounter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn writable_dir(path: &Path) -> bool {
        path.is_dir()
            && std::fs::metadata(path)
                .map(|m| !m.permissions().readonly())
                .unwrap_or(false)
    }
}

#[async_trait]
impl RamDiskMounter for SystemMounter {
    async fn mount_ram_backed_fs(&self, path: &Path, size_bytes: u64) -> bool {
        if let Err(e) = tokio::fs::create_dir_all(path).await {
            warn!(path = %path.display(), error = %e, "Cannot create RAM-disk mount point");
            return false;
        }

        if !cfg!(target_os = "linux") {
            warn!(
                path = %path.display(),
                "tmpfs mounts unsupported on this platform, using plain directory"
            );
            return Self::writable_dir(path);
        }

        let size_mb = size_bytes / (1024 * 1024);
        let options = format!("size={size_mb}m,noatime,nodiratime,nosuid,nodev,mode=0700");
        let command = tokio::process::Command::new("mount")
            .args(["-t", "tmpfs", "-o", &options, "tmpfs"])
            .arg(path)
            .output();

        match tokio::time::timeout(self.timeout, command).await {
            Ok(Ok(output)) if output.status.success() => {
                info!(path = %path.display(), size_mb, "Mounted tmpfs RAM-disk");
                true
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    path = %path.display(),
                    stderr = %stderr.trim(),
                    "tmpfs mount failed, using as plain directory if writable"
                );
                Self::writable_dir(path)
            }
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Could not run mount command");
                Self::writable_dir(path)
            }
            Err(_) => {
                warn!(path = %path.display(), "Timeout mounting RAM-disk");
                false
            }
        }
    }

    async fn unmount(&self, path: &Path) -> bool {
        let command = tokio::process::Command::new("umount").arg(path).output();
        match tokio::time::timeout(self.timeout, command).await {
            Ok(Ok(output)) if output.status.success() => {
                info!(path = %path.display(), "Unmounted RAM-disk");
                true
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(path = %path.display(), stderr = %stderr.trim(), "Unmount failed");
                false
            }
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Could not run umount command");
                false
            }
            Err(_) => {
                warn!(path = %path.display(), "Timeout unmounting RAM-disk");
                false
            }
        }
    }
}

/// Treats the path as a plain directory. Used in tests and deployments
/// where the RAM-disk is pre-mounted by the operator.
pub struct NoopMounter;

#[async_trait]
impl RamDiskMounter for NoopMounter {
    async fn mount_ram_backed_fs(&self, path: &Path, _size_bytes: u64) -> bool {
        tokio::fs::create_dir_all(path).await.is_ok()
    }

    async fn unmount(&self, _path: &Path) -> bool {
        true
    }
}
