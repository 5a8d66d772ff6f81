//! Per-tier capacity probing.
//!
//! Every probe that can fail — no accelerator, unset NVMe path, mount
//! failure — degrades its tier to unavailable. Unavailability is modeled,
//! never fatal: the engine simply refuses transfers into that tier.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind};
use tracing::{info, warn};

use crate::config::{Config, DeclaredDevice, GB, MB};
use crate::hardware::mount::RamDiskMounter;
use crate::registry::layer::Tier;
use crate::transfer::ledger::{CapacityLedger, TierBudget};

/// Subdirectory holding layer blobs under each file-backed tier's base path.
const LAYERS_DIR: &str = "tensor_tier_layers";

#[derive(Debug, Clone, Default, Serialize)]
pub struct HardwareSnapshot {
    pub accelerator: AcceleratorInfo,
    pub cpu: CpuInfo,
    pub ram: RamInfo,
    pub nvme: StorageTierInfo,
    pub ramdisk: StorageTierInfo,
    pub probed_at_unix: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AcceleratorInfo {
    pub available: bool,
    pub devices: Vec<DeviceInfo>,
    pub total_memory_bytes: u64,
    pub total_usable_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub id: usize,
    pub name: String,
    pub total_memory_bytes: u64,
    pub usable_memory_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuInfo {
    pub physical_cores: usize,
    pub logical_cores: usize,
    pub load_percent: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RamInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
    /// Planning figure: `total × max_utilization − reserved`.
    pub usable_bytes_planning: u64,
    /// Dynamic figure: currently available minus the configured buffer.
    pub usable_bytes_dynamic: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageTierInfo {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub filesystem_total_bytes: u64,
    pub filesystem_free_bytes: u64,
    pub usable_bytes: u64,
}

/// The snapshot shared between the monitor, the engine, and the API.
pub type SharedSnapshot = Arc<RwLock<HardwareSnapshot>>;

pub fn new_shared_snapshot() -> SharedSnapshot {
    Arc::new(RwLock::new(HardwareSnapshot::default()))
}

/// Probes the machine and turns what it finds into per-tier budgets.
pub struct CapacityDetector {
    config: Arc<Config>,
    mounter: Arc<dyn RamDiskMounter>,
    sys: Mutex<sysinfo::System>,
    /// Mount point we provisioned, kept for shutdown cleanup.
    ramdisk_mount: Mutex<Option<PathBuf>>,
}

impl CapacityDetector {
    pub fn new(config: Arc<Config>, mounter: Arc<dyn RamDiskMounter>) -> Self {
        let sys = sysinfo::System::new_with_specifics(
            RefreshKind::new()
                .with_memory(MemoryRefreshKind::everything())
                .with_cpu(CpuRefreshKind::everything()),
        );
        Self {
            config,
            mounter,
            sys: Mutex::new(sys),
            ramdisk_mount: Mutex::new(None),
        }
    }

    /// Probe all tiers. Call once at startup, then periodically from the
    /// monitor.
    pub async fn detect(&self) -> HardwareSnapshot {
        let (cpu, ram) = self.probe_system();
        let snapshot = HardwareSnapshot {
            accelerator: self.probe_accelerator(),
            cpu,
            ram,
            nvme: self.probe_nvme().await,
            ramdisk: self.probe_ramdisk().await,
            probed_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };

        info!(
            gpus = snapshot.accelerator.devices.len(),
            ram_usable = snapshot.ram.usable_bytes_planning,
            nvme_available = snapshot.nvme.available,
            ramdisk_available = snapshot.ramdisk.available,
            "Hardware detection complete"
        );
        snapshot
    }

    fn probe_accelerator(&self) -> AcceleratorInfo {
        let cfg = &self.config.hardware.accelerator;
        let devices = probe_devices(&cfg.devices);

        let mut info = AcceleratorInfo::default();
        for device in devices {
            let reserved = cfg.reserved_vram_mb * MB;
            let usable = ((device.total_memory_bytes.saturating_sub(reserved)) as f64
                * (cfg.max_utilization_percent / 100.0)) as u64;
            info.total_memory_bytes += device.total_memory_bytes;
            info.total_usable_bytes += usable;
            info.devices.push(DeviceInfo {
                id: device.id,
                name: device.name.clone(),
                total_memory_bytes: device.total_memory_bytes,
                usable_memory_bytes: usable,
            });
        }
        info.available = !info.devices.is_empty();
        info
    }

    fn probe_system(&self) -> (CpuInfo, RamInfo) {
        let mut sys = self.sys.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu = CpuInfo {
            physical_cores: sys.physical_core_count().unwrap_or(0),
            logical_cores: sys.cpus().len(),
            load_percent: sys.global_cpu_info().cpu_usage(),
        };

        let ram_cfg = &self.config.hardware.ram;
        let total = sys.total_memory();
        let available = sys.available_memory();
        let planning = ((total as f64 * (ram_cfg.max_utilization_percent / 100.0)) as u64)
            .saturating_sub(ram_cfg.reserved_ram_mb * MB);
        let dynamic = available.saturating_sub(ram_cfg.system_buffer_mb_dynamic * MB);

        let ram = RamInfo {
            total_bytes: total,
            available_bytes: available,
            usable_bytes_planning: planning,
            usable_bytes_dynamic: dynamic,
        };
        (cpu, ram)
    }

    async fn probe_nvme(&self) -> StorageTierInfo {
        let cfg = &self.config.hardware.nvme;
        let Some(base) = cfg.path.as_ref() else {
            return StorageTierInfo::default();
        };

        let layers_dir = base.join(LAYERS_DIR);
        if let Err(e) = tokio::fs::create_dir_all(&layers_dir).await {
            warn!(path = %layers_dir.display(), error = %e, "NVMe path configured but unusable");
            return StorageTierInfo::default();
        }

        let (fs_total, fs_free) = filesystem_space(&layers_dir);
        let floor = cfg.min_filesystem_free_buffer_gb * GB;
        let cap = cfg.max_server_utilization_gb * GB;
        let usable = match fs_free {
            Some(free) => free.saturating_sub(floor).min(cap),
            // Filesystem stats unavailable; fall back to the configured cap.
            None => cap,
        };

        StorageTierInfo {
            available: true,
            path: Some(layers_dir),
            filesystem_total_bytes: fs_total.unwrap_or(0),
            filesystem_free_bytes: fs_free.unwrap_or(0),
            usable_bytes: usable,
        }
    }

    async fn probe_ramdisk(&self) -> StorageTierInfo {
        let cfg = &self.config.hardware.ramdisk;
        if !cfg.enabled {
            return StorageTierInfo::default();
        }

        let size_bytes = cfg.size_mb * MB;
        let already_mounted = {
            let mount = self.ramdisk_mount.lock().unwrap_or_else(|e| e.into_inner());
            mount.as_deref() == Some(cfg.path.as_path())
        };
        if !already_mounted {
            if !self
                .mounter
                .mount_ram_backed_fs(&cfg.path, size_bytes)
                .await
            {
                warn!(path = %cfg.path.display(), "RAM-disk unavailable");
                return StorageTierInfo::default();
            }
            let mut mount = self.ramdisk_mount.lock().unwrap_or_else(|e| e.into_inner());
            *mount = Some(cfg.path.clone());
        }

        let layers_dir = cfg.path.join(LAYERS_DIR);
        if let Err(e) = tokio::fs::create_dir_all(&layers_dir).await {
            warn!(path = %layers_dir.display(), error = %e, "RAM-disk mounted but layers dir failed");
            return StorageTierInfo::default();
        }

        let (_, fs_free) = filesystem_space(&layers_dir);
        StorageTierInfo {
            available: true,
            path: Some(layers_dir),
            filesystem_total_bytes: size_bytes,
            filesystem_free_bytes: fs_free.unwrap_or(size_bytes),
            usable_bytes: (size_bytes as f64 * (cfg.usable_percent_of_total / 100.0)) as u64,
        }
    }

    /// Re-apply a snapshot's findings to the capacity ledger. Layer usage
    /// is preserved; only budgets and availability flags change.
    pub fn apply_budgets(&self, snapshot: &HardwareSnapshot, ledger: &CapacityLedger) {
        let hw = &self.config.hardware;

        ledger.set_budget(
            Tier::Accelerator,
            TierBudget {
                available: snapshot.accelerator.available,
                total_capacity_bytes: snapshot.accelerator.total_memory_bytes,
                reserved_bytes: hw.accelerator.reserved_vram_mb
                    * MB
                    * snapshot.accelerator.devices.len() as u64,
                max_utilization: hw.accelerator.max_utilization_percent / 100.0,
            },
        );

        ledger.set_budget(
            Tier::HostMemory,
            TierBudget {
                available: snapshot.ram.total_bytes > 0,
                total_capacity_bytes: snapshot.ram.total_bytes,
                reserved_bytes: hw.ram.reserved_ram_mb * MB,
                max_utilization: hw.ram.max_utilization_percent / 100.0,
            },
        );

        // File-backed tiers fold their cap/floor math into the usable
        // figure, so a single ceiling formula covers every tier.
        for (tier, info) in [(Tier::RamDisk, &snapshot.ramdisk), (Tier::Nvme, &snapshot.nvme)] {
            ledger.set_budget(
                tier,
                TierBudget {
                    available: info.available,
                    total_capacity_bytes: info.usable_bytes,
                    reserved_bytes: 0,
                    max_utilization: if info.available { 1.0 } else { 0.0 },
                },
            );
        }
    }

    /// Shutdown cleanup: remove our blobs from the RAM-disk and unmount it.
    pub async fn cleanup(&self) {
        let cfg = &self.config.hardware.ramdisk;
        if !cfg.cleanup_on_exit {
            return;
        }
        let mounted = {
            let mut mount = self.ramdisk_mount.lock().unwrap_or_else(|e| e.into_inner());
            mount.take()
        };
        let Some(mount_path) = mounted else { return };

        let layers_dir = mount_path.join(LAYERS_DIR);
        if let Err(e) = tokio::fs::remove_dir_all(&layers_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %layers_dir.display(), error = %e, "RAM-disk blob cleanup failed");
            }
        }
        if !self.mounter.unmount(&mount_path).await {
            warn!(path = %mount_path.display(), "RAM-disk unmount failed");
        }
    }
}

/// Free/total space of the filesystem containing `path`, by longest
/// mount-point prefix match.
fn filesystem_space(path: &Path) -> (Option<u64>, Option<u64>) {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let mut best: Option<(&Path, u64, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if path.starts_with(mount) {
            let better = best
                .map(|(prev, _, _)| mount.as_os_str().len() > prev.as_os_str().len())
                .unwrap_or(true);
            if better {
                best = Some((mount, disk.total_space(), disk.available_space()));
            }
        }
    }
    match best {
        Some((_, total, free)) => (Some(total), Some(free)),
        None => (None, None),
    }
}

fn probe_devices(declared: &[DeclaredDevice]) -> Vec<DeclaredDevice> {
    #[cfg(feature = "cuda")]
    {
        if declared.is_empty() {
            return detect_devices_cuda();
        }
    }
    declared.to_vec()
}

#[cfg(feature = "cuda")]
fn detect_devices_cuda() -> Vec<DeclaredDevice> {
    // Gated stub: filled in when cudarc device enumeration lands.
    todo!("Enumerate CUDA devices with cudarc")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mount::NoopMounter;
    use tempfile::TempDir;

    fn detector(config: Config) -> CapacityDetector {
        CapacityDetector::new(Arc::new(config), Arc::new(NoopMounter))
    }

    #[tokio::test]
    async fn test_unconfigured_tiers_degrade() {
        let snapshot = detector(Config::default()).detect().await;
        assert!(!snapshot.accelerator.available);
        assert!(!snapshot.nvme.available);
        assert!(!snapshot.ramdisk.available);
        // Host RAM is always probed.
        assert!(snapshot.ram.total_bytes > 0);
    }

    #[tokio::test]
    async fn test_declared_devices_budgeted() {
        let mut config = Config::default();
        config.hardware.accelerator.devices = vec![DeclaredDevice {
            id: 0,
            name: "GTX 1070".to_string(),
            total_memory_bytes: 8 * GB,
        }];
        config.hardware.accelerator.reserved_vram_mb = 256;
        config.hardware.accelerator.max_utilization_percent = 90.0;

        let snapshot = detector(config).detect().await;
        assert!(snapshot.accelerator.available);
        let expected = ((8 * GB - 256 * MB) as f64 * 0.9) as u64;
        assert_eq!(snapshot.accelerator.total_usable_bytes, expected);
    }

    #[tokio::test]
    async fn test_nvme_and_ramdisk_probe_with_paths() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.hardware.nvme.path = Some(tmp.path().join("nvme"));
        config.hardware.ramdisk.enabled = true;
        config.hardware.ramdisk.path = tmp.path().join("ramdisk");
        config.hardware.ramdisk.size_mb = 64;

        let det = detector(config);
        let snapshot = det.detect().await;
        assert!(snapshot.nvme.available);
        assert!(snapshot.nvme.path.as_ref().unwrap().ends_with(LAYERS_DIR));
        assert!(snapshot.ramdisk.available);
        assert_eq!(
            snapshot.ramdisk.usable_bytes,
            (64.0 * MB as f64 * 0.95) as u64
        );

        // Budget application marks the tiers admissible.
        let ledger = CapacityLedger::new();
        det.apply_budgets(&snapshot, &ledger);
        assert!(ledger.is_available(Tier::Nvme));
        assert!(ledger.is_available(Tier::RamDisk));
        assert!(ledger.is_available(Tier::HostMemory));
        assert!(!ledger.is_available(Tier::Accelerator));
    }
}
