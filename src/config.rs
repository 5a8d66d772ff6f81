//! Runtime configuration for tensor-tier.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! All capacity, reservation, and priority defaults live here; the engine
//! consumes the resolved structure and never re-reads the file.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

pub const MB: u64 = 1024 * 1024;
pub const GB: u64 = 1024 * 1024 * 1024;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "tensor-tier", about = "Tiered layer placement and transfer server")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub hardware: HardwareConfig,
    pub transfer: TransferConfig,
    pub monitor: MonitorConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Per-tier hardware settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub accelerator: AcceleratorConfig,
    pub cpu: CpuConfig,
    pub ram: RamConfig,
    pub nvme: NvmeConfig,
    pub ramdisk: RamDiskConfig,
}

/// Accelerator (GPU) capacity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Devices declared by the deployment when CUDA probing is unavailable
    /// (the model runtime owns the devices; we only budget against them).
    pub devices: Vec<DeclaredDevice>,

    /// VRAM held back per device, never allocated to layers.
    pub reserved_vram_mb: u64,

    /// Hard utilization ceiling per device.
    pub max_utilization_percent: f64,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            reserved_vram_mb: 256,
            max_utilization_percent: 90.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredDevice {
    pub id: usize,
    pub name: String,
    pub total_memory_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub max_utilization_percent: f64,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            max_utilization_percent: 85.0,
        }
    }
}

/// Host RAM budgeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RamConfig {
    /// RAM held back for the OS and other processes.
    pub reserved_ram_mb: u64,

    /// Hard utilization ceiling on total RAM.
    pub max_utilization_percent: f64,

    /// Extra headroom subtracted from currently-available RAM when
    /// computing the dynamic figure reported by the monitor.
    pub system_buffer_mb_dynamic: u64,
}

impl Default for RamConfig {
    fn default() -> Self {
        Self {
            reserved_ram_mb: 1024,
            max_utilization_percent: 80.0,
            system_buffer_mb_dynamic: 512,
        }
    }
}

/// NVMe-backed storage tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NvmeConfig {
    /// Base path for layer blobs. Unset disables the tier.
    pub path: Option<PathBuf>,

    /// Cap on how much of the filesystem this server may use.
    pub max_server_utilization_gb: u64,

    /// Free-space floor left on the filesystem for everyone else.
    pub min_filesystem_free_buffer_gb: u64,
}

impl Default for NvmeConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_server_utilization_gb: 50,
            min_filesystem_free_buffer_gb: 5,
        }
    }
}

/// RAM-backed filesystem tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RamDiskConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub size_mb: u64,
    pub usable_percent_of_total: f64,
    pub cleanup_on_exit: bool,
    pub mount_timeout_secs: u64,
}

impl Default for RamDiskConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("/tmp/tensor-tier-ramdisk"),
            size_mb: 1024,
            usable_percent_of_total: 95.0,
            cleanup_on_exit: true,
            mount_timeout_secs: 15,
        }
    }
}

/// Transfer subsystem tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bounded queue capacity; submissions beyond this are rejected.
    pub queue_capacity: usize,

    /// Number of worker tasks draining the queue.
    pub worker_tasks: usize,

    /// Default priority for transfers that do not specify one (1 = highest).
    pub default_priority: u8,

    /// How long shutdown waits for in-flight transfers before aborting.
    pub shutdown_grace_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 200,
            worker_tasks: 4,
            default_priority: 5,
            shutdown_grace_secs: 10,
        }
    }
}

/// Background hardware monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval_secs: 15 }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file is absent.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
