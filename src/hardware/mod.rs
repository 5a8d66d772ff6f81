//! Hardware capacity probing and background monitoring.
//!
//! - [`detect`]: per-tier capacity probes producing a [`detect::HardwareSnapshot`]
//! - [`mount`]: the OS-mount collaborator boundary for the RAM-disk tier
//! - [`monitor`]: periodic refresh task with bounded-join shutdown

pub mod detect;
pub mod monitor;
pub mod mount;

pub use detect::{CapacityDetector, HardwareSnapshot, SharedSnapshot};
pub use monitor::HardwareMonitor;
pub use mount::{NoopMounter, RamDiskMounter, SystemMounter};
