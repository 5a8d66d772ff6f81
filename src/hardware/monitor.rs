//! Periodic hardware refresh.
//!
//! The monitor re-probes capacities on a fixed interval, publishes the
//! fresh snapshot, and re-applies budgets to the ledger so a shrinking
//! tier starts rejecting new reservations without disturbing layers that
//! already live there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::hardware::detect::{CapacityDetector, HardwareSnapshot, SharedSnapshot};
use crate::registry::layer::Tier;
use crate::store::blob::BlobStore;
use crate::transfer::coordinator::StoreSet;
use crate::transfer::ledger::{CapacityLedger, TierBudget};

pub struct HardwareMonitor {
    detector: Arc<CapacityDetector>,
    ledger: Arc<CapacityLedger>,
    snapshot: SharedSnapshot,
    stores: StoreSet,
    interval: Duration,
    stop: AtomicBool,
    stop_notify: Notify,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HardwareMonitor {
    pub fn new(
        detector: Arc<CapacityDetector>,
        ledger: Arc<CapacityLedger>,
        snapshot: SharedSnapshot,
        stores: StoreSet,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            detector,
            ledger,
            snapshot,
            stores,
            interval,
            stop: AtomicBool::new(false),
            stop_notify: Notify::new(),
            task: std::sync::Mutex::new(None),
        })
    }

    /// Run one probe-and-publish cycle.
    pub async fn refresh(&self) {
        let fresh = self.detector.detect().await;
        self.detector.apply_budgets(&fresh, &self.ledger);
        self.provision_stores(&fresh).await;
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = fresh;
    }

    /// A file-backed tier is only admissible once its blob store exists.
    /// Attach one the first time a probe yields a usable path; if that
    /// fails, keep the tier unavailable on the ledger so submissions are
    /// rejected up front instead of at write time.
    async fn provision_stores(&self, snapshot: &HardwareSnapshot) {
        for (tier, info) in [(Tier::RamDisk, &snapshot.ramdisk), (Tier::Nvme, &snapshot.nvme)] {
            if !info.available || self.stores.get(tier).is_some() {
                continue;
            }
            let Some(path) = info.path.as_ref() else {
                self.ledger.set_budget(tier, TierBudget::unavailable());
                continue;
            };
            match BlobStore::new(tier, path.clone()).await {
                Ok(store) => {
                    info!(tier = %tier, path = %path.display(), "Attached tier store");
                    self.stores.attach(Arc::new(store));
                }
                Err(err) => {
                    warn!(tier = %tier, %err, "Store provisioning failed, tier stays unavailable");
                    self.ledger.set_budget(tier, TierBudget::unavailable());
                }
            }
        }
    }

    /// Start the background refresh loop.
    pub fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!(interval_secs = monitor.interval.as_secs(), "Hardware monitor started");
            loop {
                let sleep = tokio::time::sleep(monitor.interval);
                tokio::select! {
                    _ = sleep => {}
                    _ = monitor.stop_notify.notified() => {}
                }
                if monitor.stop.load(Ordering::Acquire) {
                    break;
                }
                monitor.refresh().await;
                debug!("Hardware snapshot refreshed");
            }
            info!("Hardware monitor stopped");
        });
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        *task = Some(handle);
    }

    /// Stop the loop and join it, aborting if it does not wind down in time.
    pub async fn shutdown(&self, grace: Duration) {
        self.stop.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
        let handle = {
            let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
            task.take()
        };
        if let Some(mut handle) = handle {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("Hardware monitor did not stop within grace period, aborting");
                handle.abort();
            }
        }
    }
}
