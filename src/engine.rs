//! Top-level wiring: owns every subsystem and exposes the library surface
//! the transport consumes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::EngineError;
use crate::hardware::detect::{new_shared_snapshot, CapacityDetector, HardwareSnapshot};
use crate::hardware::monitor::HardwareMonitor;
use crate::hardware::mount::RamDiskMounter;
use crate::registry::arena::{LayerDescriptor, LayerRegistry};
use crate::registry::layer::{LayerId, LayerSummary, Tier};
use crate::runtime::ModelRuntime;
use crate::status::{StatusFacade, StatusReport};
use crate::transfer::coordinator::{StoreSet, TransferCoordinator};
use crate::transfer::ledger::CapacityLedger;
use crate::transfer::request::{CompletionCallback, Priority, TransferTicket};

pub struct PlacementEngine {
    config: Arc<Config>,
    registry: Arc<LayerRegistry>,
    ledger: Arc<CapacityLedger>,
    coordinator: Arc<TransferCoordinator>,
    detector: Arc<CapacityDetector>,
    monitor: Arc<HardwareMonitor>,
    status: StatusFacade,
}

impl PlacementEngine {
    /// Probe hardware, provision the file-backed tiers, and start the
    /// worker pool and monitor.
    pub async fn bootstrap(
        config: Arc<Config>,
        runtime: Arc<dyn ModelRuntime>,
        mounter: Arc<dyn RamDiskMounter>,
    ) -> Result<Arc<Self>, EngineError> {
        let registry = Arc::new(LayerRegistry::new());
        let ledger = Arc::new(CapacityLedger::new());
        let detector = Arc::new(CapacityDetector::new(Arc::clone(&config), mounter));
        let snapshot = new_shared_snapshot();

        let coordinator = TransferCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            StoreSet::default(),
            runtime,
            config.transfer.queue_capacity,
        );

        let monitor = HardwareMonitor::new(
            Arc::clone(&detector),
            Arc::clone(&ledger),
            Arc::clone(&snapshot),
            coordinator.stores().clone(),
            Duration::from_secs(config.monitor.interval_secs),
        );

        // Initial probe: budgets applied, file-backed stores provisioned,
        // snapshot published. Later probes run on the monitor interval and
        // can bring up tiers that were unavailable at boot.
        monitor.refresh().await;

        coordinator.spawn_workers(config.transfer.worker_tasks);
        monitor.start();

        let status = StatusFacade::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            Arc::clone(&coordinator),
            snapshot,
        );

        info!(
            workers = config.transfer.worker_tasks,
            queue_capacity = config.transfer.queue_capacity,
            "Placement engine ready"
        );
        Ok(Arc::new(Self {
            config,
            registry,
            ledger,
            coordinator,
            detector,
            monitor,
            status,
        }))
    }

    /// Admit a layer into the engine. Its initial tier is charged on the
    /// ledger; a layer that does not fit is rejected before registration.
    pub fn register_layer(&self, desc: LayerDescriptor) -> Result<LayerId, EngineError> {
        self.ledger.try_reserve(desc.tier, desc.size_bytes)?;
        let id = self.registry.register(desc);
        Ok(id)
    }

    /// Queue a move of `layer_id` to `destination`. Never blocks.
    pub fn request_transfer(
        &self,
        layer_id: LayerId,
        destination: Tier,
        priority: Option<Priority>,
        callback: Option<CompletionCallback>,
    ) -> Result<TransferTicket, EngineError> {
        let priority = priority
            .unwrap_or(self.config.transfer.default_priority)
            .clamp(1, 10);
        self.coordinator
            .submit(layer_id, destination, priority, callback)
    }

    pub fn list_layers(&self) -> Vec<LayerSummary> {
        self.status.list_layers()
    }

    pub async fn get_status(&self) -> StatusReport {
        self.status.get_status().await
    }

    pub fn hardware(&self) -> HardwareSnapshot {
        self.status.hardware()
    }

    pub fn registry(&self) -> &Arc<LayerRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<CapacityLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ordered shutdown: monitor first, then the coordinator drains, then
    /// RAM-disk cleanup.
    pub async fn shutdown(&self) {
        let grace = Duration::from_secs(self.config.transfer.shutdown_grace_secs);
        self.monitor.shutdown(grace).await;
        self.coordinator.shutdown(grace).await;
        self.detector.cleanup().await;
        if self.coordinator.queue_depth() > 0 {
            warn!(
                remaining = self.coordinator.queue_depth(),
                "Shutdown with transfers still queued"
            );
        }
        info!("Placement engine stopped");
    }
}
