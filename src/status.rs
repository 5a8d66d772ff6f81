//! Read-only aggregation of engine state for reporting.
//!
//! Everything here is best-effort: layer summaries fall back to the last
//! published snapshot when a transfer holds the metadata lock, and counter
//! reads are relaxed. Nothing in this module blocks on in-flight work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::hardware::detect::{HardwareSnapshot, SharedSnapshot};
use crate::registry::arena::LayerRegistry;
use crate::registry::layer::LayerSummary;
use crate::store::StoreStats;
use crate::transfer::coordinator::TransferCoordinator;
use crate::transfer::ledger::{CapacityLedger, TierUsage};

/// One aggregated view of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub uptime_secs: u64,
    pub layer_count: usize,
    pub queue_depth: usize,
    pub in_flight: u64,
    pub transfers_completed: u64,
    pub transfers_failed: u64,
    pub transfers_no_op: u64,
    pub tier_usage: Vec<TierUsage>,
    pub store_stats: HashMap<String, StoreStats>,
}

pub struct StatusFacade {
    registry: Arc<LayerRegistry>,
    ledger: Arc<CapacityLedger>,
    coordinator: Arc<TransferCoordinator>,
    snapshot: SharedSnapshot,
    started_at: Instant,
}

impl StatusFacade {
    pub fn new(
        registry: Arc<LayerRegistry>,
        ledger: Arc<CapacityLedger>,
        coordinator: Arc<TransferCoordinator>,
        snapshot: SharedSnapshot,
    ) -> Self {
        Self {
            registry,
            ledger,
            coordinator,
            snapshot,
            started_at: Instant::now(),
        }
    }

    /// Summaries of every registered layer, in id order. Records contended
    /// by an in-flight transfer report their last published state.
    pub fn list_layers(&self) -> Vec<LayerSummary> {
        self.registry
            .list()
            .iter()
            .map(|record| record.try_summary())
            .collect()
    }

    pub async fn get_status(&self) -> StatusReport {
        let stats = self.coordinator.stats();
        let mut store_stats = HashMap::new();
        for store in self.coordinator.stores().all() {
            store_stats.insert(store.tier().to_string(), store.stats());
        }
        StatusReport {
            uptime_secs: self.started_at.elapsed().as_secs(),
            layer_count: self.registry.len(),
            queue_depth: self.coordinator.queue_depth(),
            in_flight: stats.in_flight,
            transfers_completed: stats.completed,
            transfers_failed: stats.failed,
            transfers_no_op: stats.no_ops,
            tier_usage: self.ledger.usage_all(),
            store_stats,
        }
    }

    pub fn hardware(&self) -> HardwareSnapshot {
        self.snapshot
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::detect::new_shared_snapshot;
    use crate::registry::arena::LayerDescriptor;
    use crate::registry::layer::{DType, LayerLocation, Tier};
    use crate::runtime::HostBufferRuntime;
    use crate::transfer::coordinator::StoreSet;
    use crate::transfer::ledger::TierBudget;

    fn facade() -> StatusFacade {
        let registry = Arc::new(LayerRegistry::new());
        let ledger = Arc::new(CapacityLedger::new());
        ledger.set_budget(
            Tier::HostMemory,
            TierBudget {
                available: true,
                total_capacity_bytes: 1024,
                reserved_bytes: 0,
                max_utilization: 1.0,
            },
        );
        let coordinator = TransferCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            StoreSet::default(),
            Arc::new(HostBufferRuntime::new()),
            8,
        );
        registry.register(LayerDescriptor {
            name: "model.layers.0".to_string(),
            size_bytes: 128,
            shape: vec![8, 16],
            dtype: DType::F16,
            tier: Tier::HostMemory,
            location: LayerLocation::HostBuffer,
        });
        StatusFacade::new(registry, ledger, coordinator, new_shared_snapshot())
    }

    #[tokio::test]
    async fn test_status_report_shape() {
        let facade = facade();
        let report = facade.get_status().await;
        assert_eq!(report.layer_count, 1);
        assert_eq!(report.queue_depth, 0);
        assert_eq!(report.transfers_completed, 0);
        assert_eq!(report.tier_usage.len(), 4);

        let layers = facade.list_layers();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].tier, Tier::HostMemory);
    }
}
