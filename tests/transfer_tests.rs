//! End-to-end transfer coordinator tests: queue → worker → ledger → commit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use tensor_tier::error::EngineError;
use tensor_tier::store::StoreStats;

use tensor_tier::registry::arena::{LayerDescriptor, LayerRegistry};
use tensor_tier::registry::layer::{DType, LayerLocation, Tier};
use tensor_tier::runtime::HostBufferRuntime;
use tensor_tier::store::blob::BlobStore;
use tensor_tier::store::TierStore;
use tensor_tier::transfer::coordinator::{StoreSet, TransferCoordinator};
use tensor_tier::transfer::ledger::{CapacityLedger, TierBudget};
use tensor_tier::transfer::request::{TransferOutcome, TransferStatus};

fn budget(total: u64) -> TierBudget {
    TierBudget {
        available: true,
        total_capacity_bytes: total,
        reserved_bytes: 0,
        max_utilization: 1.0,
    }
}

fn descriptor(name: &str, size: u64, tier: Tier, location: LayerLocation) -> LayerDescriptor {
    LayerDescriptor {
        name: name.to_string(),
        size_bytes: size,
        shape: vec![size as usize],
        dtype: DType::I8,
        tier,
        location,
    }
}

struct Harness {
    registry: Arc<LayerRegistry>,
    ledger: Arc<CapacityLedger>,
    runtime: Arc<HostBufferRuntime>,
    coordinator: Arc<TransferCoordinator>,
}

impl Harness {
    fn new(stores: StoreSet, workers: usize) -> Self {
        let registry = Arc::new(LayerRegistry::new());
        let ledger = Arc::new(CapacityLedger::new());
        let runtime = Arc::new(HostBufferRuntime::new());
        let coordinator = TransferCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            stores,
            runtime.clone() as Arc<dyn tensor_tier::runtime::ModelRuntime>,
            16,
        );
        coordinator.spawn_workers(workers);
        Self {
            registry,
            ledger,
            runtime,
            coordinator,
        }
    }

    /// Register a memory-resident layer, charging its initial tier.
    fn add_layer(&self, size: u64, tier: Tier) -> tensor_tier::registry::layer::LayerId {
        let location = match tier {
            Tier::Accelerator => LayerLocation::Accelerator { device_id: 0 },
            _ => LayerLocation::HostBuffer,
        };
        self.ledger.try_reserve(tier, size).unwrap();
        let id = self
            .registry
            .register(descriptor(&format!("layer-{size}"), size, tier, location));
        self.runtime.preload(id, Bytes::from(vec![7u8; size as usize]));
        id
    }

    /// Submit and wait for the terminal outcome.
    async fn transfer(
        &self,
        layer_id: tensor_tier::registry::layer::LayerId,
        destination: Tier,
        priority: u8,
    ) -> TransferOutcome {
        let (tx, rx) = oneshot::channel();
        self.coordinator
            .submit(
                layer_id,
                destination,
                priority,
                Some(Box::new(move |outcome: &TransferOutcome| {
                    let _ = tx.send(outcome.clone());
                })),
            )
            .unwrap();
        rx.await.unwrap()
    }

    fn assert_budget_invariant(&self) {
        for usage in self.ledger.usage_all() {
            let ceiling =
                (usage.total_capacity_bytes as f64 * usage.max_utilization) as u64;
            assert!(
                usage.used_bytes + usage.reserved_bytes <= ceiling,
                "tier {} over budget: used={} reserved={} ceiling={}",
                usage.tier,
                usage.used_bytes,
                usage.reserved_bytes,
                ceiling
            );
        }
    }
}

#[tokio::test]
async fn test_accelerator_to_host_moves_accounting() {
    let harness = Harness::new(StoreSet::default(), 2);
    harness.ledger.set_budget(Tier::Accelerator, budget(500));
    harness.ledger.set_budget(Tier::HostMemory, budget(1000));

    let id = harness.add_layer(300, Tier::Accelerator);
    assert_eq!(harness.ledger.used_bytes(Tier::Accelerator), 300);

    let outcome = harness.transfer(id, Tier::HostMemory, 5).await;
    assert_eq!(outcome.status, TransferStatus::Completed);
    assert!(outcome.error.is_none());

    assert_eq!(harness.ledger.used_bytes(Tier::Accelerator), 0);
    assert_eq!(harness.ledger.used_bytes(Tier::HostMemory), 300);

    let summary = harness.registry.get(id).unwrap().try_summary();
    assert_eq!(summary.tier, Tier::HostMemory);
    assert_eq!(summary.current_size_bytes, 300);
    assert_eq!(summary.access_count, 1);

    harness.assert_budget_invariant();
}

#[tokio::test]
async fn test_capacity_exceeded_leaves_accounting_unchanged() {
    let harness = Harness::new(StoreSet::default(), 1);
    harness.ledger.set_budget(Tier::Accelerator, budget(1000));
    harness.ledger.set_budget(Tier::HostMemory, budget(100));

    let id = harness.add_layer(300, Tier::Accelerator);

    let outcome = harness.transfer(id, Tier::HostMemory, 5).await;
    assert_eq!(outcome.status, TransferStatus::Failed);
    assert_eq!(outcome.error_kind, Some("capacity_exceeded"));

    // Nothing moved, nothing leaked.
    assert_eq!(harness.ledger.used_bytes(Tier::Accelerator), 300);
    assert_eq!(harness.ledger.used_bytes(Tier::HostMemory), 0);
    let summary = harness.registry.get(id).unwrap().try_summary();
    assert_eq!(summary.tier, Tier::Accelerator);
    assert_eq!(summary.access_count, 0);

    harness.assert_budget_invariant();
}

#[tokio::test]
async fn test_same_tier_transfer_is_a_no_op() {
    let harness = Harness::new(StoreSet::default(), 1);
    harness.ledger.set_budget(Tier::HostMemory, budget(1000));

    let id = harness.add_layer(200, Tier::HostMemory);

    let outcome = harness.transfer(id, Tier::HostMemory, 5).await;
    assert_eq!(outcome.status, TransferStatus::Completed);

    // No accounting change, no access-stat change.
    assert_eq!(harness.ledger.used_bytes(Tier::HostMemory), 200);
    let summary = harness.registry.get(id).unwrap().try_summary();
    assert_eq!(summary.access_count, 0);
    assert_eq!(harness.coordinator.stats().no_ops, 1);
}

#[tokio::test]
async fn test_unavailable_destination_rejected_without_enqueue() {
    let harness = Harness::new(StoreSet::default(), 0);
    harness.ledger.set_budget(Tier::HostMemory, budget(1000));

    let id = harness.add_layer(50, Tier::HostMemory);

    let err = harness
        .coordinator
        .submit(id, Tier::Nvme, 5, None)
        .unwrap_err();
    assert_eq!(err.kind(), "tier_unavailable");
    assert_eq!(harness.coordinator.queue_depth(), 0);
}

#[tokio::test]
async fn test_unknown_layer_rejected_at_submit() {
    let harness = Harness::new(StoreSet::default(), 0);
    harness.ledger.set_budget(Tier::HostMemory, budget(1000));

    let err = harness
        .coordinator
        .submit(42, Tier::HostMemory, 5, None)
        .unwrap_err();
    assert_eq!(err.kind(), "unknown_layer");
}

#[tokio::test]
async fn test_concurrent_transfers_one_layer_settle_cleanly() {
    // All requests are queued before any outcome is awaited, so several
    // workers race for the same layer; the per-layer lock serializes them.
    let harness = Harness::new(StoreSet::default(), 4);
    harness.ledger.set_budget(Tier::Accelerator, budget(10_000));
    harness.ledger.set_budget(Tier::HostMemory, budget(10_000));

    let id = harness.add_layer(100, Tier::HostMemory);

    let destinations = [
        Tier::Accelerator,
        Tier::HostMemory,
        Tier::Accelerator,
        Tier::HostMemory,
        Tier::Accelerator,
        Tier::HostMemory,
    ];
    let mut receivers = Vec::new();
    for destination in destinations {
        let (tx, rx) = oneshot::channel();
        harness
            .coordinator
            .submit(
                id,
                destination,
                5,
                Some(Box::new(move |outcome: &TransferOutcome| {
                    let _ = tx.send(outcome.clone());
                })),
            )
            .unwrap();
        receivers.push(rx);
    }

    for rx in receivers {
        assert_eq!(rx.await.unwrap().status, TransferStatus::Completed);
    }

    // The layer ends on exactly one tier, never split between two, and the
    // books balance: its bytes are charged to that tier alone.
    let summary = harness.registry.get(id).unwrap().try_summary();
    let (home, other) = match summary.tier {
        Tier::Accelerator => (Tier::Accelerator, Tier::HostMemory),
        Tier::HostMemory => (Tier::HostMemory, Tier::Accelerator),
        tier => panic!("layer landed on unexpected tier {tier}"),
    };
    assert_eq!(harness.ledger.used_bytes(home), 100);
    assert_eq!(harness.ledger.used_bytes(other), 0);
    harness.assert_budget_invariant();
}

/// A store whose writes always fail, standing in for a dying disk.
struct BrokenDiskStore {
    root: PathBuf,
}

impl BrokenDiskStore {
    fn fault() -> EngineError {
        EngineError::Io {
            tier: Tier::Nvme,
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk fault"),
        }
    }
}

#[async_trait]
impl TierStore for BrokenDiskStore {
    fn tier(&self) -> Tier {
        Tier::Nvme
    }

    fn root(&self) -> &Path {
        &self.root
    }

    async fn write(&self, _layer_id: u64, _data: &[u8]) -> Result<PathBuf, EngineError> {
        Err(Self::fault())
    }

    async fn read(&self, _path: &Path) -> Result<Vec<u8>, EngineError> {
        Err(Self::fault())
    }

    async fn delete(&self, _path: &Path) -> Result<(), EngineError> {
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        StoreStats::default()
    }
}

#[tokio::test]
async fn test_read_failure_releases_reservation_and_keeps_metadata() {
    let harness = Harness::new(StoreSet::default(), 1);
    harness.ledger.set_budget(Tier::Accelerator, budget(1000));
    harness.ledger.set_budget(Tier::HostMemory, budget(1000));

    // Registered but never preloaded: the runtime read will fail.
    harness.ledger.try_reserve(Tier::HostMemory, 300).unwrap();
    let id = harness.registry.register(descriptor(
        "orphan",
        300,
        Tier::HostMemory,
        LayerLocation::HostBuffer,
    ));

    let outcome = harness.transfer(id, Tier::Accelerator, 5).await;
    assert_eq!(outcome.status, TransferStatus::Failed);
    assert_eq!(outcome.error_kind, Some("io_failure"));

    // The destination reservation was rolled back and nothing moved.
    assert_eq!(harness.ledger.used_bytes(Tier::Accelerator), 0);
    assert_eq!(harness.ledger.used_bytes(Tier::HostMemory), 300);
    let summary = harness.registry.get(id).unwrap().try_summary();
    assert_eq!(summary.tier, Tier::HostMemory);
    assert_eq!(summary.access_count, 0);
    harness.assert_budget_invariant();
}

#[tokio::test]
async fn test_write_failure_releases_reservation_and_keeps_metadata() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn TierStore> = Arc::new(BrokenDiskStore {
        root: tmp.path().to_path_buf(),
    });
    let harness = Harness::new(StoreSet::default().with_store(store), 1);
    harness.ledger.set_budget(Tier::HostMemory, budget(1000));
    harness.ledger.set_budget(Tier::Nvme, budget(1000));

    let id = harness.add_layer(300, Tier::HostMemory);

    let outcome = harness.transfer(id, Tier::Nvme, 5).await;
    assert_eq!(outcome.status, TransferStatus::Failed);
    assert_eq!(outcome.error_kind, Some("io_failure"));

    // Accounting and placement are exactly as before the attempt.
    assert_eq!(harness.ledger.used_bytes(Tier::Nvme), 0);
    assert_eq!(harness.ledger.used_bytes(Tier::HostMemory), 300);
    let summary = harness.registry.get(id).unwrap().try_summary();
    assert_eq!(summary.tier, Tier::HostMemory);
    assert!(summary.path.is_none());
    assert_eq!(harness.coordinator.stats().failed, 1);
    harness.assert_budget_invariant();
}

#[tokio::test]
async fn test_host_to_nvme_round_trip_through_blob_store() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn TierStore> = Arc::new(
        BlobStore::new(Tier::Nvme, tmp.path().join("nvme"))
            .await
            .unwrap(),
    );
    let harness = Harness::new(StoreSet::default().with_store(Arc::clone(&store)), 1);
    harness.ledger.set_budget(Tier::HostMemory, budget(1000));
    harness.ledger.set_budget(Tier::Nvme, budget(1000));

    let id = harness.add_layer(256, Tier::HostMemory);

    // Offload to NVMe: a blob appears and the metadata points at it.
    let outcome = harness.transfer(id, Tier::Nvme, 3).await;
    assert_eq!(outcome.status, TransferStatus::Completed);
    let record = harness.registry.get(id).unwrap();
    let blob_path = {
        let meta = record.lock().await;
        assert_eq!(meta.current_tier, Tier::Nvme);
        meta.location.path().unwrap().to_path_buf()
    };
    assert!(blob_path.is_file());
    assert_eq!(harness.ledger.used_bytes(Tier::Nvme), 256);
    assert_eq!(harness.ledger.used_bytes(Tier::HostMemory), 0);

    // Bring it back: the stale blob is removed.
    let outcome = harness.transfer(id, Tier::HostMemory, 3).await;
    assert_eq!(outcome.status, TransferStatus::Completed);
    assert!(!blob_path.exists());
    assert_eq!(harness.ledger.used_bytes(Tier::Nvme), 0);
    assert_eq!(harness.ledger.used_bytes(Tier::HostMemory), 256);

    let stats = store.stats();
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.reads, 1);
    assert_eq!(stats.files, 0);
    assert_eq!(stats.bytes_written, 256);
}

#[tokio::test]
async fn test_priority_bands_drain_before_later_submissions() {
    // No workers while the queue fills, so dequeue order is observable.
    let harness = Harness::new(StoreSet::default(), 0);
    harness.ledger.set_budget(Tier::Accelerator, budget(10_000));
    harness.ledger.set_budget(Tier::HostMemory, budget(10_000));

    let ids: Vec<_> = (0..4)
        .map(|_| harness.add_layer(10, Tier::HostMemory))
        .collect();

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut receivers = Vec::new();
    for (id, priority) in ids.iter().zip([5u8, 1, 5, 3]) {
        let (tx, rx) = oneshot::channel();
        let order = Arc::clone(&order);
        let layer = *id;
        harness
            .coordinator
            .submit(
                layer,
                Tier::Accelerator,
                priority,
                Some(Box::new(move |outcome: &TransferOutcome| {
                    order.lock().unwrap().push(layer);
                    let _ = tx.send(outcome.status);
                })),
            )
            .unwrap();
        receivers.push(rx);
    }
    assert_eq!(harness.coordinator.queue_depth(), 4);

    harness.coordinator.spawn_workers(1);
    for rx in receivers {
        assert_eq!(rx.await.unwrap(), TransferStatus::Completed);
    }

    // Priorities [5, 1, 5, 3] drain as [1, 3, 5-first, 5-second].
    let order = order.lock().unwrap().clone();
    assert_eq!(order, vec![ids[1], ids[3], ids[0], ids[2]]);
}

#[tokio::test]
async fn test_queue_full_rejection_is_immediate() {
    let registry = Arc::new(LayerRegistry::new());
    let ledger = Arc::new(CapacityLedger::new());
    ledger.set_budget(Tier::HostMemory, budget(1000));
    ledger.set_budget(Tier::Accelerator, budget(1000));
    let runtime = Arc::new(HostBufferRuntime::new());
    // Capacity 2, no workers draining.
    let coordinator = TransferCoordinator::new(
        Arc::clone(&registry),
        Arc::clone(&ledger),
        StoreSet::default(),
        runtime,
        2,
    );

    ledger.try_reserve(Tier::HostMemory, 30).unwrap();
    let id = registry.register(descriptor(
        "l",
        10,
        Tier::HostMemory,
        LayerLocation::HostBuffer,
    ));

    coordinator.submit(id, Tier::Accelerator, 5, None).unwrap();
    coordinator.submit(id, Tier::Accelerator, 5, None).unwrap();
    let err = coordinator.submit(id, Tier::Accelerator, 5, None).unwrap_err();
    assert_eq!(err.kind(), "queue_full");
    assert_eq!(coordinator.queue_depth(), 2);
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_work() {
    let harness = Harness::new(StoreSet::default(), 2);
    harness.ledger.set_budget(Tier::Accelerator, budget(10_000));
    harness.ledger.set_budget(Tier::HostMemory, budget(10_000));

    let ids: Vec<_> = (0..8)
        .map(|_| harness.add_layer(10, Tier::HostMemory))
        .collect();
    for id in &ids {
        harness
            .coordinator
            .submit(*id, Tier::Accelerator, 5, None)
            .unwrap();
    }

    harness
        .coordinator
        .shutdown(std::time::Duration::from_secs(10))
        .await;

    let stats = harness.coordinator.stats();
    assert_eq!(stats.completed + stats.failed + stats.no_ops, 8);
    assert_eq!(harness.coordinator.queue_depth(), 0);
}
