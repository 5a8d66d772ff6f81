//! Full-engine tests: bootstrap, registration, transfer, status, shutdown.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use tensor_tier::config::Config;
use tensor_tier::engine::PlacementEngine;
use tensor_tier::hardware::mount::NoopMounter;
use tensor_tier::registry::arena::LayerDescriptor;
use tensor_tier::registry::layer::{DType, LayerLocation, Tier};
use tensor_tier::runtime::HostBufferRuntime;
use tensor_tier::transfer::request::{TransferOutcome, TransferStatus};

fn layer_desc(name: &str, size: u64) -> LayerDescriptor {
    LayerDescriptor {
        name: name.to_string(),
        size_bytes: size,
        shape: vec![size as usize],
        dtype: DType::I8,
        tier: Tier::HostMemory,
        location: LayerLocation::HostBuffer,
    }
}

async fn engine_with_nvme(
    tmp: &tempfile::TempDir,
) -> (Arc<PlacementEngine>, Arc<HostBufferRuntime>) {
    let mut config = Config::default();
    config.hardware.nvme.path = Some(tmp.path().join("nvme"));
    config.transfer.worker_tasks = 2;

    let runtime = Arc::new(HostBufferRuntime::new());
    let engine = PlacementEngine::bootstrap(
        Arc::new(config),
        runtime.clone() as Arc<dyn tensor_tier::runtime::ModelRuntime>,
        Arc::new(NoopMounter),
    )
    .await
    .unwrap();
    (engine, runtime)
}

#[tokio::test]
async fn test_offload_layer_to_nvme_and_report() {
    let tmp = tempfile::TempDir::new().unwrap();
    let (engine, runtime) = engine_with_nvme(&tmp).await;

    let id = engine
        .register_layer(layer_desc("model.layers.12.ffn", 4096))
        .unwrap();
    runtime.preload(id, Bytes::from(vec![1u8; 4096]));

    let (tx, rx) = oneshot::channel();
    engine
        .request_transfer(
            id,
            Tier::Nvme,
            Some(2),
            Some(Box::new(move |outcome: &TransferOutcome| {
                let _ = tx.send(outcome.clone());
            })),
        )
        .unwrap();
    let outcome = rx.await.unwrap();
    assert_eq!(outcome.status, TransferStatus::Completed);

    // Placement and accounting reflect the move.
    let layers = engine.list_layers();
    assert_eq!(layers.len(), 1);
    assert_eq!(layers[0].tier, Tier::Nvme);
    assert!(layers[0].path.as_ref().unwrap().contains("layer_"));
    assert_eq!(engine.ledger().used_bytes(Tier::HostMemory), 0);
    assert_eq!(engine.ledger().used_bytes(Tier::Nvme), 4096);

    let report = engine.get_status().await;
    assert_eq!(report.transfers_completed, 1);
    assert_eq!(report.transfers_failed, 0);
    assert_eq!(report.queue_depth, 0);
    assert_eq!(report.store_stats["nvme"].writes, 1);

    // The hardware snapshot carries the probed tiers.
    let hardware = engine.hardware();
    assert!(hardware.nvme.available);
    assert!(hardware.ram.total_bytes > 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_registration_respects_host_budget() {
    let tmp = tempfile::TempDir::new().unwrap();
    let (engine, _runtime) = engine_with_nvme(&tmp).await;

    // A layer far beyond physical RAM is rejected up front.
    let err = engine
        .register_layer(layer_desc("absurd", u64::MAX / 2))
        .unwrap_err();
    assert_eq!(err.kind(), "capacity_exceeded");
    assert!(engine.list_layers().is_empty());
    assert_eq!(engine.ledger().used_bytes(Tier::HostMemory), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_default_priority_applied_and_clamped() {
    let tmp = tempfile::TempDir::new().unwrap();
    let (engine, runtime) = engine_with_nvme(&tmp).await;

    let id = engine.register_layer(layer_desc("l", 16)).unwrap();
    runtime.preload(id, Bytes::from(vec![0u8; 16]));

    // priority 0 clamps to 1, out-of-range high clamps to 10; both accepted.
    engine.request_transfer(id, Tier::Nvme, Some(0), None).unwrap();
    engine
        .request_transfer(id, Tier::HostMemory, Some(255), None)
        .unwrap();

    engine.shutdown().await;

    let stats = engine.get_status().await;
    assert_eq!(
        stats.transfers_completed + stats.transfers_no_op,
        2,
        "both clamped submissions must drain"
    );
}
