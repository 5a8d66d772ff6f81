//! The transfer coordinator: a worker pool executing queued moves.
//!
//! Workers claim requests in `(priority, enqueue order)` sequence and run
//! each move all-or-nothing: capacity is re-validated against the current
//! budget at claim time, the payload is read from wherever the layer
//! actually lives now, and the registry is only updated after the
//! destination write succeeds. A failed move leaves the layer's prior
//! location metadata untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::registry::arena::LayerRegistry;
use crate::registry::layer::{LayerId, LayerLocation, LayerMetadata, Tier};
use crate::runtime::ModelRuntime;
use crate::store::TierStore;
use crate::transfer::ledger::CapacityLedger;
use crate::transfer::queue::TransferQueue;
use crate::transfer::request::{
    CompletionCallback, Priority, TransferRequest, TransferStatus, TransferTicket,
};

#[derive(Default)]
struct StoreSlots {
    ramdisk: Option<Arc<dyn TierStore>>,
    nvme: Option<Arc<dyn TierStore>>,
}

/// The file-backed tier stores the coordinator writes through.
///
/// Shared and late-bound: clones see the same slots, and a store can be
/// attached after startup when a tier's backing path first becomes usable
/// (e.g. a RAM-disk mount that failed at boot and succeeded on a later
/// probe).
#[derive(Default, Clone)]
pub struct StoreSet {
    slots: Arc<std::sync::RwLock<StoreSlots>>,
}

impl StoreSet {
    pub fn with_store(self, store: Arc<dyn TierStore>) -> Self {
        self.attach(store);
        self
    }

    /// Install the store for its tier, replacing any previous one.
    pub fn attach(&self, store: Arc<dyn TierStore>) {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        match store.tier() {
            Tier::RamDisk => slots.ramdisk = Some(store),
            Tier::Nvme => slots.nvme = Some(store),
            // Memory tiers go through the model runtime, not a store.
            _ => {}
        }
    }

    pub fn get(&self, tier: Tier) -> Option<Arc<dyn TierStore>> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        match tier {
            Tier::RamDisk => slots.ramdisk.clone(),
            Tier::Nvme => slots.nvme.clone(),
            _ => None,
        }
    }

    pub fn all(&self) -> Vec<Arc<dyn TierStore>> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots.ramdisk.iter().chain(slots.nvme.iter()).cloned().collect()
    }
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    no_ops: AtomicU64,
    in_flight: AtomicU64,
}

/// Counter snapshot for the status facade.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    pub completed: u64,
    pub failed: u64,
    pub no_ops: u64,
    pub in_flight: u64,
}

pub struct TransferCoordinator {
    registry: Arc<LayerRegistry>,
    ledger: Arc<CapacityLedger>,
    stores: StoreSet,
    runtime: Arc<dyn ModelRuntime>,
    queue: Arc<TransferQueue>,
    counters: Counters,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TransferCoordinator {
    pub fn new(
        registry: Arc<LayerRegistry>,
        ledger: Arc<CapacityLedger>,
        stores: StoreSet,
        runtime: Arc<dyn ModelRuntime>,
        queue_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            ledger,
            stores,
            runtime,
            queue: Arc::new(TransferQueue::new(queue_capacity)),
            counters: Counters::default(),
            workers: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Start `count` worker tasks draining the queue.
    pub fn spawn_workers(self: &Arc<Self>, count: usize) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for worker_id in 0..count {
            let coordinator = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                debug!(worker_id, "Transfer worker started");
                while let Some(mut request) = coordinator.queue.next().await {
                    request.status = TransferStatus::InProgress;
                    coordinator.counters.in_flight.fetch_add(1, Ordering::Relaxed);
                    coordinator.execute(request).await;
                    coordinator.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
                }
                debug!(worker_id, "Transfer worker stopped");
            }));
        }
    }

    /// Queue a move. Never blocks: unknown layers, unavailable destinations,
    /// and a full queue are immediate rejections.
    pub fn submit(
        &self,
        layer_id: LayerId,
        destination: Tier,
        priority: Priority,
        callback: Option<CompletionCallback>,
    ) -> Result<TransferTicket, EngineError> {
        let record = self
            .registry
            .get(layer_id)
            .ok_or(EngineError::UnknownLayer(layer_id))?;

        if !self.ledger.is_available(destination) {
            return Err(EngineError::TierUnavailable(destination));
        }

        let source = record.try_summary().tier;
        let request = TransferRequest::new(
            layer_id,
            source,
            destination,
            priority,
            self.queue.next_seq(),
            callback,
        );
        let request_id = request.request_id;
        let queued_position = self.queue.push(request)?;

        debug!(
            %request_id,
            layer_id,
            source = %source,
            destination = %destination,
            priority,
            queued_position,
            "Queued transfer"
        );
        Ok(TransferTicket {
            request_id,
            queued_position,
        })
    }

    /// Execute one claimed request to its terminal state.
    async fn execute(&self, request: TransferRequest) {
        let layer_id = request.layer_id;
        let destination = request.destination_tier;

        let Some(record) = self.registry.get(layer_id) else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            let err = EngineError::UnknownLayer(layer_id);
            request.finish(TransferStatus::Failed, Some((err.to_string(), err.kind())));
            return;
        };

        // Serializes moves of the same layer; held across the I/O below so
        // no reader ever observes a half-moved layer.
        let mut meta = record.lock().await;

        // The submission snapshot may be stale; trust only the locked view.
        let source = meta.current_tier;
        if source == destination {
            drop(meta);
            self.counters.no_ops.fetch_add(1, Ordering::Relaxed);
            debug!(layer_id, tier = %destination, "Transfer is a no-op");
            request.finish(TransferStatus::Completed, None);
            return;
        }

        // Re-validate capacity against the current budget, not the one seen
        // at submission.
        let expected_size = meta.current_size_bytes;
        if let Err(err) = self.ledger.try_reserve(destination, expected_size) {
            drop(meta);
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(layer_id, destination = %destination, %err, "Transfer rejected");
            request.finish(TransferStatus::Failed, Some((err.to_string(), err.kind())));
            return;
        }

        let payload = match self.read_payload(&meta, source).await {
            Ok(payload) => payload,
            Err(err) => {
                self.ledger.release(destination, expected_size);
                drop(meta);
                self.fail(request, layer_id, err);
                return;
            }
        };

        // Compression may have changed the on-disk size since the metadata
        // was last written; budgets are charged at the measured length.
        let actual_size = payload.len() as u64;
        if actual_size != expected_size {
            self.ledger.release(destination, expected_size);
            if let Err(err) = self.ledger.try_reserve(destination, actual_size) {
                drop(meta);
                self.fail(request, layer_id, err);
                return;
            }
        }

        let new_location = match self.write_payload(layer_id, payload, destination).await {
            Ok(location) => location,
            Err(err) => {
                self.ledger.release(destination, actual_size);
                drop(meta);
                self.fail(request, layer_id, err);
                return;
            }
        };

        // Commit: only now does the registry point at the new tier.
        let old_location = std::mem::replace(&mut meta.location, new_location);
        meta.current_tier = destination;
        meta.current_size_bytes = actual_size;
        meta.touch();
        record.publish(&meta);
        self.ledger.release(source, expected_size);
        drop(meta);

        // The stale source blob is dead weight, not state; cleanup failure
        // is logged and counted by the store, nothing else.
        if let LayerLocation::File(path) = old_location {
            if let Some(store) = self.stores.get(source) {
                if let Err(err) = store.delete(&path).await {
                    warn!(layer_id, path = %path.display(), %err, "Stale blob cleanup failed");
                }
            }
        }

        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        info!(
            request_id = %request.request_id,
            layer_id,
            from = %source,
            to = %destination,
            bytes = actual_size,
            "Transfer completed"
        );
        request.finish(TransferStatus::Completed, None);
    }

    fn fail(&self, request: TransferRequest, layer_id: LayerId, err: EngineError) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        warn!(layer_id, %err, "Transfer failed");
        request.finish(TransferStatus::Failed, Some((err.to_string(), err.kind())));
    }

    async fn read_payload(&self, meta: &LayerMetadata, source: Tier) -> Result<Bytes, EngineError> {
        match source {
            Tier::Accelerator | Tier::HostMemory => {
                self.runtime.read_layer_buffer(meta.id).await
            }
            Tier::RamDisk | Tier::Nvme => {
                let store = self
                    .stores
                    .get(source)
                    .ok_or(EngineError::TierUnavailable(source))?;
                let path = meta.location.path().ok_or_else(|| {
                    EngineError::io(
                        source,
                        std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            format!("layer {} has no blob path recorded", meta.id),
                        ),
                    )
                })?;
                store.read(path).await.map(Bytes::from)
            }
        }
    }

    async fn write_payload(
        &self,
        layer_id: LayerId,
        payload: Bytes,
        destination: Tier,
    ) -> Result<LayerLocation, EngineError> {
        match destination {
            Tier::Accelerator | Tier::HostMemory => {
                self.runtime
                    .write_layer_buffer(layer_id, destination, payload)
                    .await
            }
            Tier::RamDisk | Tier::Nvme => {
                let store = self
                    .stores
                    .get(destination)
                    .ok_or(EngineError::TierUnavailable(destination))?;
                match store.write(layer_id, &payload).await {
                    Ok(path) => Ok(LayerLocation::File(path)),
                    Err(err) => {
                        // Never leave a half-written blob behind a failure.
                        let partial = store.root().join(format!("layer_{layer_id:06}.bin"));
                        let _ = store.delete(&partial).await;
                        Err(err)
                    }
                }
            }
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            no_ops: self.counters.no_ops.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
        }
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    /// Stop accepting work, drain in-flight transfers, and join workers.
    /// Workers that outlive the grace period are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        self.queue.close();
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for mut handle in workers {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("Transfer worker did not stop within grace period, aborting");
                handle.abort();
            }
        }
        info!("Transfer coordinator stopped");
    }
}
