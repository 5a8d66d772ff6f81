//! Transfer request lifecycle.
//!
//! A request moves through pending → in_progress → {completed | failed}
//! exactly once. The optional completion callback fires at most once, on the
//! terminal transition, and never while the affected layer's lock is held.

use std::cmp::Ordering;
use std::time::Instant;

use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::registry::layer::{LayerId, Tier};

/// Transfer priority: 1 = highest, 10 = lowest.
pub type Priority = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Terminal result handed to the completion callback.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub request_id: Uuid,
    pub layer_id: LayerId,
    pub destination_tier: Tier,
    pub status: TransferStatus,
    /// Present iff `status == Failed`.
    pub error: Option<String>,
    /// Machine-checkable error kind, present iff failed.
    pub error_kind: Option<&'static str>,
}

pub type CompletionCallback = Box<dyn FnOnce(&TransferOutcome) + Send + 'static>;

/// Returned to the submitter on acceptance.
#[derive(Debug, Clone, Serialize)]
pub struct TransferTicket {
    pub request_id: Uuid,
    /// Position in dequeue order at enqueue time (0 = next out).
    pub queued_position: usize,
}

/// A queued move of one layer to another tier.
pub struct TransferRequest {
    pub request_id: Uuid,
    pub layer_id: LayerId,
    /// Tier snapshot at enqueue time; may be stale by execution time.
    pub source_tier: Tier,
    pub destination_tier: Tier,
    pub priority: Priority,
    pub enqueue_seq: u64,
    pub enqueued_at: Instant,
    pub status: TransferStatus,
    pub error: Option<String>,
    callback: Option<CompletionCallback>,
}

impl TransferRequest {
    pub fn new(
        layer_id: LayerId,
        source_tier: Tier,
        destination_tier: Tier,
        priority: Priority,
        enqueue_seq: u64,
        callback: Option<CompletionCallback>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            layer_id,
            source_tier,
            destination_tier,
            priority,
            enqueue_seq,
            enqueued_at: Instant::now(),
            status: TransferStatus::Pending,
            error: None,
            callback,
        }
    }

    /// Drive the request to a terminal state and fire the callback.
    ///
    /// The caller must have dropped the layer lock first.
    pub fn finish(mut self, status: TransferStatus, error: Option<(String, &'static str)>) {
        debug_assert!(matches!(
            status,
            TransferStatus::Completed | TransferStatus::Failed
        ));
        let (message, kind) = match error {
            Some((m, k)) => (Some(m), Some(k)),
            None => (None, None),
        };
        self.status = status;
        self.error = message.clone();

        if let Some(callback) = self.callback.take() {
            let outcome = TransferOutcome {
                request_id: self.request_id,
                layer_id: self.layer_id,
                destination_tier: self.destination_tier,
                status,
                error: message,
                error_kind: kind,
            };
            // A panicking callback must not take the worker down.
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&outcome)))
            {
                error!(
                    request_id = %self.request_id,
                    layer_id = self.layer_id,
                    ?panic,
                    "Transfer completion callback panicked"
                );
            }
        }
    }
}

// Ordering key: (priority ascending, enqueue_seq ascending). The "smallest"
// request dequeues first; FIFO within a priority band.
impl PartialEq for TransferRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.enqueue_seq == other.enqueue_seq
    }
}

impl Eq for TransferRequest {}

impl PartialOrd for TransferRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransferRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.enqueue_seq).cmp(&(other.priority, other.enqueue_seq))
    }
}
