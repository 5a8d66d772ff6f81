//! Bounded priority queue for pending transfers.
//!
//! Submission is non-blocking: a full queue is an immediate rejection, not a
//! wait. Workers park on a notify until work arrives or the queue closes.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::EngineError;
use crate::transfer::request::TransferRequest;

struct QueueInner {
    heap: BinaryHeap<Reverse<TransferRequest>>,
    closed: bool,
}

pub struct TransferQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    next_seq: AtomicU64,
}

impl TransferQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Allocate the enqueue sequence number used as the FIFO tie-breaker.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Enqueue a request, returning its position in dequeue order.
    pub fn push(&self, request: TransferRequest) -> Result<usize, EngineError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return Err(EngineError::ShuttingDown);
        }
        if inner.heap.len() >= self.capacity {
            return Err(EngineError::QueueFull {
                capacity: self.capacity,
            });
        }
        let position = inner
            .heap
            .iter()
            .filter(|Reverse(queued)| *queued < request)
            .count();
        inner.heap.push(Reverse(request));
        drop(inner);
        self.notify.notify_one();
        Ok(position)
    }

    /// Non-blocking dequeue of the most urgent request.
    pub fn pop(&self) -> Option<TransferRequest> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.heap.pop().map(|Reverse(request)| request)
    }

    /// Await the next request; `None` once the queue is closed and drained.
    pub async fn next(&self) -> Option<TransferRequest> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(Reverse(request)) = inner.heap.pop() {
                    return Some(request);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting work and wake all parked workers.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
