//! The prioritized asynchronous transfer subsystem.
//!
//! - [`request`]: transfer request lifecycle and ordering
//! - [`queue`]: bounded priority queue (non-blocking submit, async dequeue)
//! - [`ledger`]: per-tier capacity accounting with validate-then-commit
//! - [`coordinator`]: worker pool executing moves against stores and registry

pub mod coordinator;
pub mod ledger;
pub mod queue;
pub mod request;

pub use coordinator::{CoordinatorStats, StoreSet, TransferCoordinator};
pub use ledger::{CapacityLedger, TierBudget, TierUsage};
pub use queue::TransferQueue;
pub use request::{
    CompletionCallback, TransferOutcome, TransferRequest, TransferStatus, TransferTicket,
};
