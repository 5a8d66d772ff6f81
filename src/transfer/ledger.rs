//! Per-tier capacity accounting.
//!
//! The ledger holds the budget and used-bytes figure for each tier. The
//! invariant, checked before any bytes move:
//!
//! ```text
//! used_bytes + reserved_bytes + requested ≤ total_capacity × max_utilization
//! ```
//!
//! Each tier's account sits behind its own mutex, taken only for the brief
//! check-and-increment — never across I/O. These locks are distinct from the
//! per-layer locks.

use std::sync::Mutex;

use serde::Serialize;

use crate::error::EngineError;
use crate::registry::layer::Tier;

/// The usable byte allowance for a tier after reservations and caps.
#[derive(Debug, Clone, Copy)]
pub struct TierBudget {
    pub available: bool,
    pub total_capacity_bytes: u64,
    /// Bytes never allocated to layers (OS margin, runtime scratch).
    pub reserved_bytes: u64,
    /// Hard ceiling as a fraction of total capacity.
    pub max_utilization: f64,
}

impl TierBudget {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            total_capacity_bytes: 0,
            reserved_bytes: 0,
            max_utilization: 0.0,
        }
    }

    /// The hard ceiling in bytes: `total × max_utilization`.
    fn ceiling(&self) -> u64 {
        (self.total_capacity_bytes as f64 * self.max_utilization) as u64
    }
}

#[derive(Debug)]
struct TierAccount {
    budget: TierBudget,
    used_bytes: u64,
}

/// Read-only per-tier usage view for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TierUsage {
    pub tier: Tier,
    pub available: bool,
    pub total_capacity_bytes: u64,
    pub reserved_bytes: u64,
    pub max_utilization: f64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

/// Capacity accounting across all four tiers.
pub struct CapacityLedger {
    // Indexed by Tier::level().
    accounts: [Mutex<TierAccount>; 4],
}

impl Default for CapacityLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl CapacityLedger {
    /// All tiers start unavailable until a hardware probe sets budgets.
    pub fn new() -> Self {
        Self {
            accounts: std::array::from_fn(|_| {
                Mutex::new(TierAccount {
                    budget: TierBudget::unavailable(),
                    used_bytes: 0,
                })
            }),
        }
    }

    fn account(&self, tier: Tier) -> std::sync::MutexGuard<'_, TierAccount> {
        self.accounts[tier.level()]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Install or refresh a tier's budget. Used bytes are preserved; a probe
    /// shrinking the budget below current usage does not evict anything, it
    /// only blocks further admissions.
    pub fn set_budget(&self, tier: Tier, budget: TierBudget) {
        self.account(tier).budget = budget;
    }

    pub fn is_available(&self, tier: Tier) -> bool {
        self.account(tier).budget.available
    }

    /// Validate-then-commit: admit `bytes` into the tier or reject without
    /// any accounting change.
    pub fn try_reserve(&self, tier: Tier, bytes: u64) -> Result<(), EngineError> {
        let mut account = self.account(tier);
        if !account.budget.available {
            return Err(EngineError::TierUnavailable(tier));
        }
        let ceiling = account.budget.ceiling();
        let committed = account.used_bytes + account.budget.reserved_bytes;
        let free = ceiling.saturating_sub(committed);
        if bytes > free {
            return Err(EngineError::CapacityExceeded {
                tier,
                requested: bytes,
                available: free,
            });
        }
        account.used_bytes += bytes;
        Ok(())
    }

    /// Return bytes to the tier (transfer completed away, or reservation
    /// rolled back).
    pub fn release(&self, tier: Tier, bytes: u64) {
        let mut account = self.account(tier);
        account.used_bytes = account.used_bytes.saturating_sub(bytes);
    }

    pub fn used_bytes(&self, tier: Tier) -> u64 {
        self.account(tier).used_bytes
    }

    pub fn usage(&self, tier: Tier) -> TierUsage {
        let account = self.account(tier);
        let ceiling = account.budget.ceiling();
        TierUsage {
            tier,
            available: account.budget.available,
            total_capacity_bytes: account.budget.total_capacity_bytes,
            reserved_bytes: account.budget.reserved_bytes,
            max_utilization: account.budget.max_utilization,
            used_bytes: account.used_bytes,
            free_bytes: ceiling
                .saturating_sub(account.used_bytes + account.budget.reserved_bytes),
        }
    }

    pub fn usage_all(&self) -> Vec<TierUsage> {
        Tier::ALL.iter().map(|t| self.usage(*t)).collect()
    }
}
