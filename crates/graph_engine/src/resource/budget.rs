//! Per-type resource budgets
//!
//! Tracks current, peak and allocation counts per resource category, with
//! optional soft (warn) and strict (fail) limits. Unified wrappers register
//! here so the manager always knows the sum of live bytes per type; the
//! registry also supports bulk release by scope hash at phase boundaries.

use super::{AllocationError, UnifiedId};
use std::collections::HashMap;
use std::fmt;

/// Resource categories for budget tracking
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BudgetResourceType {
    /// System RAM
    HostMemory,
    /// GPU VRAM
    DeviceMemory,
    /// Vulkan command buffers
    CommandBuffers,
    /// Descriptor sets and pools
    Descriptors,
    /// User-defined category
    Custom(String),
}

impl fmt::Display for BudgetResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostMemory => write!(f, "host-memory"),
            Self::DeviceMemory => write!(f, "device-memory"),
            Self::CommandBuffers => write!(f, "command-buffers"),
            Self::Descriptors => write!(f, "descriptors"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// Budget constraint for one resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceBudget {
    /// Maximum allowed allocation, 0 meaning unlimited
    pub max_bytes: u64,
    /// Warn when usage exceeds this, 0 meaning no warning
    pub warning_threshold: u64,
    /// When true, allocations over the limit fail instead of warning
    pub strict: bool,
}

impl ResourceBudget {
    /// Convenience constructor
    pub fn new(max_bytes: u64, warning_threshold: u64, strict: bool) -> Self {
        Self {
            max_bytes,
            warning_threshold,
            strict,
        }
    }
}

/// Current usage statistics for one resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BudgetUsage {
    /// Currently allocated bytes
    pub current_bytes: u64,
    /// Highest observed allocation
    pub peak_bytes: u64,
    /// Number of live allocations
    pub allocation_count: u32,
}

struct Registration {
    budget_type: BudgetResourceType,
    bytes: u64,
    scope_hash: u64,
}

/// Tracks and enforces per-type resource usage limits
#[derive(Default)]
pub struct ResourceBudgetManager {
    budgets: HashMap<BudgetResourceType, ResourceBudget>,
    usage: HashMap<BudgetResourceType, BudgetUsage>,
    registrations: HashMap<UnifiedId, Registration>,
}

impl ResourceBudgetManager {
    /// Create a manager with no budgets configured
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the budget for a resource type
    pub fn set_budget(&mut self, budget_type: BudgetResourceType, budget: ResourceBudget) {
        self.budgets.insert(budget_type, budget);
    }

    /// The configured budget for a type, if any
    pub fn budget(&self, budget_type: &BudgetResourceType) -> Option<ResourceBudget> {
        self.budgets.get(budget_type).copied()
    }

    /// Try to account a new allocation against the budget
    ///
    /// Under a strict budget this returns `false` without recording when the
    /// allocation would exceed the limit. Otherwise the allocation is
    /// recorded and the call returns `true`; a soft budget that is exceeded
    /// logs a warning but still succeeds.
    pub fn try_allocate(&mut self, budget_type: &BudgetResourceType, bytes: u64) -> bool {
        self.charge(budget_type, bytes).is_ok()
    }

    /// Like [`try_allocate`](Self::try_allocate) but reporting the failure
    pub fn charge(
        &mut self,
        budget_type: &BudgetResourceType,
        bytes: u64,
    ) -> Result<(), AllocationError> {
        if let Some(budget) = self.budgets.get(budget_type) {
            let current = self
                .usage
                .get(budget_type)
                .map(|usage| usage.current_bytes)
                .unwrap_or(0);
            let over = budget.max_bytes > 0 && current + bytes > budget.max_bytes;
            if over {
                if budget.strict {
                    return Err(AllocationError::BudgetExceeded {
                        budget_type: budget_type.to_string(),
                        requested: bytes,
                        available: budget.max_bytes.saturating_sub(current),
                    });
                }
                log::warn!(
                    "soft budget exceeded for {}: {} + {} > {} bytes",
                    budget_type,
                    current,
                    bytes,
                    budget.max_bytes
                );
            }
        }
        self.record_allocation(budget_type, bytes);
        Ok(())
    }

    /// Record an allocation without budget checks
    pub fn record_allocation(&mut self, budget_type: &BudgetResourceType, bytes: u64) {
        let usage = self.usage.entry(budget_type.clone()).or_default();
        usage.current_bytes += bytes;
        usage.peak_bytes = usage.peak_bytes.max(usage.current_bytes);
        usage.allocation_count += 1;
    }

    /// Record a deallocation, saturating at zero
    pub fn record_deallocation(&mut self, budget_type: &BudgetResourceType, bytes: u64) {
        if let Some(usage) = self.usage.get_mut(budget_type) {
            usage.current_bytes = usage.current_bytes.saturating_sub(bytes);
            usage.allocation_count = usage.allocation_count.saturating_sub(1);
        }
    }

    /// Current usage for a type, zeroed when nothing was ever recorded
    pub fn usage(&self, budget_type: &BudgetResourceType) -> BudgetUsage {
        self.usage.get(budget_type).copied().unwrap_or_default()
    }

    /// Bytes still available under the budget, `u64::MAX` when unlimited
    pub fn available_bytes(&self, budget_type: &BudgetResourceType) -> u64 {
        match self.budgets.get(budget_type) {
            Some(budget) if budget.max_bytes > 0 => budget
                .max_bytes
                .saturating_sub(self.usage(budget_type).current_bytes),
            _ => u64::MAX,
        }
    }

    /// Whether current usage exceeds the configured maximum
    pub fn is_over_budget(&self, budget_type: &BudgetResourceType) -> bool {
        match self.budgets.get(budget_type) {
            Some(budget) if budget.max_bytes > 0 => {
                self.usage(budget_type).current_bytes > budget.max_bytes
            }
            _ => false,
        }
    }

    /// Whether current usage exceeds the warning threshold
    pub fn is_near_warning(&self, budget_type: &BudgetResourceType) -> bool {
        match self.budgets.get(budget_type) {
            Some(budget) if budget.warning_threshold > 0 => {
                self.usage(budget_type).current_bytes > budget.warning_threshold
            }
            _ => false,
        }
    }

    /// Clear all budgets, usage and registrations
    pub fn reset(&mut self) {
        self.budgets.clear();
        self.usage.clear();
        self.registrations.clear();
    }

    /// Zero the usage counters for one type
    pub fn reset_usage(&mut self, budget_type: &BudgetResourceType) {
        self.usage.remove(budget_type);
    }

    // === Unified wrapper registry ===

    /// Register a wrapper's live bytes, replacing any previous registration
    pub fn register_resource(
        &mut self,
        id: UnifiedId,
        budget_type: BudgetResourceType,
        bytes: u64,
        scope_hash: u64,
    ) -> Result<(), AllocationError> {
        self.unregister_resource(id);
        self.charge(&budget_type, bytes)?;
        self.registrations.insert(
            id,
            Registration {
                budget_type,
                bytes,
                scope_hash,
            },
        );
        Ok(())
    }

    /// Remove a wrapper's registration, returning its bytes to the budget
    pub fn unregister_resource(&mut self, id: UnifiedId) {
        if let Some(registration) = self.registrations.remove(&id) {
            self.record_deallocation(&registration.budget_type, registration.bytes);
        }
    }

    /// Release every registration belonging to a scope, returning the total
    /// bytes freed
    ///
    /// Used to drop all temporaries a node allocated within one phase.
    pub fn release_scope(&mut self, scope_hash: u64) -> u64 {
        let ids: Vec<UnifiedId> = self
            .registrations
            .iter()
            .filter(|(_, registration)| registration.scope_hash == scope_hash)
            .map(|(id, _)| *id)
            .collect();
        let mut freed = 0;
        for id in ids {
            if let Some(registration) = self.registrations.remove(&id) {
                freed += registration.bytes;
                self.record_deallocation(&registration.budget_type, registration.bytes);
            }
        }
        freed
    }

    /// Number of live registrations
    pub fn tracked_resource_count(&self) -> usize {
        self.registrations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_strict_budget_refuses_over_allocation() {
        let mut manager = ResourceBudgetManager::new();
        manager.set_budget(
            BudgetResourceType::DeviceMemory,
            ResourceBudget::new(16 * MIB, 0, true),
        );

        assert!(manager.try_allocate(&BudgetResourceType::DeviceMemory, 10 * MIB));
        assert!(!manager.try_allocate(&BudgetResourceType::DeviceMemory, 8 * MIB));
        assert_eq!(
            manager.usage(&BudgetResourceType::DeviceMemory).current_bytes,
            10 * MIB
        );
    }

    #[test]
    fn test_soft_budget_warns_but_succeeds() {
        let mut manager = ResourceBudgetManager::new();
        manager.set_budget(
            BudgetResourceType::HostMemory,
            ResourceBudget::new(MIB, 0, false),
        );

        assert!(manager.try_allocate(&BudgetResourceType::HostMemory, 2 * MIB));
        assert!(manager.is_over_budget(&BudgetResourceType::HostMemory));
    }

    #[test]
    fn test_peak_tracks_high_water_mark() {
        let mut manager = ResourceBudgetManager::new();
        let kind = BudgetResourceType::HostMemory;

        manager.record_allocation(&kind, 100);
        manager.record_allocation(&kind, 200);
        manager.record_deallocation(&kind, 250);

        let usage = manager.usage(&kind);
        assert_eq!(usage.current_bytes, 50);
        assert_eq!(usage.peak_bytes, 300);
        assert!(usage.peak_bytes >= usage.current_bytes);
    }

    #[test]
    fn test_deallocation_saturates_at_zero() {
        let mut manager = ResourceBudgetManager::new();
        let kind = BudgetResourceType::Descriptors;

        manager.record_allocation(&kind, 10);
        manager.record_deallocation(&kind, 100);

        assert_eq!(manager.usage(&kind).current_bytes, 0);
    }

    #[test]
    fn test_charge_reports_available_bytes() {
        let mut manager = ResourceBudgetManager::new();
        manager.set_budget(
            BudgetResourceType::DeviceMemory,
            ResourceBudget::new(16 * MIB, 0, true),
        );
        manager.record_allocation(&BudgetResourceType::DeviceMemory, 10 * MIB);

        let error = manager
            .charge(&BudgetResourceType::DeviceMemory, 8 * MIB)
            .unwrap_err();
        assert_eq!(
            error,
            AllocationError::BudgetExceeded {
                budget_type: "device-memory".to_string(),
                requested: 8 * MIB,
                available: 6 * MIB,
            }
        );
    }

    #[test]
    fn test_warning_threshold() {
        let mut manager = ResourceBudgetManager::new();
        manager.set_budget(
            BudgetResourceType::CommandBuffers,
            ResourceBudget::new(0, 1000, false),
        );

        manager.record_allocation(&BudgetResourceType::CommandBuffers, 900);
        assert!(!manager.is_near_warning(&BudgetResourceType::CommandBuffers));
        manager.record_allocation(&BudgetResourceType::CommandBuffers, 200);
        assert!(manager.is_near_warning(&BudgetResourceType::CommandBuffers));
    }

    #[test]
    fn test_release_scope_frees_all_registrations() {
        let mut manager = ResourceBudgetManager::new();
        let scope = crate::foundation::hash::scope_hash(1, 0);
        let other_scope = crate::foundation::hash::scope_hash(2, 0);

        manager
            .register_resource(
                UnifiedId(crate::foundation::hash::resource_hash(1, 0, "a")),
                BudgetResourceType::HostMemory,
                100,
                scope,
            )
            .unwrap();
        manager
            .register_resource(
                UnifiedId(crate::foundation::hash::resource_hash(1, 0, "b")),
                BudgetResourceType::HostMemory,
                50,
                scope,
            )
            .unwrap();
        manager
            .register_resource(
                UnifiedId(crate::foundation::hash::resource_hash(2, 0, "c")),
                BudgetResourceType::HostMemory,
                25,
                other_scope,
            )
            .unwrap();

        assert_eq!(manager.release_scope(scope), 150);
        assert_eq!(manager.tracked_resource_count(), 1);
        assert_eq!(
            manager.usage(&BudgetResourceType::HostMemory).current_bytes,
            25
        );
    }
}
