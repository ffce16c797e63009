//! Unified resource wrapper
//!
//! [`Unified`] is the single wrapper used for any held value: GPU handles,
//! host-side buffers, bounded arrays of semaphores. It combines optional-like
//! access with state flags, a monotonic generation counter for consumer-side
//! cache invalidation, byte accounting against a budget manager, and a
//! string-keyed metadata map.
//!
//! Wrappers are move-only and identified by a 64-bit id derived from the
//! owning node instance and the member name at compile time, never by a
//! runtime string lookup.

use super::budget::{BudgetResourceType, ResourceBudgetManager};
use super::state::{AllocStrategy, MemoryLocation, ResourceStateFlags};
use super::{AllocationError, ResourceStateError};
use crate::foundation::hash;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use thiserror::Error;

/// Stable identity of a [`Unified`] wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnifiedId(pub u64);

impl UnifiedId {
    /// Identity for a named member of a node instance
    pub const fn for_member(node_instance_id: u32, bundle_index: u32, member: &str) -> Self {
        Self(hash::resource_hash(node_instance_id, bundle_index, member))
    }
}

/// Tagged metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Floating point
    Float(f64),
    /// Text value
    Text(String),
}

/// Failure updating a wrapper's value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The wrapper's state forbids the operation
    #[error(transparent)]
    State(#[from] ResourceStateError),
    /// The budget manager refused the bytes
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

struct BudgetBinding {
    manager: Weak<RefCell<ResourceBudgetManager>>,
    budget_type: BudgetResourceType,
    scope_hash: u64,
}

/// Unified wrapper around an optionally-held resource value
pub struct Unified<T> {
    value: Option<T>,
    state: ResourceStateFlags,
    generation: u64,
    allocated_bytes: u64,
    strategy: AllocStrategy,
    location: MemoryLocation,
    metadata: HashMap<String, MetadataValue>,
    id: UnifiedId,
    binding: Option<BudgetBinding>,
}

impl<T> Unified<T> {
    /// Create an empty wrapper with the given identity and strategy
    pub fn new(id: UnifiedId, strategy: AllocStrategy) -> Self {
        Self {
            value: None,
            state: ResourceStateFlags::empty(),
            generation: 0,
            allocated_bytes: 0,
            strategy,
            location: strategy.into(),
            metadata: HashMap::new(),
            id,
            binding: None,
        }
    }

    /// Bind this wrapper to a budget manager
    ///
    /// Current bytes (if a value is held) are registered immediately; every
    /// later `set`/`reset` keeps the registration in sync, and dropping the
    /// wrapper removes it.
    pub fn bind_budget(
        &mut self,
        manager: &Rc<RefCell<ResourceBudgetManager>>,
        budget_type: BudgetResourceType,
        scope_hash: u64,
    ) -> Result<(), AllocationError> {
        if self.value.is_some() {
            manager.borrow_mut().register_resource(
                self.id,
                budget_type.clone(),
                self.allocated_bytes,
                scope_hash,
            )?;
        }
        self.binding = Some(BudgetBinding {
            manager: Rc::downgrade(manager),
            budget_type,
            scope_hash,
        });
        Ok(())
    }

    /// Whether a value is held and consumable
    pub fn ready(&self) -> bool {
        self.value.is_some() && self.state.is_consumable()
    }

    /// Borrow the held value
    pub fn value(&self) -> Result<&T, ResourceStateError> {
        if self.ready() {
            Ok(self.value.as_ref().unwrap())
        } else {
            Err(ResourceStateError::NotReady)
        }
    }

    /// The held value or a default when not ready
    pub fn value_or(&self, default: T) -> T
    where
        T: Clone,
    {
        if self.ready() {
            self.value.clone().unwrap()
        } else {
            default
        }
    }

    /// Mutably borrow the held value; refused while locked
    pub fn value_mut(&mut self) -> Result<&mut T, ResourceStateError> {
        if self.state.contains(ResourceStateFlags::LOCKED) {
            return Err(ResourceStateError::Locked);
        }
        if self.ready() {
            Ok(self.value.as_mut().unwrap())
        } else {
            Err(ResourceStateError::NotReady)
        }
    }

    /// Store a value, accounting its in-memory footprint
    pub fn set(&mut self, value: T) -> Result<(), ResourceError> {
        self.set_sized(value, std::mem::size_of::<T>() as u64)
    }

    /// Store a value with an explicit byte size
    ///
    /// Sets `READY`, clears failure states, increments the generation and
    /// re-registers the bytes with the bound budget manager.
    pub fn set_sized(&mut self, value: T, size_bytes: u64) -> Result<(), ResourceError> {
        if self.state.contains(ResourceStateFlags::LOCKED) {
            return Err(ResourceStateError::Locked.into());
        }
        if let Some(binding) = &self.binding {
            if let Some(manager) = binding.manager.upgrade() {
                manager.borrow_mut().register_resource(
                    self.id,
                    binding.budget_type.clone(),
                    size_bytes,
                    binding.scope_hash,
                )?;
            }
        }
        self.value = Some(value);
        self.allocated_bytes = size_bytes;
        self.generation += 1;
        self.state.insert(ResourceStateFlags::READY);
        self.state
            .remove(ResourceStateFlags::OUTDATED | ResourceStateFlags::PENDING | ResourceStateFlags::FAILED);
        Ok(())
    }

    /// Clear the value and metadata, returning bytes to the budget
    pub fn reset(&mut self) {
        self.value = None;
        self.metadata.clear();
        self.allocated_bytes = 0;
        self.state = ResourceStateFlags::empty();
        self.unregister();
    }

    /// Remove and return the held value, leaving the wrapper uninitialized
    pub fn take(&mut self) -> Option<T> {
        let value = self.value.take();
        if value.is_some() {
            self.allocated_bytes = 0;
            self.state = ResourceStateFlags::empty();
            self.unregister();
        }
        value
    }

    // === State mutation ===

    /// Flag the resource as needing a producer rebuild
    pub fn mark_outdated(&mut self) {
        self.state.remove(ResourceStateFlags::READY);
        self.state.insert(ResourceStateFlags::OUTDATED);
    }

    /// Restore `READY`, clearing `OUTDATED | PENDING | FAILED`
    pub fn mark_ready(&mut self) {
        self.state.insert(ResourceStateFlags::READY);
        self.state
            .remove(ResourceStateFlags::OUTDATED | ResourceStateFlags::PENDING | ResourceStateFlags::FAILED);
    }

    /// Flag asynchronous creation in progress
    pub fn mark_pending(&mut self) {
        self.state.remove(ResourceStateFlags::READY);
        self.state.insert(ResourceStateFlags::PENDING);
    }

    /// Flag creation failure
    pub fn mark_failed(&mut self) {
        self.state
            .remove(ResourceStateFlags::READY | ResourceStateFlags::PENDING);
        self.state.insert(ResourceStateFlags::FAILED);
    }

    /// Forbid mutation for the duration of an in-flight GPU frame
    pub fn lock(&mut self) {
        self.state.insert(ResourceStateFlags::LOCKED);
    }

    /// Allow mutation again once the frame's fence signalled
    pub fn unlock(&mut self) {
        self.state.remove(ResourceStateFlags::LOCKED);
    }

    /// Current state flags
    pub fn state(&self) -> ResourceStateFlags {
        self.state
    }

    /// Monotonically non-decreasing change counter
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bytes accounted to the budget manager
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// Allocation strategy given at construction
    pub fn strategy(&self) -> AllocStrategy {
        self.strategy
    }

    /// Memory location derived from the strategy
    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    /// Stable identity
    pub fn id(&self) -> UnifiedId {
        self.id
    }

    // === Metadata ===

    /// Attach a metadata value
    pub fn set_metadata(&mut self, key: impl Into<String>, value: MetadataValue) {
        self.metadata.insert(key.into(), value);
    }

    /// Look up a metadata value
    pub fn metadata(&self, key: &str) -> Result<&MetadataValue, ResourceStateError> {
        self.metadata
            .get(key)
            .ok_or_else(|| ResourceStateError::MetadataMissing {
                key: key.to_string(),
            })
    }

    /// Look up a metadata value, falling back to a default
    pub fn metadata_or(&self, key: &str, default: MetadataValue) -> MetadataValue {
        self.metadata.get(key).cloned().unwrap_or(default)
    }

    fn unregister(&mut self) {
        if let Some(binding) = &self.binding {
            if let Some(manager) = binding.manager.upgrade() {
                manager.borrow_mut().unregister_resource(self.id);
            }
        }
    }
}

impl<T> Drop for Unified<T> {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::budget::ResourceBudget;

    fn wrapper(name: &str) -> Unified<u32> {
        Unified::new(UnifiedId::for_member(1, 0, name), AllocStrategy::Heap)
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let mut resource = wrapper("counter");
        assert!(!resource.ready());

        resource.set(42).unwrap();

        assert!(resource.ready());
        assert_eq!(*resource.value().unwrap(), 42);
        assert!(resource.state().contains(ResourceStateFlags::READY));
    }

    #[test]
    fn test_reset_clears_value_and_bytes() {
        let mut resource = wrapper("counter");
        resource.set_sized(7, 4096).unwrap();
        resource.set_metadata("usage", MetadataValue::Text("scratch".into()));

        resource.reset();

        assert!(!resource.ready());
        assert_eq!(resource.allocated_bytes(), 0);
        assert!(resource.metadata("usage").is_err());
    }

    #[test]
    fn test_generation_is_strictly_monotonic_over_sets() {
        let mut resource = wrapper("counter");
        let mut previous = resource.generation();

        for i in 0..10 {
            resource.set(i).unwrap();
            assert!(resource.generation() > previous);
            previous = resource.generation();
        }
    }

    #[test]
    fn test_mark_outdated_then_ready_restores() {
        let mut resource = wrapper("counter");
        resource.set(1).unwrap();

        resource.mark_outdated();
        assert!(!resource.ready());
        assert!(resource.state().contains(ResourceStateFlags::OUTDATED));

        resource.mark_ready();
        assert!(resource.ready());
        assert!(!resource.state().intersects(
            ResourceStateFlags::OUTDATED | ResourceStateFlags::PENDING | ResourceStateFlags::FAILED
        ));
    }

    #[test]
    fn test_locked_wrapper_refuses_mutation() {
        let mut resource = wrapper("counter");
        resource.set(1).unwrap();
        resource.lock();

        assert_eq!(
            resource.set(2),
            Err(ResourceError::State(ResourceStateError::Locked))
        );
        assert!(resource.value_mut().is_err());

        resource.unlock();
        resource.set(2).unwrap();
        assert_eq!(*resource.value().unwrap(), 2);
    }

    #[test]
    fn test_budget_binding_tracks_live_bytes() {
        let manager = Rc::new(RefCell::new(ResourceBudgetManager::new()));
        let kind = BudgetResourceType::HostMemory;

        let mut first = wrapper("first");
        first
            .bind_budget(&manager, kind.clone(), crate::foundation::hash::scope_hash(1, 0))
            .unwrap();
        first.set_sized(1, 100).unwrap();

        {
            let mut second = wrapper("second");
            second
                .bind_budget(&manager, kind.clone(), crate::foundation::hash::scope_hash(1, 0))
                .unwrap();
            second.set_sized(2, 50).unwrap();
            assert_eq!(manager.borrow().usage(&kind).current_bytes, 150);
        }

        // Dropping the second wrapper returned its bytes
        assert_eq!(manager.borrow().usage(&kind).current_bytes, 100);

        first.reset();
        assert_eq!(manager.borrow().usage(&kind).current_bytes, 0);
    }

    #[test]
    fn test_strict_budget_failure_leaves_value_unset() {
        let manager = Rc::new(RefCell::new(ResourceBudgetManager::new()));
        let kind = BudgetResourceType::DeviceMemory;
        manager
            .borrow_mut()
            .set_budget(kind.clone(), ResourceBudget::new(64, 0, true));

        let mut resource = wrapper("big");
        resource
            .bind_budget(&manager, kind.clone(), crate::foundation::hash::scope_hash(1, 0))
            .unwrap();

        let result = resource.set_sized(1, 128);
        assert!(matches!(
            result,
            Err(ResourceError::Allocation(AllocationError::BudgetExceeded { .. }))
        ));
        assert!(!resource.ready());
    }

    #[test]
    fn test_metadata_or_falls_back() {
        let resource = wrapper("meta");
        assert_eq!(
            resource.metadata_or("missing", MetadataValue::Int(9)),
            MetadataValue::Int(9)
        );
    }
}
