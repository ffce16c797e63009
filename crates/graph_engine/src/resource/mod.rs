//! Resource subsystem
//!
//! A unified wrapper for any GPU or CPU resource ([`Unified`]), lifetime
//! analysis over the compiled topology ([`LifetimeAnalyzer`]), memory reuse
//! across non-overlapping lifetimes ([`AliasingEngine`]), per-type budget
//! enforcement ([`ResourceBudgetManager`]), per-frame per-node statistics
//! ([`ResourceProfiler`]) and CPU-stack accounting ([`StackTracker`]).

pub mod aliasing;
pub mod budget;
pub mod lifetime;
pub mod profiler;
pub mod stack;
pub mod state;
pub mod unified;

pub use aliasing::{AliasingEngine, AliasingStats, MemoryRequirements};
pub use budget::{BudgetResourceType, BudgetUsage, ResourceBudget, ResourceBudgetManager};
pub use lifetime::{LifetimeAnalyzer, LifetimeSpan};
pub use profiler::{FrameStats, NodeStats, ResourceProfiler};
pub use stack::{StackTracker, StackVec};
pub use state::{AllocStrategy, MemoryLocation, ResourceLifetime, ResourceStateFlags};
pub use unified::{MetadataValue, Unified, UnifiedId};

use crate::graph::NodeKey;
use thiserror::Error;

/// Graph-level identity of a published resource
///
/// Every resource in the graph is owned by exactly one node and addressed by
/// the `(owning node, slot index, array index)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    /// The owning node instance
    pub node: NodeKey,
    /// Output slot index on the owner
    pub slot: u32,
    /// Array element index, 0 for single slots
    pub index: u32,
}

impl ResourceKey {
    /// Key for element 0 of a slot
    pub fn new(node: NodeKey, slot: u32) -> Self {
        Self {
            node,
            slot,
            index: 0,
        }
    }

    /// Key for a specific array element of a slot
    pub fn indexed(node: NodeKey, slot: u32, index: u32) -> Self {
        Self { node, slot, index }
    }
}

/// Allocation failures across the budget, stack and heap paths
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// A strict budget refused the allocation
    #[error("budget exceeded for {budget_type}: requested {requested} bytes, {available} available")]
    BudgetExceeded {
        /// The budget category that refused
        budget_type: String,
        /// Bytes requested
        requested: u64,
        /// Bytes still available under the budget
        available: u64,
    },
    /// The per-frame stack budget would be exceeded
    #[error("stack budget exceeded")]
    StackOverflow,
    /// The heap fallback also failed
    #[error("heap allocation failed")]
    HeapOverflow,
    /// The requested size is zero or out of range
    #[error("invalid allocation size")]
    InvalidSize,
    /// The underlying system allocator failed
    #[error("system allocation failure")]
    SystemError,
}

/// State-related access failures on a resource wrapper
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceStateError {
    /// The wrapper holds no consumable value
    #[error("resource is not ready")]
    NotReady,
    /// The resource is locked by an in-flight GPU frame
    #[error("resource is locked by an in-flight frame")]
    Locked,
    /// A metadata key was requested but never set
    #[error("metadata key missing: {key}")]
    MetadataMissing {
        /// The missing key
        key: String,
    },
}
