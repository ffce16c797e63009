//! Resource state flags and lifetime/allocation classification

use bitflags::bitflags;

bitflags! {
    /// Resource state flags for fine-grained lifecycle tracking
    ///
    /// The bitfield design allows states to combine. An uninitialized
    /// resource carries the empty set. A resource exposed to consumers must
    /// have `READY` set and `FAILED` clear.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResourceStateFlags: u32 {
        /// Valid and usable
        const READY     = 1 << 0;
        /// Needs reload or recompilation by its producer
        const OUTDATED  = 1 << 1;
        /// In use by an in-flight GPU frame, mutation forbidden
        const LOCKED    = 1 << 2;
        /// Cached data invalid, needs refresh
        const STALE     = 1 << 3;
        /// Asynchronous creation in progress
        const PENDING   = 1 << 4;
        /// Creation or loading failed
        const FAILED    = 1 << 5;
        /// Temporary, released after use
        const TRANSIENT = 1 << 6;
    }
}

impl ResourceStateFlags {
    /// Whether the resource may be handed to consumers
    pub fn is_consumable(self) -> bool {
        self.contains(Self::READY) && !self.contains(Self::FAILED)
    }
}

/// How long a resource outlives the node that created it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceLifetime {
    /// Lives within a single frame
    Transient,
    /// Lives as long as the compiled graph
    GraphLocal,
    /// Lives for the whole process, never aliased
    Persistent,
}

/// Where the underlying storage for a resource should live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocStrategy {
    /// Fixed-size stack allocation
    Stack,
    /// Dynamic heap allocation
    Heap,
    /// GPU device memory
    Device,
    /// Derived from size, type and lifetime
    #[default]
    Automatic,
}

/// Physical memory location, derived from strategy and resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryLocation {
    /// CPU stack memory
    HostStack,
    /// CPU heap memory
    HostHeap,
    /// GPU VRAM, not CPU-accessible
    DeviceLocal,
    /// GPU memory mapped into the host address space
    HostVisible,
    /// Not yet determined
    #[default]
    Unknown,
}

impl From<AllocStrategy> for MemoryLocation {
    fn from(strategy: AllocStrategy) -> Self {
        match strategy {
            AllocStrategy::Stack => Self::HostStack,
            AllocStrategy::Heap => Self::HostHeap,
            AllocStrategy::Device => Self::DeviceLocal,
            AllocStrategy::Automatic => Self::Unknown,
        }
    }
}
