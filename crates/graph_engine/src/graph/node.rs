//! Node instances and phase contexts
//!
//! A node is any value implementing [`Node`]. The graph drives the four
//! lifecycle phases through a [`NodeContext`] that exposes typed slot access,
//! publishing, parameters, the device, the budget manager, the profiler and
//! the stack tracker. The context is the only channel between a node and the
//! rest of the system; nodes never hold references to each other.

use super::error::{NodeError, NodeResult, WiringError};
use super::node_type::NodeType;
use super::slots::{ParameterValue, SlotValue};
use crate::foundation::hash;
use crate::foundation::logging::NodeLog;
use crate::resource::profiler::AllocationLocation;
use crate::resource::{
    AllocationError, MemoryRequirements, ResourceBudgetManager, ResourceKey, ResourceLifetime,
    ResourceProfiler, ResourceStateError, ResourceStateFlags, StackTracker, StackVec,
};
use crate::vulkan::context::DeviceContext;
use ash::vk;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

slotmap::new_key_type! {
    /// Stable handle to a node instance inside a graph
    pub struct NodeKey;
}

/// Execution state of a node instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    /// Just created, not yet set up
    #[default]
    Created,
    /// Set up and ready to compile
    Ready,
    /// Pipelines and resources allocated
    Compiled,
    /// Currently executing
    Executing,
    /// Execution finished for the frame
    Complete,
    /// A lifecycle method failed; retried from setup next frame
    Error,
}

/// Per-node execution statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceStats {
    /// Number of completed executions
    pub execution_count: u32,
    /// Cumulative CPU time across executions, nanoseconds
    pub total_cpu_time_ns: u64,
    /// CPU time of the most recent execution, nanoseconds
    pub last_execution_ns: u64,
    /// Mean execution time in milliseconds
    pub average_execution_ms: f32,
}

impl PerformanceStats {
    /// Fold one execution's CPU time into the statistics
    pub fn update(&mut self, cpu_time_ns: u64) {
        self.execution_count += 1;
        self.total_cpu_time_ns += cpu_time_ns;
        self.last_execution_ns = cpu_time_ns;
        self.average_execution_ms =
            (self.total_cpu_time_ns as f64 / self.execution_count as f64 / 1.0e6) as f32;
    }
}

/// A resource published into the graph's output table
#[derive(Debug, Clone)]
pub struct PublishedResource {
    /// The value itself
    pub value: SlotValue,
    /// State flags; consumers only see `READY` entries
    pub state: ResourceStateFlags,
    /// Monotonic change counter, starting at 1 on first publish
    pub generation: u64,
    /// Bytes accounted for this resource
    pub bytes: u64,
    /// Lifetime class used by the analyzer and aliasing engine
    pub lifetime: ResourceLifetime,
    /// Memory requirements for aliasing decisions
    pub mem_reqs: MemoryRequirements,
    /// Where the allocation was recorded
    pub location: AllocationLocation,
}

/// Options for publishing a sized resource
#[derive(Debug, Clone, Copy)]
pub struct PublishSpec {
    /// Array index within the output slot
    pub index: u32,
    /// Bytes to account against budget and profiler; 0 for control values
    pub bytes: u64,
    /// Lifetime class
    pub lifetime: ResourceLifetime,
    /// Allocation location for profiling
    pub location: AllocationLocation,
    /// Memory requirements override; derived from `bytes` when absent
    pub mem_reqs: Option<MemoryRequirements>,
}

impl Default for PublishSpec {
    fn default() -> Self {
        Self {
            index: 0,
            bytes: 0,
            lifetime: ResourceLifetime::GraphLocal,
            location: AllocationLocation::Heap,
            mem_reqs: None,
        }
    }
}

impl PublishSpec {
    /// Spec for a device-memory resource of `bytes` size
    pub fn device(bytes: u64, lifetime: ResourceLifetime) -> Self {
        Self {
            bytes,
            lifetime,
            location: AllocationLocation::Device,
            ..Self::default()
        }
    }

    /// Spec for a host-memory resource of `bytes` size
    pub fn host(bytes: u64, lifetime: ResourceLifetime) -> Self {
        Self {
            bytes,
            lifetime,
            location: AllocationLocation::Heap,
            ..Self::default()
        }
    }

    /// Use explicit memory requirements for aliasing decisions
    pub fn with_requirements(mut self, mem_reqs: MemoryRequirements) -> Self {
        self.mem_reqs = Some(mem_reqs);
        self
    }
}

/// Behaviour of a node instance
///
/// `setup` runs once per graph before any input is resolved. `compile` runs
/// once topology is known and may allocate GPU resources, record reusable
/// command buffers and publish outputs. `execute` runs every frame and may
/// replay a cached command buffer or re-record. `cleanup` runs in reverse
/// topological order on graph teardown.
pub trait Node {
    /// One-time graph-scope initialization
    fn setup(&mut self, _ctx: &mut NodeContext) -> NodeResult<()> {
        Ok(())
    }

    /// Allocate resources and publish outputs once topology is known
    fn compile(&mut self, _ctx: &mut NodeContext) -> NodeResult<()> {
        Ok(())
    }

    /// Per-frame work; record or replay, never block on the GPU
    fn execute(&mut self, ctx: &mut NodeContext) -> NodeResult<()>;

    /// Release resources on graph teardown
    fn cleanup(&mut self, _ctx: &mut NodeContext) {}
}

impl std::fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Node")
    }
}

/// Phase context handed to every node lifecycle method
pub struct NodeContext<'a> {
    pub(crate) node: NodeKey,
    pub(crate) instance_id: u32,
    pub(crate) instance_name: &'a str,
    pub(crate) node_type: &'a NodeType,
    pub(crate) frame_number: u64,
    /// Resolved producer key per `(input slot, array index)`
    pub(crate) inputs: &'a [Vec<Option<ResourceKey>>],
    pub(crate) published: &'a mut HashMap<ResourceKey, PublishedResource>,
    pub(crate) budget: &'a Rc<RefCell<ResourceBudgetManager>>,
    pub(crate) profiler: &'a mut ResourceProfiler,
    pub(crate) stack_tracker: &'a mut StackTracker,
    pub(crate) device: Option<&'a DeviceContext>,
    pub(crate) log: &'a NodeLog,
    pub(crate) params: &'a BTreeMap<String, ParameterValue>,
    pub(crate) skip_frame: &'a mut bool,
    pub(crate) recreate_requested: &'a mut bool,
    pub(crate) pending_resize: &'a mut Option<vk::Extent2D>,
}

impl<'a> NodeContext<'a> {
    /// Instance name of the running node
    pub fn instance_name(&self) -> &str {
        self.instance_name
    }

    /// Numeric instance id, stable for the graph's lifetime
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// The node's type schema
    pub fn node_type(&self) -> &NodeType {
        self.node_type
    }

    /// Frame number of the current execute, 0 during initial compile
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// The attached device, or an error for device-requiring nodes
    pub fn device(&self) -> NodeResult<&'a DeviceContext> {
        self.device.ok_or(NodeError::MissingDevice)
    }

    /// This node's log scope
    pub fn log(&self) -> &NodeLog {
        self.log
    }

    /// Scope hash grouping this node's bundle-0 resources
    pub fn scope_hash(&self) -> u64 {
        hash::scope_hash(self.instance_id, 0)
    }

    // === Inputs ===

    /// Resolved producer key of an input, if wired and published
    pub fn input_key(&self, slot: u32, index: u32) -> Option<ResourceKey> {
        self.inputs
            .get(slot as usize)?
            .get(index as usize)
            .copied()
            .flatten()
    }

    /// Generation of the resource wired to an input, if available
    pub fn input_generation(&self, slot: u32, index: u32) -> Option<u64> {
        let key = self.input_key(slot, index)?;
        self.published.get(&key).map(|entry| entry.generation)
    }

    /// Value wired to an input slot, if present and consumable
    pub fn try_input(&self, slot: u32) -> Option<&SlotValue> {
        self.try_input_at(slot, 0)
    }

    /// Value wired to an array input element, if present and consumable
    pub fn try_input_at(&self, slot: u32, index: u32) -> Option<&SlotValue> {
        let key = self.input_key(slot, index)?;
        let entry = self.published.get(&key)?;
        entry.state.is_consumable().then_some(&entry.value)
    }

    /// Value wired to an input slot, failing when absent or not ready
    pub fn input(&self, slot: u32) -> NodeResult<&SlotValue> {
        self.input_at(slot, 0)
    }

    /// Value wired to an array input element, failing when absent
    pub fn input_at(&self, slot: u32, index: u32) -> NodeResult<&SlotValue> {
        self.try_input_at(slot, index)
            .ok_or(NodeError::State(ResourceStateError::NotReady))
    }

    fn typed_input<T>(
        &self,
        slot: u32,
        extract: impl Fn(&SlotValue) -> Option<T>,
    ) -> NodeResult<T> {
        let value = self.input(slot)?;
        extract(value).ok_or_else(|| {
            NodeError::Wiring(WiringError::TypeMismatch {
                expected: self.node_type.input_schema()[slot as usize].data_type,
                actual: value.data_type(),
            })
        })
    }

    /// `u32` scalar wired to an input slot
    pub fn input_u32(&self, slot: u32) -> NodeResult<u32> {
        self.typed_input(slot, SlotValue::as_u32)
    }

    /// `u64` scalar wired to an input slot
    pub fn input_u64(&self, slot: u32) -> NodeResult<u64> {
        self.typed_input(slot, SlotValue::as_u64)
    }

    /// Fence wired to an input slot
    pub fn input_fence(&self, slot: u32) -> NodeResult<vk::Fence> {
        self.typed_input(slot, SlotValue::as_fence)
    }

    /// Semaphore array wired to an input slot
    pub fn input_semaphores(&self, slot: u32) -> NodeResult<super::slots::SemaphoreArray> {
        self.typed_input(slot, |value| value.as_semaphore_array().copied())
    }

    /// Fence array wired to an input slot
    pub fn input_fences(&self, slot: u32) -> NodeResult<super::slots::FenceArray> {
        self.typed_input(slot, |value| value.as_fence_array().copied())
    }

    /// Image array wired to an input slot
    pub fn input_images(&self, slot: u32) -> NodeResult<super::slots::ImageArray> {
        self.typed_input(slot, |value| value.as_image_array().copied())
    }

    /// Swapchain handle wired to an input slot
    pub fn input_swapchain(&self, slot: u32) -> NodeResult<vk::SwapchainKHR> {
        self.typed_input(slot, SlotValue::as_swapchain)
    }

    /// Host bytes wired to an input slot
    pub fn input_host_bytes(&self, slot: u32) -> NodeResult<&[u8]> {
        let value = self.input(slot)?;
        value.as_host_bytes().ok_or_else(|| {
            NodeError::Wiring(WiringError::TypeMismatch {
                expected: self.node_type.input_schema()[slot as usize].data_type,
                actual: value.data_type(),
            })
        })
    }

    // === Outputs ===

    /// Publish a control value: no bytes accounted, graph-local lifetime
    pub fn publish(&mut self, slot: u32, value: SlotValue) -> NodeResult<()> {
        self.publish_with(slot, value, PublishSpec::default())
    }

    /// Publish a resource with explicit size, lifetime and location
    ///
    /// Bytes are charged to the matching budget category and recorded with
    /// the profiler. Republishing the same key bumps its generation and
    /// returns the previous bytes first.
    pub fn publish_with(
        &mut self,
        slot: u32,
        value: SlotValue,
        spec: PublishSpec,
    ) -> NodeResult<()> {
        let schema = self.node_type.output_schema();
        let desc = schema
            .get(slot as usize)
            .ok_or_else(|| NodeError::InvalidPublish {
                slot,
                reason: format!("node type has {} output slots", schema.len()),
            })?;
        if desc.data_type != value.data_type() {
            return Err(NodeError::InvalidPublish {
                slot,
                reason: format!("expected {}, got {}", desc.data_type, value.data_type()),
            });
        }
        if !desc.admits_index(spec.index) {
            return Err(NodeError::InvalidPublish {
                slot,
                reason: format!("single slot does not admit index {}", spec.index),
            });
        }

        let key = ResourceKey::indexed(self.node, slot, spec.index);
        let budget_type = match spec.location {
            AllocationLocation::Device => crate::resource::BudgetResourceType::DeviceMemory,
            AllocationLocation::Heap | AllocationLocation::Stack => {
                crate::resource::BudgetResourceType::HostMemory
            }
        };

        let previous = self.published.get(&key);
        let previous_generation = previous.map(|entry| entry.generation).unwrap_or(0);
        let previous_bytes = previous.map(|entry| entry.bytes).unwrap_or(0);
        if previous_bytes > 0 {
            self.budget
                .borrow_mut()
                .record_deallocation(&budget_type, previous_bytes);
        }
        if spec.bytes > 0 {
            self.budget.borrow_mut().charge(&budget_type, spec.bytes)?;
            self.profiler.record_allocation(
                self.instance_id,
                self.instance_name,
                spec.location,
                spec.bytes,
                false,
            );
        }

        let mem_reqs = spec
            .mem_reqs
            .unwrap_or_else(|| MemoryRequirements::host(spec.bytes));
        self.published.insert(
            key,
            PublishedResource {
                value,
                state: ResourceStateFlags::READY,
                generation: previous_generation + 1,
                bytes: spec.bytes,
                lifetime: spec.lifetime,
                mem_reqs,
                location: spec.location,
            },
        );
        Ok(())
    }

    /// Mark one of this node's published outputs outdated
    pub fn invalidate_output(&mut self, slot: u32, index: u32) {
        let key = ResourceKey::indexed(self.node, slot, index);
        if let Some(entry) = self.published.get_mut(&key) {
            entry.state.remove(ResourceStateFlags::READY);
            entry.state.insert(ResourceStateFlags::OUTDATED);
        }
    }

    // === Parameters ===

    /// Raw parameter value by name
    pub fn param(&self, name: &str) -> Option<&ParameterValue> {
        self.params.get(name)
    }

    /// Float parameter with a default
    pub fn param_f32_or(&self, name: &str, default: f32) -> f32 {
        self.params
            .get(name)
            .and_then(ParameterValue::as_f32)
            .unwrap_or(default)
    }

    /// Unsigned parameter with a default
    pub fn param_u32_or(&self, name: &str, default: u32) -> u32 {
        self.params
            .get(name)
            .and_then(ParameterValue::as_u32)
            .unwrap_or(default)
    }

    /// Vector parameter with a default
    pub fn param_vec4_or(&self, name: &str, default: [f32; 4]) -> [f32; 4] {
        self.params
            .get(name)
            .and_then(ParameterValue::as_vec4)
            .map(|v| [v.x, v.y, v.z, v.w])
            .unwrap_or(default)
    }

    // === Services ===

    /// Shared handle to the budget manager
    pub fn budget_manager(&self) -> Rc<RefCell<ResourceBudgetManager>> {
        Rc::clone(self.budget)
    }

    /// The per-frame stack tracker
    pub fn stack_tracker(&mut self) -> &mut StackTracker {
        self.stack_tracker
    }

    /// Request scratch storage tracked against the frame's stack budget
    ///
    /// The container is keyed by the node's scope hash and the member name,
    /// goes on the stack while the budget allows and transparently spills to
    /// the heap otherwise. The allocation is attributed to this node in the
    /// profiler either way.
    pub fn request_stack_vec<T: Copy + Default, const N: usize>(
        &mut self,
        name: &str,
    ) -> Result<StackVec<T, N>, AllocationError> {
        let scratch = StackVec::request_stack(name, self.stack_tracker, self.instance_id)?;
        let bytes = (N * std::mem::size_of::<T>()) as u64;
        self.profiler.record_allocation(
            self.instance_id,
            self.instance_name,
            scratch.location(),
            bytes,
            false,
        );
        Ok(scratch)
    }

    /// Record a profiler allocation attributed to this node
    pub fn record_allocation(
        &mut self,
        location: AllocationLocation,
        bytes: u64,
        was_aliased: bool,
    ) {
        self.profiler.record_allocation(
            self.instance_id,
            self.instance_name,
            location,
            bytes,
            was_aliased,
        );
    }

    /// Record a profiler release attributed to this node
    pub fn record_release(&mut self, bytes: u64) {
        self.profiler
            .record_release(self.instance_id, self.instance_name, bytes);
    }

    /// Release every budget registration made under this node's scope
    pub fn release_scope(&mut self) -> u64 {
        let scope = self.scope_hash();
        self.budget.borrow_mut().release_scope(scope)
    }

    // === Frame control ===

    /// Skip the remainder of this frame after the current node returns
    pub fn skip_frame(&mut self) {
        *self.skip_frame = true;
    }

    /// Ask the swapchain node to recreate before the next acquire
    pub fn request_swapchain_recreate(&mut self) {
        *self.recreate_requested = true;
    }

    /// Whether a recreate was requested by a downstream node
    pub fn take_recreate_request(&mut self) -> bool {
        std::mem::take(self.recreate_requested)
    }

    /// Consume a pending framebuffer-resize event, if any
    pub fn take_pending_resize(&mut self) -> Option<vk::Extent2D> {
        self.pending_resize.take()
    }
}
