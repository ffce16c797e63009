//! Render-graph runtime
//!
//! Node-type schemas with typed slots, a registry with instance factories,
//! and the graph itself: registration, wiring, deterministic topological
//! compilation and the per-frame execute loop.

pub mod error;
#[allow(clippy::module_inception)]
pub mod graph;
pub mod node;
pub mod node_type;
pub mod slots;

pub use error::{GraphError, NodeError, NodeResult, SchemaError, WiringError};
pub use graph::RenderGraph;
pub use node::{
    Node, NodeContext, NodeKey, NodeState, PerformanceStats, PublishSpec, PublishedResource,
};
pub use node_type::{
    DeviceCapabilities, NodeType, NodeTypeBuilder, NodeTypeId, NodeTypeRegistry, PipelineType,
    WorkloadMetrics,
};
pub use slots::{
    FenceArray, ImageArray, ImageViewArray, ParameterValue, SemaphoreArray, SlotArrayMode,
    SlotDataType, SlotDesc, SlotMutability, SlotNullability, SlotRole, SlotScope, SlotValue,
};
