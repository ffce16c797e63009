//! # Graph Engine
//!
//! A declarative Vulkan rendering system built around a render graph: a DAG
//! of typed compute/graphics nodes whose edges carry named resources. The
//! graph compiles into a deterministic execution schedule and drives
//! per-frame submission against a swapchain.
//!
//! ## Features
//!
//! - **Typed slots**: node schemas validated at wiring time, exact type tags
//! - **Lifetime analysis**: birth/death windows per resource in topological order
//! - **Memory aliasing**: best-fit reuse across non-overlapping lifetimes
//! - **Budgets & profiling**: per-type budgets, per-frame per-node statistics
//! - **Frame orchestration**: frames in flight, swapchain recreation,
//!   command-buffer replay with dirty tracking
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graph_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = NodeTypeRegistry::new();
//!     registry.register(FrameSyncNode::node_type())?;
//!
//!     let mut graph = RenderGraph::new();
//!     graph.add_node(&registry, FrameSyncNode::TYPE_ID, "frame_sync")?;
//!     graph.compile()?;
//!     for frame in 0..3 {
//!         graph.execute(frame)?;
//!     }
//!     graph.cleanup();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod assets;
pub mod config;
pub mod foundation;
pub mod graph;
pub mod nodes;
pub mod resource;
pub mod vulkan;

/// Common imports for engine users
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::graph::{
        GraphError, Node, NodeContext, NodeResult, NodeTypeBuilder, NodeTypeRegistry,
        ParameterValue, PublishSpec, RenderGraph, SlotDataType, SlotDesc, SlotValue,
    };
    pub use crate::nodes::{
        ClearRenderNode, FrameSyncNode, PresentNode, SwapchainNode, UniformUpdateNode,
    };
    pub use crate::resource::{
        AliasingEngine, BudgetResourceType, ResourceBudget, ResourceBudgetManager,
        ResourceLifetime, ResourceProfiler,
    };
    pub use crate::vulkan::{DeviceContext, VulkanError, VulkanResult};
}
