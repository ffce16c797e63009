//! Graph-level error taxonomy
//!
//! Schema and wiring failures surface at build time; node-level failures are
//! wrapped with the offending instance name so the driver sees a single error
//! code with a readable message, while the node log carries the full trace.

use super::node_type::NodeTypeId;
use super::slots::SlotDataType;
use crate::resource::{AllocationError, ResourceStateError};
use crate::vulkan::context::VulkanError;
use crate::vulkan::shader::ShaderError;
use crate::vulkan::swapchain::SwapchainError;
use thiserror::Error;

/// Failures validating node-type schemas
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// No node type registered under the id
    #[error("unknown node type id {type_id}")]
    UnknownTypeId {
        /// The unregistered id
        type_id: NodeTypeId,
    },
    /// A node type with the id is already registered
    #[error("duplicate node type id {type_id}")]
    DuplicateTypeId {
        /// The conflicting id
        type_id: NodeTypeId,
    },
    /// Wiring does not match the declared schema
    #[error("schema mismatch at slot {slot}: {reason}")]
    SchemaMismatch {
        /// Offending slot index
        slot: u32,
        /// Why the wiring was refused
        reason: String,
    },
}

/// Failures wiring an edge between two slots
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WiringError {
    /// Producer and consumer slot types differ
    #[error("slot type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Type the consumer slot declares
        expected: SlotDataType,
        /// Type the producer slot declares
        actual: SlotDataType,
    },
    /// A required slot constraint was violated
    #[error("nullability violation on {node} slot {slot}")]
    NullabilityViolation {
        /// Consumer instance name
        node: String,
        /// Offending slot index
        slot: u32,
    },
    /// The edge would close a cycle
    #[error("connecting {src} -> {dst} would create a cycle")]
    WouldCreateCycle {
        /// Producer instance name
        src: String,
        /// Consumer instance name
        dst: String,
    },
    /// A required input slot has no producer
    #[error("missing required input on {node} slot {slot}")]
    MissingRequiredInput {
        /// Consumer instance name
        node: String,
        /// Unwired slot index
        slot: u32,
    },
}

/// Failure produced by a node's own lifecycle methods
#[derive(Debug, Error)]
pub enum NodeError {
    /// A backend call failed
    #[error(transparent)]
    Backend(#[from] VulkanError),
    /// The swapchain reported a recoverable condition
    #[error(transparent)]
    Swapchain(#[from] SwapchainError),
    /// Shader loading or caching failed
    #[error(transparent)]
    Shader(#[from] ShaderError),
    /// An allocation was refused
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// A resource was accessed in the wrong state
    #[error(transparent)]
    State(#[from] ResourceStateError),
    /// A slot was accessed against its schema
    #[error(transparent)]
    Wiring(#[from] WiringError),
    /// The node needs a device but none is attached to the graph
    #[error("no device context attached to the graph")]
    MissingDevice,
    /// An output slot was published against its schema
    #[error("invalid publish on slot {slot}: {reason}")]
    InvalidPublish {
        /// Offending output slot
        slot: u32,
        /// Why the publish was refused
        reason: String,
    },
    /// Free-form node failure
    #[error("{0}")]
    Message(String),
}

/// Result alias for node lifecycle methods
pub type NodeResult<T> = Result<T, NodeError>;

/// Top-level graph error
#[derive(Debug, Error)]
pub enum GraphError {
    /// Schema validation failed
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Wiring validation failed
    #[error(transparent)]
    Wiring(#[from] WiringError),
    /// An instance name is already taken
    #[error("duplicate instance name '{name}'")]
    DuplicateInstanceName {
        /// The conflicting name
        name: String,
    },
    /// The topology contains a cycle
    #[error("cycle detected involving nodes: {nodes:?}")]
    CycleDetected {
        /// Instance names participating in the cycle
        nodes: Vec<String>,
    },
    /// A node failed during setup or compile
    #[error("node '{node}' failed to compile: {source}")]
    NodeCompile {
        /// The failing instance
        node: String,
        /// The node's own error
        source: NodeError,
    },
    /// A node failed during execute
    #[error("node '{node}' failed to execute: {source}")]
    NodeExecute {
        /// The failing instance
        node: String,
        /// The node's own error
        source: NodeError,
    },
    /// Execute was called before a successful compile
    #[error("graph has not been compiled")]
    NotCompiled,
    /// An allocation was refused
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// A resource was accessed in the wrong state
    #[error(transparent)]
    ResourceState(#[from] ResourceStateError),
    /// A backend call failed outside any node
    #[error(transparent)]
    Backend(#[from] VulkanError),
    /// A swapchain condition escaped local recovery
    #[error(transparent)]
    Swapchain(#[from] SwapchainError),
    /// Shader loading or caching failed
    #[error(transparent)]
    Shader(#[from] ShaderError),
}
