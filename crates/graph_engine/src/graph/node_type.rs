//! Node types: immutable schemas plus instance factories
//!
//! A [`NodeType`] is a value, not a class hierarchy: it holds the typed slot
//! schema, pipeline classification, capability requirements, workload metrics
//! and a factory callable producing fresh node instances. Types live in a
//! [`NodeTypeRegistry`] keyed by their unique id.

use super::error::SchemaError;
use super::node::Node;
use super::slots::{SlotDataType, SlotDesc, SlotNullability};
use bitflags::bitflags;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Unique identifier for node types
pub type NodeTypeId = u32;

/// Pipeline classification of a node type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineType {
    /// Rasterization work
    #[default]
    Graphics,
    /// Compute dispatches
    Compute,
    /// Ray-tracing pipelines
    RayTracing,
    /// Copies and blits
    Transfer,
}

bitflags! {
    /// Device capabilities a node type requires
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceCapabilities: u32 {
        /// Graphics queue support
        const GRAPHICS              = 1 << 0;
        /// Compute queue support
        const COMPUTE               = 1 << 1;
        /// Transfer queue support
        const TRANSFER              = 1 << 2;
        /// Ray-tracing pipeline extension
        const RAY_TRACING           = 1 << 3;
        /// Geometry shader feature
        const GEOMETRY_SHADER       = 1 << 4;
        /// Tessellation shader feature
        const TESSELLATION_SHADER   = 1 << 5;
        /// Mesh shader extension
        const MESH_SHADER           = 1 << 6;
        /// Multi-draw-indirect feature
        const MULTI_DRAW_INDIRECT   = 1 << 7;
        /// Depth clamp feature
        const DEPTH_CLAMP           = 1 << 8;
        /// Non-solid fill modes
        const FILL_MODE_NON_SOLID   = 1 << 9;
    }
}

/// Workload estimates used for scheduling decisions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkloadMetrics {
    /// Estimated memory footprint in bytes
    pub estimated_memory_footprint: u64,
    /// Compute cost relative to a simple pass
    pub estimated_compute_cost: f32,
    /// Bandwidth cost relative to a simple pass
    pub estimated_bandwidth_cost: f32,
    /// Whether instances may be dispatched on a worker pool
    pub can_run_in_parallel: bool,
    /// Preferred batch size for instanced operations
    pub preferred_batch_size: u32,
}

impl Default for WorkloadMetrics {
    fn default() -> Self {
        Self {
            estimated_memory_footprint: 0,
            estimated_compute_cost: 1.0,
            estimated_bandwidth_cost: 1.0,
            can_run_in_parallel: true,
            preferred_batch_size: 1,
        }
    }
}

/// Factory callable producing fresh instances of a node type
pub type NodeFactory = Box<dyn Fn() -> Box<dyn Node>>;

/// Immutable schema and factory for a rendering operation
pub struct NodeType {
    type_id: NodeTypeId,
    type_name: String,
    inputs: Vec<SlotDesc>,
    outputs: Vec<SlotDesc>,
    pipeline_type: PipelineType,
    required_capabilities: DeviceCapabilities,
    workload: WorkloadMetrics,
    factory: NodeFactory,
}

impl NodeType {
    /// Unique type id
    pub fn type_id(&self) -> NodeTypeId {
        self.type_id
    }

    /// Human-readable type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Ordered input schema
    pub fn input_schema(&self) -> &[SlotDesc] {
        &self.inputs
    }

    /// Ordered output schema
    pub fn output_schema(&self) -> &[SlotDesc] {
        &self.outputs
    }

    /// Number of input slots
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Number of output slots
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Pipeline classification
    pub fn pipeline_type(&self) -> PipelineType {
        self.pipeline_type
    }

    /// Required device capabilities
    pub fn required_capabilities(&self) -> DeviceCapabilities {
        self.required_capabilities
    }

    /// Workload estimates
    pub fn workload(&self) -> &WorkloadMetrics {
        &self.workload
    }

    /// Produce a fresh node instance
    pub fn create_node(&self) -> Box<dyn Node> {
        (self.factory)()
    }

    /// Validate wired slot types against the schema
    ///
    /// `inputs` and `outputs` carry the wired data type per slot, `None`
    /// meaning unwired. Counts, exact type tags and nullability are checked.
    pub fn validate(
        &self,
        inputs: &[Option<SlotDataType>],
        outputs: &[Option<SlotDataType>],
    ) -> Result<(), SchemaError> {
        if inputs.len() != self.inputs.len() {
            return Err(SchemaError::SchemaMismatch {
                slot: inputs.len() as u32,
                reason: format!(
                    "expected {} input slots, got {}",
                    self.inputs.len(),
                    inputs.len()
                ),
            });
        }
        if outputs.len() != self.outputs.len() {
            return Err(SchemaError::SchemaMismatch {
                slot: outputs.len() as u32,
                reason: format!(
                    "expected {} output slots, got {}",
                    self.outputs.len(),
                    outputs.len()
                ),
            });
        }
        for (slot, (desc, wired)) in self.inputs.iter().zip(inputs).enumerate() {
            match wired {
                Some(actual) if *actual != desc.data_type => {
                    return Err(SchemaError::SchemaMismatch {
                        slot: slot as u32,
                        reason: format!("expected {}, got {}", desc.data_type, actual),
                    });
                }
                None if desc.nullability == SlotNullability::Required => {
                    return Err(SchemaError::SchemaMismatch {
                        slot: slot as u32,
                        reason: format!("required input '{}' is unwired", desc.name),
                    });
                }
                _ => {}
            }
        }
        for (slot, (desc, wired)) in self.outputs.iter().zip(outputs).enumerate() {
            if let Some(actual) = wired {
                if *actual != desc.data_type {
                    return Err(SchemaError::SchemaMismatch {
                        slot: slot as u32,
                        reason: format!("expected {}, got {}", desc.data_type, actual),
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeType")
            .field("type_id", &self.type_id)
            .field("type_name", &self.type_name)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("pipeline_type", &self.pipeline_type)
            .finish()
    }
}

/// Builder for [`NodeType`] values
pub struct NodeTypeBuilder {
    type_id: NodeTypeId,
    type_name: String,
    inputs: Vec<SlotDesc>,
    outputs: Vec<SlotDesc>,
    pipeline_type: PipelineType,
    required_capabilities: DeviceCapabilities,
    workload: WorkloadMetrics,
}

impl NodeTypeBuilder {
    /// Start building a node type with the given identity
    pub fn new(type_id: NodeTypeId, type_name: impl Into<String>) -> Self {
        Self {
            type_id,
            type_name: type_name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            pipeline_type: PipelineType::default(),
            required_capabilities: DeviceCapabilities::empty(),
            workload: WorkloadMetrics::default(),
        }
    }

    /// Append an input slot
    pub fn input(mut self, desc: SlotDesc) -> Self {
        self.inputs.push(desc);
        self
    }

    /// Append an output slot
    pub fn output(mut self, desc: SlotDesc) -> Self {
        self.outputs.push(desc);
        self
    }

    /// Set the pipeline classification
    pub fn pipeline_type(mut self, pipeline_type: PipelineType) -> Self {
        self.pipeline_type = pipeline_type;
        self
    }

    /// Set required device capabilities
    pub fn required_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    /// Set workload estimates
    pub fn workload(mut self, workload: WorkloadMetrics) -> Self {
        self.workload = workload;
        self
    }

    /// Finish with the given instance factory
    pub fn build(self, factory: NodeFactory) -> NodeType {
        NodeType {
            type_id: self.type_id,
            type_name: self.type_name,
            inputs: self.inputs,
            outputs: self.outputs,
            pipeline_type: self.pipeline_type,
            required_capabilities: self.required_capabilities,
            workload: self.workload,
            factory,
        }
    }
}

/// Registry of node types keyed by their unique id
#[derive(Default)]
pub struct NodeTypeRegistry {
    types: HashMap<NodeTypeId, Rc<NodeType>>,
}

impl NodeTypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type, refusing duplicate ids
    pub fn register(&mut self, node_type: NodeType) -> Result<Rc<NodeType>, SchemaError> {
        let type_id = node_type.type_id();
        if self.types.contains_key(&type_id) {
            return Err(SchemaError::DuplicateTypeId { type_id });
        }
        let shared = Rc::new(node_type);
        self.types.insert(type_id, Rc::clone(&shared));
        Ok(shared)
    }

    /// Look up a registered type
    pub fn get(&self, type_id: NodeTypeId) -> Option<Rc<NodeType>> {
        self.types.get(&type_id).cloned()
    }

    /// Create a fresh instance of a registered type
    pub fn create_instance(
        &self,
        type_id: NodeTypeId,
    ) -> Result<(Rc<NodeType>, Box<dyn Node>), SchemaError> {
        let node_type = self
            .types
            .get(&type_id)
            .ok_or(SchemaError::UnknownTypeId { type_id })?;
        let node = node_type.create_node();
        Ok((Rc::clone(node_type), node))
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no types are registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::error::NodeResult;
    use crate::graph::node::{Node, NodeContext};

    struct NullNode;

    impl Node for NullNode {
        fn execute(&mut self, _ctx: &mut NodeContext) -> NodeResult<()> {
            Ok(())
        }
    }

    fn null_type(type_id: NodeTypeId) -> NodeType {
        NodeTypeBuilder::new(type_id, "null")
            .input(SlotDesc::new("in", SlotDataType::U32))
            .input(SlotDesc::new("extra", SlotDataType::Fence).optional())
            .output(SlotDesc::new("out", SlotDataType::U32))
            .build(Box::new(|| Box::new(NullNode)))
    }

    #[test]
    fn test_register_rejects_duplicate_type_id() {
        let mut registry = NodeTypeRegistry::new();
        registry.register(null_type(1)).unwrap();

        let error = registry.register(null_type(1)).unwrap_err();
        assert_eq!(error, SchemaError::DuplicateTypeId { type_id: 1 });
    }

    #[test]
    fn test_create_instance_unknown_type_fails() {
        let registry = NodeTypeRegistry::new();
        let error = registry.create_instance(42).unwrap_err();
        assert_eq!(error, SchemaError::UnknownTypeId { type_id: 42 });
    }

    #[test]
    fn test_validate_checks_types_and_nullability() {
        let node_type = null_type(1);

        // Fully valid wiring; the optional slot stays unwired
        node_type
            .validate(&[Some(SlotDataType::U32), None], &[Some(SlotDataType::U32)])
            .unwrap();

        // Wrong type on slot 0
        let error = node_type
            .validate(&[Some(SlotDataType::Fence), None], &[None])
            .unwrap_err();
        assert!(matches!(error, SchemaError::SchemaMismatch { slot: 0, .. }));

        // Required slot 0 unwired
        let error = node_type.validate(&[None, None], &[None]).unwrap_err();
        assert!(matches!(error, SchemaError::SchemaMismatch { slot: 0, .. }));
    }
}
