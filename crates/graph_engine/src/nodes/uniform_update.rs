//! Per-frame uniform update node
//!
//! Owns one uniform buffer per swapchain image, persistently mapped in
//! `HOST_VISIBLE | HOST_COHERENT` memory, and rewrites the acquired image's
//! buffer each frame. Writers copy straight into the mapped pointer; no
//! flush is needed. The buffer for the current image is published so a
//! descriptor-owning node can bind it.

use crate::graph::{
    Node, NodeContext, NodeError, NodeResult, NodeType, NodeTypeBuilder, NodeTypeId, SlotDataType,
    SlotDesc, SlotValue,
};
use crate::resource::profiler::AllocationLocation;
use crate::vulkan::PerFrameUniforms;

/// Bytes per uniform buffer: frame index, time, extent and padding as f32s
const UNIFORM_SIZE: u64 = (8 * std::mem::size_of::<f32>()) as u64;

/// Node maintaining per-swapchain-image uniform buffers
#[derive(Default)]
pub struct UniformUpdateNode {
    uniforms: Option<PerFrameUniforms>,
}

impl UniformUpdateNode {
    /// Registered type id
    pub const TYPE_ID: NodeTypeId = 5;

    /// Input slot: swapchain images (dependency: count changes recompile)
    pub const IMAGES: u32 = 0;
    /// Input slot: acquired image index
    pub const IMAGE_INDEX: u32 = 1;
    /// Input slot: current swapchain extent
    pub const EXTENT: u32 = 2;

    /// Output slot: the uniform buffer backing the acquired image
    pub const UNIFORM_BUFFER: u32 = 0;

    /// Build the node type for registration
    pub fn node_type() -> NodeType {
        NodeTypeBuilder::new(Self::TYPE_ID, "uniform_update")
            .input(SlotDesc::new("images", SlotDataType::ImageArray).dependency())
            .input(SlotDesc::new("image_index", SlotDataType::U32))
            .input(SlotDesc::new("extent", SlotDataType::Extent))
            .output(SlotDesc::new("uniform_buffer", SlotDataType::Buffer))
            .build(Box::new(|| Box::new(Self::default())))
    }
}

impl Node for UniformUpdateNode {
    fn compile(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        let images = ctx.input_images(Self::IMAGES)?;
        let device = ctx.device()?;

        let needs_alloc = self
            .uniforms
            .as_ref()
            .map(|uniforms| uniforms.len() != images.len())
            .unwrap_or(true);
        if needs_alloc {
            let uniforms = PerFrameUniforms::new(device, images.len() as u32, UNIFORM_SIZE)?;
            ctx.record_allocation(AllocationLocation::Device, uniforms.total_bytes(), false);
            ctx.log().debug(format!(
                "allocated {} persistently mapped uniform buffers of {} bytes",
                uniforms.len(),
                UNIFORM_SIZE
            ));
            self.uniforms = Some(uniforms);
        }

        let uniforms = self
            .uniforms
            .as_ref()
            .ok_or_else(|| NodeError::Message("uniform buffers not allocated".into()))?;
        ctx.publish(Self::UNIFORM_BUFFER, SlotValue::Buffer(uniforms.buffer(0)))?;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        let image_index = ctx.input_u32(Self::IMAGE_INDEX)? as usize;
        let extent = ctx
            .input(Self::EXTENT)?
            .as_extent()
            .ok_or_else(|| NodeError::Message("extent input has wrong type".into()))?;

        let uniforms = self
            .uniforms
            .as_ref()
            .ok_or_else(|| NodeError::Message("uniform buffers not allocated".into()))?;
        if image_index >= uniforms.len() {
            return Err(NodeError::Message("image index out of uniform range".into()));
        }

        let frame = ctx.frame_number();
        let data: [f32; 8] = [
            frame as f32,
            (frame % 1000) as f32 / 1000.0,
            extent.width as f32,
            extent.height as f32,
            0.0,
            0.0,
            0.0,
            0.0,
        ];
        uniforms.write(image_index, &data)?;

        ctx.publish(
            Self::UNIFORM_BUFFER,
            SlotValue::Buffer(uniforms.buffer(image_index)),
        )?;
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut NodeContext) {
        ctx.log().debug("unmapping and destroying uniform buffers");
        // Unmap, destroy and free happen in the buffers' drop; descriptor
        // sets referencing them stay owned by their pool
        self.uniforms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SlotRole;

    #[test]
    fn test_schema_shape() {
        let ty = UniformUpdateNode::node_type();
        assert_eq!(ty.input_count(), 3);
        assert_eq!(ty.output_count(), 1);
        assert_eq!(
            ty.input_schema()[UniformUpdateNode::IMAGES as usize].role,
            SlotRole::Dependency
        );
        assert_eq!(
            ty.output_schema()[UniformUpdateNode::UNIFORM_BUFFER as usize].data_type,
            SlotDataType::Buffer
        );
    }

    #[test]
    fn test_uniform_payload_is_pod_sized() {
        assert_eq!(UNIFORM_SIZE, 32);
        assert_eq!(std::mem::size_of::<[f32; 8]>() as u64, UNIFORM_SIZE);
    }
}
