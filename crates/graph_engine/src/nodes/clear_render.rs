//! Clear-and-submit render node
//!
//! The simplest renderable: one command buffer per swapchain image that
//! transitions the acquired image, clears it to a parameterized color and
//! hands it over for presentation. Buffers are recorded once and replayed
//! until an input's generation advances past the recording, the image-array
//! identity changes, or the swapchain is recreated; only the current image's
//! buffer is re-recorded when its turn comes.

use crate::graph::{
    Node, NodeContext, NodeError, NodeResult, NodeType, NodeTypeBuilder, NodeTypeId, SlotDataType,
    SlotDesc, SlotValue,
};
use crate::vulkan::context::VulkanError;
use crate::vulkan::{CommandBufferSet, CommandPool};
use ash::vk;

/// Node clearing the acquired swapchain image and submitting the frame
#[derive(Default)]
pub struct ClearRenderNode {
    pool: Option<CommandPool>,
    buffers: Option<CommandBufferSet>,
    /// Generation of the images input each buffer was recorded against
    recorded_generations: Vec<u64>,
}

impl ClearRenderNode {
    /// Registered type id
    pub const TYPE_ID: NodeTypeId = 3;

    /// Input slot: swapchain images (dependency: identity changes recompile)
    pub const IMAGES: u32 = 0;
    /// Input slot: acquired image index
    pub const IMAGE_INDEX: u32 = 1;
    /// Input slot: current frame-in-flight index
    pub const CURRENT_FRAME_INDEX: u32 = 2;
    /// Input slot: in-flight fence to signal at submit
    pub const IN_FLIGHT_FENCE: u32 = 3;
    /// Input slot: image-available semaphores, indexed by frame
    pub const IMAGE_AVAILABLE_SEMAPHORES: u32 = 4;
    /// Input slot: render-complete semaphores, indexed by image
    pub const RENDER_COMPLETE_SEMAPHORES: u32 = 5;

    /// Output slot: frame number of the completed submission
    pub const SUBMISSION: u32 = 0;

    /// Build the node type for registration
    pub fn node_type() -> NodeType {
        NodeTypeBuilder::new(Self::TYPE_ID, "clear_render")
            .input(SlotDesc::new("images", SlotDataType::ImageArray).dependency())
            .input(SlotDesc::new("image_index", SlotDataType::U32))
            .input(SlotDesc::new("current_frame_index", SlotDataType::U32))
            .input(SlotDesc::new("in_flight_fence", SlotDataType::Fence))
            .input(SlotDesc::new(
                "image_available_semaphores",
                SlotDataType::SemaphoreArray,
            ))
            .input(SlotDesc::new(
                "render_complete_semaphores",
                SlotDataType::SemaphoreArray,
            ))
            .output(SlotDesc::new("submission", SlotDataType::U64))
            .build(Box::new(|| Box::new(Self::default())))
    }

    fn record(
        &mut self,
        ctx: &NodeContext,
        image_index: usize,
        image: vk::Image,
        clear_color: [f32; 4],
    ) -> NodeResult<()> {
        let device = ctx.device()?.device().clone();
        let buffers = self
            .buffers
            .as_mut()
            .ok_or_else(|| NodeError::Message("command buffers not allocated".into()))?;
        let command_buffer = buffers.buffer(image_index);

        let subresource = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let to_transfer = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource);
        let to_present = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource);
        let clear_value = vk::ClearColorValue {
            float32: clear_color,
        };

        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            let begin_info = vk::CommandBufferBeginInfo::builder();
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer.build()],
            );
            device.cmd_clear_color_image(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value,
                &[subresource],
            );
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_present.build()],
            );
            device
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }
}

impl Node for ClearRenderNode {
    /// Allocate the per-image command buffers; everything starts dirty
    fn compile(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        let images = ctx.input_images(Self::IMAGES)?;
        let device = ctx.device()?;

        if self.pool.is_none() {
            self.pool = Some(CommandPool::new(
                device.raw_device(),
                device.queue_family_index(),
            )?);
        }
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| NodeError::Message("command pool not created".into()))?;
        let needs_alloc = self
            .buffers
            .as_ref()
            .map(|buffers| buffers.len() != images.len())
            .unwrap_or(true);
        if needs_alloc {
            self.buffers = Some(CommandBufferSet::allocate(pool, images.len() as u32)?);
            ctx.log().debug(format!(
                "allocated {} per-image command buffers",
                images.len()
            ));
        } else if let Some(buffers) = self.buffers.as_mut() {
            buffers.mark_all_dirty();
        }
        self.recorded_generations = vec![0; images.len()];
        Ok(())
    }

    fn execute(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        let images = ctx.input_images(Self::IMAGES)?;
        let image_index = ctx.input_u32(Self::IMAGE_INDEX)? as usize;
        let frame_index = ctx.input_u32(Self::CURRENT_FRAME_INDEX)? as usize;
        let in_flight_fence = ctx.input_fence(Self::IN_FLIGHT_FENCE)?;
        let image_available = ctx.input_semaphores(Self::IMAGE_AVAILABLE_SEMAPHORES)?;
        let render_complete = ctx.input_semaphores(Self::RENDER_COMPLETE_SEMAPHORES)?;
        let clear_color = ctx.param_vec4_or("clear_color", [0.0, 0.0, 0.0, 1.0]);

        let image = *images
            .get(image_index)
            .ok_or_else(|| NodeError::Message("image index out of range".into()))?;
        let images_generation = ctx.input_generation(Self::IMAGES, 0).unwrap_or(0);

        // Replay is only safe while the recording still matches the inputs'
        // generations; otherwise this image's buffer is re-recorded now and
        // the other images keep replaying until their turn.
        let dirty = self
            .buffers
            .as_ref()
            .map(|buffers| buffers.is_dirty(image_index))
            .unwrap_or(true)
            || self.recorded_generations.get(image_index).copied() != Some(images_generation);
        if dirty {
            self.record(ctx, image_index, image, clear_color)?;
            if let Some(buffers) = self.buffers.as_mut() {
                buffers.clear_dirty(image_index);
            }
            if let Some(slot) = self.recorded_generations.get_mut(image_index) {
                *slot = images_generation;
            }
        }

        let buffers = self
            .buffers
            .as_ref()
            .ok_or_else(|| NodeError::Message("command buffers not allocated".into()))?;
        let command_buffer = buffers.buffer(image_index);
        let device = ctx.device()?;

        let wait_semaphores = [*image_available
            .get(frame_index)
            .ok_or_else(|| NodeError::Message("frame index out of semaphore range".into()))?];
        let signal_semaphores = [*render_complete
            .get(image_index)
            .ok_or_else(|| NodeError::Message("image index out of semaphore range".into()))?];
        let command_buffers = [command_buffer];
        let wait_stages = [vk::PipelineStageFlags::TRANSFER];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            // Reset only now: a fence reset earlier than its submit would
            // deadlock the frame ring on frames that never submit
            device
                .device()
                .reset_fences(&[in_flight_fence])
                .map_err(VulkanError::Api)?;
            device
                .device()
                .queue_submit(
                    device.graphics_queue(),
                    &[submit_info.build()],
                    in_flight_fence,
                )
                .map_err(|code| VulkanError::Op {
                    operation: "vkQueueSubmit",
                    code,
                })?;
        }

        ctx.publish(Self::SUBMISSION, SlotValue::U64(ctx.frame_number()))?;
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut NodeContext) {
        ctx.log().debug("releasing command buffers");
        // Buffers are owned by the pool; dropping the pool frees them
        self.buffers = None;
        self.pool = None;
        self.recorded_generations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SlotRole;

    #[test]
    fn test_images_input_is_a_dependency() {
        let ty = ClearRenderNode::node_type();
        assert_eq!(
            ty.input_schema()[ClearRenderNode::IMAGES as usize].role,
            SlotRole::Dependency
        );
        // Everything else is consumed at execute time only
        assert_eq!(
            ty.input_schema()[ClearRenderNode::IMAGE_INDEX as usize].role,
            SlotRole::Execute
        );
    }

    #[test]
    fn test_schema_shape() {
        let ty = ClearRenderNode::node_type();
        assert_eq!(ty.input_count(), 6);
        assert_eq!(ty.output_count(), 1);
        assert_eq!(
            ty.output_schema()[ClearRenderNode::SUBMISSION as usize].data_type,
            SlotDataType::U64
        );
    }
}
