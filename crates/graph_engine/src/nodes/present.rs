//! Present node
//!
//! Queues the acquired image for presentation, waiting on the render-complete
//! semaphore for that image. Out-of-date and suboptimal reports are recovered
//! locally: the node asks the swapchain node to recreate before the next
//! acquire and the error never reaches the driver.

use crate::graph::{
    Node, NodeContext, NodeError, NodeResult, NodeType, NodeTypeBuilder, NodeTypeId, SlotDataType,
    SlotDesc,
};
use crate::vulkan::context::VulkanError;
use ash::vk;

/// Node submitting the frame for presentation
#[derive(Default)]
pub struct PresentNode;

impl PresentNode {
    /// Registered type id
    pub const TYPE_ID: NodeTypeId = 4;

    /// Input slot: the swapchain to present to
    pub const SWAPCHAIN: u32 = 0;
    /// Input slot: acquired image index
    pub const IMAGE_INDEX: u32 = 1;
    /// Input slot: render-complete semaphores, indexed by image
    pub const RENDER_COMPLETE_SEMAPHORES: u32 = 2;
    /// Input slot: present fences, indexed by image
    pub const PRESENT_FENCES: u32 = 3;
    /// Input slot: submission marker ordering present after the render
    pub const SUBMISSION: u32 = 4;

    /// Build the node type for registration
    pub fn node_type() -> NodeType {
        NodeTypeBuilder::new(Self::TYPE_ID, "present")
            .input(SlotDesc::new("swapchain", SlotDataType::Swapchain).dependency())
            .input(SlotDesc::new("image_index", SlotDataType::U32))
            .input(SlotDesc::new(
                "render_complete_semaphores",
                SlotDataType::SemaphoreArray,
            ))
            .input(SlotDesc::new("present_fences", SlotDataType::FenceArray).optional())
            .input(SlotDesc::new("submission", SlotDataType::U64))
            .build(Box::new(|| Box::new(Self)))
    }
}

impl Node for PresentNode {
    fn execute(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        let swapchain = ctx.input_swapchain(Self::SWAPCHAIN)?;
        let image_index = ctx.input_u32(Self::IMAGE_INDEX)?;
        let render_complete = ctx.input_semaphores(Self::RENDER_COMPLETE_SEMAPHORES)?;
        let device = ctx.device()?;

        // Present fences only gate reuse of the image's resources when the
        // surface-maintenance extension signals them; created signaled, the
        // wait is instant everywhere else
        if let Some(fences) = ctx
            .try_input(Self::PRESENT_FENCES)
            .and_then(|value| value.as_fence_array().copied())
        {
            if let Some(&fence) = fences.get(image_index as usize) {
                unsafe {
                    device
                        .device()
                        .wait_for_fences(&[fence], true, u64::MAX)
                        .map_err(|code| VulkanError::Op {
                            operation: "vkWaitForFences",
                            code,
                        })?;
                }
            }
        }

        let wait_semaphores = [*render_complete
            .get(image_index as usize)
            .ok_or_else(|| NodeError::Message("image index out of semaphore range".into()))?];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            device
                .swapchain_loader()
                .queue_present(device.present_queue(), &present_info)
        };
        match result {
            Ok(suboptimal) => {
                if suboptimal {
                    ctx.log().debug("present reported suboptimal, recreating");
                    ctx.request_swapchain_recreate();
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                ctx.log().warn("present reported out-of-date, recreating");
                ctx.request_swapchain_recreate();
                Ok(())
            }
            Err(code) => Err(VulkanError::Op {
                operation: "vkQueuePresentKHR",
                code,
            }
            .into()),
        }
    }
}
