//! Swapchain node
//!
//! Wraps the platform swapchain: compile creates it against an externally
//! owned surface, execute acquires the next image with the current frame's
//! image-available semaphore, and recreation is performed lazily at the start
//! of the frame following a resize event, an out-of-date acquire or a
//! downstream recreate request. A frame with no acquirable image is skipped,
//! never blocked.

use crate::graph::{
    Node, NodeContext, NodeError, NodeResult, NodeType, NodeTypeBuilder, NodeTypeId, SlotDataType,
    SlotDesc, SlotValue,
};
use crate::graph::slots::ImageArray;
use crate::vulkan::{AcquireResult, Swapchain};
use ash::vk;

/// Node owning the swapchain and publishing its images
pub struct SwapchainNode {
    surface: vk::SurfaceKHR,
    window_extent: vk::Extent2D,
    swapchain: Option<Swapchain>,
    needs_recreate: bool,
}

impl SwapchainNode {
    /// Registered type id
    pub const TYPE_ID: NodeTypeId = 2;

    /// Input slot: image-available semaphores from the frame-sync node
    pub const IMAGE_AVAILABLE_SEMAPHORES: u32 = 0;
    /// Input slot: current frame-in-flight index
    pub const CURRENT_FRAME_INDEX: u32 = 1;

    /// Output slot: acquired image index
    pub const IMAGE_INDEX: u32 = 0;
    /// Output slot: the swapchain handle
    pub const SWAPCHAIN: u32 = 1;
    /// Output slot: swapchain images
    pub const IMAGES: u32 = 2;
    /// Output slot: current extent
    pub const EXTENT: u32 = 3;
    /// Output slot: selected surface format
    pub const SURFACE_FORMAT: u32 = 4;

    /// Create a node for an externally owned surface
    pub fn new(surface: vk::SurfaceKHR, window_extent: vk::Extent2D) -> Self {
        Self {
            surface,
            window_extent,
            swapchain: None,
            needs_recreate: false,
        }
    }

    /// Build the node type for a given surface
    ///
    /// The surface handle is captured by the factory; every instance created
    /// from this type presents to the same surface.
    pub fn node_type_for(surface: vk::SurfaceKHR, window_extent: vk::Extent2D) -> NodeType {
        NodeTypeBuilder::new(Self::TYPE_ID, "swapchain")
            .input(SlotDesc::new(
                "image_available_semaphores",
                SlotDataType::SemaphoreArray,
            ))
            .input(SlotDesc::new("current_frame_index", SlotDataType::U32))
            .output(SlotDesc::new("image_index", SlotDataType::U32))
            .output(SlotDesc::new("swapchain", SlotDataType::Swapchain))
            .output(SlotDesc::new("images", SlotDataType::ImageArray))
            .output(SlotDesc::new("extent", SlotDataType::Extent))
            .output(SlotDesc::new("surface_format", SlotDataType::SurfaceFormat))
            .build(Box::new(move || Box::new(Self::new(surface, window_extent))))
    }

    fn publish_chain(&self, ctx: &mut NodeContext) -> NodeResult<()> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| NodeError::Message("swapchain not created".into()))?;
        let mut images = ImageArray::new();
        for &image in swapchain.images() {
            let _ = images.try_push(image);
        }
        ctx.publish(Self::SWAPCHAIN, SlotValue::Swapchain(swapchain.handle()))?;
        ctx.publish(Self::IMAGES, SlotValue::ImageArray(images))?;
        ctx.publish(Self::EXTENT, SlotValue::Extent(swapchain.extent()))?;
        ctx.publish(
            Self::SURFACE_FORMAT,
            SlotValue::SurfaceFormat(swapchain.format()),
        )?;
        Ok(())
    }

    fn recreate(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        let device = ctx.device()?;
        let old = self
            .swapchain
            .take()
            .ok_or_else(|| NodeError::Message("swapchain not created".into()))?;
        let replacement = old.recreate(device, self.surface, self.window_extent)?;
        ctx.log().info(format!(
            "recreated with {} images",
            replacement.image_count()
        ));
        self.swapchain = Some(replacement);
        self.needs_recreate = false;
        // Republishing bumps generations, which recompiles every consumer
        // wired to these slots with a dependency role
        self.publish_chain(ctx)
    }
}

impl Node for SwapchainNode {
    fn compile(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        if self.swapchain.is_none() {
            let device = ctx.device()?;
            let swapchain = Swapchain::new(device, self.surface, self.window_extent)?;
            ctx.log().info(format!(
                "created swapchain: {} images, {:?}",
                swapchain.image_count(),
                swapchain.format().format
            ));
            self.swapchain = Some(swapchain);
        }
        self.publish_chain(ctx)
    }

    fn execute(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        if let Some(resize) = ctx.take_pending_resize() {
            self.window_extent = resize;
            self.needs_recreate = true;
        }
        if ctx.take_recreate_request() {
            self.needs_recreate = true;
        }
        if self.needs_recreate {
            self.recreate(ctx)?;
            ctx.skip_frame();
            return Ok(());
        }

        let frame_index = ctx.input_u32(Self::CURRENT_FRAME_INDEX)?;
        let semaphores = ctx.input_semaphores(Self::IMAGE_AVAILABLE_SEMAPHORES)?;
        let semaphore = *semaphores
            .get(frame_index as usize)
            .ok_or_else(|| NodeError::Message("frame index out of semaphore range".into()))?;

        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| NodeError::Message("swapchain not created".into()))?;
        match swapchain.acquire_next_image(semaphore)? {
            AcquireResult::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    self.needs_recreate = true;
                }
                ctx.publish(Self::IMAGE_INDEX, SlotValue::U32(image_index))?;
                Ok(())
            }
            AcquireResult::OutOfDate => {
                ctx.log().warn("acquire reported out-of-date, skipping frame");
                self.needs_recreate = true;
                ctx.skip_frame();
                Ok(())
            }
        }
    }

    fn cleanup(&mut self, ctx: &mut NodeContext) {
        ctx.log().debug("destroying swapchain");
        // Views and the chain die here; the surface is released by its owner
        self.swapchain = None;
        self.needs_recreate = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_shape() {
        let ty = SwapchainNode::node_type_for(
            vk::SurfaceKHR::null(),
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!(ty.input_count(), 2);
        assert_eq!(ty.output_count(), 5);
        assert_eq!(
            ty.input_schema()[SwapchainNode::IMAGE_AVAILABLE_SEMAPHORES as usize].data_type,
            SlotDataType::SemaphoreArray
        );
        assert_eq!(
            ty.output_schema()[SwapchainNode::IMAGES as usize].data_type,
            SlotDataType::ImageArray
        );
    }
}
