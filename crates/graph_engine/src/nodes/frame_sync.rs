//! Frame synchronization node
//!
//! Maintains the ring buffer of frame-in-flight state: `MAX_FRAMES_IN_FLIGHT`
//! in-flight fences and image-available semaphores indexed by the frame
//! index, plus `MAX_SWAPCHAIN_IMAGES` render-complete semaphores and present
//! fences indexed by the acquired image index.
//!
//! Per frame the node advances the ring, blocks on the new index's fence and
//! publishes the index, the fence and the semaphore/fence arrays. Fences are
//! created signaled and are reset by the submitting node immediately before
//! `vkQueueSubmit`, so a fence belonging to a frame that was never submitted
//! always waits instantly.

use crate::graph::{
    Node, NodeContext, NodeResult, NodeType, NodeTypeBuilder, NodeTypeId, SlotDataType, SlotDesc,
    SlotValue,
};
use crate::graph::slots::{FenceArray, SemaphoreArray};
use crate::vulkan::{Fence, Semaphore, MAX_FRAMES_IN_FLIGHT, MAX_SWAPCHAIN_IMAGES};

/// Ring counter over the frames-in-flight indices
///
/// Advancement happens before the fence wait, so the waited fence is always
/// the one belonging to the post-advance index.
#[derive(Debug, Clone, Copy)]
pub struct FrameRing {
    index: u32,
    count: u32,
}

impl FrameRing {
    /// Create a ring of `count` frames, starting at index 0
    pub fn new(count: u32) -> Self {
        Self { index: 0, count }
    }

    /// Step to the next frame index and return it
    pub fn advance(&mut self) -> u32 {
        self.index = (self.index + 1) % self.count;
        self.index
    }

    /// The current frame index
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Node owning the frame-in-flight synchronization primitives
#[derive(Default)]
pub struct FrameSyncNode {
    in_flight: Vec<Fence>,
    image_available: Vec<Semaphore>,
    render_complete: Vec<Semaphore>,
    present_fences: Vec<Fence>,
    ring: Option<FrameRing>,
}

impl FrameSyncNode {
    /// Registered type id
    pub const TYPE_ID: NodeTypeId = 1;

    /// Output slot: current frame-in-flight index
    pub const CURRENT_FRAME_INDEX: u32 = 0;
    /// Output slot: fence of the current frame
    pub const IN_FLIGHT_FENCE: u32 = 1;
    /// Output slot: image-available semaphores, indexed by frame index
    pub const IMAGE_AVAILABLE_SEMAPHORES: u32 = 2;
    /// Output slot: render-complete semaphores, indexed by image index
    pub const RENDER_COMPLETE_SEMAPHORES: u32 = 3;
    /// Output slot: present fences, indexed by image index
    pub const PRESENT_FENCES: u32 = 4;

    /// Build the node type for registration
    pub fn node_type() -> NodeType {
        NodeTypeBuilder::new(Self::TYPE_ID, "frame_sync")
            .output(SlotDesc::new("current_frame_index", SlotDataType::U32))
            .output(SlotDesc::new("in_flight_fence", SlotDataType::Fence))
            .output(SlotDesc::new(
                "image_available_semaphores",
                SlotDataType::SemaphoreArray,
            ))
            .output(SlotDesc::new(
                "render_complete_semaphores",
                SlotDataType::SemaphoreArray,
            ))
            .output(SlotDesc::new("present_fences", SlotDataType::FenceArray))
            .build(Box::new(|| Box::new(Self::default())))
    }

    fn publish_arrays(&self, ctx: &mut NodeContext) -> NodeResult<()> {
        let mut image_available = SemaphoreArray::new();
        for semaphore in &self.image_available {
            let _ = image_available.try_push(semaphore.handle());
        }
        let mut render_complete = SemaphoreArray::new();
        for semaphore in &self.render_complete {
            let _ = render_complete.try_push(semaphore.handle());
        }
        let mut present_fences = FenceArray::new();
        for fence in &self.present_fences {
            let _ = present_fences.try_push(fence.handle());
        }
        ctx.publish(
            Self::IMAGE_AVAILABLE_SEMAPHORES,
            SlotValue::SemaphoreArray(image_available),
        )?;
        ctx.publish(
            Self::RENDER_COMPLETE_SEMAPHORES,
            SlotValue::SemaphoreArray(render_complete),
        )?;
        ctx.publish(Self::PRESENT_FENCES, SlotValue::FenceArray(present_fences))?;
        Ok(())
    }
}

impl Node for FrameSyncNode {
    fn compile(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        if self.ring.is_none() {
            let device = ctx.device()?;
            for _ in 0..MAX_FRAMES_IN_FLIGHT {
                self.in_flight.push(Fence::new(device.raw_device(), true)?);
                self.image_available.push(Semaphore::new(device.raw_device())?);
            }
            for _ in 0..MAX_SWAPCHAIN_IMAGES {
                self.render_complete.push(Semaphore::new(device.raw_device())?);
                self.present_fences.push(Fence::new(device.raw_device(), true)?);
            }
            self.ring = Some(FrameRing::new(MAX_FRAMES_IN_FLIGHT as u32));
            ctx.log().debug(format!(
                "created {} in-flight fences, {} per-image semaphore pairs",
                MAX_FRAMES_IN_FLIGHT, MAX_SWAPCHAIN_IMAGES
            ));
        }

        let index = self.ring.as_ref().map(FrameRing::index).unwrap_or(0);
        ctx.publish(Self::CURRENT_FRAME_INDEX, SlotValue::U32(index))?;
        ctx.publish(
            Self::IN_FLIGHT_FENCE,
            SlotValue::Fence(self.in_flight[index as usize].handle()),
        )?;
        self.publish_arrays(ctx)
    }

    fn execute(&mut self, ctx: &mut NodeContext) -> NodeResult<()> {
        let ring = self
            .ring
            .as_mut()
            .ok_or_else(|| crate::graph::NodeError::Message("frame sync not compiled".into()))?;
        let index = ring.advance();
        let fence = &self.in_flight[index as usize];
        fence.wait_unbounded()?;

        // The fence stays signaled; the submitting node resets it right
        // before vkQueueSubmit so unsubmitted frames never deadlock here.
        ctx.publish(Self::CURRENT_FRAME_INDEX, SlotValue::U32(index))?;
        ctx.publish(Self::IN_FLIGHT_FENCE, SlotValue::Fence(fence.handle()))?;
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut NodeContext) {
        ctx.log().debug("destroying frame synchronization primitives");
        self.in_flight.clear();
        self.image_available.clear();
        self.render_complete.clear();
        self.present_fences.clear();
        self.ring = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_advances_before_use() {
        // With two frames in flight, three executes observe 1, 0, 1
        let mut ring = FrameRing::new(2);
        let observed: Vec<u32> = (0..3).map(|_| ring.advance()).collect();
        assert_eq!(observed, vec![1, 0, 1]);
    }

    #[test]
    fn test_ring_wraps_at_count() {
        let mut ring = FrameRing::new(3);
        let observed: Vec<u32> = (0..7).map(|_| ring.advance()).collect();
        assert_eq!(observed, vec![1, 2, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_schema_exposes_five_outputs() {
        let ty = FrameSyncNode::node_type();
        assert_eq!(ty.output_count(), 5);
        assert_eq!(ty.input_count(), 0);
        assert_eq!(
            ty.output_schema()[FrameSyncNode::CURRENT_FRAME_INDEX as usize].data_type,
            SlotDataType::U32
        );
        assert_eq!(
            ty.output_schema()[FrameSyncNode::PRESENT_FENCES as usize].data_type,
            SlotDataType::FenceArray
        );
    }
}
