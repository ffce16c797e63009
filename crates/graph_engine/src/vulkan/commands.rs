//! Command pool and per-image command buffers
//!
//! [`CommandBufferSet`] keeps one primary command buffer per swapchain image
//! together with a dirty bit. A buffer is re-recorded only when its bit is
//! set; otherwise the previous recording replays. Bits are set when a
//! dependency handle changes identity, a producer generation advances past
//! the last-recorded one, or the swapchain is recreated.

use super::context::{VulkanError, VulkanResult};
use ash::{vk, Device};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be individually reset
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);
        let command_pool = unsafe {
            device
                .create_command_pool(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self {
            device,
            command_pool,
        })
    }

    /// Allocate primary command buffers
    pub fn allocate(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// The raw pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // All buffers must have left the GPU before the pool dies
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// One command buffer per swapchain image, with dirty/ready tracking
pub struct CommandBufferSet {
    buffers: Vec<vk::CommandBuffer>,
    dirty: Vec<bool>,
}

impl CommandBufferSet {
    /// Allocate `count` buffers from a pool, all starting dirty
    pub fn allocate(pool: &CommandPool, count: u32) -> VulkanResult<Self> {
        Ok(Self::from_buffers(pool.allocate(count)?))
    }

    /// Wrap existing buffers, all starting dirty
    pub fn from_buffers(buffers: Vec<vk::CommandBuffer>) -> Self {
        let dirty = vec![true; buffers.len()];
        Self { buffers, dirty }
    }

    /// Number of per-image buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// The buffer for an image index
    pub fn buffer(&self, image_index: usize) -> vk::CommandBuffer {
        self.buffers[image_index]
    }

    /// Whether the buffer for an image must be re-recorded
    pub fn is_dirty(&self, image_index: usize) -> bool {
        self.dirty.get(image_index).copied().unwrap_or(false)
    }

    /// Mark one image's buffer for re-recording
    pub fn mark_dirty(&mut self, image_index: usize) {
        if let Some(flag) = self.dirty.get_mut(image_index) {
            *flag = true;
        }
    }

    /// Mark every buffer for re-recording, e.g. after swapchain recreation
    pub fn mark_all_dirty(&mut self) {
        self.dirty.fill(true);
    }

    /// Clear an image's dirty bit after a successful re-record
    pub fn clear_dirty(&mut self, image_index: usize) {
        if let Some(flag) = self.dirty.get_mut(image_index) {
            *flag = false;
        }
    }

    /// Whether any buffer still needs recording
    pub fn any_dirty(&self) -> bool {
        self.dirty.iter().any(|flag| *flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(count: usize) -> CommandBufferSet {
        CommandBufferSet::from_buffers(vec![vk::CommandBuffer::null(); count])
    }

    #[test]
    fn test_new_set_starts_fully_dirty() {
        let set = set_of(3);
        assert!(set.is_dirty(0));
        assert!(set.is_dirty(1));
        assert!(set.is_dirty(2));
        assert!(set.any_dirty());
    }

    #[test]
    fn test_clear_dirty_is_per_image() {
        let mut set = set_of(3);
        set.clear_dirty(1);

        assert!(set.is_dirty(0));
        assert!(!set.is_dirty(1));
        assert!(set.is_dirty(2));
    }

    #[test]
    fn test_mark_all_dirty_after_recreation() {
        let mut set = set_of(2);
        set.clear_dirty(0);
        set.clear_dirty(1);
        assert!(!set.any_dirty());

        set.mark_all_dirty();
        assert!(set.is_dirty(0) && set.is_dirty(1));
    }

    #[test]
    fn test_out_of_range_indices_are_ignored() {
        let mut set = set_of(1);
        set.mark_dirty(9);
        set.clear_dirty(9);
        assert!(!set.is_dirty(9));
    }
}
