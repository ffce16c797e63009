//! Buffer management
//!
//! RAII buffer wrapper plus the per-swapchain-image uniform buffers. Uniform
//! memory is `HOST_VISIBLE | HOST_COHERENT` and persistently mapped: writers
//! copy into the mapped pointer each frame and no flush is needed.

use super::context::{DeviceContext, VulkanError, VulkanResult};
use crate::resource::MemoryRequirements;
use ash::{vk, Device};

/// Device buffer with bound memory and RAII cleanup
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: u64,
    mapped: Option<*mut std::ffi::c_void>,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory
    pub fn new(
        context: &DeviceContext,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            device
                .create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type = context.find_memory_type(requirements.memory_type_bits, properties)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = unsafe {
            device
                .allocate_memory(&alloc_info, None)
                .map_err(|code| VulkanError::Op {
                    operation: "vkAllocateMemory",
                    code,
                })?
        };
        unsafe {
            device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        Ok(Self {
            device,
            buffer,
            memory,
            size,
            mapped: None,
        })
    }

    /// Map the whole allocation and keep it mapped
    pub fn map_persistent(&mut self) -> VulkanResult<()> {
        if self.mapped.is_some() {
            return Ok(());
        }
        let pointer = unsafe {
            self.device
                .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(|code| VulkanError::Op {
                    operation: "vkMapMemory",
                    code,
                })?
        };
        self.mapped = Some(pointer);
        Ok(())
    }

    /// Copy raw bytes into the persistently mapped pointer
    pub fn write_bytes(&self, data: &[u8]) -> VulkanResult<()> {
        let pointer = self.mapped.ok_or(VulkanError::InitializationFailed(
            "buffer is not mapped".to_string(),
        ))?;
        if data.len() as u64 > self.size {
            return Err(VulkanError::InitializationFailed(format!(
                "write of {} bytes exceeds buffer size {}",
                data.len(),
                self.size
            )));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), pointer.cast::<u8>(), data.len());
        }
        Ok(())
    }

    /// Copy a POD value into the persistently mapped pointer
    pub fn write<T: bytemuck::Pod>(&self, value: &T) -> VulkanResult<()> {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    /// The raw buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Buffer size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Backend memory requirements, for aliasing decisions
    pub fn memory_requirements(&self) -> MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(self.buffer) }.into()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// One persistently mapped uniform buffer per swapchain image
///
/// Descriptor sets referencing these buffers stay owned by their pool and
/// command buffers by theirs; only the buffers and memory are destroyed here.
pub struct PerFrameUniforms {
    buffers: Vec<Buffer>,
    stride: u64,
}

impl PerFrameUniforms {
    /// Create `image_count` uniform buffers of `size` bytes each
    pub fn new(context: &DeviceContext, image_count: u32, size: u64) -> VulkanResult<Self> {
        let mut buffers = Vec::with_capacity(image_count as usize);
        for _ in 0..image_count {
            let mut buffer = Buffer::new(
                context,
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            buffer.map_persistent()?;
            buffers.push(buffer);
        }
        Ok(Self {
            buffers,
            stride: size,
        })
    }

    /// Write one image's uniform data
    pub fn write<T: bytemuck::Pod>(&self, image_index: usize, value: &T) -> VulkanResult<()> {
        self.buffers[image_index].write(value)
    }

    /// The buffer backing one image
    pub fn buffer(&self, image_index: usize) -> vk::Buffer {
        self.buffers[image_index].handle()
    }

    /// Number of per-image buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffers exist
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Byte size of each buffer
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Total bytes across all per-image buffers
    pub fn total_bytes(&self) -> u64 {
        self.stride * self.buffers.len() as u64
    }
}
