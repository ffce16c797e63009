//! Vulkan device context
//!
//! Wraps the externally created instance and logical device together with the
//! queues and extension loaders the graph needs. Loaders are created exactly
//! once here; nothing downstream reloads function pointers.

use crate::graph::node_type::DeviceCapabilities;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use thiserror::Error;

/// Vulkan-level error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VulkanError {
    /// General API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),
    /// API error tagged with the originating operation
    #[error("{operation} failed: {code:?}")]
    Op {
        /// The Vulkan entry point that failed
        operation: &'static str,
        /// The returned result code
        code: vk::Result,
    },
    /// Context construction failed before any API error code existed
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    /// No memory type satisfies the requested properties
    #[error("no suitable memory type found")]
    NoSuitableMemoryType,
    /// The device was lost; the driver must reinitialize
    #[error("device lost")]
    DeviceLost,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Selected physical device and its cached properties
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// The physical device handle
    pub device: vk::PhysicalDevice,
    /// Cached memory properties for allocation decisions
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

/// Backend device context threaded through node lifecycles
///
/// The driver creates instance, physical device selection and logical device;
/// this context only borrows their handles for the graph's lifetime. There is
/// no process-global state: the context is a plain value owned by the driver.
pub struct DeviceContext {
    device: Device,
    physical: PhysicalDeviceInfo,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_family_index: u32,
    surface_loader: Surface,
    swapchain_loader: SwapchainLoader,
    capabilities: DeviceCapabilities,
}

impl DeviceContext {
    /// Build a context from externally created Vulkan objects
    pub fn new(
        entry: &Entry,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        device: Device,
        queue_family_index: u32,
        graphics_queue: vk::Queue,
        present_queue: vk::Queue,
    ) -> Self {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let surface_loader = Surface::new(entry, instance);
        let swapchain_loader = SwapchainLoader::new(instance, &device);
        Self {
            device,
            physical: PhysicalDeviceInfo {
                device: physical_device,
                memory_properties,
            },
            graphics_queue,
            present_queue,
            queue_family_index,
            surface_loader,
            swapchain_loader,
            capabilities: DeviceCapabilities::GRAPHICS
                | DeviceCapabilities::COMPUTE
                | DeviceCapabilities::TRANSFER,
        }
    }

    /// Override the advertised device capabilities
    ///
    /// The driver sets this from the features and extensions it actually
    /// enabled; node types declaring requirements outside this set are
    /// refused at compile.
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Capabilities the device advertises
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    /// The logical device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// A clone of the logical device handle for RAII wrappers
    pub fn raw_device(&self) -> Device {
        self.device.clone()
    }

    /// Physical device information
    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Queue family the command pools allocate from
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Surface extension loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Find a memory type satisfying the filter and property flags
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<u32> {
        let memory = &self.physical.memory_properties;
        for i in 0..memory.memory_type_count {
            let supported = type_filter & (1 << i) != 0;
            let matches = memory.memory_types[i as usize]
                .property_flags
                .contains(properties);
            if supported && matches {
                return Ok(i);
            }
        }
        Err(VulkanError::NoSuitableMemoryType)
    }

    /// Block until all submitted GPU work completes
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe {
            self.device.device_wait_idle().map_err(|code| match code {
                vk::Result::ERROR_DEVICE_LOST => VulkanError::DeviceLost,
                other => VulkanError::Op {
                    operation: "vkDeviceWaitIdle",
                    code: other,
                },
            })
        }
    }
}
