//! Vulkan backend layer
//!
//! Thin RAII wrappers over the ash API used by the core nodes: device
//! context, synchronization primitives, swapchain, command buffers, buffers
//! and shader modules. Raw handles cross into this layer only at the call
//! boundary; everything above works with the wrappers.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use buffer::{Buffer, PerFrameUniforms};
pub use commands::{CommandBufferSet, CommandPool};
pub use context::{DeviceContext, PhysicalDeviceInfo, VulkanError, VulkanResult};
pub use shader::{ShaderError, ShaderModule, ShaderStage};
pub use swapchain::{AcquireResult, Swapchain, SwapchainError};
pub use sync::{Fence, Semaphore};

/// Frames the CPU may prepare while the GPU works
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Upper bound on swapchain images the engine supports
pub const MAX_SWAPCHAIN_IMAGES: usize = 4;
