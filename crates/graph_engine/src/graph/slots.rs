//! Typed slot schema and slot values
//!
//! Every node type declares an ordered input and output schema of
//! [`SlotDesc`] entries. Wiring is validated against the schema: a connection
//! is only accepted when the producer's and consumer's data types match by
//! exact tag and the consumer's array mode admits the produced shape.
//!
//! Values flowing along edges are [`SlotValue`] — a closed tagged union, so
//! every access site is an exhaustive match rather than a downcast.

use crate::foundation::collections::BoundedArray;
use crate::vulkan::MAX_SWAPCHAIN_IMAGES;
use ash::vk;
use nalgebra::{Matrix4, Vector2, Vector3, Vector4};
use std::fmt;

/// How a slot participates in recompilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRole {
    /// Changes to this input force the consumer to recompile
    Dependency,
    /// Consumed at execute time; changes never force a recompile
    Execute,
    /// Execute-time only, never sampled at compile
    ExecuteOnly,
}

/// Whether a slot must be wired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotNullability {
    /// Compile fails when unwired
    Required,
    /// May be left unwired
    Optional,
}

/// Access the consumer is granted on a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMutability {
    /// Read-only access
    ReadOnly,
    /// Read and write access
    ReadWrite,
    /// Write-only access
    WriteOnly,
}

/// Visibility scope of a slot's resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotScope {
    /// Visible to the owning node and its direct consumers
    NodeLevel,
    /// Visible across the whole graph
    GraphLevel,
}

/// Shape of values accepted by a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotArrayMode {
    /// Exactly one value at index 0
    Single,
    /// A fixed set of indexed values
    Array,
    /// An open-ended set of indexed values
    Variadic,
}

/// Exact data-type tag carried by a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotDataType {
    /// 32-bit unsigned scalar
    U32,
    /// 64-bit unsigned scalar
    U64,
    /// Boolean flag
    Bool,
    /// Host-side byte buffer
    HostBytes,
    /// `VkFence`
    Fence,
    /// `VkSemaphore`
    Semaphore,
    /// Per-image semaphore array
    SemaphoreArray,
    /// Per-image fence array
    FenceArray,
    /// `VkImage`
    Image,
    /// Per-image `VkImage` array
    ImageArray,
    /// `VkImageView`
    ImageView,
    /// Per-image `VkImageView` array
    ImageViewArray,
    /// `VkBuffer`
    Buffer,
    /// `VkSwapchainKHR`
    Swapchain,
    /// `VkRenderPass`
    RenderPass,
    /// `VkPipeline`
    Pipeline,
    /// `VkDescriptorSet`
    DescriptorSet,
    /// `VkCommandBuffer`
    CommandBuffer,
    /// `VkExtent2D`
    Extent,
    /// `VkSurfaceFormatKHR`
    SurfaceFormat,
}

impl fmt::Display for SlotDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Semaphore array sized for the swapchain image limit
pub type SemaphoreArray = BoundedArray<vk::Semaphore, MAX_SWAPCHAIN_IMAGES>;
/// Fence array sized for the swapchain image limit
pub type FenceArray = BoundedArray<vk::Fence, MAX_SWAPCHAIN_IMAGES>;
/// Image array sized for the swapchain image limit
pub type ImageArray = BoundedArray<vk::Image, MAX_SWAPCHAIN_IMAGES>;
/// Image-view array sized for the swapchain image limit
pub type ImageViewArray = BoundedArray<vk::ImageView, MAX_SWAPCHAIN_IMAGES>;

/// A value carried along a graph edge
#[derive(Debug, Clone)]
pub enum SlotValue {
    /// 32-bit unsigned scalar
    U32(u32),
    /// 64-bit unsigned scalar
    U64(u64),
    /// Boolean flag
    Bool(bool),
    /// Host-side byte buffer
    HostBytes(Vec<u8>),
    /// `VkFence`
    Fence(vk::Fence),
    /// `VkSemaphore`
    Semaphore(vk::Semaphore),
    /// Per-image semaphore array
    SemaphoreArray(SemaphoreArray),
    /// Per-image fence array
    FenceArray(FenceArray),
    /// `VkImage`
    Image(vk::Image),
    /// Per-image `VkImage` array
    ImageArray(ImageArray),
    /// `VkImageView`
    ImageView(vk::ImageView),
    /// Per-image `VkImageView` array
    ImageViewArray(ImageViewArray),
    /// `VkBuffer`
    Buffer(vk::Buffer),
    /// `VkSwapchainKHR`
    Swapchain(vk::SwapchainKHR),
    /// `VkRenderPass`
    RenderPass(vk::RenderPass),
    /// `VkPipeline`
    Pipeline(vk::Pipeline),
    /// `VkDescriptorSet`
    DescriptorSet(vk::DescriptorSet),
    /// `VkCommandBuffer`
    CommandBuffer(vk::CommandBuffer),
    /// `VkExtent2D`
    Extent(vk::Extent2D),
    /// `VkSurfaceFormatKHR`
    SurfaceFormat(vk::SurfaceFormatKHR),
}

impl SlotValue {
    /// The exact type tag of this value
    pub fn data_type(&self) -> SlotDataType {
        match self {
            Self::U32(_) => SlotDataType::U32,
            Self::U64(_) => SlotDataType::U64,
            Self::Bool(_) => SlotDataType::Bool,
            Self::HostBytes(_) => SlotDataType::HostBytes,
            Self::Fence(_) => SlotDataType::Fence,
            Self::Semaphore(_) => SlotDataType::Semaphore,
            Self::SemaphoreArray(_) => SlotDataType::SemaphoreArray,
            Self::FenceArray(_) => SlotDataType::FenceArray,
            Self::Image(_) => SlotDataType::Image,
            Self::ImageArray(_) => SlotDataType::ImageArray,
            Self::ImageView(_) => SlotDataType::ImageView,
            Self::ImageViewArray(_) => SlotDataType::ImageViewArray,
            Self::Buffer(_) => SlotDataType::Buffer,
            Self::Swapchain(_) => SlotDataType::Swapchain,
            Self::RenderPass(_) => SlotDataType::RenderPass,
            Self::Pipeline(_) => SlotDataType::Pipeline,
            Self::DescriptorSet(_) => SlotDataType::DescriptorSet,
            Self::CommandBuffer(_) => SlotDataType::CommandBuffer,
            Self::Extent(_) => SlotDataType::Extent,
            Self::SurfaceFormat(_) => SlotDataType::SurfaceFormat,
        }
    }

    /// The scalar when this is a `U32`
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(value) => Some(*value),
            _ => None,
        }
    }

    /// The scalar when this is a `U64`
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(value) => Some(*value),
            _ => None,
        }
    }

    /// The flag when this is a `Bool`
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// The bytes when this is `HostBytes`
    pub fn as_host_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::HostBytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The handle when this is a `Fence`
    pub fn as_fence(&self) -> Option<vk::Fence> {
        match self {
            Self::Fence(fence) => Some(*fence),
            _ => None,
        }
    }

    /// The handle when this is a `Semaphore`
    pub fn as_semaphore(&self) -> Option<vk::Semaphore> {
        match self {
            Self::Semaphore(semaphore) => Some(*semaphore),
            _ => None,
        }
    }

    /// The array when this is a `SemaphoreArray`
    pub fn as_semaphore_array(&self) -> Option<&SemaphoreArray> {
        match self {
            Self::SemaphoreArray(array) => Some(array),
            _ => None,
        }
    }

    /// The array when this is a `FenceArray`
    pub fn as_fence_array(&self) -> Option<&FenceArray> {
        match self {
            Self::FenceArray(array) => Some(array),
            _ => None,
        }
    }

    /// The array when this is an `ImageArray`
    pub fn as_image_array(&self) -> Option<&ImageArray> {
        match self {
            Self::ImageArray(array) => Some(array),
            _ => None,
        }
    }

    /// The handle when this is a `Swapchain`
    pub fn as_swapchain(&self) -> Option<vk::SwapchainKHR> {
        match self {
            Self::Swapchain(swapchain) => Some(*swapchain),
            _ => None,
        }
    }

    /// The extent when this is an `Extent`
    pub fn as_extent(&self) -> Option<vk::Extent2D> {
        match self {
            Self::Extent(extent) => Some(*extent),
            _ => None,
        }
    }
}

/// Description of one input or output slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDesc {
    /// Slot name, for diagnostics only
    pub name: &'static str,
    /// Exact type tag accepted or produced
    pub data_type: SlotDataType,
    /// Whether the slot must be wired
    pub nullability: SlotNullability,
    /// Recompilation role
    pub role: SlotRole,
    /// Access granted to consumers
    pub mutability: SlotMutability,
    /// Visibility scope
    pub scope: SlotScope,
    /// Shape of values accepted
    pub array_mode: SlotArrayMode,
}

impl SlotDesc {
    /// A required execute-role single slot, the most common shape
    pub const fn new(name: &'static str, data_type: SlotDataType) -> Self {
        Self {
            name,
            data_type,
            nullability: SlotNullability::Required,
            role: SlotRole::Execute,
            mutability: SlotMutability::ReadOnly,
            scope: SlotScope::NodeLevel,
            array_mode: SlotArrayMode::Single,
        }
    }

    /// Make this a dependency-role slot
    pub const fn dependency(mut self) -> Self {
        self.role = SlotRole::Dependency;
        self
    }

    /// Make this an execute-only slot
    pub const fn execute_only(mut self) -> Self {
        self.role = SlotRole::ExecuteOnly;
        self
    }

    /// Allow the slot to remain unwired
    pub const fn optional(mut self) -> Self {
        self.nullability = SlotNullability::Optional;
        self
    }

    /// Accept a fixed array of values
    pub const fn array(mut self) -> Self {
        self.array_mode = SlotArrayMode::Array;
        self
    }

    /// Accept an open-ended array of values
    pub const fn variadic(mut self) -> Self {
        self.array_mode = SlotArrayMode::Variadic;
        self
    }

    /// Grant consumers write access
    pub const fn read_write(mut self) -> Self {
        self.mutability = SlotMutability::ReadWrite;
        self
    }

    /// Make the resource graph-visible
    pub const fn graph_scope(mut self) -> Self {
        self.scope = SlotScope::GraphLevel;
        self
    }

    /// Whether the array mode admits a wire at the given index
    pub fn admits_index(&self, index: u32) -> bool {
        match self.array_mode {
            SlotArrayMode::Single => index == 0,
            SlotArrayMode::Array | SlotArrayMode::Variadic => true,
        }
    }
}

/// Tagged parameter value attached to a node instance
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// Signed integer
    Int(i32),
    /// Unsigned integer
    UInt(u32),
    /// Single-precision float
    Float(f32),
    /// Boolean flag
    Bool(bool),
    /// Text value
    Text(String),
    /// 2-component vector
    Vec2(Vector2<f32>),
    /// 3-component vector
    Vec3(Vector3<f32>),
    /// 4-component vector
    Vec4(Vector4<f32>),
    /// 4x4 matrix
    Mat4(Matrix4<f32>),
}

impl ParameterValue {
    /// The float when this holds one
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// The unsigned integer when this holds one
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::UInt(value) => Some(*value),
            _ => None,
        }
    }

    /// The flag when this holds one
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// The vector when this holds a `Vec4`
    pub fn as_vec4(&self) -> Option<Vector4<f32>> {
        match self {
            Self::Vec4(value) => Some(*value),
            _ => None,
        }
    }
}
