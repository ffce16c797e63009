//! Core node implementations
//!
//! The built-in nodes driving a swapchain frame: frame-in-flight
//! synchronization, image acquire, per-image uniform updates, a
//! clear-and-submit renderable with command-buffer replay, and presentation.

pub mod clear_render;
pub mod frame_sync;
pub mod present;
pub mod swapchain_node;
pub mod uniform_update;

pub use clear_render::ClearRenderNode;
pub use frame_sync::FrameSyncNode;
pub use present::PresentNode;
pub use swapchain_node::SwapchainNode;
pub use uniform_update::UniformUpdateNode;
