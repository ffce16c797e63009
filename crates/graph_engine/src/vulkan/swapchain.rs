//! Swapchain management
//!
//! Creation, recreation and image acquisition. Present mode is chosen by the
//! priority `IMMEDIATE > MAILBOX > FIFO` (FIFO is always available). When the
//! surface reports an undefined format the engine selects `B8G8R8A8_UNORM`.
//! The extent follows the surface's `current_extent` unless the platform
//! leaves it undefined, in which case the window extent is clamped into the
//! supported range.

use super::context::{DeviceContext, VulkanError, VulkanResult};
use ash::vk;
use thiserror::Error;

/// Recoverable swapchain conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SwapchainError {
    /// The swapchain no longer matches the surface and must be recreated
    #[error("swapchain out of date")]
    OutOfDate,
    /// Presentation still works but the swapchain is no longer optimal
    #[error("swapchain suboptimal")]
    Suboptimal,
    /// The surface itself was lost
    #[error("surface lost")]
    SurfaceLost,
}

/// Outcome of an image acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// An image was acquired
    Acquired {
        /// Index of the acquired image
        image_index: u32,
        /// The swapchain should be recreated when convenient
        suboptimal: bool,
    },
    /// No image; the swapchain must be recreated before the next acquire
    OutOfDate,
}

/// Swapchain wrapper with RAII cleanup
///
/// The surface is owned by the driver and survives recreation; only the
/// swapchain and its image views are destroyed here.
pub struct Swapchain {
    device: ash::Device,
    loader: ash::extensions::khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for the given surface
    pub fn new(
        context: &DeviceContext,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        Self::create(context, surface, window_extent, vk::SwapchainKHR::null())
    }

    /// Recreate after a resize or out-of-date report
    ///
    /// Waits for the device to go idle, creates the replacement chained to
    /// the old swapchain, then destroys the old views and swapchain.
    pub fn recreate(
        self,
        context: &DeviceContext,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        context.wait_idle()?;
        let replacement = Self::create(context, surface, window_extent, self.swapchain)?;
        drop(self);
        log::info!(
            "swapchain recreated: {} images at {}x{}",
            replacement.image_count(),
            replacement.extent.width,
            replacement.extent.height
        );
        Ok(replacement)
    }

    fn create(
        context: &DeviceContext,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let physical = context.physical().device;
        let surface_loader = context.surface_loader();

        let surface_caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical, surface)
                .map_err(VulkanError::Api)?
        };
        let surface_formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical, surface)
                .map_err(VulkanError::Api)?
        };
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical, surface)
                .map_err(VulkanError::Api)?
        };

        let format = choose_surface_format(&surface_formats);
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&surface_caps, window_extent);

        let image_count = (surface_caps.min_image_count + 1).min(if surface_caps.max_image_count > 0
        {
            surface_caps.max_image_count
        } else {
            surface_caps.min_image_count + 1
        });

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = context.swapchain_loader().clone();
        let device = context.raw_device();
        let swapchain = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(|code| VulkanError::Op {
                    operation: "vkCreateSwapchainKHR",
                    code,
                })?
        };

        let images = unsafe {
            loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)?
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe {
                device
                    .create_image_view(&view_info, None)
                    .map_err(VulkanError::Api)?
            };
            image_views.push(view);
        }

        Ok(Self {
            device,
            loader,
            swapchain,
            images,
            image_views,
            format,
            extent,
        })
    }

    /// Acquire the next presentable image
    ///
    /// Returns immediately with [`AcquireResult::OutOfDate`] when the
    /// swapchain must be recreated; the frame is skipped, never blocked.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> VulkanResult<AcquireResult> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireResult::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(code) => Err(VulkanError::Op {
                operation: "vkAcquireNextImageKHR",
                code,
            }),
        }
    }

    /// The raw swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Swapchain images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Image views, one per image
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Selected surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Current extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of images in the chain
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    // A single UNDEFINED entry means the surface accepts anything
    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        return vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: formats[0].color_space,
        };
    }
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_UNORM)
        .copied()
        .unwrap_or(formats[0])
}

fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    for preferred in [
        vk::PresentModeKHR::IMMEDIATE,
        vk::PresentModeKHR::MAILBOX,
        vk::PresentModeKHR::FIFO,
    ] {
        if modes.contains(&preferred) {
            return preferred;
        }
    }
    vk::PresentModeKHR::FIFO
}

fn choose_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window_extent.width.clamp(
            caps.min_image_extent.width,
            caps.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            caps.min_image_extent.height,
            caps.max_image_extent.height,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode_priority() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&all), vk::PresentModeKHR::IMMEDIATE);

        let no_immediate = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&no_immediate), vk::PresentModeKHR::MAILBOX);

        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&fifo_only), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_undefined_surface_format_selects_bgra8_unorm() {
        let reported = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let chosen = choose_surface_format(&reported);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_extent_follows_current_extent_when_defined() {
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.current_extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let extent = choose_extent(&caps, vk::Extent2D { width: 1, height: 1 });
        assert_eq!(extent.width, 1280);
        assert_eq!(extent.height, 720);
    }

    #[test]
    fn test_undefined_extent_clamps_window_size() {
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        caps.min_image_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        caps.max_image_extent = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 4000,
                height: 100,
            },
        );
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 480);
    }
}
