// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Recreated whenever the window size changes or presentation reports
// the chain as out of date.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use super::create_or_unwind;
use super::image::create_image_view;
use super::VulkanDevice;

/// Result of acquiring an image from the swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        preferred_present_mode: vk::PresentModeKHR,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let surface = device.surface;
        let surface_loader = &device.surface_loader;

        // Query surface capabilities
        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(device.physical_device, surface)
        }?;

        // Query supported formats
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        }?;

        // Query supported present modes
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(device.physical_device, surface)
        }?;

        let surface_format = choose_surface_format(&formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(&present_modes, preferred_present_mode);
        let extent = choose_extent(&surface_caps, width, height);

        log::info!("Surface format: {:?}, present mode: {:?}", surface_format.format, present_mode);

        // One more than the minimum so we never wait on the driver
        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let swapchain_loader = ash::khr::swapchain::Device::new(&device.instance, &device.device);

        let queue_family_indices = [device.graphics_queue_family, device.present_queue_family];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        // Images must be shared between the two families if they differ
        create_info = if device.has_separate_present_queue() {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create a swapchain")?;

        let destroy_swapchain = || unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };

        // Get swapchain images
        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                destroy_swapchain();
                return Err(e).context("Failed to get swapchain images");
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        // Create image views
        let image_views = create_or_unwind(
            images.len(),
            |i| {
                create_image_view(
                    &device,
                    images[i],
                    surface_format.format,
                    vk::ImageAspectFlags::COLOR,
                    1,
                )
            },
            |view| unsafe { device.device.destroy_image_view(view, None) },
        );
        let image_views = match image_views {
            Ok(views) => views,
            Err(e) => {
                destroy_swapchain();
                return Err(e);
            }
        };

        Ok(Self {
            swapchain,
            swapchain_loader,
            image_views,
            format: surface_format.format,
            extent,
            device,
        })
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen
    ///
    /// Returns true when the swapchain should be recreated.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e).context("Failed to present image"),
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height.max(1) as f32
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Choose surface format, preferring 8-bit UNORM with sRGB colour space
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    // A single UNDEFINED entry means every format is available
    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        return Some(vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
    }

    formats
        .iter()
        .find(|f| {
            (f.format == vk::Format::R8G8B8A8_UNORM || f.format == vk::Format::B8G8R8A8_UNORM)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Use the configured present mode when available; FIFO is always supported
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Use the surface's fixed extent, or clamp the window size to its limits
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn undefined_format_means_anything_goes() {
        let chosen = choose_surface_format(&[format(vk::Format::UNDEFINED)]).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn unorm_format_is_preferred_over_first() {
        let formats = [
            format(vk::Format::A2B10G10R10_UNORM_PACK32),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_UNORM);

        let fallback = [format(vk::Format::A2B10G10R10_UNORM_PACK32)];
        assert_eq!(
            choose_surface_format(&fallback).unwrap().format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_is_clamped_when_surface_leaves_it_open() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D { width: 1920, height: 1080 },
            ..Default::default()
        };
        let extent = choose_extent(&caps, 4000, 8);
        assert_eq!((extent.width, extent.height), (1920, 16));

        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 800, height: 600 },
            ..caps
        };
        let extent = choose_extent(&fixed, 4000, 8);
        assert_eq!((extent.width, extent.height), (800, 600));
    }
}
