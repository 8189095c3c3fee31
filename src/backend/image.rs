// Images, views, samplers and the transfer work around them
//
// Textures are uploaded through a staging buffer, transitioned for the copy,
// then blitted down the mip chain. Attachments (MSAA colour, depth, shadow
// map) are plain device-local images.

use anyhow::{bail, Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use super::VulkanDevice;

/// Device-local image with its view and memory
pub struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

/// Parameters for [`GpuImage::new`]
pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

impl GpuImage {
    pub fn new(device: &Arc<VulkanDevice>, desc: &ImageDesc) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(desc.samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create image '{}'", desc.name))?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e)
                    .with_context(|| format!("Failed to allocate memory for image '{}'", desc.name));
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            device.free_allocation(allocation, "image");
            unsafe { device.device.destroy_image(image, None) };
            return Err(e).context("Failed to bind image memory");
        }

        let view = match create_image_view(device, image, desc.format, desc.aspect, desc.mip_levels) {
            Ok(view) => view,
            Err(e) => {
                device.free_allocation(allocation, "image");
                unsafe { device.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        Ok(Self {
            image,
            view,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            allocation: Some(allocation),
            device: device.clone(),
        })
    }

    /// Multisampled colour target that resolves into the swapchain image
    pub fn colour_attachment(
        device: &Arc<VulkanDevice>,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        Self::new(
            device,
            &ImageDesc {
                name: "colour attachment",
                width: extent.width,
                height: extent.height,
                mip_levels: 1,
                samples,
                format,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        )
    }

    /// Depth target for the scene pass
    pub fn depth_attachment(
        device: &Arc<VulkanDevice>,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        Self::new(
            device,
            &ImageDesc {
                name: "depth attachment",
                width: extent.width,
                height: extent.height,
                mip_levels: 1,
                samples,
                format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect: vk::ImageAspectFlags::DEPTH,
            },
        )
    }

    /// Square depth image rendered from the light and sampled by the scene pass
    pub fn shadow_map(device: &Arc<VulkanDevice>, format: vk::Format, size: u32) -> Result<Self> {
        Self::new(
            device,
            &ImageDesc {
                name: "shadow map",
                width: size,
                height: size,
                mip_levels: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED,
                aspect: vk::ImageAspectFlags::DEPTH,
            },
        )
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free_allocation(allocation, "image");
        }
    }
}

pub fn create_image_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.device.create_image_view(&view_info, None) }
        .context("Failed to create an image view")
}

/// Number of levels in a full mip chain down to 1x1
pub fn mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Access masks and pipeline stages for a supported layout transition
pub fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<(vk::AccessFlags, vk::AccessFlags, vk::PipelineStageFlags, vk::PipelineStageFlags)> {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok((
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok((
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )),
        _ => bail!("Unsupported layout transition {:?} -> {:?}", old_layout, new_layout),
    }
}

/// Record a barrier moving every mip level of a colour image between layouts
pub fn transition_image_layout(
    device: &VulkanDevice,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    mip_levels: u32,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let (src_access, dst_access, src_stage, dst_stage) = transition_masks(old_layout, new_layout)?;

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(colour_range(0, mip_levels))
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    unsafe {
        device.device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }

    Ok(())
}

/// Record a tightly packed buffer to image copy into mip level 0
pub fn copy_buffer_to_image(
    device: &VulkanDevice,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) {
    let region = vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        });

    unsafe {
        device.device.cmd_copy_buffer_to_image(
            cmd,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }
}

/// Fail early if the format cannot be blitted with linear filtering
pub fn check_linear_blit_support(device: &VulkanDevice, format: vk::Format) -> Result<()> {
    let properties = unsafe {
        device
            .instance
            .get_physical_device_format_properties(device.physical_device, format)
    };

    if !properties
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    {
        bail!("Texture format {:?} does not support linear blitting", format);
    }
    Ok(())
}

/// Record blits that fill levels 1.. from level 0
///
/// Expects every level in TRANSFER_DST_OPTIMAL and leaves every level in
/// SHADER_READ_ONLY_OPTIMAL.
pub fn generate_mipmaps(
    device: &VulkanDevice,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    width: u32,
    height: u32,
    mip_levels: u32,
) {
    let mut barrier = vk::ImageMemoryBarrier::default()
        .image(image)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .subresource_range(colour_range(0, 1));

    let mut mip_width = width as i32;
    let mut mip_height = height as i32;

    for level in 1..mip_levels {
        // Previous level becomes the blit source
        barrier.subresource_range.base_mip_level = level - 1;
        barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        barrier.new_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
        barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
        barrier.dst_access_mask = vk::AccessFlags::TRANSFER_READ;

        unsafe {
            device.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }

        let next_width = (mip_width / 2).max(1);
        let next_height = (mip_height / 2).max(1);

        let blit = vk::ImageBlit::default()
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D { x: mip_width, y: mip_height, z: 1 },
            ])
            .src_subresource(colour_layers(level - 1))
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D { x: next_width, y: next_height, z: 1 },
            ])
            .dst_subresource(colour_layers(level));

        unsafe {
            device.device.cmd_blit_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        // Source level is finished
        barrier.old_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
        barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        barrier.src_access_mask = vk::AccessFlags::TRANSFER_READ;
        barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;

        unsafe {
            device.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }

        mip_width = next_width;
        mip_height = next_height;
    }

    // The last level was only ever written
    barrier.subresource_range.base_mip_level = mip_levels.saturating_sub(1);
    barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
    barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
    barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
    barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;

    unsafe {
        device.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// First candidate whose tiling supports all requested features
pub fn choose_supported_format(
    device: &VulkanDevice,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let properties = unsafe {
                device
                    .instance
                    .get_physical_device_format_properties(device.physical_device, format)
            };
            match tiling {
                vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .context("Failed to find a matching format")
}

/// Depth format usable as both a depth attachment and (for the shadow map) a sampled image
pub fn find_depth_format(device: &VulkanDevice) -> Result<vk::Format> {
    choose_supported_format(
        device,
        &[
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ],
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            | vk::FormatFeatureFlags::SAMPLED_IMAGE,
    )
}

pub fn create_texture_sampler(device: &VulkanDevice, mip_levels: u32) -> Result<vk::Sampler> {
    let max_anisotropy = 16.0_f32.min(device.properties.limits.max_sampler_anisotropy);

    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(mip_levels as f32)
        .anisotropy_enable(true)
        .max_anisotropy(max_anisotropy);

    unsafe { device.device.create_sampler(&sampler_info, None) }
        .context("Failed to create a texture sampler")
}

/// Sampler for the shadow map. Lookups outside the map read depth 1.0 (lit).
pub fn create_shadow_sampler(device: &VulkanDevice) -> Result<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::NEAREST)
        .min_filter(vk::Filter::NEAREST)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_BORDER)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_BORDER)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
        .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .min_lod(0.0)
        .max_lod(1.0)
        .anisotropy_enable(false)
        .max_anisotropy(1.0);

    unsafe { device.device.create_sampler(&sampler_info, None) }
        .context("Failed to create the shadow sampler")
}

fn colour_range(base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn colour_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_lengths() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(512, 256), 10);
        assert_eq!(mip_levels(1000, 1), 10);
        assert_eq!(mip_levels(1024, 1024), 11);
        assert_eq!(mip_levels(0, 0), 1);
    }

    #[test]
    fn only_upload_transitions_are_supported() {
        let (src, dst, _, dst_stage) = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert!(src.is_empty());
        assert_eq!(dst, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);

        let (_, dst, _, dst_stage) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(dst, vk::AccessFlags::SHADER_READ);
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        assert!(transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::PRESENT_SRC_KHR
        )
        .is_err());
    }
}
