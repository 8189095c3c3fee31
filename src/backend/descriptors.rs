// Descriptor set layouts, pools and writes
//
// Set 0 (one per frame in flight):
//   0 - view/projection UBO
//   1 - per-object model UBO, dynamic offset
//   2 - directional light UBO
//   3 - shadow map sampler
// Set 1 (one per texture):
//   0 - texture sampler

use anyhow::{Context, Result};
use ash::vk;
use super::VulkanDevice;

pub const VIEW_PROJECTION_BINDING: u32 = 0;
pub const MODEL_BINDING: u32 = 1;
pub const LIGHT_BINDING: u32 = 2;
pub const SHADOW_MAP_BINDING: u32 = 3;
pub const TEXTURE_BINDING: u32 = 0;

/// Collects layout bindings before creating the layout
#[derive(Default)]
pub struct LayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> LayoutBuilder<'a> {
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(1)
                .stage_flags(stage_flags),
        );
        self
    }

    pub fn build(self, device: &VulkanDevice) -> Result<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);
        unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create a descriptor set layout")
    }
}

/// Layout of the per-frame uniform set (set 0)
pub fn create_uniform_set_layout(device: &VulkanDevice) -> Result<vk::DescriptorSetLayout> {
    let vertex_and_fragment = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;

    LayoutBuilder::default()
        .binding(
            VIEW_PROJECTION_BINDING,
            vk::DescriptorType::UNIFORM_BUFFER,
            vertex_and_fragment,
        )
        .binding(
            MODEL_BINDING,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            vertex_and_fragment,
        )
        .binding(
            LIGHT_BINDING,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::FRAGMENT,
        )
        .binding(
            SHADOW_MAP_BINDING,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        )
        .build(device)
}

/// Layout of a texture set (set 1)
pub fn create_sampler_set_layout(device: &VulkanDevice) -> Result<vk::DescriptorSetLayout> {
    LayoutBuilder::default()
        .binding(
            TEXTURE_BINDING,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        )
        .build(device)
}

/// Pool sizes for `frames` uniform sets
pub fn uniform_pool_sizes(frames: u32) -> [vk::DescriptorPoolSize; 3] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 2 * frames,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            descriptor_count: frames,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: frames,
        },
    ]
}

pub fn create_uniform_pool(device: &VulkanDevice, frames: u32) -> Result<vk::DescriptorPool> {
    let pool_sizes = uniform_pool_sizes(frames);
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(frames)
        .pool_sizes(&pool_sizes);

    unsafe { device.device.create_descriptor_pool(&pool_info, None) }
        .context("Failed to create the uniform descriptor pool")
}

pub fn create_sampler_pool(device: &VulkanDevice, max_textures: u32) -> Result<vk::DescriptorPool> {
    let pool_sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: max_textures,
    }];
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(max_textures)
        .pool_sizes(&pool_sizes);

    unsafe { device.device.create_descriptor_pool(&pool_info, None) }
        .context("Failed to create the sampler descriptor pool")
}

/// Allocate `count` sets sharing one layout
pub fn allocate_sets(
    device: &VulkanDevice,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    count: usize,
) -> Result<Vec<vk::DescriptorSet>> {
    let layouts = vec![layout; count];
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);

    unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
        .context("Failed to allocate descriptor sets")
}

/// Buffers and images bound by one uniform set
pub struct UniformSetResources {
    pub view_projection: (vk::Buffer, vk::DeviceSize),
    /// Range is one dynamic slot, not the whole buffer
    pub model: (vk::Buffer, vk::DeviceSize),
    pub light: (vk::Buffer, vk::DeviceSize),
    pub shadow_view: vk::ImageView,
    pub shadow_sampler: vk::Sampler,
}

pub fn write_uniform_set(device: &VulkanDevice, set: vk::DescriptorSet, resources: &UniformSetResources) {
    let buffer_info = |(buffer, range): (vk::Buffer, vk::DeviceSize)| {
        [vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(range)]
    };
    let vp_info = buffer_info(resources.view_projection);
    let model_info = buffer_info(resources.model);
    let light_info = buffer_info(resources.light);
    let shadow_info = [vk::DescriptorImageInfo::default()
        .image_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
        .image_view(resources.shadow_view)
        .sampler(resources.shadow_sampler)];

    let writes = [
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(VIEW_PROJECTION_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&vp_info),
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(MODEL_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(&model_info),
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(LIGHT_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&light_info),
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(SHADOW_MAP_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&shadow_info),
    ];

    unsafe { device.device.update_descriptor_sets(&writes, &[]) };
}

pub fn write_texture_set(
    device: &VulkanDevice,
    set: vk::DescriptorSet,
    view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let image_info = [vk::DescriptorImageInfo::default()
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .image_view(view)
        .sampler(sampler)];

    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(TEXTURE_BINDING)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(&image_info);

    unsafe { device.device.update_descriptor_sets(&[write], &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_pool_covers_every_frame() {
        let sizes = uniform_pool_sizes(3);
        let count = |ty| {
            sizes
                .iter()
                .filter(|s| s.ty == ty)
                .map(|s| s.descriptor_count)
                .sum::<u32>()
        };
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), 6);
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC), 3);
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), 3);
    }
}
