// Render passes, framebuffers and graphics pipelines
//
// Two passes per frame:
//   shadow - depth only, rendered from the light into the shadow map
//   scene  - lit and textured geometry, multisampled and resolved into the
//            swapchain image (or straight into it when MSAA is off)

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use super::VulkanDevice;
use crate::scene::vertex::Vertex;

const ENTRY_POINT: &CStr = c"main";

/// Size of the shadow pipeline's push constant block (one mat4)
pub const SHADOW_PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<[[f32; 4]; 4]>() as u32;

/// Attachment descriptions for the scene pass.
///
/// Order is colour, depth, then resolve when multisampling.
pub fn scene_attachments(
    colour_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Vec<vk::AttachmentDescription> {
    let multisampled = samples != vk::SampleCountFlags::TYPE_1;

    let colour = vk::AttachmentDescription::default()
        .format(colour_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(if multisampled {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        })
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(if multisampled {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        });

    let depth = vk::AttachmentDescription::default()
        .format(depth_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let mut attachments = vec![colour, depth];

    if multisampled {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(colour_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        );
    }

    attachments
}

pub fn create_scene_render_pass(
    device: &VulkanDevice,
    colour_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Result<vk::RenderPass> {
    let attachments = scene_attachments(colour_format, depth_format, samples);

    let colour_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let resolve_refs = [vk::AttachmentReference {
        attachment: 2,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&colour_refs)
        .depth_stencil_attachment(&depth_ref);
    if attachments.len() == 3 {
        subpass = subpass.resolve_attachments(&resolve_refs);
    }

    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;

    let dependencies = [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS)
            .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_stage_mask(attachment_stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ),
    ];

    let subpasses = [subpass];
    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .context("Failed to create the scene render pass")
}

/// Depth-only pass whose output is read by the scene pass's fragment shader
pub fn create_shadow_render_pass(device: &VulkanDevice, depth_format: vk::Format) -> Result<vk::RenderPass> {
    let attachments = [vk::AttachmentDescription::default()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)];

    let depth_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .depth_stencil_attachment(&depth_ref)];

    let dependencies = [
        // Previous frame's scene pass must finish sampling before we overwrite
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
            .src_access_mask(vk::AccessFlags::SHADER_READ)
            .dst_stage_mask(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
            .dst_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dependency_flags(vk::DependencyFlags::BY_REGION),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS)
            .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .dependency_flags(vk::DependencyFlags::BY_REGION),
    ];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .context("Failed to create the shadow render pass")
}

pub fn create_framebuffer(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let framebuffer_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
        .context("Failed to create a framebuffer")
}

/// One framebuffer per swapchain image.
///
/// With an MSAA target the swapchain image is the resolve attachment,
/// otherwise it is rendered to directly.
pub fn create_scene_framebuffers(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    swapchain_views: &[vk::ImageView],
    msaa_colour_view: Option<vk::ImageView>,
    depth_view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    swapchain_views
        .iter()
        .map(|&swapchain_view| match msaa_colour_view {
            Some(colour_view) => create_framebuffer(
                device,
                render_pass,
                &[colour_view, depth_view, swapchain_view],
                extent,
            ),
            None => create_framebuffer(device, render_pass, &[swapchain_view, depth_view], extent),
        })
        .collect()
}

pub fn create_pipeline_layout(
    device: &VulkanDevice,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);

    unsafe { device.device.create_pipeline_layout(&layout_info, None) }
        .context("Failed to create a pipeline layout")
}

/// Push constant range carrying the light-space MVP to the shadow vertex shader
pub fn shadow_push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: SHADOW_PUSH_CONSTANT_SIZE,
    }
}

/// Create the lit scene pipeline
pub fn create_scene_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
    samples: vk::SampleCountFlags,
) -> Result<vk::Pipeline> {
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_shader)
            .name(ENTRY_POINT),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_shader)
            .name(ENTRY_POINT),
    ];

    let bindings = [Vertex::binding_description()];
    let attributes = Vertex::attribute_descriptions();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    // Projection flips Y, so CCW stays CCW on screen
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(samples);

    let colour_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)];

    let colour_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&colour_blend_attachments);

    build_pipeline(
        device,
        render_pass,
        layout,
        &shader_stages,
        &vertex_input_info,
        &rasterizer,
        &multisampling,
        Some(&colour_blending),
    )
    .context("Failed to create the scene pipeline")
}

/// Create the depth-only shadow pipeline
pub fn create_shadow_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    vert_shader: vk::ShaderModule,
    depth_bias_constant: f32,
    depth_bias_slope: f32,
) -> Result<vk::Pipeline> {
    let shader_stages = [vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_shader)
        .name(ENTRY_POINT)];

    // Only position is read
    let bindings = [Vertex::binding_description()];
    let attributes = Vertex::attribute_descriptions();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes[..1]);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(true)
        .depth_bias_constant_factor(depth_bias_constant)
        .depth_bias_slope_factor(depth_bias_slope);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    build_pipeline(
        device,
        render_pass,
        layout,
        &shader_stages,
        &vertex_input_info,
        &rasterizer,
        &multisampling,
        None,
    )
    .context("Failed to create the shadow pipeline")
}

#[allow(clippy::too_many_arguments)]
fn build_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    shader_stages: &[vk::PipelineShaderStageCreateInfo],
    vertex_input_info: &vk::PipelineVertexInputStateCreateInfo,
    rasterizer: &vk::PipelineRasterizationStateCreateInfo,
    multisampling: &vk::PipelineMultisampleStateCreateInfo,
    colour_blending: Option<&vk::PipelineColorBlendStateCreateInfo>,
) -> Result<vk::Pipeline> {
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor are set while recording
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(shader_stages)
        .vertex_input_state(vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(rasterizer)
        .multisample_state(multisampling)
        .depth_stencil_state(&depth_stencil)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);
    if let Some(colour_blending) = colour_blending {
        pipeline_info = pipeline_info.color_blend_state(colour_blending);
    }

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| e)
    .context("vkCreateGraphicsPipelines failed")?;

    pipelines
        .into_iter()
        .next()
        .context("Driver returned no pipeline")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sample_renders_straight_to_swapchain() {
        let attachments = scene_attachments(
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::D32_SFLOAT,
            vk::SampleCountFlags::TYPE_1,
        );
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(attachments[0].store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn multisampled_pass_resolves_into_swapchain() {
        let attachments = scene_attachments(
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::D32_SFLOAT,
            vk::SampleCountFlags::TYPE_4,
        );
        assert_eq!(attachments.len(), 3);
        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachments[2].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn shadow_push_constant_is_one_matrix() {
        assert_eq!(shadow_push_constant_range().size, 64);
    }
}
