// =============================================================================
// RENDERER - Owns every Vulkan object and draws the scene
// =============================================================================
//
// FRAME FLOW:
// 1. Wait for the fence of this frame slot
// 2. Acquire a swapchain image
// 3. Write this slot's uniforms (view/projection, light, dynamic models)
// 4. Re-record the command buffer: shadow pass, then scene pass
// 5. Submit, present, advance to the next slot
//
// Meshes, models and textures are addressed by the index returned when they
// were created. Texture 0 is a 1x1 white texture.

use anyhow::{bail, Context, Result};
use ash::vk;
use glam::{Mat4, Vec3};
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::buffer::GpuBuffer;
use crate::backend::commands::{submit_one_time, TransferContext};
use crate::backend::descriptors::{self, UniformSetResources};
use crate::backend::image::{self, GpuImage, ImageDesc};
use crate::backend::pipeline;
use crate::backend::shader::load_shader_module;
use crate::backend::swapchain::AcquireOutcome;
use crate::backend::sync::FrameSync;
use crate::backend::{Swapchain, VulkanDevice};
use crate::config::{sample_count_from_level, Config, ShadowConfig};
use crate::scene::camera::perspective;
use crate::scene::uniforms::{DynamicUniformBuffer, ModelUniform, UniformLight, ViewProjection};
use crate::scene::{DirectionalLight, Mesh, MeshData, MeshModel};

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
const NEAR_PLANE: f32 = 0.1;
const FAR_PLANE: f32 = 100.0;

const SCENE_VERT: &str = "scene.vert.spv";
const SCENE_FRAG: &str = "scene.frag.spv";
const SHADOW_VERT: &str = "shadow.vert.spv";

struct Texture {
    _image: GpuImage,
    sampler: vk::Sampler,
    descriptor_set: vk::DescriptorSet,
}

/// Everything one frame in flight writes to
struct FrameResources {
    sync: FrameSync,
    command_buffer: vk::CommandBuffer,
    view_projection: GpuBuffer,
    models: GpuBuffer,
    light: GpuBuffer,
    uniform_set: vk::DescriptorSet,
}

/// Depth-only pass rendered from the light
struct ShadowPass {
    map: GpuImage,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    sampler: vk::Sampler,
    settings: ShadowConfig,
}

impl ShadowPass {
    fn new(
        device: &Arc<VulkanDevice>,
        depth_format: vk::Format,
        settings: &ShadowConfig,
        shader_dir: &Path,
    ) -> Result<Self> {
        let size = settings.map_size.max(1);
        let map = GpuImage::shadow_map(device, depth_format, size)?;
        let render_pass = pipeline::create_shadow_render_pass(device, depth_format)?;
        let framebuffer = pipeline::create_framebuffer(device, render_pass, &[map.view], map.extent)?;
        let layout =
            pipeline::create_pipeline_layout(device, &[], &[pipeline::shadow_push_constant_range()])?;
        let pipeline = build_shadow_pipeline(device, shader_dir, render_pass, layout, settings)?;
        let sampler = image::create_shadow_sampler(device)?;

        log::info!("Shadow map: {}x{} ({:?})", size, size, depth_format);

        Ok(Self {
            map,
            render_pass,
            framebuffer,
            layout,
            pipeline,
            sampler,
            settings: settings.clone(),
        })
    }

    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_framebuffer(self.framebuffer, None);
            device.destroy_render_pass(self.render_pass, None);
            device.destroy_sampler(self.sampler, None);
        }
    }
}

/// Swapchain plus the attachments and framebuffers sized to it
struct SwapchainTargets {
    framebuffers: Vec<vk::Framebuffer>,
    _colour: Option<GpuImage>,
    _depth: GpuImage,
    swapchain: Swapchain,
    device: Arc<VulkanDevice>,
}

impl SwapchainTargets {
    fn new(
        device: &Arc<VulkanDevice>,
        swapchain: Swapchain,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        let colour = if samples == vk::SampleCountFlags::TYPE_1 {
            None
        } else {
            Some(GpuImage::colour_attachment(
                device,
                swapchain.format,
                swapchain.extent,
                samples,
            )?)
        };
        let depth = GpuImage::depth_attachment(device, depth_format, swapchain.extent, samples)?;

        let framebuffers = pipeline::create_scene_framebuffers(
            device,
            render_pass,
            &swapchain.image_views,
            colour.as_ref().map(|image| image.view),
            depth.view,
            swapchain.extent,
        )?;

        Ok(Self {
            framebuffers,
            _colour: colour,
            _depth: depth,
            swapchain,
            device: device.clone(),
        })
    }
}

impl Drop for SwapchainTargets {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

pub struct Renderer {
    // ─────────────────────────────────────────────────────────────────────────
    // SCENE
    // ─────────────────────────────────────────────────────────────────────────
    meshes: Vec<Mesh>,
    models: Vec<MeshModel>,
    textures: Vec<Texture>,
    light: DirectionalLight,

    // ─────────────────────────────────────────────────────────────────────────
    // PER-FRAME DATA
    // ─────────────────────────────────────────────────────────────────────────
    frames: Vec<FrameResources>,
    model_transfer: DynamicUniformBuffer<ModelUniform>,
    current_frame: usize,
    warned_object_overflow: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // PASSES AND PIPELINES
    // ─────────────────────────────────────────────────────────────────────────
    shadow: ShadowPass,
    targets: Option<SwapchainTargets>,
    scene_render_pass: vk::RenderPass,
    scene_layout: vk::PipelineLayout,
    scene_pipeline: vk::Pipeline,
    /// Format and sample count the scene pass was built for
    scene_format: vk::Format,
    scene_samples: vk::SampleCountFlags,

    // ─────────────────────────────────────────────────────────────────────────
    // DESCRIPTORS AND COMMANDS
    // ─────────────────────────────────────────────────────────────────────────
    uniform_set_layout: vk::DescriptorSetLayout,
    sampler_set_layout: vk::DescriptorSetLayout,
    uniform_pool: vk::DescriptorPool,
    sampler_pool: vk::DescriptorPool,
    command_pool: vk::CommandPool,

    // ─────────────────────────────────────────────────────────────────────────
    // SETTINGS
    // ─────────────────────────────────────────────────────────────────────────
    msaa_samples: vk::SampleCountFlags,
    present_mode: vk::PresentModeKHR,
    depth_format: vk::Format,
    clear_colour: [f32; 4],
    shader_dir: PathBuf,
    max_textures: u32,
    fov: f32,
    window_size: (u32, u32),
    needs_recreate: bool,

    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new<W>(window: &W, width: u32, height: u32, config: &Config) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        // ─────────────────────────────────────────────────────────────────────
        // DEVICE AND SWAPCHAIN
        // ─────────────────────────────────────────────────────────────────────
        let device = VulkanDevice::new(&config.window.title, window, config.debug.validation_layers)?;

        let msaa_samples = clamp_sample_count(config.get_msaa_samples(), device.max_msaa_samples);
        log::info!(
            "MSAA: {:?} (device max {:?})",
            msaa_samples,
            device.max_msaa_samples
        );

        let present_mode = config.get_present_mode();
        let swapchain = Swapchain::new(device.clone(), present_mode, width, height)?;
        let scene_format = swapchain.format;
        let depth_format = image::find_depth_format(&device)?;

        // ─────────────────────────────────────────────────────────────────────
        // SCENE PASS
        // ─────────────────────────────────────────────────────────────────────
        let scene_render_pass =
            pipeline::create_scene_render_pass(&device, scene_format, depth_format, msaa_samples)?;

        let uniform_set_layout = descriptors::create_uniform_set_layout(&device)?;
        let sampler_set_layout = descriptors::create_sampler_set_layout(&device)?;

        let shader_dir = config.graphics.shader_dir.clone();
        let scene_layout = pipeline::create_pipeline_layout(
            &device,
            &[uniform_set_layout, sampler_set_layout],
            &[],
        )?;
        let scene_pipeline = build_scene_pipeline(
            &device,
            &shader_dir,
            scene_render_pass,
            scene_layout,
            msaa_samples,
        )?;

        let targets = SwapchainTargets::new(
            &device,
            swapchain,
            scene_render_pass,
            depth_format,
            msaa_samples,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // COMMANDS, UNIFORMS, DESCRIPTORS
        // ─────────────────────────────────────────────────────────────────────
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.graphics_queue_family);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create a command pool")?;

        let model_transfer = DynamicUniformBuffer::<ModelUniform>::new(
            config.graphics.max_objects.max(1),
            device.min_uniform_buffer_offset_alignment(),
        );
        log::info!(
            "Model uniform stride {} bytes, {} slots",
            model_transfer.stride(),
            model_transfer.capacity()
        );

        let frame_count = config.graphics.max_frames_in_flight.max(1);
        let max_textures = config.graphics.max_textures.max(1);
        let uniform_pool = descriptors::create_uniform_pool(&device, frame_count as u32)?;
        let sampler_pool = descriptors::create_sampler_pool(&device, max_textures)?;

        // ─────────────────────────────────────────────────────────────────────
        // SHADOW PASS
        // ─────────────────────────────────────────────────────────────────────
        let shadow = ShadowPass::new(&device, depth_format, &config.shadow, &shader_dir)?;

        // ─────────────────────────────────────────────────────────────────────
        // PER-FRAME RESOURCES
        // ─────────────────────────────────────────────────────────────────────
        let command_buffers = {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(frame_count as u32);
            unsafe { device.device.allocate_command_buffers(&alloc_info) }
                .context("Failed to allocate command buffers")?
        };
        let uniform_sets =
            descriptors::allocate_sets(&device, uniform_pool, uniform_set_layout, frame_count)?;

        let mut frames = Vec::with_capacity(frame_count);
        for (command_buffer, uniform_set) in command_buffers.into_iter().zip(uniform_sets) {
            let frame = FrameResources {
                sync: FrameSync::new(&device)?,
                command_buffer,
                view_projection: GpuBuffer::new(
                    &device,
                    "view projection",
                    size_of::<ViewProjection>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                )?,
                models: GpuBuffer::new(
                    &device,
                    "dynamic models",
                    model_transfer.size_in_bytes() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                )?,
                light: GpuBuffer::new(
                    &device,
                    "directional light",
                    size_of::<UniformLight>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                )?,
                uniform_set,
            };

            descriptors::write_uniform_set(
                &device,
                uniform_set,
                &UniformSetResources {
                    view_projection: (frame.view_projection.buffer, frame.view_projection.size),
                    model: (frame.models.buffer, model_transfer.stride() as vk::DeviceSize),
                    light: (frame.light.buffer, frame.light.size),
                    shadow_view: shadow.map.view,
                    shadow_sampler: shadow.sampler,
                },
            );

            frames.push(frame);
        }

        let mut renderer = Self {
            meshes: Vec::new(),
            models: Vec::new(),
            textures: Vec::new(),
            light: DirectionalLight::default(),
            frames,
            model_transfer,
            current_frame: 0,
            warned_object_overflow: false,
            shadow,
            targets: Some(targets),
            scene_render_pass,
            scene_layout,
            scene_pipeline,
            scene_format,
            scene_samples: msaa_samples,
            uniform_set_layout,
            sampler_set_layout,
            uniform_pool,
            sampler_pool,
            command_pool,
            msaa_samples,
            present_mode,
            depth_format,
            clear_colour: config.graphics.clear_color,
            shader_dir,
            max_textures,
            fov: 45.0,
            window_size: (width, height),
            needs_recreate: false,
            device,
        };

        let light = &config.scene.light;
        renderer.create_directional_light(
            Vec3::from(light.colour),
            light.ambient,
            Vec3::from(light.direction),
            light.diffuse,
        );

        // Texture 0 stands in for meshes without one
        renderer.create_texture_from_rgba("default white", 1, 1, &[255, 255, 255, 255])?;

        log::info!("Renderer ready: {} frames in flight", frame_count);
        Ok(renderer)
    }

    fn transfer(&self) -> TransferContext {
        TransferContext {
            queue: self.device.graphics_queue,
            command_pool: self.command_pool,
        }
    }

    // =========================================================================
    // TEXTURES
    // =========================================================================

    /// Load an image file as a mipmapped texture and return its id
    pub fn create_texture(&mut self, path: &Path) -> Result<usize> {
        let image = ::image::open(path)
            .with_context(|| format!("Failed to load texture {:?}", path))?
            .to_rgba8();
        let (width, height) = image.dimensions();

        self.create_texture_from_rgba(&path.to_string_lossy(), width, height, image.as_raw())
    }

    fn create_texture_from_rgba(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<usize> {
        if self.textures.len() >= self.max_textures as usize {
            bail!(
                "Cannot create texture {}: limit of {} textures reached",
                name,
                self.max_textures
            );
        }
        let expected = rgba_byte_len(width, height)
            .with_context(|| format!("Texture {} is too large ({}x{})", name, width, height))?;
        if pixels.len() != expected {
            bail!("Texture {} has {} bytes, expected {}x{} RGBA", name, pixels.len(), width, height);
        }

        let mip_levels = image::mip_levels(width, height);
        if mip_levels > 1 {
            image::check_linear_blit_support(&self.device, TEXTURE_FORMAT)?;
        }

        let staging = GpuBuffer::with_data(
            &self.device,
            "texture staging",
            vk::BufferUsageFlags::TRANSFER_SRC,
            pixels,
        )?;

        let texture_image = GpuImage::new(
            &self.device,
            &ImageDesc {
                name,
                width,
                height,
                mip_levels,
                samples: vk::SampleCountFlags::TYPE_1,
                format: TEXTURE_FORMAT,
                usage: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        )?;

        let device = &self.device;
        submit_one_time(device, self.transfer(), |cmd| {
            image::transition_image_layout(
                device,
                cmd,
                texture_image.image,
                mip_levels,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            image::copy_buffer_to_image(device, cmd, staging.buffer, texture_image.image, width, height);
            if mip_levels > 1 {
                image::generate_mipmaps(device, cmd, texture_image.image, width, height, mip_levels);
            } else {
                image::transition_image_layout(
                    device,
                    cmd,
                    texture_image.image,
                    1,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )?;
            }
            Ok(())
        })
        .with_context(|| format!("Failed to upload texture {}", name))?;

        let sampler = image::create_texture_sampler(device, mip_levels)?;
        let descriptor_set = match descriptors::allocate_sets(
            device,
            self.sampler_pool,
            self.sampler_set_layout,
            1,
        ) {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe { device.device.destroy_sampler(sampler, None) };
                return Err(e);
            }
        };
        descriptors::write_texture_set(device, descriptor_set, texture_image.view, sampler);

        log::debug!("Texture {}: {}x{}, {} mip levels", name, width, height, mip_levels);

        self.textures.push(Texture {
            _image: texture_image,
            sampler,
            descriptor_set,
        });
        Ok(self.textures.len() - 1)
    }

    // =========================================================================
    // MESHES AND MODELS
    // =========================================================================

    /// Upload a standalone mesh and return its id
    pub fn create_mesh(&mut self, data: &MeshData, texture: Option<&Path>) -> Result<usize> {
        let texture_id = match texture {
            Some(path) => self.create_texture(path)?,
            None => 0,
        };
        let mesh = Mesh::new(&self.device, self.transfer(), data, texture_id)?;
        self.meshes.push(mesh);
        Ok(self.meshes.len() - 1)
    }

    /// Load an OBJ model, creating textures from `texture_dir` per material
    pub fn create_model(&mut self, path: &Path, texture_dir: &Path) -> Result<usize> {
        let device = self.device.clone();
        let transfer = self.transfer();
        let model = MeshModel::load(&device, transfer, path, |file| {
            self.create_texture(&texture_dir.join(file))
        })?;
        self.models.push(model);

        let id = self.models.len() - 1;
        log::debug!("Model {} has {} meshes", id, self.models[id].mesh_count());
        Ok(id)
    }

    /// Set the model matrix of a standalone mesh
    pub fn update_model(&mut self, mesh_id: usize, model: Mat4) {
        if let Some(mesh) = self.meshes.get_mut(mesh_id) {
            mesh.set_model(model);
        }
    }

    pub fn update_mesh_model(&mut self, model_id: usize, model: Mat4) {
        if let Some(mesh_model) = self.models.get_mut(model_id) {
            mesh_model.set_model(model);
        }
    }

    pub fn set_texture_state_model(&mut self, model_id: usize, enabled: bool) {
        if let Some(mesh_model) = self.models.get_mut(model_id) {
            mesh_model.set_texture(enabled);
        }
    }

    pub fn set_texture_state_mesh(&mut self, mesh_id: usize, enabled: bool) {
        if let Some(mesh) = self.meshes.get_mut(mesh_id) {
            mesh.set_texture(enabled);
        }
    }

    /// Whether the first mesh of a model currently samples its texture
    pub fn texture_state_model(&self, model_id: usize) -> Option<bool> {
        let mesh_model = self.models.get(model_id)?;
        mesh_model.get_mesh(0).ok().map(|mesh| mesh.uniform().texture_enabled())
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    // =========================================================================
    // LIGHTING
    // =========================================================================

    pub fn create_directional_light(
        &mut self,
        colour: Vec3,
        ambient_intensity: f32,
        direction: Vec3,
        diffuse_intensity: f32,
    ) {
        self.light = DirectionalLight::new(colour, ambient_intensity, direction, diffuse_intensity);
    }

    pub fn update_directional_light(
        &mut self,
        direction: Option<Vec3>,
        colour: Option<Vec3>,
        ambient_intensity: Option<f32>,
        diffuse_intensity: Option<f32>,
    ) {
        self.light
            .update(direction, colour, ambient_intensity, diffuse_intensity);
    }

    pub fn light(&self) -> &DirectionalLight {
        &self.light
    }

    // =========================================================================
    // SETTINGS
    // =========================================================================

    /// Switch MSAA level (1, 2, 4 or 8), clamped to the device maximum
    pub fn set_multisample_level(&mut self, level: u32) -> Result<()> {
        let Some(requested) = sample_count_from_level(level) else {
            log::warn!("Ignoring unsupported multisample level {}", level);
            return Ok(());
        };

        let samples = clamp_sample_count(requested, self.device.max_msaa_samples);
        if samples == self.msaa_samples {
            return Ok(());
        }

        log::info!("MSAA {:?} -> {:?}", self.msaa_samples, samples);
        self.msaa_samples = samples;
        self.needs_recreate = true;
        self.recreate_swapchain()?;
        Ok(())
    }

    pub fn multisample_level(&self) -> u32 {
        self.msaa_samples.as_raw()
    }

    pub fn max_multisample_level(&self) -> u32 {
        self.device.max_msaa_samples.as_raw()
    }

    pub fn set_fov(&mut self, degrees: f32) {
        self.fov = degrees.clamp(1.0, 179.0);
    }

    /// Window size changed; the next draw rebuilds the swapchain
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
        self.needs_recreate = true;
    }

    // =========================================================================
    // SWAPCHAIN RECREATION
    // =========================================================================

    /// Rebuild the swapchain and everything sized to it.
    ///
    /// Returns false while the window has no area.
    fn recreate_swapchain(&mut self) -> Result<bool> {
        let (width, height) = self.window_size;
        if width == 0 || height == 0 {
            return Ok(false);
        }

        self.device.wait_idle()?;

        // Old swapchain must be gone before a new one is made for the surface
        self.targets = None;

        let swapchain = Swapchain::new(self.device.clone(), self.present_mode, width, height)?;

        if swapchain.format != self.scene_format || self.msaa_samples != self.scene_samples {
            let render_pass = pipeline::create_scene_render_pass(
                &self.device,
                swapchain.format,
                self.depth_format,
                self.msaa_samples,
            )?;
            let pipeline = match build_scene_pipeline(
                &self.device,
                &self.shader_dir,
                render_pass,
                self.scene_layout,
                self.msaa_samples,
            ) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    unsafe { self.device.device.destroy_render_pass(render_pass, None) };
                    return Err(e);
                }
            };

            unsafe {
                self.device.device.destroy_pipeline(self.scene_pipeline, None);
                self.device.device.destroy_render_pass(self.scene_render_pass, None);
            }
            self.scene_pipeline = pipeline;
            self.scene_render_pass = render_pass;
            self.scene_format = swapchain.format;
            self.scene_samples = self.msaa_samples;
        }

        self.targets = Some(SwapchainTargets::new(
            &self.device,
            swapchain,
            self.scene_render_pass,
            self.depth_format,
            self.msaa_samples,
        )?);
        self.needs_recreate = false;

        Ok(true)
    }

    /// Rebuild both pipelines from the SPIR-V on disk. Old pipelines stay on failure.
    pub fn reload_shaders(&mut self) -> Result<()> {
        self.device.wait_idle()?;

        let scene = build_scene_pipeline(
            &self.device,
            &self.shader_dir,
            self.scene_render_pass,
            self.scene_layout,
            self.scene_samples,
        )?;
        let shadow = match build_shadow_pipeline(
            &self.device,
            &self.shader_dir,
            self.shadow.render_pass,
            self.shadow.layout,
            &self.shadow.settings,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { self.device.device.destroy_pipeline(scene, None) };
                return Err(e);
            }
        };

        unsafe {
            self.device.device.destroy_pipeline(self.scene_pipeline, None);
            self.device.device.destroy_pipeline(self.shadow.pipeline, None);
        }
        self.scene_pipeline = scene;
        self.shadow.pipeline = shadow;

        log::info!("Shaders reloaded");
        Ok(())
    }

    // =========================================================================
    // DRAWING
    // =========================================================================

    /// Render one frame. Returns false if nothing was presented.
    pub fn draw(&mut self, view: Mat4, camera_position: Vec3) -> Result<bool> {
        if self.needs_recreate && !self.recreate_swapchain()? {
            return Ok(false);
        }

        let frame_index = self.current_frame;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until the GPU is done with this slot
        // ─────────────────────────────────────────────────────────────────────
        self.frames[frame_index].sync.wait(&self.device.device)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire a swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let targets = self.targets.as_ref().context("Swapchain not initialized")?;
        let image_available = self.frames[frame_index].sync.image_available;
        let image_index = match targets.swapchain.acquire_next_image(u64::MAX, image_available)? {
            AcquireOutcome::OutOfDate => {
                self.needs_recreate = true;
                return Ok(false);
            }
            AcquireOutcome::Image { index, suboptimal } => {
                if suboptimal {
                    self.needs_recreate = true;
                }
                index
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3-4: Uniforms for this slot, then record
        // ─────────────────────────────────────────────────────────────────────
        let prepared = self
            .update_uniforms(frame_index, view, camera_position)
            .and_then(|draw_count| self.record_commands(frame_index, image_index, draw_count));
        if let Err(e) = prepared {
            // The acquire already signalled image_available; consume it
            if let Err(release) = self.release_acquired(frame_index) {
                log::error!("Failed to release acquired image: {:?}", release);
            }
            return Err(e);
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Submit
        // ─────────────────────────────────────────────────────────────────────
        let frame = &self.frames[frame_index];
        frame.sync.reset(&self.device.device)?;

        let wait_semaphores = [frame.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.sync.render_finished];
        let command_buffers = [frame.command_buffer];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                frame.sync.in_flight_fence,
            )
        }
        .context("Failed to submit draw command buffer")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Present
        // ─────────────────────────────────────────────────────────────────────
        let targets = self.targets.as_ref().context("Swapchain not initialized")?;
        if targets
            .swapchain
            .present(self.device.present_queue, image_index, &signal_semaphores)?
        {
            self.needs_recreate = true;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 7: Next slot
        // ─────────────────────────────────────────────────────────────────────
        self.current_frame = (self.current_frame + 1) % self.frames.len();

        Ok(true)
    }

    /// Consume this slot's image-available signal without drawing.
    ///
    /// The fence is re-armed by the empty submit, and the swapchain is rebuilt
    /// on the next draw so the unpresented image is returned.
    fn release_acquired(&mut self, frame_index: usize) -> Result<()> {
        let sync = &self.frames[frame_index].sync;
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

        sync.reset(&self.device.device)?;
        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[wait_only_submit(&wait_semaphores, &wait_stages)],
                sync.in_flight_fence,
            )
        }
        .context("Failed to submit semaphore release")?;

        self.needs_recreate = true;
        Ok(())
    }

    /// Write view/projection, light and model uniforms for a frame slot.
    ///
    /// Returns how many drawables fit in the dynamic buffer.
    fn update_uniforms(&mut self, frame_index: usize, view: Mat4, camera_position: Vec3) -> Result<usize> {
        let aspect = self
            .targets
            .as_ref()
            .map(|targets| targets.swapchain.aspect_ratio())
            .unwrap_or(1.0);

        let settings = &self.shadow.settings;
        let view_projection = ViewProjection {
            projection: perspective(self.fov, aspect, NEAR_PLANE, FAR_PLANE),
            view,
            light_space: self
                .light
                .light_space_matrix(settings.extent, settings.near, settings.far),
            camera_position: camera_position.extend(1.0).to_array(),
        };

        let mut count = 0;
        for mesh in drawables(&self.meshes, &self.models) {
            if count == self.model_transfer.capacity() {
                break;
            }
            self.model_transfer.write(count, mesh.uniform())?;
            count += 1;
        }

        let total = drawables(&self.meshes, &self.models).count();
        if total > count && !self.warned_object_overflow {
            log::warn!(
                "{} drawables but room for {}; raise graphics.max_objects to draw the rest",
                total,
                count
            );
            self.warned_object_overflow = true;
        }

        let frame = &mut self.frames[frame_index];
        frame.view_projection.write(&view_projection)?;
        frame.light.write(&self.light.uniform())?;
        frame
            .models
            .write_bytes(0, self.model_transfer.as_bytes(count))?;

        Ok(count)
    }

    fn record_commands(&self, frame_index: usize, image_index: u32, draw_count: usize) -> Result<()> {
        let device = &self.device.device;
        let frame = &self.frames[frame_index];
        let cmd = frame.command_buffer;
        let targets = self.targets.as_ref().context("Swapchain not initialized")?;
        let framebuffer = *targets
            .framebuffers
            .get(image_index as usize)
            .context("Swapchain image index out of range")?;

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;
            device
                .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                .context("Failed to start recording a command buffer")?;

            // ─────────────────────────────────────────────────────────────────
            // SHADOW PASS
            // ─────────────────────────────────────────────────────────────────
            // Always runs so the map is cleared to far depth when disabled
            let shadow_extent = self.shadow.map.extent;
            let shadow_clear = [vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            }];
            let shadow_begin = vk::RenderPassBeginInfo::default()
                .render_pass(self.shadow.render_pass)
                .framebuffer(self.shadow.framebuffer)
                .render_area(full_rect(shadow_extent))
                .clear_values(&shadow_clear);

            device.cmd_begin_render_pass(cmd, &shadow_begin, vk::SubpassContents::INLINE);

            if self.shadow.settings.enabled {
                let settings = &self.shadow.settings;
                let light_space =
                    self.light
                        .light_space_matrix(settings.extent, settings.near, settings.far);

                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.shadow.pipeline);
                device.cmd_set_viewport(cmd, 0, &[full_viewport(shadow_extent)]);
                device.cmd_set_scissor(cmd, 0, &[full_rect(shadow_extent)]);

                for mesh in drawables(&self.meshes, &self.models).take(draw_count) {
                    let light_mvp = light_space * mesh.uniform().model;
                    device.cmd_push_constants(
                        cmd,
                        self.shadow.layout,
                        vk::ShaderStageFlags::VERTEX,
                        0,
                        bytemuck::bytes_of(&light_mvp),
                    );
                    bind_and_draw(device, cmd, mesh);
                }
            }

            device.cmd_end_render_pass(cmd);

            // ─────────────────────────────────────────────────────────────────
            // SCENE PASS
            // ─────────────────────────────────────────────────────────────────
            let extent = targets.swapchain.extent;
            let clear_values = [
                vk::ClearValue {
                    color: vk::ClearColorValue { float32: self.clear_colour },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                },
            ];
            let scene_begin = vk::RenderPassBeginInfo::default()
                .render_pass(self.scene_render_pass)
                .framebuffer(framebuffer)
                .render_area(full_rect(extent))
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(cmd, &scene_begin, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.scene_pipeline);
            device.cmd_set_viewport(cmd, 0, &[full_viewport(extent)]);
            device.cmd_set_scissor(cmd, 0, &[full_rect(extent)]);

            for (slot, mesh) in drawables(&self.meshes, &self.models).take(draw_count).enumerate() {
                let texture = self
                    .textures
                    .get(mesh.texture_id())
                    .or_else(|| self.textures.first())
                    .context("No textures loaded")?;

                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.scene_layout,
                    0,
                    &[frame.uniform_set, texture.descriptor_set],
                    &[self.model_transfer.offset(slot)],
                );
                bind_and_draw(device, cmd, mesh);
            }

            device.cmd_end_render_pass(cmd);

            device
                .end_command_buffer(cmd)
                .context("Failed to stop recording a command buffer")?;
        }

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Destroying renderer...");

        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle failed during shutdown: {:?}", e);
        }

        let device = &self.device.device;
        unsafe {
            for frame in &self.frames {
                frame.sync.destroy(device);
            }
            for texture in &self.textures {
                device.destroy_sampler(texture.sampler, None);
            }

            device.destroy_descriptor_pool(self.sampler_pool, None);
            device.destroy_descriptor_pool(self.uniform_pool, None);

            self.targets = None;
            device.destroy_pipeline(self.scene_pipeline, None);
            device.destroy_pipeline_layout(self.scene_layout, None);
            device.destroy_render_pass(self.scene_render_pass, None);
            self.shadow.destroy(device);

            device.destroy_descriptor_set_layout(self.sampler_set_layout, None);
            device.destroy_descriptor_set_layout(self.uniform_set_layout, None);

            // Frees the command buffers too
            device.destroy_command_pool(self.command_pool, None);
        }

        // Buffers, images and the device itself drop with the fields
    }
}

/// Standalone meshes first, then every mesh of every model
fn drawables<'a>(meshes: &'a [Mesh], models: &'a [MeshModel]) -> impl Iterator<Item = &'a Mesh> {
    meshes
        .iter()
        .chain(models.iter().flat_map(|model| model.meshes().iter()))
}

/// Size of a tightly packed RGBA8 image, or None on overflow
fn rgba_byte_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(4)
}

/// A batch with no work that only waits on `wait_semaphores`
fn wait_only_submit<'a>(
    wait_semaphores: &'a [vk::Semaphore],
    wait_stages: &'a [vk::PipelineStageFlags],
) -> vk::SubmitInfo<'a> {
    vk::SubmitInfo::default()
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
}

/// Never exceed what the device supports for colour and depth together
pub fn clamp_sample_count(
    requested: vk::SampleCountFlags,
    max: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    if requested.as_raw() > max.as_raw() {
        max
    } else {
        requested
    }
}

fn build_scene_pipeline(
    device: &VulkanDevice,
    shader_dir: &Path,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    samples: vk::SampleCountFlags,
) -> Result<vk::Pipeline> {
    let vert = load_shader_module(device, &shader_dir.join(SCENE_VERT))?;
    let frag = match load_shader_module(device, &shader_dir.join(SCENE_FRAG)) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.device.destroy_shader_module(vert, None) };
            return Err(e);
        }
    };

    let pipeline = pipeline::create_scene_pipeline(device, render_pass, layout, vert, frag, samples);

    // Modules are only needed while the pipeline is created
    unsafe {
        device.device.destroy_shader_module(vert, None);
        device.device.destroy_shader_module(frag, None);
    }

    pipeline
}

fn build_shadow_pipeline(
    device: &VulkanDevice,
    shader_dir: &Path,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    settings: &ShadowConfig,
) -> Result<vk::Pipeline> {
    let vert = load_shader_module(device, &shader_dir.join(SHADOW_VERT))?;
    let pipeline = pipeline::create_shadow_pipeline(
        device,
        render_pass,
        layout,
        vert,
        settings.depth_bias_constant,
        settings.depth_bias_slope,
    );
    unsafe { device.device.destroy_shader_module(vert, None) };
    pipeline
}

unsafe fn bind_and_draw(device: &ash::Device, cmd: vk::CommandBuffer, mesh: &Mesh) {
    device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer()], &[0]);
    device.cmd_bind_index_buffer(cmd, mesh.index_buffer(), 0, vk::IndexType::UINT32);
    device.cmd_draw_indexed(cmd, mesh.index_count(), 1, 0, 0, 0);
}

fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_size_does_not_wrap() {
        assert_eq!(rgba_byte_len(1, 1), Some(4));
        assert_eq!(rgba_byte_len(512, 256), Some(512 * 256 * 4));
        // 65536 * 65536 * 4 wraps a u32 to zero
        let big = rgba_byte_len(65536, 65536);
        assert_ne!(big, Some(0));
        if let Some(len) = big {
            assert_eq!(len as u64, 65536u64 * 65536 * 4);
        }
        assert_eq!(rgba_byte_len(u32::MAX, u32::MAX), None);
    }

    #[test]
    fn wait_only_batch_consumes_semaphore_without_work() {
        let semaphores = [vk::Semaphore::null()];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = wait_only_submit(&semaphores, &stages);

        assert_eq!(submit.wait_semaphore_count, 1);
        assert_eq!(submit.command_buffer_count, 0);
        assert_eq!(submit.signal_semaphore_count, 0);
    }

    #[test]
    fn sample_count_is_clamped_to_device() {
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::TYPE_8, vk::SampleCountFlags::TYPE_4),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::TYPE_2, vk::SampleCountFlags::TYPE_4),
            vk::SampleCountFlags::TYPE_2
        );
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::TYPE_4, vk::SampleCountFlags::TYPE_1),
            vk::SampleCountFlags::TYPE_1
        );
    }
}
