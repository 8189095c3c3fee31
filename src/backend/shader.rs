// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. build.rs compiles the GLSL in
// shaders/ with glslc; the renderer reads the .spv files at runtime so they
// can be swapped while the program runs.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use super::VulkanDevice;

/// Create a shader module from SPIR-V bytes
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    // read_spv checks the magic number and copies into properly aligned words
    let words = ash::util::read_spv(&mut Cursor::new(code)).context("Invalid SPIR-V bytecode")?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(&words);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

/// Load a compiled shader from disk
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let code = std::fs::read(path).with_context(|| format!("Failed to open shader {:?}", path))?;
    log::debug!("Loaded shader {:?} ({} bytes)", path, code.len());
    create_shader_module(device, &code).with_context(|| format!("In shader {:?}", path))
}
