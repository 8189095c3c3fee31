// Meshes: CPU geometry and its GPU upload

use anyhow::{bail, Result};
use ash::vk;
use glam::Mat4;
use std::sync::Arc;
use super::uniforms::ModelUniform;
use super::vertex::Vertex;
use crate::backend::buffer::GpuBuffer;
use crate::backend::commands::TransferContext;
use crate::backend::VulkanDevice;

/// Geometry before upload
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

/// Device-local vertex and index buffers plus per-object uniform state
pub struct Mesh {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
    uniform: ModelUniform,
    texture_id: usize,
}

impl Mesh {
    pub fn new(
        device: &Arc<VulkanDevice>,
        transfer: TransferContext,
        data: &MeshData,
        texture_id: usize,
    ) -> Result<Self> {
        if data.vertices.is_empty() || data.indices.is_empty() {
            bail!(
                "Mesh needs vertices and indices (got {} and {})",
                data.vertices.len(),
                data.indices.len()
            );
        }

        let vertex_buffer = GpuBuffer::device_local_with_data(
            device,
            transfer,
            "vertex buffer",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &data.vertices,
        )?;
        let index_buffer = GpuBuffer::device_local_with_data(
            device,
            transfer,
            "index buffer",
            vk::BufferUsageFlags::INDEX_BUFFER,
            &data.indices,
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: data.indices.len() as u32,
            uniform: ModelUniform::new(Mat4::IDENTITY, texture_id != 0),
            texture_id,
        })
    }

    pub fn set_model(&mut self, model: Mat4) {
        self.uniform.set_model(model);
    }

    /// Texturing can only be turned on for meshes that have a real texture
    pub fn set_texture(&mut self, enabled: bool) {
        self.uniform.set_texture(enabled && self.texture_id != 0);
    }

    pub fn uniform(&self) -> &ModelUniform {
        &self.uniform
    }

    pub fn texture_id(&self) -> usize {
        self.texture_id
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.buffer
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.buffer
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}
