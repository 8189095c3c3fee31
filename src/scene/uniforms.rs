// Uniform blocks shared with the shaders and the dynamic per-object buffer
//
// Layouts follow std140: mat4 is 64 bytes, vec3 + float packs into 16.

use anyhow::{bail, Result};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::marker::PhantomData;
use std::mem::size_of;

/// Set 0, binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    pub projection: Mat4,
    pub view: Mat4,
    pub light_space: Mat4,
    /// w is unused
    pub camera_position: [f32; 4],
}

impl Default for ViewProjection {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            light_space: Mat4::IDENTITY,
            camera_position: [0.0; 4],
        }
    }
}

/// Set 0, binding 1 - one slot per drawable in the dynamic buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModelUniform {
    pub model: Mat4,
    /// Inverse transpose of `model`, for normals
    pub inverse_model: Mat4,
    pub has_texture: u32,
    _pad: [u32; 3],
}

impl ModelUniform {
    pub fn new(model: Mat4, has_texture: bool) -> Self {
        Self {
            model,
            inverse_model: model.inverse().transpose(),
            has_texture: has_texture as u32,
            _pad: [0; 3],
        }
    }

    pub fn set_model(&mut self, model: Mat4) {
        self.model = model;
        self.inverse_model = model.inverse().transpose();
    }

    pub fn set_texture(&mut self, enabled: bool) {
        self.has_texture = enabled as u32;
    }

    pub fn texture_enabled(&self) -> bool {
        self.has_texture != 0
    }
}

impl Default for ModelUniform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, false)
    }
}

/// Set 0, binding 2
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformLight {
    pub colour: [f32; 3],
    pub ambient_intensity: f32,
    pub direction: [f32; 3],
    pub diffuse_intensity: f32,
}

impl UniformLight {
    pub fn new(colour: Vec3, ambient: f32, direction: Vec3, diffuse: f32) -> Self {
        Self {
            colour: colour.to_array(),
            ambient_intensity: ambient,
            direction: direction.to_array(),
            diffuse_intensity: diffuse,
        }
    }
}

/// Round `size` up to the next multiple of `alignment` (a power of two, or 0)
pub fn align_to(size: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return size;
    }
    (size + alignment - 1) & !(alignment - 1)
}

/// CPU-side staging for a dynamic uniform buffer.
///
/// Each value occupies a slot padded to the device's minimum uniform
/// buffer offset alignment so it can be selected with a dynamic offset.
pub struct DynamicUniformBuffer<T: Pod> {
    data: Vec<u8>,
    stride: usize,
    capacity: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> DynamicUniformBuffer<T> {
    pub fn new(capacity: usize, min_alignment: u64) -> Self {
        let stride = align_to(size_of::<T>() as u64, min_alignment) as usize;
        Self {
            data: vec![0; stride * capacity],
            stride,
            capacity,
            _marker: PhantomData,
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total size in bytes of the GPU buffer backing all slots
    pub fn size_in_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn write(&mut self, index: usize, value: &T) -> Result<()> {
        if index >= self.capacity {
            bail!(
                "Dynamic uniform slot {} out of range (capacity {})",
                index,
                self.capacity
            );
        }
        let start = index * self.stride;
        self.data[start..start + size_of::<T>()].copy_from_slice(bytemuck::bytes_of(value));
        Ok(())
    }

    /// Bytes of the first `count` slots, clamped to capacity
    pub fn as_bytes(&self, count: usize) -> &[u8] {
        &self.data[..count.min(self.capacity) * self.stride]
    }

    /// Dynamic offset to bind for slot `index`
    pub fn offset(&self, index: usize) -> u32 {
        (index * self.stride) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std140_sizes() {
        assert_eq!(size_of::<ViewProjection>(), 208);
        assert_eq!(size_of::<ModelUniform>(), 144);
        assert_eq!(size_of::<UniformLight>(), 32);
    }

    #[test]
    fn align_rounds_up_to_power_of_two() {
        assert_eq!(align_to(144, 256), 256);
        assert_eq!(align_to(144, 64), 192);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(144, 0), 144);
        assert_eq!(align_to(0, 16), 0);
    }

    #[test]
    fn dynamic_slots_are_aligned() {
        let mut buffer = DynamicUniformBuffer::<ModelUniform>::new(4, 256);
        assert_eq!(buffer.stride(), 256);
        assert_eq!(buffer.size_in_bytes(), 1024);
        assert_eq!(buffer.offset(3), 768);

        let uniform = ModelUniform::new(Mat4::from_translation(Vec3::X), true);
        buffer.write(2, &uniform).unwrap();

        let bytes = buffer.as_bytes(3);
        assert_eq!(bytes.len(), 768);
        let slot: ModelUniform =
            bytemuck::pod_read_unaligned(&bytes[512..512 + size_of::<ModelUniform>()]);
        assert_eq!(slot, uniform);
        assert!(slot.texture_enabled());
    }

    #[test]
    fn writing_past_capacity_fails() {
        let mut buffer = DynamicUniformBuffer::<ModelUniform>::new(2, 64);
        assert!(buffer.write(2, &ModelUniform::default()).is_err());
        assert_eq!(buffer.as_bytes(10).len(), 2 * 192);
    }

    #[test]
    fn inverse_model_is_inverse_transpose() {
        let model = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let uniform = ModelUniform::new(model, false);
        let expected = model.inverse().transpose();
        assert!(uniform.inverse_model.abs_diff_eq(expected, 1e-6));
        assert!(!uniform.texture_enabled());
    }
}
