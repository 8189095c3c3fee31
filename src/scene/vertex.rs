// Vertex layout and smooth-normal generation

use anyhow::{bail, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::mem::{offset_of, size_of};

/// Interleaved vertex as read by the scene and shadow shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub col: [f32; 3],
    pub tex: [f32; 2],
    pub normal: [f32; 3],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], col: [f32; 3], tex: [f32; 2], normal: [f32; 3]) -> Self {
        Self { pos, col, tex, normal }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Position, colour, texcoord, normal at locations 0..=3
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        let attribute = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };

        [
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, pos)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, col)),
            attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Self, tex)),
            attribute(3, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, normal)),
        ]
    }
}

/// Replace vertex normals with the average of the faces that share them.
///
/// Indices are read as a triangle list; a trailing partial triangle is
/// ignored. Degenerate faces add nothing. Vertices that receive no face
/// normal keep their current one, renormalized.
pub fn calc_average_normals(indices: &[u32], vertices: &mut [Vertex]) -> Result<()> {
    if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
        bail!(
            "Index {} out of range for mesh with {} vertices",
            bad,
            vertices.len()
        );
    }

    let mut accumulated = vec![Vec3::ZERO; vertices.len()];
    let mut touched = vec![false; vertices.len()];

    for triangle in indices.chunks_exact(3) {
        let [i0, i1, i2] = [triangle[0] as usize, triangle[1] as usize, triangle[2] as usize];

        let p0 = Vec3::from(vertices[i0].pos);
        let p1 = Vec3::from(vertices[i1].pos);
        let p2 = Vec3::from(vertices[i2].pos);

        let face_normal = (p1 - p0).cross(p2 - p0).normalize_or_zero();
        if face_normal == Vec3::ZERO {
            continue;
        }

        for i in [i0, i1, i2] {
            accumulated[i] += face_normal;
            touched[i] = true;
        }
    }

    for ((vertex, sum), touched) in vertices.iter_mut().zip(accumulated).zip(touched) {
        let normal = if touched {
            sum
        } else {
            Vec3::from(vertex.normal)
        };
        vertex.normal = normal.normalize_or_zero().to_array();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32, y: f32, z: f32) -> Vertex {
        Vertex::new([x, y, z], [1.0; 3], [0.0; 2], [0.0; 3])
    }

    fn assert_close(a: [f32; 3], b: [f32; 3]) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn layout_matches_shader_locations() {
        assert_eq!(size_of::<Vertex>(), 44);
        assert_eq!(Vertex::binding_description().stride, 44);

        let offsets: Vec<u32> = Vertex::attribute_descriptions().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32]);
    }

    #[test]
    fn flat_quad_faces_positive_z() {
        let mut vertices = vec![
            at(-1.0, -1.0, 0.0),
            at(1.0, -1.0, 0.0),
            at(1.0, 1.0, 0.0),
            at(-1.0, 1.0, 0.0),
        ];
        calc_average_normals(&[0, 1, 2, 2, 3, 0], &mut vertices).unwrap();

        for v in &vertices {
            assert_close(v.normal, [0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn shared_edge_averages_both_faces() {
        // Two faces folded 90 degrees along the X axis
        let mut vertices = vec![
            at(0.0, 0.0, 0.0),
            at(1.0, 0.0, 0.0),
            at(0.0, 1.0, 0.0),
            at(0.0, 0.0, 1.0),
        ];
        // Face A (0,1,2) points +Z, face B (0,3,1) points +Y
        calc_average_normals(&[0, 1, 2, 0, 3, 1], &mut vertices).unwrap();

        let s = std::f32::consts::FRAC_1_SQRT_2;
        assert_close(vertices[0].normal, [0.0, s, s]);
        assert_close(vertices[1].normal, [0.0, s, s]);
        assert_close(vertices[2].normal, [0.0, 0.0, 1.0]);
        assert_close(vertices[3].normal, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn degenerate_faces_and_trailing_indices_are_ignored() {
        let mut vertices = vec![
            at(0.0, 0.0, 0.0),
            at(1.0, 0.0, 0.0),
            at(0.0, 1.0, 0.0),
            at(2.0, 0.0, 0.0),
        ];
        vertices[3].normal = [0.0, 3.0, 0.0];
        // Second face is collinear, then two stray indices
        calc_average_normals(&[0, 1, 2, 0, 1, 3, 2, 1], &mut vertices).unwrap();

        assert_close(vertices[0].normal, [0.0, 0.0, 1.0]);
        assert_close(vertices[1].normal, [0.0, 0.0, 1.0]);
        // Only used by the degenerate face, so its own normal survives
        assert_close(vertices[3].normal, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn untouched_vertex_keeps_normal() {
        let mut vertices = vec![at(0.0, 0.0, 0.0), at(1.0, 0.0, 0.0), at(0.0, 1.0, 0.0), at(5.0, 5.0, 5.0)];
        vertices[3].normal = [2.0, 0.0, 0.0];
        calc_average_normals(&[0, 1, 2], &mut vertices).unwrap();
        assert_close(vertices[3].normal, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let mut vertices = vec![at(0.0, 0.0, 0.0), at(1.0, 0.0, 0.0)];
        assert!(calc_average_normals(&[0, 1, 2], &mut vertices).is_err());
    }
}
