// Built-in meshes for the default scene
//
// Faces are wound counter-clockwise seen from outside and carry flat
// normals. Texcoords use Vulkan's top-left origin.

use glam::Vec3;
use super::mesh::MeshData;
use super::vertex::Vertex;

const QUAD_UVS: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];
const TRIANGLE_UVS: [[f32; 2]; 3] = [[0.0, 1.0], [1.0, 1.0], [0.5, 0.0]];

/// Append a convex face as a triangle fan
fn push_face(data: &mut MeshData, corners: &[Vec3], uvs: &[[f32; 2]], colour: [f32; 3]) {
    let normal = (corners[1] - corners[0])
        .cross(corners[2] - corners[0])
        .normalize_or_zero()
        .to_array();

    let base = data.vertices.len() as u32;
    for (corner, uv) in corners.iter().zip(uvs) {
        data.vertices
            .push(Vertex::new(corner.to_array(), colour, *uv, normal));
    }
    for i in 1..corners.len() as u32 - 1 {
        data.indices.extend_from_slice(&[base, base + i, base + i + 1]);
    }
}

/// Unit quad in the XY plane facing +Z
pub fn quad(colour: [f32; 3]) -> MeshData {
    let mut data = MeshData::default();
    push_face(
        &mut data,
        &[
            Vec3::new(-0.5, -0.5, 0.0),
            Vec3::new(0.5, -0.5, 0.0),
            Vec3::new(0.5, 0.5, 0.0),
            Vec3::new(-0.5, 0.5, 0.0),
        ],
        &QUAD_UVS,
        colour,
    );
    data
}

/// Ground plane of half-size `half_extent` on y = 0, facing +Y.
/// The texture repeats `tiling` times across it.
pub fn plane(half_extent: f32, tiling: f32, colour: [f32; 3]) -> MeshData {
    let h = half_extent;
    let uvs = QUAD_UVS.map(|[u, v]| [u * tiling, v * tiling]);

    let mut data = MeshData::default();
    push_face(
        &mut data,
        &[
            Vec3::new(-h, 0.0, -h),
            Vec3::new(-h, 0.0, h),
            Vec3::new(h, 0.0, h),
            Vec3::new(h, 0.0, -h),
        ],
        &uvs,
        colour,
    );
    data
}

/// Square pyramid standing on y = 0
pub fn pyramid(half_base: f32, height: f32, colour: [f32; 3]) -> MeshData {
    let h = half_base;
    let apex = Vec3::new(0.0, height, 0.0);
    let (a, b, c, d) = (
        Vec3::new(-h, 0.0, -h),
        Vec3::new(h, 0.0, -h),
        Vec3::new(h, 0.0, h),
        Vec3::new(-h, 0.0, h),
    );

    let mut data = MeshData::default();
    push_face(&mut data, &[a, b, c, d], &QUAD_UVS, colour);
    for (left, right) in [(d, c), (c, b), (b, a), (a, d)] {
        push_face(&mut data, &[left, right, apex], &TRIANGLE_UVS, colour);
    }
    data
}

/// Axis-aligned cube centred on the origin
pub fn cube(half_extent: f32, colour: [f32; 3]) -> MeshData {
    let h = half_extent;
    let v = Vec3::new;

    let faces = [
        [v(-h, -h, h), v(h, -h, h), v(h, h, h), v(-h, h, h)],     // +Z
        [v(h, -h, -h), v(-h, -h, -h), v(-h, h, -h), v(h, h, -h)], // -Z
        [v(h, -h, h), v(h, -h, -h), v(h, h, -h), v(h, h, h)],     // +X
        [v(-h, -h, -h), v(-h, -h, h), v(-h, h, h), v(-h, h, -h)], // -X
        [v(-h, h, h), v(h, h, h), v(h, h, -h), v(-h, h, -h)],     // +Y
        [v(-h, -h, -h), v(h, -h, -h), v(h, -h, h), v(-h, -h, h)], // -Y
    ];

    let mut data = MeshData::default();
    for face in &faces {
        push_face(&mut data, face, &QUAD_UVS, colour);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: [f32; 3] = [1.0; 3];

    fn check_well_formed(data: &MeshData) {
        assert!(!data.indices.is_empty());
        assert_eq!(data.indices.len() % 3, 0);
        for &i in &data.indices {
            assert!((i as usize) < data.vertices.len());
        }
        for vertex in &data.vertices {
            let length = Vec3::from(vertex.normal).length();
            assert!((length - 1.0).abs() < 1e-5);
        }
    }

    /// Every triangle's winding normal points away from `centre`
    fn check_outward(data: &MeshData, centre: Vec3) {
        for tri in data.indices.chunks_exact(3) {
            let [p0, p1, p2] = [0, 1, 2].map(|k| Vec3::from(data.vertices[tri[k] as usize].pos));
            let winding = (p1 - p0).cross(p2 - p0);
            let centroid = (p0 + p1 + p2) / 3.0;
            assert!(winding.dot(centroid - centre) > 0.0);
            assert!(winding.dot(Vec3::from(data.vertices[tri[0] as usize].normal)) > 0.0);
        }
    }

    #[test]
    fn quad_and_plane_face_their_axes() {
        let quad = quad(WHITE);
        check_well_formed(&quad);
        assert_eq!(quad.vertices[0].normal, [0.0, 0.0, 1.0]);

        let plane = plane(10.0, 4.0, WHITE);
        check_well_formed(&plane);
        assert_eq!(plane.vertices[0].normal, [0.0, 1.0, 0.0]);
        assert_eq!(plane.vertices[1].tex, [4.0, 4.0]);
    }

    #[test]
    fn pyramid_is_closed_and_outward() {
        let pyramid = pyramid(1.0, 2.0, WHITE);
        check_well_formed(&pyramid);
        assert_eq!(pyramid.indices.len(), 6 + 4 * 3);
        check_outward(&pyramid, Vec3::new(0.0, 0.5, 0.0));
    }

    #[test]
    fn cube_is_closed_and_outward() {
        let cube = cube(0.5, WHITE);
        check_well_formed(&cube);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        check_outward(&cube, Vec3::ZERO);
    }
}
